//! Common types used across Fleetseat

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Fleet ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FleetId(pub Uuid);

impl FleetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FleetId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for FleetId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for FleetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Invitation ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvitationId(pub Uuid);

impl InvitationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InvitationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for InvitationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for InvitationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Account type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Admin,
    #[default]
    User,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::User => "USER",
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Ok(Self::Admin),
            "USER" => Ok(Self::User),
            _ => Err(format!("Invalid account type: {}", s)),
        }
    }
}

/// Account sub-type: fleet owners are business admins, invited members are drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountSubType {
    BusinessAdmin,
    Driver,
}

impl AccountSubType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BusinessAdmin => "BUSINESS_ADMIN",
            Self::Driver => "DRIVER",
        }
    }
}

impl std::fmt::Display for AccountSubType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AccountSubType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUSINESS_ADMIN" => Ok(Self::BusinessAdmin),
            "DRIVER" => Ok(Self::Driver),
            _ => Err(format!("Invalid account sub-type: {}", s)),
        }
    }
}

/// Invitation status
///
/// `Rejected` exists for the wire format only: rejecting an invitation deletes
/// the record, so a stored invitation is never in that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvitationStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InvitationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "ACCEPTED" => Ok(Self::Accepted),
            "REJECTED" => Ok(Self::Rejected),
            _ => Err(format!("Invalid invitation status: {}", s)),
        }
    }
}

/// Subscription plan tier
/// Seat hierarchy: Free (unlimited, trial) → Basic (1) → Standard (5) → Premium (15) → Enterprise (unlimited)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Plan {
    #[default]
    Free,
    Basic,
    Standard,
    Premium,
    Enterprise,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "FREE",
            Self::Basic => "BASIC",
            Self::Standard => "STANDARD",
            Self::Premium => "PREMIUM",
            Self::Enterprise => "ENTERPRISE",
        }
    }

    /// Whether this plan is billed through the payment provider
    pub fn is_paid(&self) -> bool {
        !matches!(self, Self::Free)
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "FREE" => Ok(Self::Free),
            "BASIC" => Ok(Self::Basic),
            "STANDARD" => Ok(Self::Standard),
            "PREMIUM" => Ok(Self::Premium),
            "ENTERPRISE" => Ok(Self::Enterprise),
            _ => Err(format!("Invalid plan: {}", s)),
        }
    }
}

/// Locally cached subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Trialing,
    Active,
    Cancelled,
    PastDue,
    Unpaid,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::PastDue => "past_due",
            Self::Unpaid => "unpaid",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trialing" => Ok(Self::Trialing),
            "active" => Ok(Self::Active),
            // Provider spelling is accepted on the way in
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "past_due" => Ok(Self::PastDue),
            "unpaid" => Ok(Self::Unpaid),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

// =============================================================================
// Documents
// =============================================================================

/// Identity anchor. `fleets`, `invitations` and `selected_fleet` are lookup-only
/// back-references and never drive deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub account_type: AccountType,
    pub account_sub_type: Option<AccountSubType>,
    pub is_sign_up_complete: bool,
    pub fleets: Vec<FleetId>,
    pub invitations: Vec<InvitationId>,
    pub selected_fleet: Option<FleetId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl User {
    /// A fresh account for `email` with no fleets and no sub-type yet
    pub fn new(email: &str) -> Self {
        let email = normalize_email(email);
        Self {
            id: UserId::new(),
            display_name: display_name_from_email(&email),
            email,
            account_type: AccountType::User,
            account_sub_type: None,
            is_sign_up_complete: false,
            fleets: Vec::new(),
            invitations: Vec::new(),
            selected_fleet: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Placeholder account created when an unregistered email is invited
    pub fn placeholder_driver(email: &str, invitation_id: InvitationId) -> Self {
        let mut user = Self::new(email);
        user.account_sub_type = Some(AccountSubType::Driver);
        user.invitations.push(invitation_id);
        user
    }

    pub fn is_business_admin(&self) -> bool {
        self.account_sub_type == Some(AccountSubType::BusinessAdmin)
    }
}

/// A billable organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fleet {
    pub id: FleetId,
    pub owner_email: String,
    pub name: String,
    pub members_emails: Vec<String>,
    pub invitations: Vec<InvitationId>,
    pub is_individual: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Fleet {
    pub fn new(owner_email: &str, name: &str, is_individual: bool) -> Self {
        Self {
            id: FleetId::new(),
            owner_email: normalize_email(owner_email),
            name: name.trim().to_string(),
            members_emails: Vec::new(),
            invitations: Vec::new(),
            is_individual,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn is_owned_by(&self, email: &str) -> bool {
        self.owner_email == normalize_email(email)
    }

    pub fn has_member(&self, email: &str) -> bool {
        let email = normalize_email(email);
        self.members_emails.iter().any(|m| *m == email)
    }
}

/// One membership offer from a fleet owner to an email address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: InvitationId,
    pub email: String,
    pub status: InvitationStatus,
    pub fleet_id: FleetId,
    pub fleet_name: String,
    pub user_id: Option<UserId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Invitation {
    pub fn pending(id: InvitationId, fleet: &Fleet, email: &str, user_id: Option<UserId>) -> Self {
        Self {
            id,
            email: normalize_email(email),
            status: InvitationStatus::Pending,
            fleet_id: fleet.id,
            fleet_name: fleet.name.clone(),
            user_id,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Cached mirror of the billing provider subscription, one per user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: UserId,
    pub plan: Plan,
    pub old_plan: Option<Plan>,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_ends_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub starts_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ends_at: Option<OffsetDateTime>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_product_id: Option<String>,
    pub stripe_price_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    /// FREE plan in trial until `trial_ends_at`
    pub fn trial(user_id: UserId, trial_ends_at: OffsetDateTime) -> Self {
        Self {
            user_id,
            plan: Plan::Free,
            old_plan: None,
            status: SubscriptionStatus::Trialing,
            trial_ends_at: Some(trial_ends_at),
            starts_at: None,
            ends_at: None,
            stripe_subscription_id: None,
            stripe_customer_id: None,
            stripe_product_id: None,
            stripe_price_id: None,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn trial_elapsed(&self, now: OffsetDateTime) -> bool {
        self.trial_ends_at.is_some_and(|t| t < now)
    }

    pub fn paid_period_elapsed(&self, now: OffsetDateTime) -> bool {
        self.ends_at.is_some_and(|t| t < now)
    }

    /// Provider subscription id when one is still attached
    pub fn live_provider_id(&self) -> Option<&str> {
        self.stripe_subscription_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Canonical form used for every stored and compared email
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Display name derived from the local-part of an email
pub fn display_name_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or_default().to_string()
}

pub fn is_valid_email(email: &str) -> bool {
    let email = normalize_email(email);
    if email.len() > 254 {
        return false;
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || local.len() > 64 {
        return false;
    }

    if domain.is_empty() || !domain.contains('.') {
        return false;
    }

    true
}
