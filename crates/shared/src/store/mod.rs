//! Membership storage
//!
//! Persistence over the four membership documents (User, Fleet, Invitation,
//! Subscription). Every method is a single-document read or write; there is no
//! multi-document transaction. The only cross-document primitive is
//! [`MembershipStore::usage_count`], the owner → fleets → invitations join that
//! meters seats.
//!
//! Two backends ship with the crate:
//! - [`PgMembershipStore`] for production (Postgres, array columns)
//! - [`InMemoryMembershipStore`] for tests and local development

mod memory;
mod postgres;

pub use memory::InMemoryMembershipStore;
pub use postgres::PgMembershipStore;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{Fleet, FleetId, Invitation, InvitationId, Subscription, User, UserId};

#[async_trait]
pub trait MembershipStore: Send + Sync {
    // === Users ===

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Insert a new user. `Conflict` when the email is already registered.
    async fn insert_user(&self, user: &User) -> StoreResult<()>;

    /// Replace a user document. Last writer wins.
    async fn save_user(&self, user: &User) -> StoreResult<()>;

    async fn delete_user(&self, id: UserId) -> StoreResult<bool>;

    /// Append a fleet reference unless already present
    async fn add_user_fleet(&self, id: UserId, fleet_id: FleetId) -> StoreResult<()>;

    async fn push_user_invitation(&self, id: UserId, invitation_id: InvitationId)
        -> StoreResult<()>;

    async fn pull_user_invitation(&self, id: UserId, invitation_id: InvitationId)
        -> StoreResult<()>;

    /// Remove a fleet reference from every user holding it, clearing it as the
    /// selected fleet as well. Returns the number of users touched.
    async fn pull_fleet_from_all_users(&self, fleet_id: FleetId) -> StoreResult<u64>;

    /// Remove invitation references from every user holding them
    async fn pull_invitations_from_all_users(&self, ids: &[InvitationId]) -> StoreResult<u64>;

    // === Fleets ===

    async fn get_fleet(&self, id: FleetId) -> StoreResult<Option<Fleet>>;

    async fn fleets_owned_by(&self, email: &str) -> StoreResult<Vec<Fleet>>;

    async fn insert_fleet(&self, fleet: &Fleet) -> StoreResult<()>;

    async fn delete_fleet(&self, id: FleetId) -> StoreResult<bool>;

    /// Add an accepted driver. No-op for duplicates and for the owner's own email.
    async fn add_member_email(&self, id: FleetId, email: &str) -> StoreResult<()>;

    async fn pull_member_email(&self, id: FleetId, email: &str) -> StoreResult<()>;

    async fn push_fleet_invitation(&self, id: FleetId, invitation_id: InvitationId)
        -> StoreResult<()>;

    async fn pull_fleet_invitation(&self, id: FleetId, invitation_id: InvitationId)
        -> StoreResult<()>;

    /// Delete the opaque fleet-scoped records. Returns the number removed.
    async fn purge_fleet_records(&self, id: FleetId) -> StoreResult<u64>;

    // === Invitations ===

    async fn get_invitation(&self, id: InvitationId) -> StoreResult<Option<Invitation>>;

    /// Every invitation for (fleet, email), newest first
    async fn invitations_for(&self, fleet_id: FleetId, email: &str)
        -> StoreResult<Vec<Invitation>>;

    async fn pending_invitations_for_email(&self, email: &str) -> StoreResult<Vec<Invitation>>;

    async fn invitations_for_fleet(&self, fleet_id: FleetId) -> StoreResult<Vec<Invitation>>;

    /// Insert an invitation. `Conflict` when a PENDING one already exists for
    /// the same (fleet, email).
    async fn insert_invitation(&self, invitation: &Invitation) -> StoreResult<()>;

    /// PENDING → ACCEPTED compare-and-set. `false` when the invitation is gone
    /// or no longer pending.
    async fn accept_invitation(&self, id: InvitationId, user_id: UserId) -> StoreResult<bool>;

    /// Delete an invitation only while it is PENDING
    async fn delete_pending_invitation(&self, id: InvitationId) -> StoreResult<bool>;

    async fn delete_invitations_for_fleet(&self, fleet_id: FleetId) -> StoreResult<u64>;

    // === Subscriptions ===

    async fn get_subscription(&self, user_id: UserId) -> StoreResult<Option<Subscription>>;

    async fn find_subscription_by_provider_id(
        &self,
        stripe_subscription_id: &str,
    ) -> StoreResult<Option<Subscription>>;

    /// Subscriptions that still reference a provider subscription
    async fn subscriptions_with_provider_ids(&self) -> StoreResult<Vec<Subscription>>;

    /// Upsert keyed by user
    async fn save_subscription(&self, subscription: &Subscription) -> StoreResult<()>;

    async fn delete_subscription(&self, user_id: UserId) -> StoreResult<bool>;

    // === Aggregation ===

    /// Seats metered against `owner_id`'s plan: owner email → owned fleets →
    /// invitations of those fleets, counted in ANY status.
    async fn usage_count(&self, owner_id: UserId) -> StoreResult<u64>;
}
