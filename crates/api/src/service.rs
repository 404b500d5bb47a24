//! Operation facade
//!
//! The produced API surface. Every operation authenticates the caller,
//! delegates to the state machine, the account service or the subscription
//! service, and converts the outcome into an [`Envelope`]. One audit event is
//! recorded per call, success or failure.

use std::sync::Arc;

use fleetseat_billing::{
    seats, BillingGateway, PriceIds, SubscriptionReconciler, SubscriptionService,
};
use fleetseat_shared::{
    normalize_email, AccountType, FleetId, Invitation, MembershipStore, Plan, User, UserId,
};

use crate::accounts::AccountService;
use crate::audit::{AuditEvent, AuditSink, CredentialMarker, Operation};
use crate::auth::{Caller, IdentityProvider};
use crate::error::{ApiError, ApiResult, Envelope};
use crate::invitations::{
    FleetLocks, InvitationAction, InvitationStateMachine, TransitionOutcome,
};
use crate::notifications::NotificationDispatcher;

/// Collaborators the facade is built from
pub struct ServiceDeps {
    pub store: Arc<dyn MembershipStore>,
    pub gateway: Arc<dyn BillingGateway>,
    pub identity: Arc<dyn IdentityProvider>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub audit: Arc<dyn AuditSink>,
    pub prices: PriceIds,
    pub trial_months: u8,
}

pub struct FleetseatService {
    store: Arc<dyn MembershipStore>,
    identity: Arc<dyn IdentityProvider>,
    audit: Arc<dyn AuditSink>,
    reconciler: SubscriptionReconciler,
    subscriptions: Arc<SubscriptionService>,
    invitations: InvitationStateMachine,
    accounts: AccountService,
    locks: Arc<FleetLocks>,
}

impl FleetseatService {
    pub fn new(deps: ServiceDeps) -> Self {
        let locks = Arc::new(FleetLocks::new());
        let subscriptions = Arc::new(SubscriptionService::new(
            deps.store.clone(),
            deps.gateway.clone(),
            deps.prices,
            deps.trial_months,
        ));
        Self {
            reconciler: SubscriptionReconciler::new(deps.store.clone(), deps.gateway),
            invitations: InvitationStateMachine::new(
                deps.store.clone(),
                subscriptions.clone(),
                deps.notifier,
            ),
            accounts: AccountService::new(
                deps.store.clone(),
                subscriptions.clone(),
                locks.clone(),
            ),
            store: deps.store,
            identity: deps.identity,
            audit: deps.audit,
            subscriptions,
            locks,
        }
    }

    fn finish(
        &self,
        operation: Operation,
        credential: Option<&str>,
        actor: Option<UserId>,
        result: ApiResult<String>,
    ) -> Envelope {
        let envelope = match result {
            Ok(message) => Envelope::ok(message),
            Err(e) => e.into_envelope(),
        };
        self.audit.record(AuditEvent {
            operation,
            actor,
            credential: CredentialMarker::of(credential),
            outcome: envelope.status,
            message: envelope.message.clone(),
        });
        envelope
    }

    async fn identify(&self, credential: Option<&str>) -> ApiResult<Caller> {
        Ok(self.identity.identify(credential).await?)
    }

    async fn authenticated_user(
        &self,
        credential: Option<&str>,
        actor: &mut Option<UserId>,
    ) -> ApiResult<User> {
        let caller = self.identify(credential).await?;
        *actor = Some(caller.user_id);
        let user = self.accounts.resolve(&caller).await?;
        *actor = Some(user.id);
        Ok(user)
    }

    /// The invitation a response refers to: the pending one if any, otherwise
    /// the newest, so a repeated response reports its terminal state.
    async fn find_invitation(&self, fleet_id: FleetId, email: &str) -> ApiResult<Invitation> {
        let invitations = self.store.invitations_for(fleet_id, email).await?;
        invitations
            .iter()
            .find(|i| i.status.is_pending())
            .or_else(|| invitations.first())
            .cloned()
            .ok_or_else(|| ApiError::NotFound("Invitation not found".to_string()))
    }

    // === Invitations ===

    pub async fn invite_user(
        &self,
        credential: Option<&str>,
        fleet_id: FleetId,
        email: &str,
    ) -> Envelope {
        let mut actor = None;
        let result = self
            .try_invite_user(credential, fleet_id, email, &mut actor)
            .await;
        self.finish(Operation::InviteUser, credential, actor, result)
    }

    async fn try_invite_user(
        &self,
        credential: Option<&str>,
        fleet_id: FleetId,
        email: &str,
        actor: &mut Option<UserId>,
    ) -> ApiResult<String> {
        let owner = self.authenticated_user(credential, actor).await?;
        let fleet = self
            .store
            .get_fleet(fleet_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Fleet not found".to_string()))?;

        // Same precedence as the state machine: membership, then ownership.
        // Both run before the provider round trip.
        let invitee = normalize_email(email);
        if fleet.has_member(&invitee) {
            return Err(ApiError::Conflict(format!(
                "{} is already a member of {}",
                invitee, fleet.name
            )));
        }
        if !fleet.is_owned_by(&owner.email) {
            return Err(ApiError::Forbidden(
                "Only the fleet owner can invite drivers".to_string(),
            ));
        }

        let subscription = self.reconciler.refresh(owner.id).await?;

        let _guard = self.locks.acquire(fleet.id).await;
        let usage = self.store.usage_count(owner.id).await?;
        seats::guard(usage, subscription.plan.as_str()).into_result()?;

        let invitation = self.invitations.create(&fleet, email, &owner).await?;
        Ok(format!("Invitation sent to {}", invitation.email))
    }

    pub async fn respond_to_invitation(
        &self,
        credential: Option<&str>,
        fleet_id: FleetId,
        action: &str,
        skip_fleet_switch: Option<bool>,
    ) -> Envelope {
        let mut actor = None;
        let result = self
            .try_respond_to_invitation(credential, fleet_id, action, skip_fleet_switch, &mut actor)
            .await;
        self.finish(Operation::RespondToInvitation, credential, actor, result)
    }

    async fn try_respond_to_invitation(
        &self,
        credential: Option<&str>,
        fleet_id: FleetId,
        action: &str,
        skip_fleet_switch: Option<bool>,
        actor: &mut Option<UserId>,
    ) -> ApiResult<String> {
        let user = self.authenticated_user(credential, actor).await?;
        self.respond(fleet_id, action, &user, skip_fleet_switch).await
    }

    /// Same transition, with the invitee named by email instead of a credential
    pub async fn respond_to_invitation_by_email(
        &self,
        fleet_id: FleetId,
        email: &str,
        action: &str,
        skip_fleet_switch: Option<bool>,
    ) -> Envelope {
        let mut actor = None;
        let result = self
            .try_respond_to_invitation_by_email(
                fleet_id,
                email,
                action,
                skip_fleet_switch,
                &mut actor,
            )
            .await;
        self.finish(Operation::RespondToInvitationByEmail, None, actor, result)
    }

    async fn try_respond_to_invitation_by_email(
        &self,
        fleet_id: FleetId,
        email: &str,
        action: &str,
        skip_fleet_switch: Option<bool>,
        actor: &mut Option<UserId>,
    ) -> ApiResult<String> {
        let user = self
            .store
            .find_user_by_email(&normalize_email(email))
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
        *actor = Some(user.id);
        self.respond(fleet_id, action, &user, skip_fleet_switch).await
    }

    async fn respond(
        &self,
        fleet_id: FleetId,
        action: &str,
        user: &User,
        skip_fleet_switch: Option<bool>,
    ) -> ApiResult<String> {
        let action: InvitationAction = action.parse()?;
        let invitation = self.find_invitation(fleet_id, &user.email).await?;
        let outcome = self
            .invitations
            .transition(
                invitation.id,
                action,
                user,
                skip_fleet_switch.unwrap_or(false),
            )
            .await?;
        Ok(match outcome {
            TransitionOutcome::Accepted { .. } => {
                format!("You joined {}", invitation.fleet_name)
            }
            TransitionOutcome::Rejected { .. } => {
                format!("Invitation to {} declined", invitation.fleet_name)
            }
        })
    }

    // === Subscriptions ===

    pub async fn create_subscription(
        &self,
        credential: Option<&str>,
        payment_method_id: &str,
        plan: &str,
        user_id: UserId,
    ) -> Envelope {
        let mut actor = None;
        let result = self
            .try_create_subscription(credential, payment_method_id, plan, user_id, &mut actor)
            .await;
        self.finish(Operation::CreateSubscription, credential, actor, result)
    }

    async fn try_create_subscription(
        &self,
        credential: Option<&str>,
        payment_method_id: &str,
        plan: &str,
        user_id: UserId,
        actor: &mut Option<UserId>,
    ) -> ApiResult<String> {
        let caller = self.authenticated_user(credential, actor).await?;
        let plan: Plan = plan.parse().map_err(ApiError::Validation)?;

        // ADMIN accounts may manage any user's subscription
        let target = if caller.id == user_id {
            caller
        } else if caller.account_type == AccountType::Admin {
            self.store
                .get_user(user_id)
                .await?
                .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?
        } else {
            return Err(ApiError::Forbidden(
                "You can only manage your own subscription".to_string(),
            ));
        };

        let subscription = self
            .subscriptions
            .create_subscription(&target, payment_method_id, plan)
            .await?;
        Ok(format!("Subscribed to the {} plan", subscription.plan))
    }

    pub async fn cancel_subscription(
        &self,
        credential: Option<&str>,
        subscription_id: &str,
    ) -> Envelope {
        let mut actor = None;
        let result = self
            .try_cancel_subscription(credential, subscription_id, &mut actor)
            .await;
        self.finish(Operation::CancelSubscription, credential, actor, result)
    }

    async fn try_cancel_subscription(
        &self,
        credential: Option<&str>,
        subscription_id: &str,
        actor: &mut Option<UserId>,
    ) -> ApiResult<String> {
        let user = self.authenticated_user(credential, actor).await?;
        let subscription = self
            .subscriptions
            .cancel_subscription(&user, subscription_id)
            .await?;
        Ok(match subscription.ends_at {
            Some(ends_at) => format!(
                "Subscription cancelled, paid access continues until {}",
                ends_at.date()
            ),
            None => "Subscription cancelled".to_string(),
        })
    }

    pub async fn refund_and_cancel(
        &self,
        credential: Option<&str>,
        invoice_id: &str,
        customer_id: &str,
        subscription_id: &str,
    ) -> Envelope {
        let mut actor = None;
        let result = self
            .try_refund_and_cancel(credential, invoice_id, customer_id, subscription_id, &mut actor)
            .await;
        self.finish(Operation::RefundAndCancel, credential, actor, result)
    }

    async fn try_refund_and_cancel(
        &self,
        credential: Option<&str>,
        invoice_id: &str,
        customer_id: &str,
        subscription_id: &str,
        actor: &mut Option<UserId>,
    ) -> ApiResult<String> {
        let user = self.authenticated_user(credential, actor).await?;
        self.subscriptions
            .refund_and_cancel(&user, invoice_id, customer_id, subscription_id)
            .await?;
        Ok("Refund issued and subscription cancelled".to_string())
    }

    pub async fn delete_customer(&self, credential: Option<&str>, customer_id: &str) -> Envelope {
        let mut actor = None;
        let result = self
            .try_delete_customer(credential, customer_id, &mut actor)
            .await;
        self.finish(Operation::DeleteCustomer, credential, actor, result)
    }

    async fn try_delete_customer(
        &self,
        credential: Option<&str>,
        customer_id: &str,
        actor: &mut Option<UserId>,
    ) -> ApiResult<String> {
        let user = self.authenticated_user(credential, actor).await?;
        self.subscriptions.delete_customer(&user, customer_id).await?;
        Ok("Billing customer deleted".to_string())
    }

    // === Accounts ===

    pub async fn delete_account(&self, credential: Option<&str>) -> Envelope {
        let mut actor = None;
        let result = self.try_delete_account(credential, &mut actor).await;
        self.finish(Operation::DeleteAccount, credential, actor, result)
    }

    async fn try_delete_account(
        &self,
        credential: Option<&str>,
        actor: &mut Option<UserId>,
    ) -> ApiResult<String> {
        let caller = self.identify(credential).await?;
        *actor = Some(caller.user_id);
        self.accounts.delete_account(&caller).await?;
        Ok("Account deleted".to_string())
    }

    pub async fn sign_up(
        &self,
        credential: Option<&str>,
        fleet_name: &str,
        is_individual: bool,
    ) -> Envelope {
        let mut actor = None;
        let result = self
            .try_sign_up(credential, fleet_name, is_individual, &mut actor)
            .await;
        self.finish(Operation::SignUp, credential, actor, result)
    }

    async fn try_sign_up(
        &self,
        credential: Option<&str>,
        fleet_name: &str,
        is_individual: bool,
        actor: &mut Option<UserId>,
    ) -> ApiResult<String> {
        let caller = self.identify(credential).await?;
        *actor = Some(caller.user_id);
        let (user, fleet) = self
            .accounts
            .complete_sign_up(&caller, fleet_name, is_individual)
            .await?;
        *actor = Some(user.id);
        Ok(format!("Sign-up complete, {} is ready", fleet.name))
    }

    pub async fn sign_in(&self, credential: Option<&str>) -> Envelope {
        let mut actor = None;
        let result = self.try_sign_in(credential, &mut actor).await;
        self.finish(Operation::SignIn, credential, actor, result)
    }

    async fn try_sign_in(
        &self,
        credential: Option<&str>,
        actor: &mut Option<UserId>,
    ) -> ApiResult<String> {
        let caller = self.identify(credential).await?;
        *actor = Some(caller.user_id);
        let user = self.accounts.sign_in(&caller).await?;
        *actor = Some(user.id);
        Ok("Signed in".to_string())
    }
}
