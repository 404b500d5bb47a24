//! Invitation state machine
//!
//! `PENDING -> ACCEPTED` and `PENDING -> REJECTED` are the only transitions.
//! Rejection deletes the record, so nothing leaves a terminal state: a second
//! response finds either an ACCEPTED record (conflict) or nothing (not found).
//!
//! Each step is a single-document write. Uniqueness of the PENDING invitation
//! per (fleet, email) is backed by the store (`Conflict` on insert), and the
//! facade serialises invite creation per fleet with [`FleetLocks`].

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use fleetseat_billing::SubscriptionService;
use fleetseat_shared::{
    is_valid_email, normalize_email, AccountSubType, Fleet, FleetId, Invitation, InvitationId,
    InvitationStatus, MembershipStore, StoreError, User,
};
use tokio::sync::OwnedMutexGuard;

use crate::error::{ApiError, ApiResult};
use crate::notifications::{dispatch_best_effort, Notification, NotificationDispatcher};

/// Response to a pending invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationAction {
    Accept,
    Reject,
}

impl FromStr for InvitationAction {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ACCEPTED" | "ACCEPT" => Ok(Self::Accept),
            "REJECTED" | "REJECT" => Ok(Self::Reject),
            _ => Err(ApiError::Validation(format!(
                "Invalid invitation action: {}",
                s
            ))),
        }
    }
}

impl From<InvitationAction> for InvitationStatus {
    fn from(action: InvitationAction) -> Self {
        match action {
            InvitationAction::Accept => InvitationStatus::Accepted,
            InvitationAction::Reject => InvitationStatus::Rejected,
        }
    }
}

/// What a transition did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Accepted { fleet_id: FleetId },
    Rejected { user_deleted: bool },
}

/// One async mutex per fleet. Holding the guard serialises the seat guard and
/// the invitation insert for that fleet within this process.
#[derive(Default)]
pub struct FleetLocks {
    locks: Mutex<HashMap<FleetId, Arc<tokio::sync::Mutex<()>>>>,
}

impl FleetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, fleet_id: FleetId) -> OwnedMutexGuard<()> {
        let lock = match self.locks.lock() {
            Ok(mut locks) => locks.entry(fleet_id).or_default().clone(),
            // A poisoned map still hands out a fresh lock
            Err(poisoned) => poisoned.into_inner().entry(fleet_id).or_default().clone(),
        };
        lock.lock_owned().await
    }

    /// Drop the lock of a deleted fleet
    pub fn forget(&self, fleet_id: FleetId) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(&fleet_id);
        }
    }
}

pub struct InvitationStateMachine {
    store: Arc<dyn MembershipStore>,
    subscriptions: Arc<SubscriptionService>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl InvitationStateMachine {
    pub fn new(
        store: Arc<dyn MembershipStore>,
        subscriptions: Arc<SubscriptionService>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            subscriptions,
            notifier,
        }
    }

    /// Invite `invitee_email` to `fleet` on behalf of `inviter`
    pub async fn create(
        &self,
        fleet: &Fleet,
        invitee_email: &str,
        inviter: &User,
    ) -> ApiResult<Invitation> {
        let email = normalize_email(invitee_email);
        if !is_valid_email(&email) {
            return Err(ApiError::Validation("Invalid email format".to_string()));
        }

        if fleet.has_member(&email) {
            return Err(ApiError::Conflict(format!(
                "{} is already a member of {}",
                email, fleet.name
            )));
        }

        if !fleet.is_owned_by(&inviter.email) {
            return Err(ApiError::Forbidden(
                "Only the fleet owner can invite drivers".to_string(),
            ));
        }

        if inviter.email == email {
            return Err(ApiError::Validation("You cannot invite yourself".to_string()));
        }

        let existing_user = self.store.find_user_by_email(&email).await?;
        let owns_fleet = !self.store.fleets_owned_by(&email).await?.is_empty();
        if owns_fleet || existing_user.as_ref().is_some_and(User::is_business_admin) {
            return Err(ApiError::Conflict(
                "A business owner cannot be added as a driver".to_string(),
            ));
        }

        let pending = self
            .store
            .invitations_for(fleet.id, &email)
            .await?
            .into_iter()
            .any(|i| i.status.is_pending());
        if pending {
            return Err(ApiError::Conflict(format!(
                "{} already has a pending invitation to {}",
                email, fleet.name
            )));
        }

        let invitation_id = InvitationId::new();

        // The invitation insert is the uniqueness point, so it goes first
        let (invitation, notification) = match existing_user {
            Some(user) => {
                let invitation =
                    Invitation::pending(invitation_id, fleet, &email, Some(user.id));
                self.insert_invitation(&invitation).await?;
                self.store
                    .push_user_invitation(user.id, invitation_id)
                    .await?;
                let notification = Notification::InviteRegistered {
                    recipient: email.clone(),
                    fleet_name: fleet.name.clone(),
                    owner_email: fleet.owner_email.clone(),
                };
                (invitation, notification)
            }
            None => {
                let placeholder = User::placeholder_driver(&email, invitation_id);
                let invitation =
                    Invitation::pending(invitation_id, fleet, &email, Some(placeholder.id));
                self.insert_invitation(&invitation).await?;
                let invitation = self.insert_placeholder(invitation, &placeholder).await?;
                let notification = Notification::InviteUnregistered {
                    recipient: email.clone(),
                    fleet_name: fleet.name.clone(),
                    owner_email: fleet.owner_email.clone(),
                };
                (invitation, notification)
            }
        };

        self.store
            .push_fleet_invitation(fleet.id, invitation_id)
            .await?;

        tracing::info!(
            fleet_id = %fleet.id,
            invitation_id = %invitation_id,
            user_id = ?invitation.user_id,
            "Invitation created"
        );

        dispatch_best_effort(self.notifier.as_ref(), notification).await;
        Ok(invitation)
    }

    async fn insert_invitation(&self, invitation: &Invitation) -> ApiResult<()> {
        match self.store.insert_invitation(invitation).await {
            Err(StoreError::Conflict(_)) => Err(ApiError::Conflict(format!(
                "{} already has a pending invitation to {}",
                invitation.email, invitation.fleet_name
            ))),
            other => Ok(other?),
        }
    }

    /// Create the placeholder account. If a concurrent request registered the
    /// email first, attach the invitation to that account instead.
    async fn insert_placeholder(
        &self,
        mut invitation: Invitation,
        placeholder: &User,
    ) -> ApiResult<Invitation> {
        match self.store.insert_user(placeholder).await {
            Ok(()) => Ok(invitation),
            Err(StoreError::Conflict(_)) => {
                let user = self
                    .store
                    .find_user_by_email(&placeholder.email)
                    .await?
                    .ok_or_else(|| ApiError::Conflict("User registration in progress".to_string()))?;
                self.store
                    .push_user_invitation(user.id, invitation.id)
                    .await?;
                invitation.user_id = Some(user.id);
                // Keep the stored record's user reference in line
                self.store.delete_pending_invitation(invitation.id).await?;
                self.insert_invitation(&invitation).await?;
                Ok(invitation)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `action` to a PENDING invitation addressed to `actor`
    pub async fn transition(
        &self,
        invitation_id: InvitationId,
        action: InvitationAction,
        actor: &User,
        keep_current_selected_fleet: bool,
    ) -> ApiResult<TransitionOutcome> {
        let invitation = self
            .store
            .get_invitation(invitation_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Invitation not found".to_string()))?;

        if invitation.email != normalize_email(&actor.email) {
            return Err(ApiError::Forbidden(
                "This invitation was sent to a different email".to_string(),
            ));
        }

        if !invitation.status.is_pending() {
            return Err(ApiError::Conflict(format!(
                "Invitation already {}",
                invitation.status.as_str().to_lowercase()
            )));
        }

        match action {
            InvitationAction::Accept => {
                self.accept(&invitation, actor, keep_current_selected_fleet)
                    .await
            }
            InvitationAction::Reject => self.reject(&invitation, actor).await,
        }
    }

    async fn accept(
        &self,
        invitation: &Invitation,
        actor: &User,
        keep_current_selected_fleet: bool,
    ) -> ApiResult<TransitionOutcome> {
        let fleet = self
            .store
            .get_fleet(invitation.fleet_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Fleet not found".to_string()))?;

        if !self.store.accept_invitation(invitation.id, actor.id).await? {
            return Err(ApiError::Conflict(
                "Invitation is no longer pending".to_string(),
            ));
        }

        self.store
            .add_member_email(fleet.id, &invitation.email)
            .await?;
        self.store.add_user_fleet(actor.id, fleet.id).await?;
        self.store
            .pull_user_invitation(actor.id, invitation.id)
            .await?;

        // Re-read so the reference list writes above are not overwritten
        let mut user = self
            .store
            .get_user(actor.id)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
        user.account_sub_type = Some(AccountSubType::Driver);
        if !keep_current_selected_fleet {
            user.is_sign_up_complete = true;
            user.selected_fleet = Some(fleet.id);
        }
        self.store.save_user(&user).await?;

        tracing::info!(
            fleet_id = %fleet.id,
            invitation_id = %invitation.id,
            user_id = %actor.id,
            "Invitation accepted"
        );

        dispatch_best_effort(
            self.notifier.as_ref(),
            Notification::InvitationAccepted {
                owner_email: fleet.owner_email.clone(),
                driver_email: invitation.email.clone(),
                fleet_name: fleet.name.clone(),
            },
        )
        .await;

        Ok(TransitionOutcome::Accepted { fleet_id: fleet.id })
    }

    async fn reject(&self, invitation: &Invitation, actor: &User) -> ApiResult<TransitionOutcome> {
        if !self.store.delete_pending_invitation(invitation.id).await? {
            return Err(ApiError::NotFound(
                "Invitation is no longer pending".to_string(),
            ));
        }

        self.store
            .pull_fleet_invitation(invitation.fleet_id, invitation.id)
            .await?;
        self.store
            .pull_user_invitation(actor.id, invitation.id)
            .await?;

        // Placeholder cleanup. This also removes a self-registered account
        // that has no fleet yet.
        let remaining = self
            .store
            .pending_invitations_for_email(&invitation.email)
            .await?;
        let owned = self.store.fleets_owned_by(&invitation.email).await?;
        let user = self.store.get_user(actor.id).await?;
        let user_deleted = match user {
            Some(user) if user.fleets.is_empty() && owned.is_empty() && remaining.is_empty() => {
                self.store.delete_user(user.id).await?
            }
            _ => false,
        };
        // A subscription never outlives its user
        if user_deleted {
            self.subscriptions.remove_for_user(actor.id).await?;
        }

        tracing::info!(
            fleet_id = %invitation.fleet_id,
            invitation_id = %invitation.id,
            user_id = %actor.id,
            user_deleted = user_deleted,
            "Invitation rejected"
        );

        match self.store.get_fleet(invitation.fleet_id).await {
            Ok(Some(fleet)) => {
                dispatch_best_effort(
                    self.notifier.as_ref(),
                    Notification::InvitationRejected {
                        owner_email: fleet.owner_email,
                        driver_email: invitation.email.clone(),
                        fleet_name: fleet.name,
                    },
                )
                .await
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(
                fleet_id = %invitation.fleet_id,
                error = %e,
                "Could not load fleet for rejection notice"
            ),
        }

        Ok(TransitionOutcome::Rejected { user_deleted })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::notifications::RecordingDispatcher;
    use fleetseat_billing::{MockBillingGateway, PriceIds};
    use fleetseat_shared::{AccountType, InMemoryMembershipStore};

    struct Harness {
        store: Arc<InMemoryMembershipStore>,
        subscriptions: Arc<SubscriptionService>,
        notifier: Arc<RecordingDispatcher>,
        machine: InvitationStateMachine,
        owner: User,
        fleet: Fleet,
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryMembershipStore::new());
        let notifier = Arc::new(RecordingDispatcher::new());
        let subscriptions = Arc::new(SubscriptionService::new(
            store.clone(),
            Arc::new(MockBillingGateway::new()),
            PriceIds::default(),
            2,
        ));
        let machine =
            InvitationStateMachine::new(store.clone(), subscriptions.clone(), notifier.clone());

        let mut owner = User::new("owner@example.com");
        owner.account_type = AccountType::Admin;
        owner.account_sub_type = Some(AccountSubType::BusinessAdmin);
        let fleet = Fleet::new(&owner.email, "Acme Haulage", false);
        owner.fleets.push(fleet.id);
        store.insert_user(&owner).await.unwrap();
        store.insert_fleet(&fleet).await.unwrap();

        Harness {
            store,
            subscriptions,
            notifier,
            machine,
            owner,
            fleet,
        }
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("ACCEPTED".parse::<InvitationAction>().unwrap(), InvitationAction::Accept);
        assert_eq!("rejected".parse::<InvitationAction>().unwrap(), InvitationAction::Reject);
        assert!(matches!(
            "PENDING".parse::<InvitationAction>(),
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_invite_unregistered_creates_placeholder() {
        let h = harness().await;
        let invitation = h
            .machine
            .create(&h.fleet, "New.Driver@Example.com", &h.owner)
            .await
            .unwrap();

        let placeholder = h
            .store
            .find_user_by_email("new.driver@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(placeholder.account_sub_type, Some(AccountSubType::Driver));
        assert_eq!(placeholder.display_name, "new.driver");
        assert_eq!(placeholder.invitations, vec![invitation.id]);
        assert_eq!(invitation.user_id, Some(placeholder.id));

        let fleet = h.store.get_fleet(h.fleet.id).await.unwrap().unwrap();
        assert_eq!(fleet.invitations, vec![invitation.id]);
        assert_eq!(h.notifier.sent_with_key("invite-unregistered").len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejections() {
        let h = harness().await;

        // Self-invite
        let err = h.machine.create(&h.fleet, "OWNER@example.com", &h.owner).await;
        assert!(matches!(err, Err(ApiError::Validation(_))));

        // Not the owner
        let stranger = User::new("stranger@example.com");
        let err = h.machine.create(&h.fleet, "driver@example.com", &stranger).await;
        assert!(matches!(err, Err(ApiError::Forbidden(_))));

        // Business owner of another fleet
        let other_owner = Fleet::new("boss@example.com", "Other Co", false);
        h.store.insert_fleet(&other_owner).await.unwrap();
        let err = h.machine.create(&h.fleet, "boss@example.com", &h.owner).await;
        assert!(matches!(err, Err(ApiError::Conflict(_))));

        // Duplicate pending
        h.machine
            .create(&h.fleet, "driver@example.com", &h.owner)
            .await
            .unwrap();
        let err = h.machine.create(&h.fleet, "driver@example.com", &h.owner).await;
        assert!(matches!(err, Err(ApiError::Conflict(_))));

        assert!(matches!(
            h.machine.create(&h.fleet, "not-an-email", &h.owner).await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_accept_updates_membership_and_rejects_second_accept() {
        let h = harness().await;
        let invitation = h
            .machine
            .create(&h.fleet, "driver@example.com", &h.owner)
            .await
            .unwrap();
        let driver = h
            .store
            .find_user_by_email("driver@example.com")
            .await
            .unwrap()
            .unwrap();

        let outcome = h
            .machine
            .transition(invitation.id, InvitationAction::Accept, &driver, false)
            .await
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::Accepted { fleet_id: h.fleet.id });

        let fleet = h.store.get_fleet(h.fleet.id).await.unwrap().unwrap();
        assert_eq!(fleet.members_emails, vec!["driver@example.com".to_string()]);
        let driver = h.store.get_user(driver.id).await.unwrap().unwrap();
        assert_eq!(driver.fleets, vec![h.fleet.id]);
        assert_eq!(driver.selected_fleet, Some(h.fleet.id));
        assert!(driver.is_sign_up_complete);
        assert!(driver.invitations.is_empty());

        let second = h
            .machine
            .transition(invitation.id, InvitationAction::Accept, &driver, false)
            .await;
        assert!(matches!(second, Err(ApiError::Conflict(_))));
        assert_eq!(h.notifier.sent_with_key("invitation-accepted").len(), 1);
    }

    #[tokio::test]
    async fn test_accept_keeping_selected_fleet() {
        let h = harness().await;
        let invitation = h
            .machine
            .create(&h.fleet, "driver@example.com", &h.owner)
            .await
            .unwrap();
        let driver = h
            .store
            .find_user_by_email("driver@example.com")
            .await
            .unwrap()
            .unwrap();

        h.machine
            .transition(invitation.id, InvitationAction::Accept, &driver, true)
            .await
            .unwrap();
        let driver = h.store.get_user(driver.id).await.unwrap().unwrap();
        assert_eq!(driver.selected_fleet, None);
        assert!(!driver.is_sign_up_complete);
        assert_eq!(driver.fleets, vec![h.fleet.id]);
    }

    #[tokio::test]
    async fn test_reject_deletes_placeholder_user() {
        let h = harness().await;
        let invitation = h
            .machine
            .create(&h.fleet, "driver@example.com", &h.owner)
            .await
            .unwrap();
        let driver = h
            .store
            .find_user_by_email("driver@example.com")
            .await
            .unwrap()
            .unwrap();

        let outcome = h
            .machine
            .transition(invitation.id, InvitationAction::Reject, &driver, false)
            .await
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::Rejected { user_deleted: true });
        assert!(h.store.get_invitation(invitation.id).await.unwrap().is_none());
        assert!(h.store.get_user(driver.id).await.unwrap().is_none());
        let fleet = h.store.get_fleet(h.fleet.id).await.unwrap().unwrap();
        assert!(fleet.invitations.is_empty());
        assert_eq!(h.notifier.sent_with_key("invitation-rejected").len(), 1);

        let again = h
            .machine
            .transition(invitation.id, InvitationAction::Reject, &driver, false)
            .await;
        assert!(matches!(again, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reject_removes_subscription_of_deleted_user() {
        let h = harness().await;
        let driver = User::new("driver@example.com");
        h.store.insert_user(&driver).await.unwrap();
        h.subscriptions.ensure_trial(driver.id).await.unwrap();
        let invitation = h
            .machine
            .create(&h.fleet, "driver@example.com", &h.owner)
            .await
            .unwrap();

        let outcome = h
            .machine
            .transition(invitation.id, InvitationAction::Reject, &driver, false)
            .await
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::Rejected { user_deleted: true });
        assert!(h.store.get_subscription(driver.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reject_keeps_user_with_other_pending_invitation() {
        let h = harness().await;
        let second_fleet = Fleet::new(&h.owner.email, "Acme Logistics", false);
        h.store.insert_fleet(&second_fleet).await.unwrap();

        let first = h
            .machine
            .create(&h.fleet, "driver@example.com", &h.owner)
            .await
            .unwrap();
        let second = h
            .machine
            .create(&second_fleet, "driver@example.com", &h.owner)
            .await
            .unwrap();
        let driver = h
            .store
            .find_user_by_email("driver@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(driver.invitations, vec![first.id, second.id]);

        let outcome = h
            .machine
            .transition(first.id, InvitationAction::Reject, &driver, false)
            .await
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::Rejected { user_deleted: false });
        let driver = h.store.get_user(driver.id).await.unwrap().unwrap();
        assert_eq!(driver.invitations, vec![second.id]);
    }

    #[tokio::test]
    async fn test_transition_requires_matching_email() {
        let h = harness().await;
        let invitation = h
            .machine
            .create(&h.fleet, "driver@example.com", &h.owner)
            .await
            .unwrap();
        let intruder = User::new("intruder@example.com");
        let err = h
            .machine
            .transition(invitation.id, InvitationAction::Accept, &intruder, false)
            .await;
        assert!(matches!(err, Err(ApiError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_undo_transition() {
        let h = harness().await;
        h.notifier.set_failing(true);
        let invitation = h
            .machine
            .create(&h.fleet, "driver@example.com", &h.owner)
            .await
            .unwrap();
        assert!(h.store.get_invitation(invitation.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fleet_locks_serialise_per_fleet() {
        let locks = Arc::new(FleetLocks::new());
        let fleet_id = FleetId::new();
        let guard = locks.acquire(fleet_id).await;

        let other = locks.acquire(FleetId::new()).await;
        drop(other);

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(fleet_id).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
    }
}
