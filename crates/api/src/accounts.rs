//! Account lifecycle: sign-in, sign-up completion and account deletion

use std::collections::BTreeSet;
use std::sync::Arc;

use fleetseat_billing::SubscriptionService;
use fleetseat_shared::{
    AccountSubType, Fleet, FleetId, InvitationId, MembershipStore, StoreError, User,
};
use serde::Serialize;

use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::invitations::FleetLocks;

/// What an account deletion removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub fleets_deleted: u32,
    pub memberships_left: u32,
    pub invitations_removed: u32,
    pub records_purged: u64,
}

pub struct AccountService {
    store: Arc<dyn MembershipStore>,
    subscriptions: Arc<SubscriptionService>,
    locks: Arc<FleetLocks>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn MembershipStore>,
        subscriptions: Arc<SubscriptionService>,
        locks: Arc<FleetLocks>,
    ) -> Self {
        Self {
            store,
            subscriptions,
            locks,
        }
    }

    /// Account behind an authenticated caller. Placeholder accounts created by
    /// an invitation are matched on email.
    pub async fn resolve(&self, caller: &Caller) -> ApiResult<User> {
        if let Some(user) = self.store.get_user(caller.user_id).await? {
            return Ok(user);
        }
        self.store
            .find_user_by_email(&caller.email)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
    }

    async fn resolve_or_create(&self, caller: &Caller) -> ApiResult<User> {
        match self.resolve(caller).await {
            Ok(user) => return Ok(user),
            Err(ApiError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let mut user = User::new(&caller.email);
        user.id = caller.user_id;
        match self.store.insert_user(&user).await {
            Ok(()) => {
                tracing::info!(user_id = %user.id, "User created on first sign-in");
                Ok(user)
            }
            // Lost a race with a concurrent first request
            Err(StoreError::Conflict(_)) => self.resolve(caller).await,
            Err(e) => Err(e.into()),
        }
    }

    /// First successful passcode validation creates the account; every
    /// sign-in makes sure a subscription exists.
    pub async fn sign_in(&self, caller: &Caller) -> ApiResult<User> {
        let user = self.resolve_or_create(caller).await?;
        self.subscriptions.ensure_trial(user.id).await?;
        Ok(user)
    }

    /// Turn the caller into a fleet owner
    pub async fn complete_sign_up(
        &self,
        caller: &Caller,
        fleet_name: &str,
        is_individual: bool,
    ) -> ApiResult<(User, Fleet)> {
        if fleet_name.trim().is_empty() {
            return Err(ApiError::Validation("Fleet name is required".to_string()));
        }

        let user = self.resolve_or_create(caller).await?;
        if !self.store.fleets_owned_by(&user.email).await?.is_empty() {
            return Err(ApiError::Conflict(
                "Sign-up is already complete for this account".to_string(),
            ));
        }

        let fleet = Fleet::new(&user.email, fleet_name, is_individual);
        self.store.insert_fleet(&fleet).await?;

        // Owners cannot be invitees
        let pending = self.store.pending_invitations_for_email(&user.email).await?;
        let mut dropped = Vec::with_capacity(pending.len());
        for invitation in pending {
            if self.store.delete_pending_invitation(invitation.id).await? {
                self.store
                    .pull_fleet_invitation(invitation.fleet_id, invitation.id)
                    .await?;
                dropped.push(invitation.id);
            }
        }
        if !dropped.is_empty() {
            self.store.pull_invitations_from_all_users(&dropped).await?;
        }

        self.store.add_user_fleet(user.id, fleet.id).await?;
        let mut user = self
            .store
            .get_user(user.id)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
        user.account_sub_type = Some(AccountSubType::BusinessAdmin);
        user.is_sign_up_complete = true;
        user.selected_fleet = Some(fleet.id);
        self.store.save_user(&user).await?;

        self.subscriptions.ensure_trial(user.id).await?;

        tracing::info!(
            user_id = %user.id,
            fleet_id = %fleet.id,
            invitations_dropped = dropped.len(),
            "Sign-up completed"
        );

        Ok((user, fleet))
    }

    /// Delete the caller's account with its fleet cascade. Provider customer
    /// removal is best-effort.
    pub async fn delete_account(&self, caller: &Caller) -> ApiResult<DeletionReport> {
        let user = self.resolve(caller).await?;
        let mut report = DeletionReport::default();

        let mut fleet_ids: BTreeSet<_> = user.fleets.iter().map(|f| f.0).collect();
        for owned in self.store.fleets_owned_by(&user.email).await? {
            fleet_ids.insert(owned.id.0);
        }

        for fleet_id in fleet_ids.into_iter().map(FleetId) {
            let Some(fleet) = self.store.get_fleet(fleet_id).await? else {
                continue;
            };
            if fleet.is_owned_by(&user.email) {
                let (invitations, records) = self.delete_fleet(&fleet).await?;
                report.invitations_removed += invitations;
                report.records_purged += records;
                report.fleets_deleted += 1;
            } else {
                report.invitations_removed += self.leave_fleet(&fleet, &user).await?;
                report.memberships_left += 1;
            }
        }

        // Invitations to fleets the user never joined
        for invitation in self.store.pending_invitations_for_email(&user.email).await? {
            if self.store.delete_pending_invitation(invitation.id).await? {
                self.store
                    .pull_fleet_invitation(invitation.fleet_id, invitation.id)
                    .await?;
                report.invitations_removed += 1;
            }
        }

        self.store.delete_user(user.id).await?;
        self.subscriptions.remove_for_user(user.id).await?;

        tracing::info!(
            user_id = %user.id,
            fleets_deleted = report.fleets_deleted,
            memberships_left = report.memberships_left,
            invitations_removed = report.invitations_removed,
            "Account deleted"
        );

        Ok(report)
    }

    /// Returns (invitations removed, records purged)
    async fn delete_fleet(&self, fleet: &Fleet) -> ApiResult<(u32, u64)> {
        let guard = self.locks.acquire(fleet.id).await;

        let invitation_ids: Vec<InvitationId> = self
            .store
            .invitations_for_fleet(fleet.id)
            .await?
            .into_iter()
            .map(|i| i.id)
            .collect();
        if !invitation_ids.is_empty() {
            self.store
                .pull_invitations_from_all_users(&invitation_ids)
                .await?;
        }
        let invitations = self.store.delete_invitations_for_fleet(fleet.id).await?;
        let purged = self.store.purge_fleet_records(fleet.id).await?;
        self.store.pull_fleet_from_all_users(fleet.id).await?;
        self.store.delete_fleet(fleet.id).await?;

        drop(guard);
        self.locks.forget(fleet.id);

        tracing::info!(fleet_id = %fleet.id, records_purged = purged, "Fleet deleted");
        Ok((u32::try_from(invitations).unwrap_or(u32::MAX), purged))
    }

    async fn leave_fleet(&self, fleet: &Fleet, user: &User) -> ApiResult<u32> {
        let mut removed = 0;
        for invitation in self.store.invitations_for(fleet.id, &user.email).await? {
            if invitation.status.is_pending()
                && self.store.delete_pending_invitation(invitation.id).await?
            {
                self.store
                    .pull_fleet_invitation(fleet.id, invitation.id)
                    .await?;
                removed += 1;
            }
        }
        self.store.pull_member_email(fleet.id, &user.email).await?;
        Ok(removed)
    }
}
