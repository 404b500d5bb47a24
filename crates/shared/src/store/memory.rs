//! In-memory membership store (for development and tests without Postgres)

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::MembershipStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{
    normalize_email, Fleet, FleetId, Invitation, InvitationId, InvitationStatus, Subscription,
    User, UserId,
};

#[derive(Default)]
struct Collections {
    users: HashMap<UserId, User>,
    fleets: HashMap<FleetId, Fleet>,
    invitations: HashMap<InvitationId, Invitation>,
    subscriptions: HashMap<UserId, Subscription>,
    /// fleet id -> number of opaque fleet-scoped records
    fleet_records: HashMap<FleetId, u64>,
}

/// Each method takes the lock once, so every call is atomic on its own,
/// matching the single-document guarantee of the Postgres backend.
#[derive(Default)]
pub struct InMemoryMembershipStore {
    inner: RwLock<Collections>,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record opaque fleet-scoped data so cascades can be observed
    pub async fn add_fleet_records(&self, fleet_id: FleetId, count: u64) {
        let mut inner = self.inner.write().await;
        *inner.fleet_records.entry(fleet_id).or_insert(0) += count;
    }

    pub async fn fleet_record_count(&self, fleet_id: FleetId) -> u64 {
        let inner = self.inner.read().await;
        inner.fleet_records.get(&fleet_id).copied().unwrap_or(0)
    }

    pub async fn user_count(&self) -> usize {
        self.inner.read().await.users.len()
    }

    pub async fn invitation_count(&self) -> usize {
        self.inner.read().await.invitations.len()
    }
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, item: T) {
    if !list.contains(&item) {
        list.push(item);
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = normalize_email(email);
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!(
                "user with email {} already exists",
                user.email
            )));
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn save_user(&self, user: &User) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        match inner.users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("user {}", user.id))),
        }
    }

    async fn delete_user(&self, id: UserId) -> StoreResult<bool> {
        Ok(self.inner.write().await.users.remove(&id).is_some())
    }

    async fn add_user_fleet(&self, id: UserId, fleet_id: FleetId) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get_mut(&id) {
            push_unique(&mut user.fleets, fleet_id);
        }
        Ok(())
    }

    async fn push_user_invitation(
        &self,
        id: UserId,
        invitation_id: InvitationId,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get_mut(&id) {
            push_unique(&mut user.invitations, invitation_id);
        }
        Ok(())
    }

    async fn pull_user_invitation(
        &self,
        id: UserId,
        invitation_id: InvitationId,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get_mut(&id) {
            user.invitations.retain(|i| *i != invitation_id);
        }
        Ok(())
    }

    async fn pull_fleet_from_all_users(&self, fleet_id: FleetId) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut touched = 0;
        for user in inner.users.values_mut() {
            let held = user.fleets.contains(&fleet_id) || user.selected_fleet == Some(fleet_id);
            if held {
                user.fleets.retain(|f| *f != fleet_id);
                if user.selected_fleet == Some(fleet_id) {
                    user.selected_fleet = None;
                }
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn pull_invitations_from_all_users(&self, ids: &[InvitationId]) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut touched = 0;
        for user in inner.users.values_mut() {
            let before = user.invitations.len();
            user.invitations.retain(|i| !ids.contains(i));
            if user.invitations.len() != before {
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn get_fleet(&self, id: FleetId) -> StoreResult<Option<Fleet>> {
        Ok(self.inner.read().await.fleets.get(&id).cloned())
    }

    async fn fleets_owned_by(&self, email: &str) -> StoreResult<Vec<Fleet>> {
        let email = normalize_email(email);
        let inner = self.inner.read().await;
        let mut fleets: Vec<Fleet> = inner
            .fleets
            .values()
            .filter(|f| f.owner_email == email)
            .cloned()
            .collect();
        fleets.sort_by_key(|f| f.created_at);
        Ok(fleets)
    }

    async fn insert_fleet(&self, fleet: &Fleet) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.fleets.contains_key(&fleet.id) {
            return Err(StoreError::Conflict(format!("fleet {} already exists", fleet.id)));
        }
        inner.fleets.insert(fleet.id, fleet.clone());
        Ok(())
    }

    async fn delete_fleet(&self, id: FleetId) -> StoreResult<bool> {
        Ok(self.inner.write().await.fleets.remove(&id).is_some())
    }

    async fn add_member_email(&self, id: FleetId, email: &str) -> StoreResult<()> {
        let email = normalize_email(email);
        let mut inner = self.inner.write().await;
        if let Some(fleet) = inner.fleets.get_mut(&id) {
            if fleet.owner_email != email {
                push_unique(&mut fleet.members_emails, email);
            }
        }
        Ok(())
    }

    async fn pull_member_email(&self, id: FleetId, email: &str) -> StoreResult<()> {
        let email = normalize_email(email);
        let mut inner = self.inner.write().await;
        if let Some(fleet) = inner.fleets.get_mut(&id) {
            fleet.members_emails.retain(|m| *m != email);
        }
        Ok(())
    }

    async fn push_fleet_invitation(
        &self,
        id: FleetId,
        invitation_id: InvitationId,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(fleet) = inner.fleets.get_mut(&id) {
            push_unique(&mut fleet.invitations, invitation_id);
        }
        Ok(())
    }

    async fn pull_fleet_invitation(
        &self,
        id: FleetId,
        invitation_id: InvitationId,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(fleet) = inner.fleets.get_mut(&id) {
            fleet.invitations.retain(|i| *i != invitation_id);
        }
        Ok(())
    }

    async fn purge_fleet_records(&self, id: FleetId) -> StoreResult<u64> {
        Ok(self
            .inner
            .write()
            .await
            .fleet_records
            .remove(&id)
            .unwrap_or(0))
    }

    async fn get_invitation(&self, id: InvitationId) -> StoreResult<Option<Invitation>> {
        Ok(self.inner.read().await.invitations.get(&id).cloned())
    }

    async fn invitations_for(
        &self,
        fleet_id: FleetId,
        email: &str,
    ) -> StoreResult<Vec<Invitation>> {
        let email = normalize_email(email);
        let inner = self.inner.read().await;
        let mut invitations: Vec<Invitation> = inner
            .invitations
            .values()
            .filter(|i| i.fleet_id == fleet_id && i.email == email)
            .cloned()
            .collect();
        invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invitations)
    }

    async fn pending_invitations_for_email(&self, email: &str) -> StoreResult<Vec<Invitation>> {
        let email = normalize_email(email);
        let inner = self.inner.read().await;
        Ok(inner
            .invitations
            .values()
            .filter(|i| i.email == email && i.status.is_pending())
            .cloned()
            .collect())
    }

    async fn invitations_for_fleet(&self, fleet_id: FleetId) -> StoreResult<Vec<Invitation>> {
        let inner = self.inner.read().await;
        Ok(inner
            .invitations
            .values()
            .filter(|i| i.fleet_id == fleet_id)
            .cloned()
            .collect())
    }

    async fn insert_invitation(&self, invitation: &Invitation) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let duplicate = invitation.status.is_pending()
            && inner.invitations.values().any(|i| {
                i.fleet_id == invitation.fleet_id
                    && i.email == invitation.email
                    && i.status.is_pending()
            });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "pending invitation for {} already exists in fleet {}",
                invitation.email, invitation.fleet_id
            )));
        }
        inner.invitations.insert(invitation.id, invitation.clone());
        Ok(())
    }

    async fn accept_invitation(&self, id: InvitationId, user_id: UserId) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.invitations.get_mut(&id) {
            Some(invitation) if invitation.status.is_pending() => {
                invitation.status = InvitationStatus::Accepted;
                invitation.user_id = Some(user_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_pending_invitation(&self, id: InvitationId) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let pending = inner
            .invitations
            .get(&id)
            .is_some_and(|i| i.status.is_pending());
        if pending {
            inner.invitations.remove(&id);
        }
        Ok(pending)
    }

    async fn delete_invitations_for_fleet(&self, fleet_id: FleetId) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.invitations.len();
        inner.invitations.retain(|_, i| i.fleet_id != fleet_id);
        Ok((before - inner.invitations.len()) as u64)
    }

    async fn get_subscription(&self, user_id: UserId) -> StoreResult<Option<Subscription>> {
        Ok(self.inner.read().await.subscriptions.get(&user_id).cloned())
    }

    async fn find_subscription_by_provider_id(
        &self,
        stripe_subscription_id: &str,
    ) -> StoreResult<Option<Subscription>> {
        let inner = self.inner.read().await;
        Ok(inner
            .subscriptions
            .values()
            .find(|s| s.stripe_subscription_id.as_deref() == Some(stripe_subscription_id))
            .cloned())
    }

    async fn subscriptions_with_provider_ids(&self) -> StoreResult<Vec<Subscription>> {
        let inner = self.inner.read().await;
        Ok(inner
            .subscriptions
            .values()
            .filter(|s| s.live_provider_id().is_some())
            .cloned()
            .collect())
    }

    async fn save_subscription(&self, subscription: &Subscription) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .subscriptions
            .insert(subscription.user_id, subscription.clone());
        Ok(())
    }

    async fn delete_subscription(&self, user_id: UserId) -> StoreResult<bool> {
        Ok(self
            .inner
            .write()
            .await
            .subscriptions
            .remove(&user_id)
            .is_some())
    }

    async fn usage_count(&self, owner_id: UserId) -> StoreResult<u64> {
        let inner = self.inner.read().await;
        let Some(owner) = inner.users.get(&owner_id) else {
            return Ok(0);
        };
        let count = inner
            .fleets
            .values()
            .filter(|f| f.owner_email == owner.email)
            .map(|f| {
                inner
                    .invitations
                    .values()
                    .filter(|i| i.fleet_id == f.id)
                    .count() as u64
            })
            .sum();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    async fn seeded() -> (InMemoryMembershipStore, User, Fleet) {
        let store = InMemoryMembershipStore::new();
        let owner = User::new("owner@example.com");
        let fleet = Fleet::new(&owner.email, "Acme", false);
        store.insert_user(&owner).await.unwrap();
        store.insert_fleet(&fleet).await.unwrap();
        (store, owner, fleet)
    }

    #[tokio::test]
    async fn test_duplicate_pending_invitation_conflicts() {
        let (store, _, fleet) = seeded().await;
        let first = Invitation::pending(InvitationId::new(), &fleet, "d@example.com", None);
        let second = Invitation::pending(InvitationId::new(), &fleet, "D@example.com", None);
        store.insert_invitation(&first).await.unwrap();
        let err = store.insert_invitation(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Once resolved, a new pending invitation is allowed again
        assert!(store.accept_invitation(first.id, UserId::new()).await.unwrap());
        store.insert_invitation(&second).await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_is_compare_and_set() {
        let (store, _, fleet) = seeded().await;
        let invitation = Invitation::pending(InvitationId::new(), &fleet, "d@example.com", None);
        store.insert_invitation(&invitation).await.unwrap();

        let user_id = UserId::new();
        assert!(store.accept_invitation(invitation.id, user_id).await.unwrap());
        assert!(!store.accept_invitation(invitation.id, user_id).await.unwrap());
        assert!(!store.delete_pending_invitation(invitation.id).await.unwrap());

        let stored = store.get_invitation(invitation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Accepted);
        assert_eq!(stored.user_id, Some(user_id));
    }

    #[tokio::test]
    async fn test_member_emails_never_hold_owner_or_duplicates() {
        let (store, owner, fleet) = seeded().await;
        store.add_member_email(fleet.id, "d@example.com").await.unwrap();
        store.add_member_email(fleet.id, "D@Example.com").await.unwrap();
        store.add_member_email(fleet.id, &owner.email).await.unwrap();

        let fleet = store.get_fleet(fleet.id).await.unwrap().unwrap();
        assert_eq!(fleet.members_emails, vec!["d@example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_usage_count_spans_all_owned_fleets_and_statuses() {
        let (store, owner, fleet) = seeded().await;
        let second = Fleet::new(&owner.email, "Acme North", false);
        store.insert_fleet(&second).await.unwrap();

        let a = Invitation::pending(InvitationId::new(), &fleet, "a@example.com", None);
        let b = Invitation::pending(InvitationId::new(), &fleet, "b@example.com", None);
        let c = Invitation::pending(InvitationId::new(), &second, "c@example.com", None);
        for invitation in [&a, &b, &c] {
            store.insert_invitation(invitation).await.unwrap();
        }
        store.accept_invitation(a.id, UserId::new()).await.unwrap();

        // Someone else's fleet does not count
        let other = Fleet::new("other@example.com", "Other", false);
        store.insert_fleet(&other).await.unwrap();
        let d = Invitation::pending(InvitationId::new(), &other, "d@example.com", None);
        store.insert_invitation(&d).await.unwrap();

        assert_eq!(store.usage_count(owner.id).await.unwrap(), 3);
        assert_eq!(store.usage_count(UserId::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pull_fleet_clears_selection() {
        let (store, _, fleet) = seeded().await;
        let mut driver = User::new("d@example.com");
        driver.fleets.push(fleet.id);
        driver.selected_fleet = Some(fleet.id);
        store.insert_user(&driver).await.unwrap();

        assert_eq!(store.pull_fleet_from_all_users(fleet.id).await.unwrap(), 1);
        let driver = store.get_user(driver.id).await.unwrap().unwrap();
        assert!(driver.fleets.is_empty());
        assert_eq!(driver.selected_fleet, None);
    }
}
