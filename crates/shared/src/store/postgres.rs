//! Postgres membership store
//!
//! Reference lists live in array columns and are mutated with single-row
//! `array_append` / `array_remove` updates, so concurrent appends to the same
//! document never clobber each other.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::MembershipStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{
    normalize_email, Fleet, FleetId, Invitation, InvitationId, InvitationStatus, Plan,
    Subscription, SubscriptionStatus, User, UserId,
};

#[derive(Clone)]
pub struct PgMembershipStore {
    pool: PgPool,
}

impl PgMembershipStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    display_name: String,
    account_type: String,
    account_sub_type: Option<String>,
    is_sign_up_complete: bool,
    fleets: Vec<Uuid>,
    invitations: Vec<Uuid>,
    selected_fleet: Option<Uuid>,
    created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: UserId(row.id),
            email: row.email,
            display_name: row.display_name,
            account_type: row.account_type.parse().map_err(StoreError::Corrupt)?,
            account_sub_type: row
                .account_sub_type
                .map(|s| s.parse())
                .transpose()
                .map_err(StoreError::Corrupt)?,
            is_sign_up_complete: row.is_sign_up_complete,
            fleets: row.fleets.into_iter().map(FleetId).collect(),
            invitations: row.invitations.into_iter().map(InvitationId).collect(),
            selected_fleet: row.selected_fleet.map(FleetId),
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct FleetRow {
    id: Uuid,
    owner_email: String,
    name: String,
    members_emails: Vec<String>,
    invitations: Vec<Uuid>,
    is_individual: bool,
    created_at: OffsetDateTime,
}

impl From<FleetRow> for Fleet {
    fn from(row: FleetRow) -> Self {
        Fleet {
            id: FleetId(row.id),
            owner_email: row.owner_email,
            name: row.name,
            members_emails: row.members_emails,
            invitations: row.invitations.into_iter().map(InvitationId).collect(),
            is_individual: row.is_individual,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct InvitationRow {
    id: Uuid,
    email: String,
    status: String,
    fleet_id: Uuid,
    fleet_name: String,
    user_id: Option<Uuid>,
    created_at: OffsetDateTime,
}

impl TryFrom<InvitationRow> for Invitation {
    type Error = StoreError;

    fn try_from(row: InvitationRow) -> Result<Self, Self::Error> {
        Ok(Invitation {
            id: InvitationId(row.id),
            email: row.email,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            fleet_id: FleetId(row.fleet_id),
            fleet_name: row.fleet_name,
            user_id: row.user_id.map(UserId),
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    user_id: Uuid,
    plan: String,
    old_plan: Option<String>,
    status: String,
    trial_ends_at: Option<OffsetDateTime>,
    starts_at: Option<OffsetDateTime>,
    ends_at: Option<OffsetDateTime>,
    stripe_subscription_id: Option<String>,
    stripe_customer_id: Option<String>,
    stripe_product_id: Option<String>,
    stripe_price_id: Option<String>,
    updated_at: OffsetDateTime,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            user_id: UserId(row.user_id),
            plan: row.plan.parse::<Plan>().map_err(StoreError::Corrupt)?,
            old_plan: row
                .old_plan
                .map(|p| p.parse::<Plan>())
                .transpose()
                .map_err(StoreError::Corrupt)?,
            status: row
                .status
                .parse::<SubscriptionStatus>()
                .map_err(StoreError::Corrupt)?,
            trial_ends_at: row.trial_ends_at,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            stripe_subscription_id: row.stripe_subscription_id,
            stripe_customer_id: row.stripe_customer_id,
            stripe_product_id: row.stripe_product_id,
            stripe_price_id: row.stripe_price_id,
            updated_at: row.updated_at,
        })
    }
}

const USER_COLUMNS: &str = "id, email, display_name, account_type, account_sub_type, \
     is_sign_up_complete, fleets, invitations, selected_fleet, created_at";

const FLEET_COLUMNS: &str =
    "id, owner_email, name, members_emails, invitations, is_individual, created_at";

const INVITATION_COLUMNS: &str = "id, email, status, fleet_id, fleet_name, user_id, created_at";

const SUBSCRIPTION_COLUMNS: &str = "user_id, plan, old_plan, status, trial_ends_at, starts_at, \
     ends_at, stripe_subscription_id, stripe_customer_id, stripe_product_id, stripe_price_id, \
     updated_at";

fn invitation_rows(rows: Vec<InvitationRow>) -> StoreResult<Vec<Invitation>> {
    rows.into_iter().map(Invitation::try_from).collect()
}

#[async_trait]
impl MembershipStore for PgMembershipStore {
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
                .bind(normalize_email(email))
                .fetch_optional(&self.pool)
                .await?;
        row.map(User::try_from).transpose()
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let fleets: Vec<Uuid> = user.fleets.iter().map(|f| f.0).collect();
        let invitations: Vec<Uuid> = user.invitations.iter().map(|i| i.0).collect();

        sqlx::query(
            r#"
            INSERT INTO users (id, email, display_name, account_type, account_sub_type,
                               is_sign_up_complete, fleets, invitations, selected_fleet, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(user.id.0)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.account_type.as_str())
        .bind(user.account_sub_type.map(|s| s.as_str()))
        .bind(user.is_sign_up_complete)
        .bind(&fleets)
        .bind(&invitations)
        .bind(user.selected_fleet.map(|f| f.0))
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_user(&self, user: &User) -> StoreResult<()> {
        let fleets: Vec<Uuid> = user.fleets.iter().map(|f| f.0).collect();
        let invitations: Vec<Uuid> = user.invitations.iter().map(|i| i.0).collect();

        let result = sqlx::query(
            r#"
            UPDATE users
            SET email = $2, display_name = $3, account_type = $4, account_sub_type = $5,
                is_sign_up_complete = $6, fleets = $7, invitations = $8, selected_fleet = $9
            WHERE id = $1
            "#,
        )
        .bind(user.id.0)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.account_type.as_str())
        .bind(user.account_sub_type.map(|s| s.as_str()))
        .bind(user.is_sign_up_complete)
        .bind(&fleets)
        .bind(&invitations)
        .bind(user.selected_fleet.map(|f| f.0))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {}", user.id)));
        }
        Ok(())
    }

    async fn delete_user(&self, id: UserId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_user_fleet(&self, id: UserId, fleet_id: FleetId) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users SET fleets = array_append(fleets, $2)
            WHERE id = $1 AND NOT ($2 = ANY(fleets))
            "#,
        )
        .bind(id.0)
        .bind(fleet_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn push_user_invitation(
        &self,
        id: UserId,
        invitation_id: InvitationId,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users SET invitations = array_append(invitations, $2)
            WHERE id = $1 AND NOT ($2 = ANY(invitations))
            "#,
        )
        .bind(id.0)
        .bind(invitation_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pull_user_invitation(
        &self,
        id: UserId,
        invitation_id: InvitationId,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE users SET invitations = array_remove(invitations, $2) WHERE id = $1")
            .bind(id.0)
            .bind(invitation_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn pull_fleet_from_all_users(&self, fleet_id: FleetId) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET fleets = array_remove(fleets, $1),
                selected_fleet = CASE WHEN selected_fleet = $1 THEN NULL ELSE selected_fleet END
            WHERE $1 = ANY(fleets) OR selected_fleet = $1
            "#,
        )
        .bind(fleet_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn pull_invitations_from_all_users(&self, ids: &[InvitationId]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = ids.iter().map(|i| i.0).collect();
        let result = sqlx::query(
            r#"
            UPDATE users
            SET invitations = ARRAY(SELECT unnest(invitations) EXCEPT SELECT unnest($1::uuid[]))
            WHERE invitations && $1::uuid[]
            "#,
        )
        .bind(&ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_fleet(&self, id: FleetId) -> StoreResult<Option<Fleet>> {
        let row: Option<FleetRow> =
            sqlx::query_as(&format!("SELECT {FLEET_COLUMNS} FROM fleets WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Fleet::from))
    }

    async fn fleets_owned_by(&self, email: &str) -> StoreResult<Vec<Fleet>> {
        let rows: Vec<FleetRow> = sqlx::query_as(&format!(
            "SELECT {FLEET_COLUMNS} FROM fleets WHERE owner_email = $1 ORDER BY created_at"
        ))
        .bind(normalize_email(email))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Fleet::from).collect())
    }

    async fn insert_fleet(&self, fleet: &Fleet) -> StoreResult<()> {
        let invitations: Vec<Uuid> = fleet.invitations.iter().map(|i| i.0).collect();

        sqlx::query(
            r#"
            INSERT INTO fleets (id, owner_email, name, members_emails, invitations,
                                is_individual, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(fleet.id.0)
        .bind(&fleet.owner_email)
        .bind(&fleet.name)
        .bind(&fleet.members_emails)
        .bind(&invitations)
        .bind(fleet.is_individual)
        .bind(fleet.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_fleet(&self, id: FleetId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM fleets WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_member_email(&self, id: FleetId, email: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE fleets SET members_emails = array_append(members_emails, $2)
            WHERE id = $1 AND owner_email <> $2 AND NOT ($2 = ANY(members_emails))
            "#,
        )
        .bind(id.0)
        .bind(normalize_email(email))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pull_member_email(&self, id: FleetId, email: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE fleets SET members_emails = array_remove(members_emails, $2) WHERE id = $1",
        )
        .bind(id.0)
        .bind(normalize_email(email))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn push_fleet_invitation(
        &self,
        id: FleetId,
        invitation_id: InvitationId,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE fleets SET invitations = array_append(invitations, $2)
            WHERE id = $1 AND NOT ($2 = ANY(invitations))
            "#,
        )
        .bind(id.0)
        .bind(invitation_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pull_fleet_invitation(
        &self,
        id: FleetId,
        invitation_id: InvitationId,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE fleets SET invitations = array_remove(invitations, $2) WHERE id = $1")
            .bind(id.0)
            .bind(invitation_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_fleet_records(&self, id: FleetId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM fleet_records WHERE fleet_id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_invitation(&self, id: InvitationId) -> StoreResult<Option<Invitation>> {
        let row: Option<InvitationRow> = sqlx::query_as(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Invitation::try_from).transpose()
    }

    async fn invitations_for(
        &self,
        fleet_id: FleetId,
        email: &str,
    ) -> StoreResult<Vec<Invitation>> {
        let rows: Vec<InvitationRow> = sqlx::query_as(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations \
             WHERE fleet_id = $1 AND email = $2 ORDER BY created_at DESC"
        ))
        .bind(fleet_id.0)
        .bind(normalize_email(email))
        .fetch_all(&self.pool)
        .await?;
        invitation_rows(rows)
    }

    async fn pending_invitations_for_email(&self, email: &str) -> StoreResult<Vec<Invitation>> {
        let rows: Vec<InvitationRow> = sqlx::query_as(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE email = $1 AND status = $2"
        ))
        .bind(normalize_email(email))
        .bind(InvitationStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await?;
        invitation_rows(rows)
    }

    async fn invitations_for_fleet(&self, fleet_id: FleetId) -> StoreResult<Vec<Invitation>> {
        let rows: Vec<InvitationRow> = sqlx::query_as(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE fleet_id = $1"
        ))
        .bind(fleet_id.0)
        .fetch_all(&self.pool)
        .await?;
        invitation_rows(rows)
    }

    async fn insert_invitation(&self, invitation: &Invitation) -> StoreResult<()> {
        // invitations_one_pending turns a racing duplicate into a 23505 -> Conflict
        sqlx::query(
            r#"
            INSERT INTO invitations (id, email, status, fleet_id, fleet_name, user_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(invitation.id.0)
        .bind(&invitation.email)
        .bind(invitation.status.as_str())
        .bind(invitation.fleet_id.0)
        .bind(&invitation.fleet_name)
        .bind(invitation.user_id.map(|u| u.0))
        .bind(invitation.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn accept_invitation(&self, id: InvitationId, user_id: UserId) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE invitations SET status = $3, user_id = $2
            WHERE id = $1 AND status = $4
            "#,
        )
        .bind(id.0)
        .bind(user_id.0)
        .bind(InvitationStatus::Accepted.as_str())
        .bind(InvitationStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_pending_invitation(&self, id: InvitationId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM invitations WHERE id = $1 AND status = $2")
            .bind(id.0)
            .bind(InvitationStatus::Pending.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_invitations_for_fleet(&self, fleet_id: FleetId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM invitations WHERE fleet_id = $1")
            .bind(fleet_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_subscription(&self, user_id: UserId) -> StoreResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1"
        ))
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn find_subscription_by_provider_id(
        &self,
        stripe_subscription_id: &str,
    ) -> StoreResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE stripe_subscription_id = $1"
        ))
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Subscription::try_from).transpose()
    }

    async fn subscriptions_with_provider_ids(&self) -> StoreResult<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
             WHERE stripe_subscription_id IS NOT NULL AND stripe_subscription_id <> ''"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn save_subscription(&self, subscription: &Subscription) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, plan, old_plan, status, trial_ends_at, starts_at,
                                       ends_at, stripe_subscription_id, stripe_customer_id,
                                       stripe_product_id, stripe_price_id, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                plan = EXCLUDED.plan,
                old_plan = EXCLUDED.old_plan,
                status = EXCLUDED.status,
                trial_ends_at = EXCLUDED.trial_ends_at,
                starts_at = EXCLUDED.starts_at,
                ends_at = EXCLUDED.ends_at,
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                stripe_product_id = EXCLUDED.stripe_product_id,
                stripe_price_id = EXCLUDED.stripe_price_id,
                updated_at = NOW()
            "#,
        )
        .bind(subscription.user_id.0)
        .bind(subscription.plan.as_str())
        .bind(subscription.old_plan.map(|p| p.as_str()))
        .bind(subscription.status.as_str())
        .bind(subscription.trial_ends_at)
        .bind(subscription.starts_at)
        .bind(subscription.ends_at)
        .bind(&subscription.stripe_subscription_id)
        .bind(&subscription.stripe_customer_id)
        .bind(&subscription.stripe_product_id)
        .bind(&subscription.stripe_price_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_subscription(&self, user_id: UserId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = $1")
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn usage_count(&self, owner_id: UserId) -> StoreResult<u64> {
        // Every invitation of every fleet the owner's email owns, in any status
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(i.id)
            FROM users u
            JOIN fleets f ON f.owner_email = u.email
            JOIN invitations i ON i.fleet_id = f.id
            WHERE u.id = $1
            "#,
        )
        .bind(owner_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::db::{create_pool, run_migrations};

    async fn store() -> PgMembershipStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = create_pool(&url, 2).await.expect("Failed to create pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        PgMembershipStore::new(pool)
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_partial_unique_index_rejects_second_pending() {
        let store = store().await;
        let fleet = Fleet::new(&format!("{}@example.com", Uuid::new_v4()), "Acme", false);
        store.insert_fleet(&fleet).await.unwrap();

        let first = Invitation::pending(InvitationId::new(), &fleet, "d@example.com", None);
        let second = Invitation::pending(InvitationId::new(), &fleet, "d@example.com", None);
        store.insert_invitation(&first).await.unwrap();
        let err = store.insert_invitation(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        store.delete_invitations_for_fleet(fleet.id).await.unwrap();
        store.delete_fleet(fleet.id).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_usage_count_joins_owned_fleets() {
        let store = store().await;
        let owner = User::new(&format!("{}@example.com", Uuid::new_v4()));
        store.insert_user(&owner).await.unwrap();
        let fleet = Fleet::new(&owner.email, "Acme", false);
        store.insert_fleet(&fleet).await.unwrap();

        let invitation = Invitation::pending(InvitationId::new(), &fleet, "d@example.com", None);
        store.insert_invitation(&invitation).await.unwrap();
        store.accept_invitation(invitation.id, UserId::new()).await.unwrap();

        assert_eq!(store.usage_count(owner.id).await.unwrap(), 1);

        store.delete_invitations_for_fleet(fleet.id).await.unwrap();
        store.delete_fleet(fleet.id).await.unwrap();
        store.delete_user(owner.id).await.unwrap();
    }
}
