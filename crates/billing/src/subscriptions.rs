//! Subscription Lifecycle
//!
//! Trial creation, paid subscription purchase, cancellation, refunds and
//! customer removal. The local `Subscription` row is only written after the
//! provider has confirmed the change.

use std::sync::Arc;

use fleetseat_shared::{
    AccountType, MembershipStore, Plan, Subscription, SubscriptionStatus, User, UserId,
};
use time::{Date, Month, OffsetDateTime};

use crate::client::PriceIds;
use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, BillingEvent, BillingEventType};
use crate::gateway::{BillingGateway, NewCustomer, ProviderStatus, RefundTarget};
use crate::seats;

/// Default trial length in calendar months
pub const DEFAULT_TRIAL_MONTHS: u8 = 2;

/// Add calendar months, clamping the day to the target month's length
pub fn add_months(at: OffsetDateTime, months: u8) -> BillingResult<OffsetDateTime> {
    let zero_based = at.month() as i32 - 1 + months as i32;
    let year = at.year() + zero_based / 12;
    let month = Month::try_from((zero_based % 12 + 1) as u8)
        .map_err(|e| BillingError::InvalidInput(format!("Invalid month: {}", e)))?;
    let day = at.day().min(time::util::days_in_year_month(year, month));
    let date = Date::from_calendar_date(year, month, day)
        .map_err(|e| BillingError::InvalidInput(format!("Invalid trial end date: {}", e)))?;
    Ok(at.replace_date(date))
}

fn unix_to_datetime(unix: i64) -> BillingResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(unix)
        .map_err(|e| BillingError::StripeApi(format!("Invalid timestamp {}: {}", unix, e)))
}

/// Owners manage their own subscription; ADMIN accounts manage anyone's
fn actor_type(actor: &User, owner: UserId) -> BillingResult<ActorType> {
    if actor.id == owner {
        Ok(ActorType::User)
    } else if actor.account_type == AccountType::Admin {
        Ok(ActorType::Admin)
    } else {
        Err(BillingError::Forbidden(
            "subscription belongs to another account".to_string(),
        ))
    }
}

/// Local state after an immediate, provider-confirmed termination
fn mark_terminated(subscription: &mut Subscription, now: OffsetDateTime) {
    if subscription.plan != Plan::Free {
        subscription.old_plan = Some(subscription.plan);
    }
    subscription.plan = Plan::Free;
    subscription.status = SubscriptionStatus::Cancelled;
    subscription.ends_at = Some(now);
    subscription.stripe_subscription_id = None;
    subscription.stripe_customer_id = None;
    subscription.stripe_product_id = None;
    subscription.stripe_price_id = None;
}

pub struct SubscriptionService {
    store: Arc<dyn MembershipStore>,
    gateway: Arc<dyn BillingGateway>,
    prices: PriceIds,
    trial_months: u8,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn MembershipStore>,
        gateway: Arc<dyn BillingGateway>,
        prices: PriceIds,
        trial_months: u8,
    ) -> Self {
        Self {
            store,
            gateway,
            prices,
            trial_months,
        }
    }

    /// Create the FREE trial subscription if the user has none yet
    pub async fn ensure_trial(&self, user_id: UserId) -> BillingResult<Subscription> {
        if let Some(existing) = self.store.get_subscription(user_id).await? {
            return Ok(existing);
        }

        let trial_ends_at = add_months(OffsetDateTime::now_utc(), self.trial_months)?;
        let subscription = Subscription::trial(user_id, trial_ends_at);
        self.store.save_subscription(&subscription).await?;

        BillingEvent::new(user_id, BillingEventType::TrialStarted)
            .data(serde_json::json!({ "trial_ends_at": trial_ends_at.unix_timestamp() }))
            .emit();

        Ok(subscription)
    }

    /// Purchase (or switch to) a paid plan
    pub async fn create_subscription(
        &self,
        user: &User,
        payment_method_id: &str,
        plan: Plan,
    ) -> BillingResult<Subscription> {
        if payment_method_id.trim().is_empty() {
            return Err(BillingError::InvalidInput(
                "payment method is required".to_string(),
            ));
        }
        if !plan.is_paid() {
            return Err(BillingError::InvalidInput(
                "the FREE plan cannot be purchased".to_string(),
            ));
        }
        let price_id = self
            .prices
            .for_plan(plan)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| BillingError::InvalidPlan(plan.to_string()))?
            .to_string();

        // Switching plans must not strand seats already handed out
        let usage = self.store.usage_count(user.id).await?;
        if let Some(blocked) = seats::downgrade_blocked(usage, plan) {
            return Err(blocked);
        }

        let existing = self.store.get_subscription(user.id).await?;

        let customer_id = self
            .gateway
            .create_customer(&NewCustomer {
                email: user.email.clone(),
                name: user.display_name.clone(),
                payment_method_id: payment_method_id.to_string(),
                user_id: user.id.to_string(),
            })
            .await?;

        let provider = match self.gateway.create_subscription(&customer_id, &price_id).await {
            Ok(provider) => provider,
            Err(e) => {
                self.discard_customer(user.id, &customer_id).await;
                return Err(e);
            }
        };

        if !provider.status.is_live() {
            tracing::warn!(
                user_id = %user.id,
                subscription_id = %provider.id,
                status = %provider.status,
                "Provider did not activate subscription, discarding customer"
            );
            self.discard_customer(user.id, &customer_id).await;
            return Err(BillingError::SubscriptionNotActive(
                provider.status.to_string(),
            ));
        }

        let now = OffsetDateTime::now_utc();
        let mut subscription = existing
            .clone()
            .unwrap_or_else(|| Subscription::trial(user.id, now));
        let previous_customer = subscription
            .stripe_customer_id
            .clone()
            .filter(|id| !id.is_empty() && *id != customer_id);

        subscription.old_plan = existing.as_ref().map(|s| s.plan);
        subscription.plan = plan;
        subscription.status = if provider.status == ProviderStatus::Trialing {
            SubscriptionStatus::Trialing
        } else {
            SubscriptionStatus::Active
        };
        subscription.starts_at = Some(unix_to_datetime(provider.current_period_start_unix)?);
        subscription.ends_at = Some(unix_to_datetime(provider.current_period_end_unix)?);
        subscription.stripe_subscription_id = Some(provider.id.clone());
        subscription.stripe_customer_id = Some(customer_id.clone());
        subscription.stripe_product_id = provider.product_id.clone();
        subscription.stripe_price_id = provider.price_id.clone();
        subscription.updated_at = now;

        self.store.save_subscription(&subscription).await?;

        BillingEvent::new(user.id, BillingEventType::SubscriptionCreated)
            .actor(ActorType::User)
            .subscription(Some(&provider.id))
            .customer(Some(&customer_id))
            .data(serde_json::json!({
                "plan": plan,
                "old_plan": subscription.old_plan,
                "provider_status": provider.status,
            }))
            .emit();

        // Deleting the old customer also ends any subscription it still holds
        if let Some(old) = previous_customer {
            if let Err(e) = self.gateway.delete_customer(&old).await {
                tracing::warn!(
                    user_id = %user.id,
                    customer_id = %old,
                    error = %e,
                    "Failed to delete previous Stripe customer"
                );
            }
        }

        Ok(subscription)
    }

    /// Cancel at period end. The local plan drops to FREE immediately while
    /// `ends_at` keeps the paid period usable.
    pub async fn cancel_subscription(
        &self,
        actor: &User,
        subscription_id: &str,
    ) -> BillingResult<Subscription> {
        let mut subscription = self
            .store
            .find_subscription_by_provider_id(subscription_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))?;
        let actor_type = actor_type(actor, subscription.user_id)?;

        if subscription.status == SubscriptionStatus::Cancelled {
            return Err(BillingError::AlreadyCancelled);
        }

        let provider = self
            .gateway
            .update_subscription(subscription_id, true)
            .await?;

        subscription.old_plan = Some(subscription.plan);
        subscription.plan = Plan::Free;
        subscription.status = SubscriptionStatus::Cancelled;
        subscription.ends_at = Some(unix_to_datetime(provider.current_period_end_unix)?);
        subscription.updated_at = OffsetDateTime::now_utc();
        self.store.save_subscription(&subscription).await?;

        BillingEvent::new(subscription.user_id, BillingEventType::SubscriptionCanceled)
            .actor(actor_type)
            .subscription(Some(subscription_id))
            .data(serde_json::json!({
                "old_plan": subscription.old_plan,
                "ends_at": provider.current_period_end_unix,
            }))
            .emit();

        Ok(subscription)
    }

    /// Refund an invoice and end the subscription immediately
    pub async fn refund_and_cancel(
        &self,
        actor: &User,
        invoice_id: &str,
        customer_id: &str,
        subscription_id: &str,
    ) -> BillingResult<Subscription> {
        let mut subscription = self
            .store
            .find_subscription_by_provider_id(subscription_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))?;
        let actor_type = actor_type(actor, subscription.user_id)?;

        if subscription.stripe_customer_id.as_deref() != Some(customer_id) {
            return Err(BillingError::CustomerNotFound(customer_id.to_string()));
        }

        let invoice = self.gateway.retrieve_invoice(invoice_id).await?;
        let invoice_customer = invoice.get("customer").and_then(|c| c.as_str());
        if invoice_customer.is_some_and(|c| c != customer_id) {
            return Err(BillingError::Forbidden(format!(
                "invoice {} was not issued to customer {}",
                invoice_id, customer_id
            )));
        }
        let target = RefundTarget::from_invoice(&invoice)
            .ok_or_else(|| BillingError::NoRefundableCharge(invoice_id.to_string()))?;

        let refund = self.gateway.create_refund(&target).await?;
        if !refund.succeeded() {
            tracing::warn!(
                user_id = %subscription.user_id,
                refund_id = %refund.id,
                status = %refund.status,
                failure_reason = refund.failure_reason.as_deref().unwrap_or(""),
                "Refund did not succeed"
            );
            return Err(BillingError::RefundFailed(
                refund
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| format!("refund status {}", refund.status)),
            ));
        }

        BillingEvent::new(subscription.user_id, BillingEventType::RefundIssued)
            .actor(actor_type)
            .subscription(Some(subscription_id))
            .customer(Some(customer_id))
            .data(serde_json::json!({ "invoice_id": invoice_id, "refund_id": refund.id }))
            .emit();

        self.gateway.delete_customer(customer_id).await?;

        mark_terminated(&mut subscription, OffsetDateTime::now_utc());
        self.store.save_subscription(&subscription).await?;

        BillingEvent::new(subscription.user_id, BillingEventType::CustomerDeleted)
            .actor(actor_type)
            .customer(Some(customer_id))
            .emit();

        Ok(subscription)
    }

    /// Delete the actor's provider customer and end the subscription now
    pub async fn delete_customer(
        &self,
        actor: &User,
        customer_id: &str,
    ) -> BillingResult<Subscription> {
        let mut subscription = self
            .store
            .get_subscription(actor.id)
            .await?
            .filter(|s| s.stripe_customer_id.as_deref() == Some(customer_id))
            .ok_or_else(|| BillingError::CustomerNotFound(customer_id.to_string()))?;

        self.gateway.delete_customer(customer_id).await?;

        mark_terminated(&mut subscription, OffsetDateTime::now_utc());
        self.store.save_subscription(&subscription).await?;

        BillingEvent::new(actor.id, BillingEventType::CustomerDeleted)
            .actor(ActorType::User)
            .customer(Some(customer_id))
            .emit();

        Ok(subscription)
    }

    /// Drop the subscription of a deleted account. Provider customer removal
    /// is best-effort.
    pub async fn remove_for_user(&self, user_id: UserId) -> BillingResult<()> {
        let Some(subscription) = self.store.get_subscription(user_id).await? else {
            return Ok(());
        };

        self.store.delete_subscription(user_id).await?;

        if let Some(customer_id) = subscription
            .stripe_customer_id
            .as_deref()
            .filter(|c| !c.is_empty())
        {
            match self.gateway.delete_customer(customer_id).await {
                Ok(()) => BillingEvent::new(user_id, BillingEventType::CustomerDeleted)
                    .customer(Some(customer_id))
                    .emit(),
                Err(e) => tracing::warn!(
                    user_id = %user_id,
                    customer_id = %customer_id,
                    error = %e,
                    "Failed to delete Stripe customer for removed account"
                ),
            }
        }

        BillingEvent::new(user_id, BillingEventType::SubscriptionRemoved).emit();
        Ok(())
    }

    async fn discard_customer(&self, user_id: UserId, customer_id: &str) {
        if let Err(e) = self.gateway.delete_customer(customer_id).await {
            tracing::warn!(
                user_id = %user_id,
                customer_id = %customer_id,
                error = %e,
                "Failed to discard Stripe customer"
            );
        }
    }
}
