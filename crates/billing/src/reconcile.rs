//! Subscription Reconciler
//!
//! Re-derives the cached `Subscription` from the billing provider before a
//! seat-consuming decision trusts it. Temporal policy (trial and paid-period
//! expiry) is evaluated first because it needs no network call.
//!
//! Provider failures fail closed: if the provider cannot be asked, the action
//! is denied.

use std::sync::Arc;

use fleetseat_shared::{MembershipStore, Plan, Subscription, SubscriptionStatus, UserId};
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEvent, BillingEventType};
use crate::gateway::{BillingGateway, ProviderStatus, ProviderSubscription};

/// What applying a provider status did to the cached record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Unchanged,
    Updated,
    /// past_due / unpaid: the status was recorded and the action must be held
    Hold(ProviderStatus),
}

/// Temporal denials, checked before any provider round trip
pub fn check_temporal_policy(
    subscription: &Subscription,
    now: OffsetDateTime,
) -> BillingResult<()> {
    let is_free = subscription.plan == Plan::Free;

    if is_free
        && subscription.status == SubscriptionStatus::Trialing
        && subscription.trial_elapsed(now)
    {
        return Err(BillingError::TrialEnded);
    }

    if subscription.status == SubscriptionStatus::Cancelled
        && subscription.paid_period_elapsed(now)
    {
        return Err(BillingError::PeriodEnded);
    }

    // A cancelled record is still inside its paid period here
    if is_free
        && subscription.status != SubscriptionStatus::Cancelled
        && subscription.trial_elapsed(now)
    {
        return Err(BillingError::TrialEnded);
    }

    Ok(())
}

/// Fold a provider read into the cached record. Idempotent: applying the same
/// provider state twice reports `Unchanged` the second time.
pub fn apply_provider_status(
    subscription: &mut Subscription,
    provider: &ProviderSubscription,
) -> BillingResult<ReconcileOutcome> {
    match provider.status {
        status if status.is_billing_hold() => {
            let held = if status == ProviderStatus::PastDue {
                SubscriptionStatus::PastDue
            } else {
                SubscriptionStatus::Unpaid
            };
            subscription.status = held;
            Ok(ReconcileOutcome::Hold(status))
        }
        ProviderStatus::Canceled => {
            let period_end = OffsetDateTime::from_unix_timestamp(provider.current_period_end_unix)
                .map_err(|e| {
                    BillingError::StripeApi(format!(
                        "Invalid period end {} on {}: {}",
                        provider.current_period_end_unix, provider.id, e
                    ))
                })?;

            let already = subscription.plan == Plan::Free
                && subscription.status == SubscriptionStatus::Cancelled
                && subscription.ends_at == Some(period_end)
                && subscription.old_plan.is_none();
            if already {
                return Ok(ReconcileOutcome::Unchanged);
            }

            subscription.plan = Plan::Free;
            subscription.status = SubscriptionStatus::Cancelled;
            subscription.ends_at = Some(period_end);
            subscription.old_plan = None;
            Ok(ReconcileOutcome::Updated)
        }
        _ => Ok(ReconcileOutcome::Unchanged),
    }
}

/// Counters from one reconciliation sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: u32,
    pub updated: u32,
    pub held: u32,
    pub failed: u32,
}

pub struct SubscriptionReconciler {
    store: Arc<dyn MembershipStore>,
    gateway: Arc<dyn BillingGateway>,
}

impl SubscriptionReconciler {
    pub fn new(store: Arc<dyn MembershipStore>, gateway: Arc<dyn BillingGateway>) -> Self {
        Self { store, gateway }
    }

    /// Fetch, check and reconcile `user_id`'s subscription ahead of a
    /// seat-consuming action. Returns the record the seat guard should use.
    pub async fn refresh(&self, user_id: UserId) -> BillingResult<Subscription> {
        let mut subscription = self
            .store
            .get_subscription(user_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(user_id.to_string()))?;

        let now = OffsetDateTime::now_utc();
        check_temporal_policy(&subscription, now)?;

        let Some(provider_id) = subscription.live_provider_id().map(str::to_string) else {
            return Ok(subscription);
        };

        let provider = match self.gateway.retrieve_subscription(&provider_id).await {
            Ok(provider) => provider,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    subscription_id = %provider_id,
                    error = %e,
                    "Could not verify subscription with billing provider, denying"
                );
                return Err(e);
            }
        };

        let previous = subscription.status;
        let outcome = apply_provider_status(&mut subscription, &provider)?;

        match outcome {
            ReconcileOutcome::Unchanged => {}
            ReconcileOutcome::Updated => {
                self.store.save_subscription(&subscription).await?;
                BillingEvent::new(user_id, BillingEventType::SubscriptionReconciled)
                    .subscription(Some(&provider_id))
                    .data(serde_json::json!({ "provider_status": provider.status }))
                    .emit();
            }
            ReconcileOutcome::Hold(status) => {
                if subscription.status != previous {
                    self.store.save_subscription(&subscription).await?;
                }
                BillingEvent::new(user_id, BillingEventType::BillingHold)
                    .subscription(Some(&provider_id))
                    .data(serde_json::json!({ "provider_status": status }))
                    .emit();
                return Err(BillingError::BillingHold(status.to_string()));
            }
        }

        // Cancellation may have just moved the period end into the past
        if subscription.status == SubscriptionStatus::Cancelled
            && subscription.paid_period_elapsed(now)
        {
            return Err(BillingError::PeriodEnded);
        }

        Ok(subscription)
    }

    /// Reconcile every subscription that still points at the provider.
    /// No temporal policy and no seat guard: this only refreshes the cache.
    pub async fn sweep(&self) -> BillingResult<SweepReport> {
        let mut report = SweepReport::default();

        for mut subscription in self.store.subscriptions_with_provider_ids().await? {
            let Some(provider_id) = subscription.live_provider_id().map(str::to_string) else {
                continue;
            };
            report.checked += 1;

            let provider = match self.gateway.retrieve_subscription(&provider_id).await {
                Ok(provider) => provider,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        user_id = %subscription.user_id,
                        subscription_id = %provider_id,
                        error = %e,
                        "Reconciliation sweep could not read subscription"
                    );
                    continue;
                }
            };

            let previous = subscription.status;
            match apply_provider_status(&mut subscription, &provider) {
                Ok(ReconcileOutcome::Updated) => {
                    self.store.save_subscription(&subscription).await?;
                    report.updated += 1;
                }
                Ok(ReconcileOutcome::Hold(_)) => {
                    if subscription.status != previous {
                        self.store.save_subscription(&subscription).await?;
                        report.updated += 1;
                    }
                    report.held += 1;
                }
                Ok(ReconcileOutcome::Unchanged) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        user_id = %subscription.user_id,
                        error = %e,
                        "Reconciliation sweep rejected provider data"
                    );
                }
            }
        }

        Ok(report)
    }
}
