//! Billing error types

use fleetseat_shared::{Plan, StoreError};
use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    /// Provider did not answer within the configured bound. Callers fail closed.
    #[error("Billing provider timed out during {0}")]
    Timeout(String),

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("No price configured for plan {0}")]
    InvalidPlan(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Subscription already cancelled")]
    AlreadyCancelled,

    #[error("Refund failed: {0}")]
    RefundFailed(String),

    #[error("No refundable charge found on invoice {0}")]
    NoRefundableCharge(String),

    #[error("Subscription is not active (provider status {0})")]
    SubscriptionNotActive(String),

    // Plan-limit denials
    #[error("Your trial has ended, upgrade required to add drivers")]
    TrialEnded,

    #[error("Your subscription period has ended, renew to add drivers")]
    PeriodEnded,

    #[error("Billing on hold: subscription is {0}, update your payment method")]
    BillingHold(String),

    #[error("Seat limit reached: the {plan} plan allows {limit} seats and {used} are in use")]
    SeatLimitReached { plan: String, used: u64, limit: u64 },

    #[error("Downgrade blocked: the {plan} plan allows {limit} seats but {used} are in use")]
    DowngradeBlocked { plan: Plan, used: u64, limit: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BillingError {
    /// Denials produced by plan policy rather than by a failure
    pub fn is_plan_limit(&self) -> bool {
        matches!(
            self,
            Self::TrialEnded
                | Self::PeriodEnded
                | Self::BillingHold(_)
                | Self::SeatLimitReached { .. }
                | Self::DowngradeBlocked { .. }
        )
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seat_limit_message_mentions_plan_and_count() {
        let err = BillingError::SeatLimitReached {
            plan: "STANDARD".to_string(),
            used: 5,
            limit: 5,
        };
        let message = err.to_string();
        assert!(message.contains("STANDARD"));
        assert!(message.contains('5'));
        assert!(err.is_plan_limit());
    }

    #[test]
    fn test_provider_failures_are_not_plan_limits() {
        assert!(!BillingError::Timeout("retrieve_subscription".into()).is_plan_limit());
        assert!(!BillingError::StripeApi("boom".into()).is_plan_limit());
    }
}
