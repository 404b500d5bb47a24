//! Billing Events
//!
//! Typed billing events emitted as structured `tracing` records. Every
//! subscription lifecycle change goes through here so "why is this user on
//! this plan?" can be answered from the logs alone.

use fleetseat_shared::UserId;
use serde::{Deserialize, Serialize};

/// Types of billing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingEventType {
    // Subscription lifecycle
    SubscriptionCreated,
    SubscriptionCanceled,
    SubscriptionReconciled,
    SubscriptionRemoved,

    // Trial
    TrialStarted,

    // Payment state
    BillingHold,
    RefundIssued,

    // Customer lifecycle
    CustomerCreated,
    CustomerDeleted,
}

impl std::fmt::Display for BillingEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BillingEventType::SubscriptionCreated => "SUBSCRIPTION_CREATED",
            BillingEventType::SubscriptionCanceled => "SUBSCRIPTION_CANCELED",
            BillingEventType::SubscriptionReconciled => "SUBSCRIPTION_RECONCILED",
            BillingEventType::SubscriptionRemoved => "SUBSCRIPTION_REMOVED",
            BillingEventType::TrialStarted => "TRIAL_STARTED",
            BillingEventType::BillingHold => "BILLING_HOLD",
            BillingEventType::RefundIssued => "REFUND_ISSUED",
            BillingEventType::CustomerCreated => "CUSTOMER_CREATED",
            BillingEventType::CustomerDeleted => "CUSTOMER_DELETED",
        };
        write!(f, "{}", s)
    }
}

/// Who triggered the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorType {
    /// Account holder acting on their own subscription
    User,
    /// ADMIN account acting on someone else's
    Admin,
    /// Scheduled jobs and cascades
    System,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorType::User => write!(f, "user"),
            ActorType::Admin => write!(f, "admin"),
            ActorType::System => write!(f, "system"),
        }
    }
}

/// Builder for a billing event
#[derive(Debug, Clone)]
pub struct BillingEvent {
    user_id: UserId,
    event_type: BillingEventType,
    actor_type: ActorType,
    stripe_subscription_id: Option<String>,
    stripe_customer_id: Option<String>,
    event_data: serde_json::Value,
}

impl BillingEvent {
    pub fn new(user_id: UserId, event_type: BillingEventType) -> Self {
        Self {
            user_id,
            event_type,
            actor_type: ActorType::System,
            stripe_subscription_id: None,
            stripe_customer_id: None,
            event_data: serde_json::json!({}),
        }
    }

    pub fn actor(mut self, actor_type: ActorType) -> Self {
        self.actor_type = actor_type;
        self
    }

    pub fn subscription(mut self, id: Option<&str>) -> Self {
        self.stripe_subscription_id = id.map(str::to_string);
        self
    }

    pub fn customer(mut self, id: Option<&str>) -> Self {
        self.stripe_customer_id = id.map(str::to_string);
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.event_data = data;
        self
    }

    pub fn event_type(&self) -> BillingEventType {
        self.event_type
    }

    /// Write the event to the log
    pub fn emit(self) {
        tracing::info!(
            target: "fleetseat::billing_events",
            event_type = %self.event_type,
            user_id = %self.user_id,
            actor_type = %self.actor_type,
            stripe_subscription_id = self.stripe_subscription_id.as_deref().unwrap_or(""),
            stripe_customer_id = self.stripe_customer_id.as_deref().unwrap_or(""),
            data = %self.event_data,
            "billing event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_screaming_snake() {
        assert_eq!(
            BillingEventType::SubscriptionCanceled.to_string(),
            "SUBSCRIPTION_CANCELED"
        );
        assert_eq!(BillingEventType::BillingHold.to_string(), "BILLING_HOLD");
        assert_eq!(ActorType::Admin.to_string(), "admin");
    }

    #[test]
    fn test_builder_defaults_to_system_actor() {
        let event = BillingEvent::new(UserId::new(), BillingEventType::TrialStarted);
        assert_eq!(event.actor_type, ActorType::System);
        assert_eq!(event.event_type(), BillingEventType::TrialStarted);
    }
}
