//! Fleetseat Billing
//!
//! Seat limits, subscription reconciliation and the Stripe gateway.
//!
//! ## Flow
//!
//! A seat-consuming request first calls [`SubscriptionReconciler::refresh`],
//! which applies the temporal policy and, when a provider subscription is
//! attached, folds the provider status into the cached record. The returned
//! subscription's plan then feeds [`seats::guard`].

pub mod client;
pub mod error;
pub mod events;
pub mod gateway;
pub mod mock;
pub mod reconcile;
pub mod seats;
pub mod subscriptions;

pub use client::{PriceIds, StripeClient, StripeConfig};
pub use error::{BillingError, BillingResult};
pub use events::{ActorType, BillingEvent, BillingEventType};
pub use gateway::{
    BillingGateway, NewCustomer, ProviderStatus, ProviderSubscription, RefundOutcome,
    RefundTarget, StripeGateway,
};
pub use mock::MockBillingGateway;
pub use reconcile::{
    apply_provider_status, check_temporal_policy, ReconcileOutcome, SubscriptionReconciler,
    SweepReport,
};
pub use seats::{SeatDecision, SeatLimit};
pub use subscriptions::{SubscriptionService, DEFAULT_TRIAL_MONTHS};
