//! Billing Gateway
//!
//! The seam between the membership core and the payment provider. Callers see
//! normalized shapes only; Stripe types never leave this module.
//!
//! Every provider call is bounded by `StripeConfig::request_timeout`. Reads are
//! retried with exponential backoff, mutations (cancel, refund, delete
//! customer) are sent exactly once and their failure is surfaced verbatim.

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stripe::{
    CreateCustomer, CreateRefund, CreateSubscription, CreateSubscriptionItems, Customer,
    CustomerId, CustomerInvoiceSettings, Expandable, Invoice, InvoiceId, Refund,
    Subscription as StripeSubscription, SubscriptionId, SubscriptionStatus as StripeSubStatus,
    UpdateSubscription,
};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Provider-side subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Active,
    Trialing,
    PastDue,
    Unpaid,
    Canceled,
    Incomplete,
    IncompleteExpired,
    Paused,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Unpaid => "unpaid",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Paused => "paused",
        }
    }

    /// The provider is collecting (or about to collect) payment normally
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }

    /// Payment failed and the subscription is held
    pub fn is_billing_hold(&self) -> bool {
        matches!(self, Self::PastDue | Self::Unpaid)
    }
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<StripeSubStatus> for ProviderStatus {
    fn from(status: StripeSubStatus) -> Self {
        match status {
            StripeSubStatus::Active => Self::Active,
            StripeSubStatus::Trialing => Self::Trialing,
            StripeSubStatus::PastDue => Self::PastDue,
            StripeSubStatus::Unpaid => Self::Unpaid,
            StripeSubStatus::Canceled => Self::Canceled,
            StripeSubStatus::Incomplete => Self::Incomplete,
            StripeSubStatus::IncompleteExpired => Self::IncompleteExpired,
            StripeSubStatus::Paused => Self::Paused,
        }
    }
}

/// Normalized subscription read/write result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer_id: String,
    pub status: ProviderStatus,
    pub product_id: Option<String>,
    pub price_id: Option<String>,
    pub current_period_start_unix: i64,
    pub current_period_end_unix: i64,
}

/// Customer to create ahead of a subscription
#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub email: String,
    pub name: String,
    pub payment_method_id: String,
    /// Local user id, stored as provider metadata
    pub user_id: String,
}

/// What a refund is issued against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundTarget {
    PaymentIntent(String),
    Charge(String),
}

impl RefundTarget {
    /// Pick the refundable payment out of a raw invoice. The payment intent is
    /// preferred; the charge is the fallback for invoices paid out of band.
    pub fn from_invoice(invoice: &serde_json::Value) -> Option<Self> {
        fn expandable_id(value: Option<&serde_json::Value>) -> Option<String> {
            match value? {
                serde_json::Value::String(id) if !id.is_empty() => Some(id.clone()),
                serde_json::Value::Object(obj) => obj
                    .get("id")
                    .and_then(|id| id.as_str())
                    .map(str::to_string),
                _ => None,
            }
        }

        expandable_id(invoice.get("payment_intent"))
            .map(Self::PaymentIntent)
            .or_else(|| expandable_id(invoice.get("charge")).map(Self::Charge))
    }
}

/// Normalized refund result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundOutcome {
    pub id: String,
    pub status: String,
    pub failure_reason: Option<String>,
}

impl RefundOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

/// Remote billing capability
#[async_trait]
pub trait BillingGateway: Send + Sync {
    /// Returns the new customer id
    async fn create_customer(&self, customer: &NewCustomer) -> BillingResult<String>;

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
    ) -> BillingResult<ProviderSubscription>;

    async fn retrieve_subscription(&self, subscription_id: &str)
        -> BillingResult<ProviderSubscription>;

    async fn update_subscription(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> BillingResult<ProviderSubscription>;

    async fn delete_customer(&self, customer_id: &str) -> BillingResult<()>;

    async fn create_refund(&self, target: &RefundTarget) -> BillingResult<RefundOutcome>;

    /// Raw invoice pass-through
    async fn retrieve_invoice(&self, invoice_id: &str) -> BillingResult<serde_json::Value>;
}

/// Stripe-backed gateway
#[derive(Clone)]
pub struct StripeGateway {
    stripe: StripeClient,
}

impl StripeGateway {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    pub fn client(&self) -> &StripeClient {
        &self.stripe
    }

    /// Run one provider call under the configured timeout
    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> BillingResult<T>
    where
        F: Future<Output = Result<T, stripe::StripeError>>,
    {
        let timeout = self.stripe.config().request_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result.map_err(BillingError::from),
            Err(_) => {
                tracing::warn!(
                    operation = operation,
                    timeout_ms = timeout.as_millis() as u64,
                    "Billing provider call timed out"
                );
                Err(BillingError::Timeout(operation.to_string()))
            }
        }
    }

    /// Retry an idempotent read on transient failures
    async fn read_with_retry<T, A, Fut>(&self, operation: &'static str, action: A) -> BillingResult<T>
    where
        A: FnMut() -> Fut,
        Fut: Future<Output = BillingResult<T>>,
    {
        let strategy = ExponentialBackoff::from_millis(50)
            .max_delay(std::time::Duration::from_secs(2))
            .take(self.stripe.config().read_retries)
            .map(jitter);

        RetryIf::spawn(strategy, action, |e: &BillingError| {
            let transient = matches!(e, BillingError::Timeout(_) | BillingError::StripeApi(_));
            if transient {
                tracing::debug!(operation = operation, error = %e, "Transient billing error - will retry");
            }
            transient
        })
        .await
    }
}

fn parse_id<T: std::str::FromStr>(kind: &str, raw: &str) -> BillingResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| BillingError::InvalidInput(format!("Invalid {} ID {}: {}", kind, raw, e)))
}

fn normalize(subscription: &StripeSubscription) -> ProviderSubscription {
    let customer_id = match &subscription.customer {
        Expandable::Id(id) => id.to_string(),
        Expandable::Object(customer) => customer.id.to_string(),
    };

    let price = subscription
        .items
        .data
        .first()
        .and_then(|item| item.price.as_ref());

    let product_id = price
        .and_then(|p| p.product.as_ref())
        .map(|product| match product {
            Expandable::Id(id) => id.to_string(),
            Expandable::Object(product) => product.id.to_string(),
        });

    ProviderSubscription {
        id: subscription.id.to_string(),
        customer_id,
        status: subscription.status.into(),
        product_id,
        price_id: price.map(|p| p.id.to_string()),
        current_period_start_unix: subscription.current_period_start,
        current_period_end_unix: subscription.current_period_end,
    }
}

#[async_trait]
impl BillingGateway for StripeGateway {
    async fn create_customer(&self, customer: &NewCustomer) -> BillingResult<String> {
        let payment_method = parse_id("payment method", &customer.payment_method_id)?;

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("user_id".to_string(), customer.user_id.clone());
        metadata.insert("platform".to_string(), "fleetseat".to_string());

        let params = CreateCustomer {
            email: Some(&customer.email),
            name: Some(&customer.name),
            payment_method: Some(payment_method),
            invoice_settings: Some(CustomerInvoiceSettings {
                default_payment_method: Some(customer.payment_method_id.clone()),
                ..Default::default()
            }),
            metadata: Some(metadata),
            ..Default::default()
        };

        let created = self
            .bounded("create_customer", Customer::create(self.stripe.inner(), params))
            .await?;

        tracing::info!(
            user_id = %customer.user_id,
            customer_id = %created.id,
            "Created Stripe customer"
        );

        Ok(created.id.to_string())
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
    ) -> BillingResult<ProviderSubscription> {
        let customer_id: CustomerId = parse_id("customer", customer_id)?;

        let mut params = CreateSubscription::new(customer_id);
        params.items = Some(vec![CreateSubscriptionItems {
            price: Some(price_id.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);

        let subscription = self
            .bounded(
                "create_subscription",
                StripeSubscription::create(self.stripe.inner(), params),
            )
            .await?;

        Ok(normalize(&subscription))
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<ProviderSubscription> {
        let id: SubscriptionId = parse_id("subscription", subscription_id)?;

        let subscription = self
            .read_with_retry("retrieve_subscription", || {
                self.bounded(
                    "retrieve_subscription",
                    StripeSubscription::retrieve(self.stripe.inner(), &id, &[]),
                )
            })
            .await?;

        Ok(normalize(&subscription))
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        cancel_at_period_end: bool,
    ) -> BillingResult<ProviderSubscription> {
        let id: SubscriptionId = parse_id("subscription", subscription_id)?;

        let params = UpdateSubscription {
            cancel_at_period_end: Some(cancel_at_period_end),
            ..Default::default()
        };

        let subscription = self
            .bounded(
                "update_subscription",
                StripeSubscription::update(self.stripe.inner(), &id, params),
            )
            .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            cancel_at_period_end = cancel_at_period_end,
            "Updated Stripe subscription"
        );

        Ok(normalize(&subscription))
    }

    async fn delete_customer(&self, customer_id: &str) -> BillingResult<()> {
        let id: CustomerId = parse_id("customer", customer_id)?;

        self.bounded("delete_customer", Customer::delete(self.stripe.inner(), &id))
            .await?;

        tracing::info!(customer_id = %customer_id, "Deleted Stripe customer");
        Ok(())
    }

    async fn create_refund(&self, target: &RefundTarget) -> BillingResult<RefundOutcome> {
        let mut params = CreateRefund::new();
        match target {
            RefundTarget::PaymentIntent(id) => {
                params.payment_intent = Some(parse_id("payment intent", id)?);
            }
            RefundTarget::Charge(id) => {
                params.charge = Some(parse_id("charge", id)?);
            }
        }

        let refund = self
            .bounded("create_refund", Refund::create(self.stripe.inner(), params))
            .await?;

        Ok(RefundOutcome {
            id: refund.id.to_string(),
            status: refund
                .status
                .as_ref()
                .map(|s| s.to_string())
                .unwrap_or_default(),
            failure_reason: refund.failure_reason.as_ref().map(|r| r.to_string()),
        })
    }

    async fn retrieve_invoice(&self, invoice_id: &str) -> BillingResult<serde_json::Value> {
        let id: InvoiceId = parse_id("invoice", invoice_id)?;

        let invoice = self
            .read_with_retry("retrieve_invoice", || {
                self.bounded(
                    "retrieve_invoice",
                    Invoice::retrieve(self.stripe.inner(), &id, &[]),
                )
            })
            .await?;

        serde_json::to_value(&invoice)
            .map_err(|e| BillingError::StripeApi(format!("Unreadable invoice {}: {}", invoice_id, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_refund_target_prefers_payment_intent() {
        let invoice = json!({ "id": "in_1", "payment_intent": "pi_1", "charge": "ch_1" });
        assert_eq!(
            RefundTarget::from_invoice(&invoice),
            Some(RefundTarget::PaymentIntent("pi_1".into()))
        );
    }

    #[test]
    fn test_refund_target_reads_expanded_objects() {
        let invoice = json!({ "id": "in_1", "payment_intent": null, "charge": { "id": "ch_9" } });
        assert_eq!(
            RefundTarget::from_invoice(&invoice),
            Some(RefundTarget::Charge("ch_9".into()))
        );
        assert_eq!(RefundTarget::from_invoice(&json!({ "id": "in_2" })), None);
    }

    #[test]
    fn test_provider_status_classes() {
        assert!(ProviderStatus::Trialing.is_live());
        assert!(!ProviderStatus::Incomplete.is_live());
        assert!(ProviderStatus::Unpaid.is_billing_hold());
        assert!(!ProviderStatus::Canceled.is_billing_hold());
        assert_eq!(ProviderStatus::IncompleteExpired.to_string(), "incomplete_expired");
    }
}
