//! Scriptable in-memory billing gateway
//!
//! Used by the test suites of this workspace and for running the API without
//! Stripe credentials (`ENABLE_BILLING=false`).

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    BillingGateway, NewCustomer, ProviderStatus, ProviderSubscription, RefundOutcome, RefundTarget,
};

/// One month, in seconds, for fabricated billing periods
const PERIOD_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Default)]
struct MockState {
    subscriptions: HashMap<String, ProviderSubscription>,
    invoices: HashMap<String, serde_json::Value>,
    customers: Vec<String>,
    deleted_customers: Vec<String>,
    refunds: Vec<RefundTarget>,
    calls: Vec<&'static str>,
    next_create_status: Option<ProviderStatus>,
    refund_status: Option<(String, Option<String>)>,
    unavailable: bool,
    fail_customer_deletion: bool,
    counter: u64,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{}_mock{}", prefix, self.counter)
    }
}

#[derive(Default)]
pub struct MockBillingGateway {
    state: Mutex<MockState>,
}

impl MockBillingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider subscription for later reads
    pub async fn put_subscription(&self, subscription: ProviderSubscription) {
        let mut state = self.state.lock().await;
        state
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    /// Change the provider-side status of a known subscription
    pub async fn set_status(&self, subscription_id: &str, status: ProviderStatus) {
        let mut state = self.state.lock().await;
        if let Some(sub) = state.subscriptions.get_mut(subscription_id) {
            sub.status = status;
        }
    }

    pub async fn put_invoice(&self, invoice_id: &str, invoice: serde_json::Value) {
        let mut state = self.state.lock().await;
        state.invoices.insert(invoice_id.to_string(), invoice);
    }

    /// Status returned by the next `create_subscription`
    pub async fn set_next_create_status(&self, status: ProviderStatus) {
        self.state.lock().await.next_create_status = Some(status);
    }

    pub async fn set_refund_status(&self, status: &str, failure_reason: Option<&str>) {
        self.state.lock().await.refund_status =
            Some((status.to_string(), failure_reason.map(str::to_string)));
    }

    /// Every call times out while set
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    pub async fn set_fail_customer_deletion(&self, fail: bool) {
        self.state.lock().await.fail_customer_deletion = fail;
    }

    pub async fn calls(&self) -> Vec<&'static str> {
        self.state.lock().await.calls.clone()
    }

    pub async fn call_count(&self, operation: &str) -> usize {
        let state = self.state.lock().await;
        state.calls.iter().filter(|c| **c == operation).count()
    }

    pub async fn deleted_customers(&self) -> Vec<String> {
        self.state.lock().await.deleted_customers.clone()
    }

    pub async fn refunds(&self) -> Vec<RefundTarget> {
        self.state.lock().await.refunds.clone()
    }

    pub async fn subscription(&self, subscription_id: &str) -> Option<ProviderSubscription> {
        let state = self.state.lock().await;
        state.subscriptions.get(subscription_id).cloned()
    }
}

/// Record the call and fail when the provider is scripted as unreachable
fn enter(state: &mut MockState, operation: &'static str) -> BillingResult<()> {
    state.calls.push(operation);
    if state.unavailable {
        return Err(BillingError::Timeout(operation.to_string()));
    }
    Ok(())
}

#[async_trait]
impl BillingGateway for MockBillingGateway {
    async fn create_customer(&self, _customer: &NewCustomer) -> BillingResult<String> {
        let mut state = self.state.lock().await;
        enter(&mut state, "create_customer")?;
        let id = state.next_id("cus");
        state.customers.push(id.clone());
        Ok(id)
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
    ) -> BillingResult<ProviderSubscription> {
        let mut state = self.state.lock().await;
        enter(&mut state, "create_subscription")?;
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let subscription = ProviderSubscription {
            id: state.next_id("sub"),
            customer_id: customer_id.to_string(),
            status: state
                .next_create_status
                .take()
                .unwrap_or(ProviderStatus::Active),
            product_id: Some(format!("prod_for_{}", price_id)),
            price_id: Some(price_id.to_string()),
            current_period_start_unix: now,
            current_period_end_unix: now + PERIOD_SECS,
        };
        state
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(subscription)
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<ProviderSubscription> {
        let mut state = self.state.lock().await;
        enter(&mut state, "retrieve_subscription")?;
        state
            .subscriptions
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        _cancel_at_period_end: bool,
    ) -> BillingResult<ProviderSubscription> {
        let mut state = self.state.lock().await;
        enter(&mut state, "update_subscription")?;
        state
            .subscriptions
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))
    }

    async fn delete_customer(&self, customer_id: &str) -> BillingResult<()> {
        let mut state = self.state.lock().await;
        enter(&mut state, "delete_customer")?;
        if state.fail_customer_deletion {
            return Err(BillingError::StripeApi(format!(
                "No such customer: {}",
                customer_id
            )));
        }
        state.deleted_customers.push(customer_id.to_string());
        for sub in state.subscriptions.values_mut() {
            if sub.customer_id == customer_id {
                sub.status = ProviderStatus::Canceled;
            }
        }
        Ok(())
    }

    async fn create_refund(&self, target: &RefundTarget) -> BillingResult<RefundOutcome> {
        let mut state = self.state.lock().await;
        enter(&mut state, "create_refund")?;
        state.refunds.push(target.clone());
        let (status, failure_reason) = state
            .refund_status
            .clone()
            .unwrap_or_else(|| ("succeeded".to_string(), None));
        Ok(RefundOutcome {
            id: state.next_id("re"),
            status,
            failure_reason,
        })
    }

    async fn retrieve_invoice(&self, invoice_id: &str) -> BillingResult<serde_json::Value> {
        let mut state = self.state.lock().await;
        enter(&mut state, "retrieve_invoice")?;
        state
            .invoices
            .get(invoice_id)
            .cloned()
            .ok_or_else(|| BillingError::StripeApi(format!("No such invoice: {}", invoice_id)))
    }
}
