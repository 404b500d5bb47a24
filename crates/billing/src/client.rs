//! Stripe client configuration

use std::time::Duration;

use fleetseat_shared::Plan;
use stripe::Client;

use crate::error::{BillingError, BillingResult};

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_READ_RETRIES: usize = 3;

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Price IDs for each paid plan
    pub price_ids: PriceIds,
    /// Upper bound on every provider round trip
    pub request_timeout: Duration,
    /// Extra attempts for idempotent reads
    pub read_retries: usize,
}

/// Stripe price IDs for the paid plans
/// Seat hierarchy: Basic (1) → Standard (5) → Premium (15) → Enterprise (unlimited)
#[derive(Debug, Clone, Default)]
pub struct PriceIds {
    pub basic: String,
    pub standard: String,
    pub premium: String,
    pub enterprise: String,
}

impl PriceIds {
    /// Price for a paid plan. `None` for FREE.
    pub fn for_plan(&self, plan: Plan) -> Option<&str> {
        match plan {
            Plan::Free => None,
            Plan::Basic => Some(&self.basic),
            Plan::Standard => Some(&self.standard),
            Plan::Premium => Some(&self.premium),
            Plan::Enterprise => Some(&self.enterprise),
        }
    }
}

fn required(name: &str) -> BillingResult<String> {
    std::env::var(name).map_err(|_| BillingError::Config(format!("{} not set", name)))
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let request_timeout = std::env::var("BILLING_TIMEOUT_MS")
            .ok()
            .map(|v| {
                v.parse::<u64>().map_err(|_| {
                    BillingError::Config(format!("BILLING_TIMEOUT_MS must be an integer: {}", v))
                })
            })
            .transpose()?
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        let read_retries = std::env::var("BILLING_READ_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_READ_RETRIES);

        Ok(Self {
            secret_key: required("STRIPE_SECRET_KEY")?,
            price_ids: PriceIds {
                basic: required("STRIPE_PRICE_BASIC")?,
                standard: required("STRIPE_PRICE_STANDARD")?,
                premium: required("STRIPE_PRICE_PREMIUM")?,
                enterprise: required("STRIPE_PRICE_ENTERPRISE")?,
            },
            request_timeout: Duration::from_millis(request_timeout),
            read_retries,
        })
    }

    /// Get price ID for a paid plan. `None` for FREE.
    pub fn price_id_for_plan(&self, plan: Plan) -> Option<&str> {
        self.price_ids.for_plan(plan)
    }

    /// Get plan from price ID
    pub fn plan_for_price_id(&self, price_id: &str) -> Option<Plan> {
        [Plan::Basic, Plan::Standard, Plan::Premium, Plan::Enterprise]
            .into_iter()
            .find(|plan| self.price_id_for_plan(*plan) == Some(price_id))
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test".to_string(),
            price_ids: PriceIds {
                basic: "price_basic".to_string(),
                standard: "price_standard".to_string(),
                premium: "price_premium".to_string(),
                enterprise: "price_enterprise".to_string(),
            },
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            read_retries: DEFAULT_READ_RETRIES,
        }
    }

    #[test]
    fn test_price_lookup_round_trips_paid_plans() {
        let config = config();
        assert_eq!(config.price_id_for_plan(Plan::Free), None);
        assert_eq!(config.price_id_for_plan(Plan::Premium), Some("price_premium"));
        assert_eq!(config.plan_for_price_id("price_standard"), Some(Plan::Standard));
        assert_eq!(config.plan_for_price_id("price_unknown"), None);
    }
}
