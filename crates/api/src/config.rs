//! Application configuration

use std::env;
use std::time::Duration;

use fleetseat_billing::{PriceIds, StripeConfig, DEFAULT_TRIAL_MONTHS};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub public_url: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,

    // Stripe
    pub stripe_secret_key: String,
    pub stripe_price_basic: String,
    pub stripe_price_standard: String,
    pub stripe_price_premium: String,
    pub stripe_price_enterprise: String,
    pub billing_timeout_ms: u64,
    pub billing_read_retries: usize,

    // Subscriptions
    pub trial_months: u8,

    // Email
    pub resend_api_key: String,
    pub email_from: String,
    pub app_name: String,
    pub support_email: String,

    // Feature flags
    pub enable_billing: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let enable_billing = env::var("ENABLE_BILLING")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);

        let stripe_secret_key = env::var("STRIPE_SECRET_KEY").unwrap_or_default();
        if enable_billing && stripe_secret_key.is_empty() {
            return Err(ConfigError::Missing("STRIPE_SECRET_KEY"));
        }

        let trial_months: u8 = env::var("TRIAL_MONTHS")
            .unwrap_or_else(|_| DEFAULT_TRIAL_MONTHS.to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("TRIAL_MONTHS must be an integer between 0 and 255"))?;
        if trial_months == 0 {
            return Err(ConfigError::Invalid("TRIAL_MONTHS must be at least 1"));
        }

        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },

            // Stripe
            stripe_secret_key,
            stripe_price_basic: env::var("STRIPE_PRICE_BASIC").unwrap_or_default(),
            stripe_price_standard: env::var("STRIPE_PRICE_STANDARD").unwrap_or_default(),
            stripe_price_premium: env::var("STRIPE_PRICE_PREMIUM").unwrap_or_default(),
            stripe_price_enterprise: env::var("STRIPE_PRICE_ENTERPRISE").unwrap_or_default(),
            billing_timeout_ms: env::var("BILLING_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .map_err(|_| ConfigError::Invalid("BILLING_TIMEOUT_MS must be an integer"))?,
            billing_read_retries: env::var("BILLING_READ_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),

            trial_months,

            // Email
            resend_api_key: env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Fleetseat <noreply@localhost>".to_string()),
            app_name: env::var("APP_NAME").unwrap_or_else(|_| "Fleetseat".to_string()),
            support_email: env::var("SUPPORT_EMAIL")
                .unwrap_or_else(|_| "support@localhost".to_string()),

            enable_billing,
        })
    }

    pub fn price_ids(&self) -> PriceIds {
        PriceIds {
            basic: self.stripe_price_basic.clone(),
            standard: self.stripe_price_standard.clone(),
            premium: self.stripe_price_premium.clone(),
            enterprise: self.stripe_price_enterprise.clone(),
        }
    }

    pub fn stripe_config(&self) -> StripeConfig {
        StripeConfig {
            secret_key: self.stripe_secret_key.clone(),
            price_ids: self.price_ids(),
            request_timeout: Duration::from_millis(self.billing_timeout_ms),
            read_retries: self.billing_read_retries,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serial_test::serial;
    use std::env;

    fn setup_minimal_config() {
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var(
            "JWT_SECRET",
            "test-jwt-secret-must-be-at-least-32-characters-long",
        );
        env::set_var("ENABLE_BILLING", "false");
    }

    fn cleanup_config() {
        for name in [
            "DATABASE_URL",
            "JWT_SECRET",
            "ENABLE_BILLING",
            "STRIPE_SECRET_KEY",
            "TRIAL_MONTHS",
            "BILLING_TIMEOUT_MS",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_minimal_config_uses_defaults() {
        cleanup_config();
        setup_minimal_config();

        let config = Config::from_env().unwrap();
        assert_eq!(config.trial_months, DEFAULT_TRIAL_MONTHS);
        assert_eq!(config.billing_timeout_ms, 10_000);
        assert!(!config.enable_billing);
        assert_eq!(
            config.stripe_config().request_timeout,
            Duration::from_millis(10_000)
        );

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_secret_validation() {
        cleanup_config();
        setup_minimal_config();

        env::set_var("JWT_SECRET", "short");
        assert!(matches!(Config::from_env(), Err(ConfigError::WeakSecret(_))));

        env::remove_var("JWT_SECRET");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("JWT_SECRET"))
        ));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_billing_requires_stripe_key() {
        cleanup_config();
        setup_minimal_config();

        env::set_var("ENABLE_BILLING", "true");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("STRIPE_SECRET_KEY"))
        ));

        env::set_var("STRIPE_SECRET_KEY", "sk_test_123");
        assert!(Config::from_env().unwrap().enable_billing);

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_trial_months_must_be_positive() {
        cleanup_config();
        setup_minimal_config();

        env::set_var("TRIAL_MONTHS", "0");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));
        env::set_var("TRIAL_MONTHS", "3");
        assert_eq!(Config::from_env().unwrap().trial_months, 3);

        cleanup_config();
    }
}
