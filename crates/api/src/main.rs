//! Fleetseat API server

use std::sync::Arc;

use anyhow::Context;
use fleetseat_api::{
    audit::TracingAuditSink,
    auth::JwtIdentity,
    config::Config,
    email::{EmailConfig, ResendMailer},
    notifications::{ChannelDispatcher, NotificationDispatcher, OutboxDispatcher},
    routes::create_router,
    AppState, FleetseatService, ServiceDeps,
};
use fleetseat_billing::{BillingGateway, MockBillingGateway, StripeClient, StripeGateway};
use fleetseat_shared::{
    create_pool, run_migrations, InMemoryMembershipStore, MembershipStore, PgMembershipStore,
};
use tracing::{info, warn};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(bind_address = %config.bind_address, "Starting Fleetseat API");

    // `memory://` runs without Postgres, for local development only
    let (store, notifier, pool): (
        Arc<dyn MembershipStore>,
        Arc<dyn NotificationDispatcher>,
        _,
    ) = if config.database_url == "memory://" {
        warn!("Using the in-memory store; data is lost on restart");
        let (dispatcher, rx) = ChannelDispatcher::new();
        ChannelDispatcher::spawn_delivery(rx, ResendMailer::new(email_config(&config)));
        (
            Arc::new(InMemoryMembershipStore::new()),
            Arc::new(dispatcher),
            None,
        )
    } else {
        let pool = create_pool(&config.database_url, config.database_max_connections)
            .await
            .context("Failed to connect to database")?;
        run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;
        info!("Database migrations complete");
        (
            Arc::new(PgMembershipStore::new(pool.clone())),
            Arc::new(OutboxDispatcher::new(pool.clone())),
            Some(pool),
        )
    };

    let gateway: Arc<dyn BillingGateway> = if config.enable_billing {
        Arc::new(StripeGateway::new(StripeClient::new(config.stripe_config())))
    } else {
        warn!("Billing disabled, using the mock billing gateway");
        Arc::new(MockBillingGateway::new())
    };

    let service = FleetseatService::new(ServiceDeps {
        store,
        gateway,
        identity: Arc::new(JwtIdentity::new(&config.jwt_secret)),
        notifier,
        audit: Arc::new(TracingAuditSink),
        prices: config.price_ids(),
        trial_months: config.trial_months,
    });

    let app = create_router(AppState::new(service, pool));
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!(bind_address = %config.bind_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn email_config(config: &Config) -> EmailConfig {
    EmailConfig {
        resend_api_key: config.resend_api_key.clone(),
        email_from: config.email_from.clone(),
        app_name: config.app_name.clone(),
        support_email: config.support_email.clone(),
        dashboard_url: config.public_url.clone(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutting down");
}
