//! Fleetseat Background Worker
//!
//! Handles scheduled jobs including:
//! - Notification outbox delivery (every minute)
//! - Subscription reconciliation sweep against Stripe (every 30 minutes)
//! - Outbox cleanup (daily at 4:00 AM UTC)
//! - Heartbeat (every 5 minutes)

mod notification_processor;

use std::sync::Arc;

use anyhow::Context;
use fleetseat_api::email::ResendMailer;
use fleetseat_billing::{
    BillingGateway, StripeClient, StripeGateway, SubscriptionReconciler, SweepReport,
};
use fleetseat_shared::{create_pool, MembershipStore, PgMembershipStore};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

const WORKER_MAX_CONNECTIONS: u32 = 5;
const OUTBOX_RETENTION_DAYS: i32 = 30;

fn log_sweep(report: &SweepReport) {
    if report.failed > 0 {
        warn!(
            checked = report.checked,
            updated = report.updated,
            held = report.held,
            failed = report.failed,
            "Reconciliation sweep finished with failures"
        );
    } else {
        info!(
            checked = report.checked,
            updated = report.updated,
            held = report.held,
            "Reconciliation sweep complete"
        );
    }
}

fn billing_enabled() -> bool {
    std::env::var("ENABLE_BILLING")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting Fleetseat Worker");

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = create_pool(&database_url, WORKER_MAX_CONNECTIONS).await?;
    info!("Database pool created");

    let mailer = Arc::new(ResendMailer::from_env());
    if !mailer.is_enabled() {
        warn!("RESEND_API_KEY not set, outbox rows will be marked delivered without sending");
    }

    let scheduler = JobScheduler::new().await?;

    // Job 1: Deliver queued notifications (every minute)
    let outbox_pool = pool.clone();
    let outbox_mailer = mailer.clone();
    scheduler
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let pool = outbox_pool.clone();
            let mailer = outbox_mailer.clone();
            Box::pin(async move {
                notification_processor::process_notification_outbox(&pool, &mailer).await;
            })
        })?)
        .await?;
    info!("Scheduled: Notification outbox delivery (every minute)");

    // Job 2: Reconcile cached subscriptions with Stripe (every 30 minutes)
    if billing_enabled() {
        match StripeClient::from_env() {
            Ok(client) => {
                let store: Arc<dyn MembershipStore> =
                    Arc::new(PgMembershipStore::new(pool.clone()));
                let gateway: Arc<dyn BillingGateway> = Arc::new(StripeGateway::new(client));
                let reconciler = Arc::new(SubscriptionReconciler::new(store, gateway));
                scheduler
                    .add(Job::new_async("0 */30 * * * *", move |_uuid, _l| {
                        let reconciler = reconciler.clone();
                        Box::pin(async move {
                            info!("Running subscription reconciliation sweep");
                            match reconciler.sweep().await {
                                Ok(report) => log_sweep(&report),
                                Err(e) => error!(error = %e, "Reconciliation sweep failed"),
                            }
                        })
                    })?)
                    .await?;
                info!("Scheduled: Subscription reconciliation sweep (every 30 minutes)");
            }
            Err(e) => {
                warn!(error = %e, "Stripe not configured, reconciliation sweep disabled");
            }
        }
    } else {
        info!("Billing disabled, skipping reconciliation sweep");
    }

    // Job 3: Outbox cleanup (daily at 4:00 AM UTC)
    let cleanup_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 0 4 * * *", move |_uuid, _l| {
            let pool = cleanup_pool.clone();
            Box::pin(async move {
                notification_processor::cleanup_old_notifications(&pool, OUTBOX_RETENTION_DAYS)
                    .await;
            })
        })?)
        .await?;
    info!("Scheduled: Outbox cleanup (daily at 4:00 AM UTC)");

    // Job 4: Heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;

    scheduler.start().await?;
    info!("Worker started, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down worker");

    Ok(())
}
