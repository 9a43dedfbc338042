//! NDISLink Background Worker
//!
//! Handles scheduled jobs:
//! - Releasing lead reservations whose checkout window has passed (every 5 minutes)
//! - Billing invariant checks (hourly)
//! - Heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use ndislink_billing::{InvariantChecker, PgBillingStore, ReservationSweeper, ViolationSeverity};
use ndislink_shared::create_pool;
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ndislink_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting NDISLink Worker v{}", env!("CARGO_PKG_VERSION"));

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url).await?;

    let sweeper = ReservationSweeper::new(Arc::new(PgBillingStore::new(pool.clone())));
    let checker = Arc::new(InvariantChecker::new(pool));

    let scheduler = JobScheduler::new().await?;

    // Job 1: Release expired lead reservations
    // Cron: every 5 minutes. Stripe sends checkout.session.expired as well;
    // this catches sessions whose expiry event was lost.
    scheduler
        .add(Job::new_async("0 */5 * * * *", move |_uuid, _l| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                if let Err(e) = sweeper.release_expired(OffsetDateTime::now_utc()).await {
                    error!(error = %e, "Lead reservation sweep failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Lead reservation sweep (every 5 minutes)");

    // Job 2: Billing invariant checks
    // Cron: at minute 0 of every hour
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let checker = checker.clone();
            Box::pin(async move {
                info!("Running billing invariant checks");
                match checker.run_all_checks().await {
                    Ok(summary) if summary.healthy => {
                        info!(checks_run = summary.checks_run, "All billing invariants hold");
                    }
                    Ok(summary) => {
                        for violation in &summary.violations {
                            match violation.severity {
                                ViolationSeverity::Critical | ViolationSeverity::High => error!(
                                    invariant = %violation.invariant,
                                    severity = %violation.severity,
                                    providers = ?violation.provider_ids,
                                    context = %violation.context,
                                    "{}",
                                    violation.description
                                ),
                                ViolationSeverity::Medium => warn!(
                                    invariant = %violation.invariant,
                                    providers = ?violation.provider_ids,
                                    context = %violation.context,
                                    "{}",
                                    violation.description
                                ),
                            }
                        }
                        warn!(
                            checks_failed = summary.checks_failed,
                            violations = summary.violations.len(),
                            "Billing invariant violations detected"
                        );
                    }
                    Err(e) => error!(error = %e, "Billing invariant check failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Billing invariant checks (hourly)");

    // Job 3: Heartbeat
    scheduler
        .add(Job::new_async("30 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;

    info!("Starting job scheduler");
    scheduler.start().await?;
    info!("NDISLink Worker started with 3 scheduled jobs");

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
