//! Run command - the long-running worker.
//!
//! Besides the scheduler loop this keeps the credential pool healthy: token
//! buckets are refilled, expired cooldowns are lifted, and daily usage is
//! reset at UTC midnight.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use kwharvest_fetch::{AdmissionController, CredentialManager};
use kwharvest_queue::Scheduler;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::Cli;
use crate::context::App;
use crate::output::emit;

/// How often queue and admission figures are logged.
const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Runs the run command.
pub async fn run(cli: &Cli) -> Result<()> {
    let app = App::open(cli)?;
    let synced = app.sync_credentials().await?;
    if synced.is_empty() {
        warn!("No credentials configured, jobs will wait for admission");
    }

    let rate_limit = &app.config.rate_limit;
    let timers = vec![
        spawn_refill(
            Arc::clone(&app.credentials),
            Duration::from_millis(rate_limit.token_bucket.refill_interval_ms),
        ),
        spawn_cooldown_check(
            Arc::clone(&app.credentials),
            Duration::from_secs(rate_limit.cooldown_check_secs.max(1)),
        ),
        spawn_daily_reset(Arc::clone(&app.credentials)),
        spawn_stats_report(Arc::clone(&app.scheduler), Arc::clone(&app.admission)),
    ];

    let scheduler = Arc::clone(&app.scheduler);
    let worker = tokio::spawn(async move { scheduler.run_loop().await });
    info!("Worker running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    app.scheduler.stop();
    for timer in &timers {
        timer.abort();
    }
    worker.await?;
    futures::future::join_all(timers).await;

    let stats = app.scheduler.get_processing_stats();
    emit(cli, &stats, |f| f.format_processing_stats(&stats))
}

/// Runs `tick` every `period`, skipping ticks that fall behind.
fn spawn_periodic<F, Fut>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            tick().await;
        }
    })
}

fn spawn_refill(credentials: Arc<CredentialManager>, period: Duration) -> JoinHandle<()> {
    spawn_periodic(period, move || {
        let credentials = Arc::clone(&credentials);
        async move {
            if let Err(e) = credentials.refill().await {
                error!(error = %e, "Token refill failed");
            }
        }
    })
}

fn spawn_cooldown_check(credentials: Arc<CredentialManager>, period: Duration) -> JoinHandle<()> {
    spawn_periodic(period, move || {
        let credentials = Arc::clone(&credentials);
        async move {
            match credentials.reactivate_expired_cooldowns().await {
                Ok(0) => {}
                Ok(count) => info!(count, "Cooldowns expired"),
                Err(e) => error!(error = %e, "Cooldown check failed"),
            }
        }
    })
}

fn spawn_stats_report(
    scheduler: Arc<Scheduler>,
    admission: Arc<AdmissionController>,
) -> JoinHandle<()> {
    spawn_periodic(STATS_INTERVAL, move || {
        let scheduler = Arc::clone(&scheduler);
        let admission = Arc::clone(&admission);
        async move {
            match scheduler.get_queue_stats().await {
                Ok(queue) => info!(
                    pending = queue.pending,
                    processing = queue.processing,
                    completed = queue.completed,
                    failed = queue.failed,
                    "Queue"
                ),
                Err(e) => warn!(error = %e, "Queue stats unavailable"),
            }

            let health = admission.health_check();
            if health.healthy {
                debug!(
                    rps = health.stats.requests_per_second,
                    rpm = health.stats.requests_per_minute,
                    active = health.stats.active_connections,
                    "Admission healthy"
                );
            } else {
                warn!(issues = ?health.issues, "Admission unhealthy");
            }
        }
    })
}

fn spawn_daily_reset(credentials: Arc<CredentialManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = until_next_utc_midnight(credentials.now());
            debug!(secs = wait.as_secs(), "Next daily quota reset");
            tokio::time::sleep(wait).await;

            match credentials.reset_daily_quota().await {
                Ok(count) => info!(count, "Daily quotas reset"),
                Err(e) => error!(error = %e, "Daily quota reset failed"),
            }
        }
    })
}

/// Time left until the next UTC midnight after `now`.
fn until_next_utc_midnight(now: DateTime<Utc>) -> Duration {
    now.date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .and_then(|midnight| (midnight.and_utc() - now).to_std().ok())
        .unwrap_or(Duration::from_secs(24 * 60 * 60))
}
