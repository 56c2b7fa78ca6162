//! Refresh scheduler: polls every feed on an interval and renews WebSub
//! leases that are about to run out.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::app::{AppContext, Result};
use crate::config::{Interval, RefreshConfig};
use crate::domain::PushState;
use crate::ingest;
use crate::store::Store;

/// When the scheduler sweeps.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub interval: Interval,
    /// Sweep once before the first interval elapses.
    pub run_on_start: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::from(&RefreshConfig::default())
    }
}

impl From<&RefreshConfig> for DaemonConfig {
    fn from(refresh: &RefreshConfig) -> Self {
        Self {
            interval: refresh.interval,
            run_on_start: refresh.on_start,
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub feeds: usize,
    pub new_items: usize,
    pub errors: usize,
    pub renewed: usize,
}

/// Poll every feed in turn. Failures become notification items instead of
/// aborting the sweep.
pub async fn refresh_all(ctx: &AppContext) -> Result<RefreshReport> {
    let feeds = ctx.store.get_all_feeds()?;
    let mut report = RefreshReport {
        feeds: feeds.len(),
        ..Default::default()
    };

    for feed in &feeds {
        match ingest::refresh_feed(ctx, feed).await {
            Ok(count) => {
                report.new_items += count;
                if count > 0 {
                    tracing::info!("{} new items from {}", count, feed.display_title());
                }
            }
            Err(e) => {
                report.errors += 1;
                tracing::warn!("Error updating {}: {}", feed.display_title(), e);
                let text = format!("{}: {}", feed.url, e);
                if let Err(e) = ingest::notify(ctx, &format!("Failed to refresh {}", feed.display_title()), &text) {
                    tracing::error!("Could not record refresh failure: {}", e);
                }
            }
        }
    }

    let now = Utc::now();
    for feed in feeds.iter().filter(|f| f.needs_resubscribe(now)) {
        match ctx.websub.subscribe(feed).await {
            Ok(PushState::SubscriptionRequested) => {
                report.renewed += 1;
                tracing::info!("Requested WebSub lease renewal for {}", feed.url);
            }
            Ok(state) => tracing::warn!("Lease renewal for {} not accepted ({:?})", feed.url, state),
            Err(e) => tracing::warn!("Lease renewal for {} failed: {}", feed.url, e),
        }
    }

    Ok(report)
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = sigint.recv() => {},
                }
            }
            _ => {
                tracing::warn!("Could not install signal handlers; falling back to Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown requested");
}

/// Resolves once `true` has been sent on the shutdown channel or its sender
/// is gone.
pub async fn stopped(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// Daemon runner
pub struct Daemon {
    ctx: Arc<AppContext>,
    config: DaemonConfig,
}

impl Daemon {
    pub fn new(ctx: Arc<AppContext>, config: DaemonConfig) -> Self {
        Self { ctx, config }
    }

    /// Sweep on the configured interval until shutdown.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        tracing::info!("Refresh scheduler started (interval: {})", self.config.interval);

        let mut timer = interval(self.config.interval.as_duration());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.config.run_on_start {
            // The first tick completes immediately.
            timer.tick().await;
        }

        let stop = stopped(shutdown);
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = timer.tick() => self.run_update().await,
            }
        }

        tracing::info!("Refresh scheduler stopped");
    }

    async fn run_update(&self) {
        let start = Utc::now();
        match refresh_all(&self.ctx).await {
            Ok(report) => {
                let elapsed = Utc::now().signed_duration_since(start);
                tracing::info!(
                    "Update complete: {} feeds, {} new items, {} errors, {} leases renewed ({:.1}s)",
                    report.feeds,
                    report.new_items,
                    report.errors,
                    report.renewed,
                    elapsed.num_milliseconds() as f64 / 1000.0
                );
            }
            Err(e) => tracing::error!("Failed to get feeds: {}", e),
        }
    }
}
