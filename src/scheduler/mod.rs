//! Periodic feed and watcher polling
//!
//! The scheduler wakes up every tick and:
//!
//! 1. polls every enabled page watcher whose `check_interval` has elapsed;
//!    feeds a watcher reports are checked on this pass regardless of their
//!    own interval
//! 2. dispatches a check of every enabled feed that is due, each on its own
//!    task, `feed_spacing` apart
//!
//! A feed whose previous check is still running is not dispatched again.
//! Unit concurrency is bounded by the coordinator, not here.
//!
//! # Example
//!
//! ```no_run
//! use release_relay::{Config, Coordinator};
//! use release_relay::scheduler::Scheduler;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = Arc::new(Coordinator::new(Config::new("https://example.org")).await?);
//! let token = coordinator.shutdown_token();
//!
//! tokio::spawn(Scheduler::new(coordinator).run(token));
//! # Ok(())
//! # }
//! ```

use crate::Coordinator;
use crate::config::WatcherConfig;
use crate::db::FeedRow;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause between scheduler passes
const TICK: Duration = Duration::from_secs(1);

/// How long shutdown waits for dispatched feed checks
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives feed and watcher checks until cancelled
pub struct Scheduler {
    coordinator: Arc<Coordinator>,
    tick: Duration,
    in_flight: InFlight,
}

impl Scheduler {
    /// Create a scheduler for `coordinator`
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            tick: TICK,
            in_flight: InFlight::default(),
        }
    }

    /// Override the pause between passes
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Run until `shutdown` is cancelled
    ///
    /// On shutdown, dispatched feed checks get a short grace period and are
    /// then aborted; their units are marked interrupted on the next start.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Scheduler started");
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            handles.retain(|h| !h.is_finished());

            let now = chrono::Utc::now().timestamp();
            let forced = self.poll_watchers(now).await;
            handles.extend(self.dispatch_feeds(now, &forced, &shutdown).await);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.tick) => {}
            }
        }

        info!(pending = handles.len(), "Scheduler shutting down");
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        if tokio::time::timeout(DRAIN_TIMEOUT, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("Feed checks still running after grace period, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
        info!("Scheduler stopped");
    }

    /// Poll due watchers, returning the feeds they triggered
    async fn poll_watchers(&self, now: i64) -> Vec<i64> {
        let config = self.coordinator.get_config();
        let mut forced = Vec::new();

        for watcher in config.watchers.iter().filter(|w| w.enabled) {
            let last_check = match self.coordinator.db.get_watcher_last_check(&watcher.url).await {
                Ok(last) => last,
                Err(e) => {
                    error!(url = %watcher.url, error = %e, "Failed to load watcher state");
                    continue;
                }
            };
            if !is_due(last_check, watcher.check_interval, now) {
                continue;
            }

            match self.coordinator.check_watcher(watcher).await {
                Ok(ids) => forced.extend(ids),
                Err(e) => self.watcher_failed(watcher, &e).await,
            }
        }
        forced
    }

    async fn watcher_failed(&self, watcher: &WatcherConfig, e: &crate::Error) {
        error!(url = %watcher.url, error = %e, "Watcher check failed");
        // Wait a full interval before trying again
        if let Err(e) = self.coordinator.db.update_watcher_last_check(&watcher.url).await {
            warn!(url = %watcher.url, error = %e, "Failed to stamp watcher check");
        }
    }

    /// Spawn a check for every due feed that is not already running
    async fn dispatch_feeds(
        &self,
        now: i64,
        forced: &[i64],
        shutdown: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let feeds = match self.coordinator.db.list_feeds().await {
            Ok(feeds) => feeds,
            Err(e) => {
                error!(error = %e, "Failed to load feeds, retrying next pass");
                return Vec::new();
            }
        };

        let spacing = self.coordinator.get_config().pipeline.feed_spacing;
        let mut handles = Vec::new();

        for feed in feeds.iter().filter(|f| feed_is_due(f, forced, now)) {
            let Some(claim) = self.in_flight.claim(feed.id) else {
                debug!(feed_id = feed.id, "Feed check still running, skipping");
                continue;
            };

            let delay = spacing * handles.len() as u32;
            let coordinator = self.coordinator.clone();
            let shutdown = shutdown.clone();
            let (feed_id, url) = (feed.id, feed.url.clone());

            handles.push(tokio::spawn(async move {
                let _claim = claim;
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        debug!(feed_id, url = %url, "Checking feed");
                        if let Err(e) = coordinator.check_feed(feed_id).await {
                            error!(feed_id, url = %url, error = %e, "Feed check failed");
                        }
                    }
                }
            }));
        }

        if !handles.is_empty() {
            debug!(count = handles.len(), "Dispatched feed checks");
        }
        handles
    }
}

/// Feeds with a dispatched check that has not finished yet
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<i64>>>);

impl InFlight {
    /// Mark `feed_id` running, unless it already is
    fn claim(&self, feed_id: i64) -> Option<InFlightClaim> {
        self.running().insert(feed_id).then(|| InFlightClaim {
            feeds: self.clone(),
            feed_id,
        })
    }

    fn running(&self) -> MutexGuard<'_, HashSet<i64>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases its feed when dropped, also when the check panics or is aborted
struct InFlightClaim {
    feeds: InFlight,
    feed_id: i64,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.feeds.running().remove(&self.feed_id);
    }
}

/// Whether a feed should be checked on this pass
fn feed_is_due(feed: &FeedRow, forced: &[i64], now: i64) -> bool {
    if !feed.enabled {
        return false;
    }
    forced.contains(&feed.id)
        || is_due(
            feed.last_check,
            Duration::from_secs(feed.check_interval_secs.max(0) as u64),
            now,
        )
}

/// Whether `interval` has elapsed since `last_check` (unix seconds)
///
/// Never-checked sources are always due. A clock that went backwards makes
/// the source due.
fn is_due(last_check: Option<i64>, interval: Duration, now: i64) -> bool {
    match last_check {
        None => true,
        Some(last) if last > now => {
            warn!(last_check = last, now, "System time went backwards, checking now");
            true
        }
        Some(last) => (now - last) as u64 >= interval.as_secs(),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
