//! Acquisition coordinator split into focused submodules.
//!
//! The [`Coordinator`] drives release units from discovery to publication.
//! Its methods are organized by domain:
//! - [`lifecycle`] - Construction from config, startup recovery, shutdown
//! - [`feed`] - Feed checks and discovery batches
//! - [`unit`] - The per-unit state machine and manual resume
//! - [`batch`] - Batch creation and publishing
//!
//! A unit's stages run strictly in order on one task. Independent units run
//! in parallel, bounded by `max_concurrent_units`; every status change goes
//! through a compare-and-set in the database.

mod batch;
mod feed;
mod lifecycle;
mod unit;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use feed::FeedCheck;
pub use lifecycle::Collaborators;

use crate::acquisition::Acquirer;
use crate::config::Config;
use crate::db::Database;
use crate::fanout::Fanout;
use crate::feed::{FeedSources, SkipPatterns};
use crate::media::{ScreenshotGenerator, TorrentMaker, Transcoder};
use crate::parser::TitleParser;
use crate::seedbox::Seedbox;
use crate::shortener::UrlShortener;
use crate::types::{Event, PublicLinks};
use crate::watcher::PageWatcher;
use std::sync::Arc;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

/// External media tools
#[derive(Clone)]
pub(crate) struct MediaTools {
    /// Probing and encoding
    pub(crate) transcoder: Arc<dyn Transcoder>,
    /// Screenshot extraction
    pub(crate) screenshots: Arc<dyn ScreenshotGenerator>,
    /// `.torrent` creation for seedbox copies and batches
    pub(crate) torrent_maker: Arc<dyn TorrentMaker>,
}

/// Everything a finished unit is handed to
#[derive(Clone)]
pub(crate) struct Publishing {
    /// Destination fanout
    pub(crate) fanout: Arc<Fanout>,
    /// Long-term seeding host, when configured
    pub(crate) seedbox: Option<Arc<dyn Seedbox>>,
    /// Link shortener, when configured
    pub(crate) shortener: Option<Arc<dyn UrlShortener>>,
}

/// Where new releases are discovered
#[derive(Clone)]
pub(crate) struct Discovery {
    /// Feed fetchers per kind
    pub(crate) feeds: FeedSources,
    /// Entries excluded from every snapshot
    pub(crate) skip: SkipPatterns,
    /// Page watcher for "latest releases" views
    pub(crate) watcher: Arc<PageWatcher>,
}

/// Release pipeline (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Coordinator {
    /// Database instance for persistence
    /// Public so callers can inspect units and upload records
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Release title parser
    pub(crate) parser: Arc<TitleParser>,
    /// Download client driver
    pub(crate) acquirer: Arc<Acquirer>,
    /// Media tools
    pub(crate) media: MediaTools,
    /// Seedbox, destinations and shortener
    pub(crate) publishing: Publishing,
    /// Feed fetchers and watcher
    pub(crate) discovery: Discovery,
    /// Limits concurrently running acquisitions (respects max_concurrent_units)
    pub(crate) unit_slots: Arc<Semaphore>,
    /// Cancelled when the pipeline shuts down
    pub(crate) shutdown: CancellationToken,
}

impl Coordinator {
    /// Subscribe to pipeline events
    ///
    /// Each subscriber receives every event emitted after it subscribed.
    /// Slow subscribers that fall more than the channel capacity behind
    /// receive a `Lagged` error and skip ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Token cancelled by [`Coordinator::shutdown`]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Emit an event to all subscribers
    pub(crate) fn emit_event(&self, event: Event) {
        // send() only fails without subscribers
        self.event_tx.send(event).ok();
    }

    /// Public links of an episode
    pub(crate) fn episode_links(&self, public_id: &str, file_name: &str) -> PublicLinks {
        let site = self.config.site_url.trim_end_matches('/');
        PublicLinks {
            watch_url: Some(format!("{}/watch/{}", site, public_id)),
            download_url: Some(format!("{}/download/{}", site, public_id)),
            torrent_url: Some(format!(
                "{}/download/torrent/{}/{}.torrent",
                site,
                public_id,
                urlencoding::encode(file_name)
            )),
            magnet_url: Some(format!("{}/download/magnet/{}", site, public_id)),
            ..PublicLinks::default()
        }
    }

    /// Public links of a batch
    pub(crate) fn batch_links(&self, public_id: &str, name: &str) -> PublicLinks {
        let site = self.config.site_url.trim_end_matches('/');
        PublicLinks {
            torrent_url: Some(format!(
                "{}/download/batch/torrent/{}/{}.torrent",
                site,
                public_id,
                urlencoding::encode(name)
            )),
            magnet_url: Some(format!("{}/download/batch/magnet/{}", site, public_id)),
            ..PublicLinks::default()
        }
    }

    /// Public URL of a stored screenshot
    pub(crate) fn screenshot_url(&self, public_id: &str, file_name: &str) -> String {
        format!(
            "{}/media/screenshots/{}/{}",
            self.config.site_url.trim_end_matches('/'),
            public_id,
            file_name
        )
    }
}

/// Random public identifier for a new unit
pub(crate) fn new_public_id() -> String {
    use rand::Rng;
    format!("{:032x}", rand::thread_rng().r#gen::<u128>())
}
