//! # release-relay
//!
//! Automated anime release pipeline: watch feeds, acquire new releases
//! through a BitTorrent client, re-encode them at several resolutions and
//! publish the results to torrent sites.
//!
//! ## Design Philosophy
//!
//! release-relay is designed to be:
//! - **Resumable** - Every release unit records its last completed stage
//! - **Idempotent publishing** - One upload record per unit and destination
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use release_relay::{Config, Coordinator, run_with_shutdown};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new("https://releases.example.org");
//!     let coordinator = Arc::new(Coordinator::new(config).await?);
//!     coordinator.sync_feeds().await?;
//!
//!     // Subscribe to events
//!     let mut events = coordinator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     run_with_shutdown(coordinator).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Content acquisition through the download client
pub mod acquisition;
/// Configuration types
pub mod config;
/// Release pipeline coordinator (decomposed into focused submodules)
pub mod coordinator;
/// Database persistence layer
pub mod db;
/// Torrent site destinations
pub mod destinations;
/// Error types
pub mod error;
/// Publishing to every destination
pub mod fanout;
/// Feed fetching and snapshot diffing
pub mod feed;
/// Encoding, screenshots and torrent creation
pub mod media;
/// Release title parsing and output naming
pub mod parser;
/// Polling with a ceiling
pub mod polling;
/// Retry logic with exponential backoff
pub mod retry;
/// Periodic feed and watcher checks
pub mod scheduler;
/// Seedbox transfers
pub mod seedbox;
/// URL shortening
pub mod shortener;
/// BitTorrent client integration
pub mod torrent_client;
/// Core types and events
pub mod types;
/// "Latest releases" page watching
pub mod watcher;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::{Config, DestinationKind, FeedKind, WatcherKind};
pub use coordinator::{Collaborators, Coordinator, FeedCheck};
pub use db::Database;
pub use error::{
    AcquisitionError, DatabaseError, Error, ParseFailure, PublishError, Result,
};
pub use scheduler::Scheduler;
pub use types::{
    Event, FeedEntry, PublicLinks, ReleaseUnit, Resolution, SubType, UnitId, UnitKind, UnitStatus,
    UploadRecord, UploadStatus,
};

/// Helper function to run the pipeline with graceful signal handling.
///
/// Marks units interrupted by a previous run as failed, starts the
/// [`Scheduler`], waits for a termination signal and then shuts the
/// coordinator down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use release_relay::{Config, Coordinator, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::new("https://releases.example.org");
///     let coordinator = Arc::new(Coordinator::new(config).await?);
///
///     // Run with automatic signal handling
///     run_with_shutdown(coordinator).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(coordinator: std::sync::Arc<Coordinator>) -> Result<()> {
    coordinator.recover_interrupted().await?;

    let scheduler = Scheduler::new(coordinator.clone());
    let handle = tokio::spawn(scheduler.run(coordinator.shutdown_token()));

    wait_for_signal().await;
    coordinator.shutdown().await?;

    if let Err(e) = handle.await {
        tracing::error!(error = %e, "Scheduler task failed");
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
