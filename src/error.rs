//! Error types for release-relay
//!
//! This module provides the error taxonomy for the release pipeline:
//! - Parse failures (title could not be interpreted; the entry is skipped)
//! - Acquisition failures (the download never reached a complete state)
//! - Transcode and screenshot failures (fatal and best-effort respectively)
//! - Publishing failures (per destination, shortener, seedbox confirmation)
//! - Infrastructure errors (database, network, I/O, configuration)

use crate::types::{UnitId, UnitStatus};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for release-relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for release-relay
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "destinations")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Release title could not be parsed
    #[error("unparsable release title: {0}")]
    Parse(#[from] ParseFailure),

    /// Content could not be acquired through the torrent client
    #[error("acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    /// Transcoder failed
    #[error("transcode failed for {path}: {reason}")]
    Transcode {
        /// Input file that failed to encode
        path: PathBuf,
        /// Transcoder-reported reason
        reason: String,
    },

    /// Screenshot generation failed (non-fatal for the pipeline)
    #[error("screenshot generation failed: {0}")]
    Screenshot(String),

    /// Publishing error (destination upload, seedbox confirmation)
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    /// URL shortening failed (non-fatal, canonical URLs are kept)
    #[error("URL shortening failed: {0}")]
    Shorten(String),

    /// A status transition lost a race or violated the state machine
    #[error("invalid transition for unit {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Unit whose status could not be changed
        id: UnitId,
        /// Status the caller expected the unit to be in
        from: UnitStatus,
        /// Requested new status
        to: UnitStatus,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new work")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Feed content could not be fetched or decoded
    #[error("feed error: {0}")]
    Feed(String),

    /// External tool (ffmpeg, ffprobe, imdl) failed to run
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (collaborator not configured, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Reasons a release title could not be parsed
///
/// Parsing fails closed: any missing field rejects the whole title.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    /// Title does not start with a bracketed release group
    #[error("no leading [group] in {title:?}")]
    MissingReleaseGroup {
        /// The offending title
        title: String,
    },

    /// No text outside of brackets to derive an episode name from
    #[error("no episode name in {title:?}")]
    MissingEpisodeName {
        /// The offending title
        title: String,
    },

    /// None of the resolution strategies matched
    #[error("no resolution marker in {title:?}")]
    MissingResolution {
        /// The offending title
        title: String,
    },

    /// A resolution was found but is not one we publish
    #[error("unsupported resolution {value} in {title:?}")]
    UnsupportedResolution {
        /// The offending title
        title: String,
        /// The height that was found
        value: u32,
    },

    /// The anime name (or an alternate) is not part of the episode name
    #[error("{title:?} does not belong to {anime:?}")]
    AnimeMismatch {
        /// The offending title
        title: String,
        /// Anime the title was matched against
        anime: String,
    },
}

/// Acquisition (torrent client) errors
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// Neither a magnet URI nor a torrent payload was available
    #[error("entry {title:?} has neither magnet nor torrent file")]
    NoSource {
        /// Feed entry title
        title: String,
    },

    /// The `.torrent` file named by the feed entry could not be downloaded
    #[error("failed to fetch torrent file: {0}")]
    Fetch(String),

    /// The client refused to add the torrent
    #[error("torrent client rejected add: {0}")]
    Rejected(String),

    /// The client could not find the torrent after adding it
    #[error("torrent {0} not found in client")]
    Missing(String),

    /// The client API returned an error
    #[error("torrent client error: {0}")]
    Client(String),

    /// Authentication against the client failed
    #[error("torrent client login failed: {0}")]
    Login(String),

    /// The download did not complete before the wait ceiling elapsed
    #[error("download of {hash} did not complete within {timeout_secs}s")]
    Timeout {
        /// Torrent identifier
        hash: String,
        /// Ceiling that elapsed
        timeout_secs: u64,
    },

    /// Magnet URI is malformed
    #[error("invalid magnet URI: {0}")]
    InvalidMagnet(String),
}

/// Publishing errors
#[derive(Debug, Error)]
pub enum PublishError {
    /// A destination rejected or failed an upload
    #[error("upload to {destination} failed: {reason}")]
    Destination {
        /// Destination name
        destination: String,
        /// Why it failed
        reason: String,
    },

    /// The seedbox did not acknowledge the batch torrent
    #[error("seedbox did not confirm {name}: {response}")]
    SeedboxConfirmation {
        /// Torrent name sent to the seedbox
        name: String,
        /// What the seedbox answered instead
        response: String,
    },

    /// The seedbox transfer itself failed
    #[error("seedbox transfer failed: {0}")]
    Seedbox(String),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Build a destination failure
    pub fn destination(destination: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Publish(PublishError::Destination {
            destination: destination.into(),
            reason: reason.into(),
        })
    }
}
