//! Database layer for release-relay
//!
//! Handles SQLite persistence for anime, feeds, release units and uploads.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`anime`] - Anime records and known episode titles
//! - [`feeds`] - Feed rows, cached snapshots and watcher state
//! - [`units`] - Release units (episodes and batches), status transitions
//! - [`uploads`] - Per-destination upload records

use crate::config::{EncodeProfile, FeedKind};
use crate::error::DatabaseError;
use crate::types::{
    PublicLinks, ReleaseUnit, Resolution, SubType, UnitId, UnitKind, UnitStatus, UploadRecord,
    UploadStatus,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod anime;
mod feeds;
mod migrations;
mod units;
mod uploads;

/// Anime record
#[derive(Debug, Clone, PartialEq)]
pub struct Anime {
    /// Unique database ID
    pub id: i64,
    /// Canonical title
    pub title: String,
    /// Alternate titles accepted by the title parser
    pub alt_names: Vec<String>,
    /// Encoder tuning
    pub encode: EncodeProfile,
}

/// Anime record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct AnimeRow {
    /// Unique database ID
    pub id: i64,
    /// Canonical title
    pub title: String,
    /// Alternate titles (JSON array)
    pub alt_names: String,
    /// Encoder tuning (JSON object)
    pub encode: String,
    /// Unix timestamp when the anime was added
    pub created_at: i64,
}

impl TryFrom<AnimeRow> for Anime {
    type Error = Error;

    fn try_from(row: AnimeRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            title: row.title,
            alt_names: serde_json::from_str(&row.alt_names)?,
            encode: serde_json::from_str(&row.encode)?,
        })
    }
}

/// Feed record from database
#[derive(Debug, Clone, FromRow)]
pub struct FeedRow {
    /// Unique database ID
    pub id: i64,
    /// Source type (see [`FeedKind::as_str`])
    pub kind: String,
    /// Feed URL
    pub url: String,
    /// Anime the feed belongs to
    pub anime_id: i64,
    /// Push encoded episodes to the seedbox
    pub upload_seedbox: bool,
    /// Publish every episode to destinations
    pub upload_torrent: bool,
    /// Publish only the last episode of each discovery batch
    pub upload_last_episode: bool,
    /// Blu-ray source
    pub bluray: bool,
    /// Uncensored source
    pub uncensored: bool,
    /// Deinterlace while encoding
    pub deinterlace: bool,
    /// Extra tags inserted into published names
    pub extra_tags: Option<String>,
    /// Check interval in seconds
    pub check_interval_secs: i64,
    /// Whether the feed is checked
    pub enabled: bool,
    /// Cached snapshot (JSON array of feed entries)
    pub snapshot: Option<String>,
    /// Unix timestamp of the last check
    pub last_check: Option<i64>,
    /// Unix timestamp when the feed was added
    pub created_at: i64,
}

impl FeedRow {
    /// Parsed source type
    pub fn feed_kind(&self) -> Result<FeedKind> {
        FeedKind::from_db(&self.kind).ok_or_else(|| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "feed {} has unknown kind {}",
                self.id, self.kind
            )))
        })
    }
}

/// Parameters for inserting or refreshing a feed
#[derive(Debug, Clone)]
pub struct UpsertFeedParams<'a> {
    /// Source type
    pub kind: FeedKind,
    /// Feed URL (unique)
    pub url: &'a str,
    /// Owning anime
    pub anime_id: i64,
    /// Initial seedbox flag (kept on refresh)
    pub upload_seedbox: bool,
    /// Initial publish-all flag (kept on refresh)
    pub upload_torrent: bool,
    /// Initial last-episode flag (kept on refresh)
    pub upload_last_episode: bool,
    /// Blu-ray source
    pub bluray: bool,
    /// Uncensored source
    pub uncensored: bool,
    /// Deinterlace while encoding
    pub deinterlace: bool,
    /// Extra tags inserted into published names
    pub extra_tags: Option<&'a str>,
    /// Check interval in seconds
    pub check_interval_secs: i64,
    /// Whether the feed is checked
    pub enabled: bool,
}

/// Release unit record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct UnitRow {
    /// Unique database ID
    pub id: i64,
    /// Random public identifier
    pub public_id: String,
    /// "episode" or "batch"
    pub kind: String,
    /// Owning anime
    pub anime_id: i64,
    /// Feed the unit was discovered on
    pub feed_id: Option<i64>,
    /// Canonical name
    pub name: String,
    /// Title as seen in the feed
    pub original_title: String,
    /// Output file or torrent name
    pub file_name: String,
    /// Resolution height
    pub resolution: i64,
    /// "hardsubs" or "softsubs"
    pub subtype: String,
    /// Uncensored source
    pub uncensored: bool,
    /// Blu-ray source
    pub bluray: bool,
    /// Release group(s)
    pub release_group: String,
    /// Pipeline status (see [`UnitStatus::as_str`])
    pub status: String,
    /// Last completed stage
    pub completed_stage: Option<String>,
    /// Error detail
    pub error_message: Option<String>,
    /// Acquired source file
    pub source_path: Option<String>,
    /// Encoded artifact
    pub local_path: Option<String>,
    /// Source size in bytes
    pub source_size: i64,
    /// Encoded size in bytes
    pub encoded_size: i64,
    /// Seedbox torrent file
    pub seedbox_torrent: Option<String>,
    /// Watch link
    pub watch_url: Option<String>,
    /// Download link
    pub download_url: Option<String>,
    /// Torrent link
    pub torrent_url: Option<String>,
    /// Magnet link
    pub magnet_url: Option<String>,
    /// Shortened watch link
    pub short_watch_url: Option<String>,
    /// Shortened download link
    pub short_download_url: Option<String>,
    /// Shortened torrent link
    pub short_torrent_url: Option<String>,
    /// Shortened magnet link
    pub short_magnet_url: Option<String>,
    /// Unix timestamp when the unit was created
    pub created_at: i64,
    /// Unix timestamp when the unit was published
    pub published_at: Option<i64>,
}

impl TryFrom<UnitRow> for ReleaseUnit {
    type Error = Error;

    fn try_from(row: UnitRow) -> Result<Self> {
        let resolution = u32::try_from(row.resolution)
            .ok()
            .and_then(Resolution::from_height)
            .ok_or_else(|| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "unit {} has unsupported resolution {}",
                    row.id, row.resolution
                )))
            })?;

        Ok(Self {
            id: UnitId(row.id),
            public_id: row.public_id,
            kind: UnitKind::from_db(&row.kind),
            anime_id: row.anime_id,
            feed_id: row.feed_id,
            name: row.name,
            original_title: row.original_title,
            file_name: row.file_name,
            resolution,
            subtype: SubType::from_db(&row.subtype),
            uncensored: row.uncensored,
            bluray: row.bluray,
            release_group: row.release_group,
            status: UnitStatus::from_db(&row.status),
            completed_stage: row.completed_stage.as_deref().map(UnitStatus::from_db),
            error_message: row.error_message,
            source_path: row.source_path.map(PathBuf::from),
            local_path: row.local_path.map(PathBuf::from),
            source_size: row.source_size.max(0) as u64,
            encoded_size: row.encoded_size.max(0) as u64,
            seedbox_torrent: row.seedbox_torrent.map(PathBuf::from),
            links: PublicLinks {
                watch_url: row.watch_url,
                download_url: row.download_url,
                torrent_url: row.torrent_url,
                magnet_url: row.magnet_url,
                short_watch_url: row.short_watch_url,
                short_download_url: row.short_download_url,
                short_torrent_url: row.short_torrent_url,
                short_magnet_url: row.short_magnet_url,
            },
            published_at: row
                .published_at
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)),
        })
    }
}

/// New release unit to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewReleaseUnit<'a> {
    /// Random public identifier
    pub public_id: &'a str,
    /// Episode or batch
    pub kind: UnitKind,
    /// Owning anime
    pub anime_id: i64,
    /// Feed the unit was discovered on
    pub feed_id: Option<i64>,
    /// Canonical name
    pub name: &'a str,
    /// Title as seen in the feed
    pub original_title: &'a str,
    /// Output file or torrent name
    pub file_name: &'a str,
    /// Target resolution
    pub resolution: Resolution,
    /// Subtitle delivery
    pub subtype: SubType,
    /// Uncensored source
    pub uncensored: bool,
    /// Blu-ray source
    pub bluray: bool,
    /// Release group(s)
    pub release_group: &'a str,
    /// Acquired source file
    pub source_path: Option<&'a std::path::Path>,
    /// Source size in bytes
    pub source_size: u64,
    /// Public links
    pub links: &'a PublicLinks,
}

/// Dedup key identifying exactly one episode unit
#[derive(Debug, Clone, Copy)]
pub struct EpisodeKey<'a> {
    /// Owning anime
    pub anime_id: i64,
    /// Canonical episode name
    pub name: &'a str,
    /// Target resolution
    pub resolution: Resolution,
    /// Blu-ray source
    pub bluray: bool,
    /// Uncensored source
    pub uncensored: bool,
    /// Release group
    pub release_group: &'a str,
}

/// Screenshot record from database
#[derive(Debug, Clone, FromRow)]
pub struct ScreenshotRow {
    /// Unique database ID
    pub id: i64,
    /// Unit the screenshot belongs to
    pub unit_id: i64,
    /// File name (e.g. "03.jpg")
    pub file_name: String,
    /// Path on local disk
    pub path: String,
}

/// Upload record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct UploadRow {
    /// Unique database ID
    pub id: i64,
    /// Unit that was uploaded
    pub unit_id: i64,
    /// Destination name
    pub destination: String,
    /// Announce list (JSON array)
    pub trackers: String,
    /// Canonical URL
    pub canonical_url: Option<String>,
    /// Magnet URI
    pub magnet_uri: Option<String>,
    /// Raw response (JSON)
    pub response: Option<String>,
    /// Status (0=pending, 1=uploaded, 2=failed)
    pub status: i32,
    /// Failure detail
    pub error_message: Option<String>,
    /// Shortened canonical URL
    pub short_url: Option<String>,
    /// Shortened magnet URI
    pub short_magnet: Option<String>,
    /// Unix timestamp when the record was created
    pub created_at: i64,
}

impl TryFrom<UploadRow> for UploadRecord {
    type Error = Error;

    fn try_from(row: UploadRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            unit_id: UnitId(row.unit_id),
            destination: row.destination,
            trackers: serde_json::from_str(&row.trackers)?,
            canonical_url: row.canonical_url,
            magnet_uri: row.magnet_uri,
            response: row
                .response
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            status: UploadStatus::from_i32(row.status),
            error_message: row.error_message,
            short_url: row.short_url,
            short_magnet: row.short_magnet,
        })
    }
}

/// Database handle for release-relay
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
