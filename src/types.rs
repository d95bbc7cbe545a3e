//! Core types for release-relay

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a release unit (episode or batch)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub i64);

impl UnitId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for UnitId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for UnitId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for UnitId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for UnitId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Published vertical resolutions
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Resolution {
    /// 480p
    P480,
    /// 720p
    P720,
    /// 1080p
    P1080,
}

impl Resolution {
    /// All resolutions, highest first
    pub const ALL: [Resolution; 3] = [Resolution::P1080, Resolution::P720, Resolution::P480];

    /// Map a pixel height onto a supported resolution
    pub fn from_height(height: u32) -> Option<Self> {
        match height {
            480 => Some(Resolution::P480),
            720 => Some(Resolution::P720),
            1080 => Some(Resolution::P1080),
            _ => None,
        }
    }

    /// Pixel height
    pub fn height(&self) -> u32 {
        match self {
            Resolution::P480 => 480,
            Resolution::P720 => 720,
            Resolution::P1080 => 1080,
        }
    }
}

impl TryFrom<u32> for Resolution {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Resolution::from_height(value).ok_or_else(|| format!("unsupported resolution {value}"))
    }
}

impl From<Resolution> for u32 {
    fn from(r: Resolution) -> Self {
        r.height()
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}p", self.height())
    }
}

/// Subtitle delivery of an encoded release
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubType {
    /// Subtitles burned into the video (MP4)
    Hardsubs,
    /// Subtitle track muxed alongside the video (MKV)
    #[default]
    Softsubs,
}

impl SubType {
    /// Database/wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SubType::Hardsubs => "hardsubs",
            SubType::Softsubs => "softsubs",
        }
    }

    /// Parse the database representation (unknown values fall back to softsubs)
    pub fn from_db(value: &str) -> Self {
        match value {
            "hardsubs" => SubType::Hardsubs,
            _ => SubType::Softsubs,
        }
    }

    /// Container extension for this subtitle type
    pub fn extension(&self) -> &'static str {
        match self {
            SubType::Hardsubs => "mp4",
            SubType::Softsubs => "mkv",
        }
    }
}

/// What kind of release unit a record describes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// A single episode
    Episode,
    /// A group of episodes sharing anime, resolution and subtitle type
    Batch,
}

impl UnitKind {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Episode => "episode",
            UnitKind::Batch => "batch",
        }
    }

    /// Parse the database representation
    pub fn from_db(value: &str) -> Self {
        match value {
            "batch" => UnitKind::Batch,
            _ => UnitKind::Episode,
        }
    }
}

/// Pipeline status of a release unit
///
/// Pipeline statuses are strictly ordered; a unit only ever moves forward
/// or into [`UnitStatus::Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Seen in a feed, nothing acquired yet
    Discovered,
    /// Source content is on local disk
    Downloaded,
    /// Transcoder is running
    Encoding,
    /// Screenshots are being extracted
    GeneratingScreenshots,
    /// Encoded file is being pushed to the seedbox
    UploadingToSeedbox,
    /// Torrent is being published to destinations
    UploadingToTorrentSites,
    /// Fully published
    Finished,
    /// Stopped with an error; needs a manual re-trigger
    Error,
}

impl UnitStatus {
    /// Pipeline statuses in order
    pub const PIPELINE: [UnitStatus; 7] = [
        UnitStatus::Discovered,
        UnitStatus::Downloaded,
        UnitStatus::Encoding,
        UnitStatus::GeneratingScreenshots,
        UnitStatus::UploadingToSeedbox,
        UnitStatus::UploadingToTorrentSites,
        UnitStatus::Finished,
    ];

    /// Position in the pipeline (`None` for `Error`)
    pub fn rank(&self) -> Option<usize> {
        Self::PIPELINE.iter().position(|s| s == self)
    }

    /// Whether no further automatic transitions may happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitStatus::Finished | UnitStatus::Error)
    }

    /// Whether moving from `self` to `next` respects the state machine
    pub fn can_advance_to(&self, next: UnitStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(current), Some(target)) => target > current,
            (None, Some(_)) => false,
        }
    }

    /// The status after this one in the pipeline
    pub fn next(&self) -> Option<UnitStatus> {
        self.rank().and_then(|r| Self::PIPELINE.get(r + 1).copied())
    }

    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Discovered => "discovered",
            UnitStatus::Downloaded => "downloaded",
            UnitStatus::Encoding => "encoding",
            UnitStatus::GeneratingScreenshots => "generating_screenshots",
            UnitStatus::UploadingToSeedbox => "uploading_to_seedbox",
            UnitStatus::UploadingToTorrentSites => "uploading_to_torrent_sites",
            UnitStatus::Finished => "finished",
            UnitStatus::Error => "error",
        }
    }

    /// Parse the database representation (unknown values map to `Error`)
    pub fn from_db(value: &str) -> Self {
        Self::PIPELINE
            .iter()
            .copied()
            .find(|s| s.as_str() == value)
            .unwrap_or(UnitStatus::Error)
    }
}

/// Status of one (unit, destination) upload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Record created, upload not settled yet
    Pending,
    /// Destination accepted the torrent
    Uploaded,
    /// All attempts exhausted
    Failed,
}

impl UploadStatus {
    /// Convert integer status code to UploadStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => UploadStatus::Pending,
            1 => UploadStatus::Uploaded,
            _ => UploadStatus::Failed,
        }
    }

    /// Convert UploadStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            UploadStatus::Pending => 0,
            UploadStatus::Uploaded => 1,
            UploadStatus::Failed => 2,
        }
    }
}

/// One entry of a polled feed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    /// Raw release title
    pub title: String,
    /// Magnet URI, when the source provides one
    #[serde(default)]
    pub torrent_magnet: Option<String>,
    /// Link to a `.torrent` file, when the source provides one
    #[serde(default)]
    pub torrent_url: Option<String>,
}

impl FeedEntry {
    /// Entry with only a torrent-file link
    pub fn with_torrent_url(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            torrent_magnet: None,
            torrent_url: Some(url.into()),
        }
    }
}

/// Release unit moving through the pipeline
#[derive(Clone, Debug, PartialEq)]
pub struct ReleaseUnit {
    /// Database ID
    pub id: UnitId,
    /// Random public identifier used in links
    pub public_id: String,
    /// Episode or batch
    pub kind: UnitKind,
    /// Owning anime
    pub anime_id: i64,
    /// Feed the unit was discovered on (episodes only)
    pub feed_id: Option<i64>,
    /// Canonical episode (or batch) name
    pub name: String,
    /// Title as it appeared in the feed
    pub original_title: String,
    /// Output file name (episode) or torrent name (batch)
    pub file_name: String,
    /// Target resolution
    pub resolution: Resolution,
    /// Subtitle delivery
    pub subtype: SubType,
    /// Uncensored source
    pub uncensored: bool,
    /// Blu-ray source
    pub bluray: bool,
    /// Release group(s); comma-joined for batches
    pub release_group: String,
    /// Current pipeline status
    pub status: UnitStatus,
    /// Last pipeline stage that completed, used to resume after an error
    pub completed_stage: Option<UnitStatus>,
    /// Operator-facing error detail
    pub error_message: Option<String>,
    /// Acquired source file, kept until every derived unit is encoded
    pub source_path: Option<PathBuf>,
    /// Encoded artifact on local disk
    pub local_path: Option<PathBuf>,
    /// Size of the source file in bytes
    pub source_size: u64,
    /// Size of the encoded file in bytes
    pub encoded_size: u64,
    /// Torrent built for the seedbox copy
    pub seedbox_torrent: Option<PathBuf>,
    /// Public links
    pub links: PublicLinks,
    /// When the unit reached `Finished`
    pub published_at: Option<DateTime<Utc>>,
}

/// Public links of a release unit, plus their shortened forms
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicLinks {
    /// Streaming page
    pub watch_url: Option<String>,
    /// Direct download page
    pub download_url: Option<String>,
    /// `.torrent` download
    pub torrent_url: Option<String>,
    /// Magnet redirect
    pub magnet_url: Option<String>,
    /// Shortened `watch_url`
    pub short_watch_url: Option<String>,
    /// Shortened `download_url`
    pub short_download_url: Option<String>,
    /// Shortened `torrent_url`
    pub short_torrent_url: Option<String>,
    /// Shortened `magnet_url`
    pub short_magnet_url: Option<String>,
}

/// One upload of a unit to one destination
#[derive(Clone, Debug, PartialEq)]
pub struct UploadRecord {
    /// Database ID
    pub id: i64,
    /// Unit that was uploaded
    pub unit_id: UnitId,
    /// Destination name
    pub destination: String,
    /// Announce list baked into the uploaded torrent
    pub trackers: Vec<String>,
    /// Canonical URL returned by the destination
    pub canonical_url: Option<String>,
    /// Magnet URI of the uploaded torrent
    pub magnet_uri: Option<String>,
    /// Raw destination response
    pub response: Option<serde_json::Value>,
    /// Upload status
    pub status: UploadStatus,
    /// Failure detail when `status == Failed`
    pub error_message: Option<String>,
    /// Shortened canonical URL
    pub short_url: Option<String>,
    /// Shortened magnet URI
    pub short_magnet: Option<String>,
}

impl UploadRecord {
    /// Canonical URL to show users: shortened when available
    pub fn display_url(&self) -> Option<&str> {
        self.short_url.as_deref().or(self.canonical_url.as_deref())
    }
}

/// Event emitted by the pipeline
///
/// Consumers subscribe through [`crate::Coordinator::subscribe`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A release unit record was created
    UnitCreated {
        /// Unit ID
        id: UnitId,
        /// Canonical name
        name: String,
        /// Target resolution
        resolution: Resolution,
    },

    /// A unit advanced through the state machine
    StatusChanged {
        /// Unit ID
        id: UnitId,
        /// New status
        status: UnitStatus,
    },

    /// A unit stopped with a fatal error
    UnitFailed {
        /// Unit ID
        id: UnitId,
        /// Error detail
        error: String,
    },

    /// Screenshots could not be generated (pipeline continued)
    ScreenshotsFailed {
        /// Unit ID
        id: UnitId,
        /// Error detail
        error: String,
    },

    /// A destination accepted the unit
    Uploaded {
        /// Unit ID
        id: UnitId,
        /// Destination name
        destination: String,
        /// Canonical URL
        url: String,
    },

    /// A destination failed after all attempts
    UploadFailed {
        /// Unit ID
        id: UnitId,
        /// Destination name
        destination: String,
        /// Error detail
        error: String,
    },

    /// A unit reached `Finished`
    Published {
        /// Unit ID
        id: UnitId,
        /// Publish timestamp
        at: DateTime<Utc>,
    },

    /// A feed was polled
    FeedChecked {
        /// Feed URL
        url: String,
        /// Number of new entries found
        new_entries: usize,
    },

    /// A page watcher was polled
    WatcherChecked {
        /// Watcher URL
        url: String,
        /// Feeds that were triggered
        feeds: Vec<String>,
    },
}
