//! Configuration types for release-relay

use crate::error::{Error, Result};
use crate::types::Resolution;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf, time::Duration};

/// Top-level configuration
///
/// Fields are organized into logical sub-configs:
/// - [`pipeline`](PipelineConfig) - work directories, concurrency, acquisition timing
/// - [`torrent_client`](TorrentClientConfig) - qBittorrent Web API access
/// - [`retry`](RetryConfig) - destination/seedbox retry policy
/// - `destinations`, `trackers` - where finished torrents are published
/// - `feeds`, `watchers` - where new releases are discovered
///
/// The pipeline sub-config is flattened so its fields sit at the top level
/// of the serialized form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Public site the published links point to (e.g. "https://example.org")
    pub site_url: String,

    /// Pipeline behavior (directories, concurrency, polling)
    #[serde(flatten)]
    pub pipeline: PipelineConfig,

    /// Download client
    #[serde(default)]
    pub torrent_client: TorrentClientConfig,

    /// Retry policy for destination uploads and seedbox transfers
    #[serde(default)]
    pub retry: RetryConfig,

    /// Publishing destinations, attempted in order
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,

    /// Named tracker groups used to build announce lists
    #[serde(default)]
    pub trackers: Vec<TrackerGroup>,

    /// Feeds tracking already-known anime
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,

    /// Page watchers discovering new anime
    #[serde(default)]
    pub watchers: Vec<WatcherConfig>,

    /// URL shortener (links stay unshortened when absent)
    #[serde(default)]
    pub shortener: Option<ShortenerConfig>,

    /// Seedbox (seedbox uploads are skipped when absent)
    #[serde(default)]
    pub seedbox: Option<SeedboxConfig>,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Minimal configuration for a site with everything else defaulted
    pub fn new(site_url: impl Into<String>) -> Self {
        Self {
            site_url: site_url.into(),
            pipeline: PipelineConfig::default(),
            torrent_client: TorrentClientConfig::default(),
            retry: RetryConfig::default(),
            destinations: vec![],
            trackers: vec![],
            feeds: vec![],
            watchers: vec![],
            shortener: None,
            seedbox: None,
            persistence: PersistenceConfig::default(),
        }
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.site_url.trim().is_empty() {
            return Err(Error::config("site_url", "site_url must not be empty"));
        }
        url::Url::parse(&self.site_url)
            .map_err(|e| Error::config("site_url", format!("invalid site_url: {}", e)))?;

        if self.pipeline.max_concurrent_units == 0 {
            return Err(Error::config(
                "max_concurrent_units",
                "max_concurrent_units must be at least 1",
            ));
        }
        if self.pipeline.poll_period.is_zero() {
            return Err(Error::config("poll_period", "poll_period must be non-zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "retry.max_attempts",
                "max_attempts must be at least 1",
            ));
        }
        if self.pipeline.target_resolutions.is_empty() {
            return Err(Error::config(
                "target_resolutions",
                "at least one target resolution is required",
            ));
        }

        for destination in &self.destinations {
            if destination.api_url.trim().is_empty() {
                return Err(Error::config(
                    "destinations",
                    format!("destination {} has an empty api_url", destination.name()),
                ));
            }
            if let Some(group) = &destination.tracker_group
                && !self.trackers.iter().any(|t| &t.name == group)
            {
                return Err(Error::config(
                    "destinations",
                    format!(
                        "destination {} references unknown tracker group {}",
                        destination.name(),
                        group
                    ),
                ));
            }
        }

        for feed in &self.feeds {
            if feed.url.trim().is_empty() {
                return Err(Error::config("feeds", "feed url must not be empty"));
            }
            if feed.anime.trim().is_empty() {
                return Err(Error::config(
                    "feeds",
                    format!("feed {} has no anime title", feed.url),
                ));
            }
        }

        for watcher in &self.watchers {
            if watcher.url.trim().is_empty() {
                return Err(Error::config("watchers", "watcher url must not be empty"));
            }
        }

        Ok(())
    }

    /// Every configured tracker URL, group order preserved
    pub fn all_trackers(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for group in &self.trackers {
            for url in &group.urls {
                if !urls.contains(url) {
                    urls.push(url.clone());
                }
            }
        }
        urls
    }

    /// Announce list for a destination: its own tracker group first, then the rest
    pub fn announce_list_for(&self, destination: &DestinationConfig) -> Vec<String> {
        let own = destination
            .tracker_group
            .as_deref()
            .and_then(|name| self.trackers.iter().find(|t| t.name == name));

        let mut urls: Vec<String> = Vec::new();
        let others = self
            .trackers
            .iter()
            .filter(|t| Some(t.name.as_str()) != destination.tracker_group.as_deref());

        for group in own.into_iter().chain(others) {
            for url in &group.urls {
                if !urls.contains(url) {
                    urls.push(url.clone());
                }
            }
        }
        urls
    }
}

/// Pipeline behavior configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Where the torrent client saves source downloads (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Where encoded episodes and screenshots are kept (default: "./library")
    #[serde(default = "default_library_dir")]
    pub library_dir: PathBuf,

    /// Scratch space for assembling batches (default: "./batches")
    #[serde(default = "default_batch_dir")]
    pub batch_dir: PathBuf,

    /// Maximum release units processed at once (default: 2)
    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_units: usize,

    /// How often the download client is polled while waiting (default: 3 seconds)
    #[serde(default = "default_poll_period", with = "duration_serde")]
    pub poll_period: Duration,

    /// Ceiling on waiting for one download to complete (default: 24 hours)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub download_timeout: Duration,

    /// Resolution feed entries must carry to be acquired (default: 1080)
    #[serde(default = "default_source_resolution")]
    pub source_resolution: Resolution,

    /// Resolutions derived from every acquired source (default: 1080, 720, 480)
    #[serde(default = "default_target_resolutions")]
    pub target_resolutions: Vec<Resolution>,

    /// Tag prefixed to every published name (default: "SSA")
    #[serde(default = "default_publisher_tag")]
    pub publisher_tag: String,

    /// Number of screenshots extracted per episode (default: 6)
    #[serde(default = "default_screenshot_count")]
    pub screenshot_count: usize,

    /// Number of member screenshots attached to a batch (default: 5)
    #[serde(default = "default_batch_screenshot_count")]
    pub batch_screenshot_count: usize,

    /// Pause between consecutive feed checks in one scheduler pass (default: 30 seconds)
    #[serde(default = "default_feed_spacing", with = "duration_serde")]
    pub feed_spacing: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            library_dir: default_library_dir(),
            batch_dir: default_batch_dir(),
            max_concurrent_units: default_max_concurrent_units(),
            poll_period: default_poll_period(),
            download_timeout: default_download_timeout(),
            source_resolution: default_source_resolution(),
            target_resolutions: default_target_resolutions(),
            publisher_tag: default_publisher_tag(),
            screenshot_count: default_screenshot_count(),
            batch_screenshot_count: default_batch_screenshot_count(),
            feed_spacing: default_feed_spacing(),
        }
    }
}

/// qBittorrent Web API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TorrentClientConfig {
    /// Base URL of the Web UI (default: "http://127.0.0.1:8080")
    #[serde(default = "default_torrent_client_url")]
    pub url: String,

    /// Web UI username
    #[serde(default)]
    pub username: Option<String>,

    /// Web UI password
    #[serde(default)]
    pub password: Option<String>,

    /// Delay between adding a torrent and first looking it up (default: 3 seconds)
    #[serde(default = "default_settle_delay", with = "duration_serde")]
    pub settle_delay: Duration,

    /// HTTP timeout for each API call (default: 30 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for TorrentClientConfig {
    fn default() -> Self {
        Self {
            url: default_torrent_client_url(),
            username: None,
            password: None,
            settle_delay: default_settle_delay(),
            timeout: default_http_timeout(),
        }
    }
}

/// Retry configuration for destination uploads and seedbox transfers
///
/// Defaults to a fixed schedule: 3 attempts in total, 5 minutes apart,
/// which keeps the pipeline inside upload-site rate limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 300 seconds)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 300 seconds)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each attempt (default: 1.0, fixed delay)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_retry_delay(),
            max_delay: default_retry_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Kind of publishing destination
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    /// nyaa.si upload API
    NyaaSi,
    /// nyaa.net upload API
    NyaaNet,
    /// AniDex upload API
    Anidex,
    /// Tokyo Toshokan submission form
    TokyoTosho,
    /// AniRena two-step upload form
    AniRena,
}

impl DestinationKind {
    /// Default display name
    pub fn default_name(&self) -> &'static str {
        match self {
            DestinationKind::NyaaSi => "nyaa.si",
            DestinationKind::NyaaNet => "nyaa.net",
            DestinationKind::Anidex => "anidex",
            DestinationKind::TokyoTosho => "tokyotosho",
            DestinationKind::AniRena => "anirena",
        }
    }
}

/// Publishing destination configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Which upload protocol this destination speaks
    pub kind: DestinationKind,

    /// Name the destination is recorded under (default: the kind's name)
    #[serde(default)]
    pub name: Option<String>,

    /// Upload endpoint
    pub api_url: String,

    /// API key, or "user:password" for destinations using credentials
    #[serde(default)]
    pub api_key: String,

    /// Tracker group that must lead this destination's announce list
    #[serde(default)]
    pub tracker_group: Option<String>,

    /// Whether uploads go to this destination (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP timeout for one upload attempt (default: 600 seconds)
    #[serde(default = "default_upload_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Site-specific form fields (e.g. `group_id` for AniDex, `username` for nyaa.net)
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl DestinationConfig {
    /// Name the destination's upload records are keyed by
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.kind.default_name())
    }

    /// Site-specific option, if set
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// Named list of tracker announce URLs
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackerGroup {
    /// Group name referenced by destinations
    pub name: String,

    /// Announce URLs
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Kind of feed source
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// nyaa-style RSS feed (Atom accepted as a fallback)
    NyaaRss,
    /// SubsPlease show page backed by its JSON API
    SubsPlease,
}

impl FeedKind {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::NyaaRss => "nyaa_rss",
            FeedKind::SubsPlease => "subs_please",
        }
    }

    /// Parse the database representation
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "nyaa_rss" => Some(FeedKind::NyaaRss),
            "subs_please" => Some(FeedKind::SubsPlease),
            _ => None,
        }
    }
}

/// Per-anime encoder tuning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncodeProfile {
    /// Constant rate factor (default: 24.2)
    #[serde(default = "default_crf")]
    pub crf: f64,

    /// Apply the smartblur filter (default: true)
    #[serde(default = "default_true")]
    pub smartblur: bool,

    /// x265 deblock strength pair (default: "1,1")
    #[serde(default = "default_deblock")]
    pub deblock: String,

    /// x265 psy-rd (default: 1.0)
    #[serde(default = "default_one")]
    pub psy_rd: f64,

    /// x265 psy-rdoq (default: 1.0)
    #[serde(default = "default_one")]
    pub psy_rdoq: f64,

    /// x265 aq-strength (default: 1.0)
    #[serde(default = "default_one")]
    pub aq_strength: f64,
}

impl Default for EncodeProfile {
    fn default() -> Self {
        Self {
            crf: default_crf(),
            smartblur: true,
            deblock: default_deblock(),
            psy_rd: 1.0,
            psy_rdoq: 1.0,
            aq_strength: 1.0,
        }
    }
}

/// Feed configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Source type
    pub kind: FeedKind,

    /// Feed URL (RSS feed or show page)
    pub url: String,

    /// Canonical anime title the feed belongs to
    pub anime: String,

    /// Alternate titles substituted for the canonical one during parsing
    #[serde(default)]
    pub alt_names: Vec<String>,

    /// Encoder tuning for this anime
    #[serde(default)]
    pub encode: EncodeProfile,

    /// How often to check the feed (default: 15 minutes)
    #[serde(default = "default_check_interval", with = "duration_serde")]
    pub check_interval: Duration,

    /// Push encoded episodes to the seedbox (default: true)
    #[serde(default = "default_true")]
    pub upload_seedbox: bool,

    /// Publish every episode to destinations (default: true)
    #[serde(default = "default_true")]
    pub upload_torrent: bool,

    /// Publish only the last episode of each discovery batch (default: false)
    #[serde(default)]
    pub upload_last_episode: bool,

    /// Source is a Blu-ray release
    #[serde(default)]
    pub bluray: bool,

    /// Source is uncensored
    #[serde(default)]
    pub uncensored: bool,

    /// Deinterlace while encoding
    #[serde(default)]
    pub deinterlace: bool,

    /// Extra tags inserted into published names (e.g. "[Dual-Audio]")
    #[serde(default)]
    pub extra_tags: Option<String>,

    /// Whether feed is active
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Kind of page watcher
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherKind {
    /// SubsPlease "latest releases" API
    SubsPlease,
}

impl WatcherKind {
    /// Feed kind created for shows discovered by this watcher
    pub fn feed_kind(&self) -> FeedKind {
        match self {
            WatcherKind::SubsPlease => FeedKind::SubsPlease,
        }
    }
}

/// Page watcher configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Source type
    pub kind: WatcherKind,

    /// Site URL the watcher polls
    pub url: String,

    /// Create anime and feeds for shows not tracked yet (default: false)
    #[serde(default)]
    pub add_missing: bool,

    /// How often to check (default: 15 minutes)
    #[serde(default = "default_check_interval", with = "duration_serde")]
    pub check_interval: Duration,

    /// Whether watcher is active
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// URL shortener configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShortenerConfig {
    /// Shorten endpoint
    pub api_url: String,

    /// API key
    pub api_key: String,

    /// Account identifier
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Seedbox configuration (ruTorrent with an HTTP upload area)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeedboxConfig {
    /// Base URL of the seedbox web server (e.g. "https://box.example.org")
    pub url: String,

    /// Account username
    pub username: String,

    /// Account password
    pub password: String,

    /// Base URL accepting HTTP PUT uploads into the download directory
    pub upload_url: String,

    /// Download directory on the seedbox (default: "/home/{username}/files/")
    #[serde(default)]
    pub files_dir: Option<String>,
}

impl SeedboxConfig {
    /// Download directory torrents are added into
    pub fn files_dir(&self) -> String {
        self.files_dir
            .clone()
            .unwrap_or_else(|| format!("/home/{}/files/", self.username))
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./release-relay.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

// Default value functions
fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_library_dir() -> PathBuf {
    PathBuf::from("library")
}

fn default_batch_dir() -> PathBuf {
    PathBuf::from("batches")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("release-relay.db")
}

fn default_max_concurrent_units() -> usize {
    2
}

fn default_poll_period() -> Duration {
    Duration::from_secs(3)
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(60 * 60 * 24)
}

fn default_source_resolution() -> Resolution {
    Resolution::P1080
}

fn default_target_resolutions() -> Vec<Resolution> {
    Resolution::ALL.to_vec()
}

fn default_publisher_tag() -> String {
    "SSA".to_string()
}

fn default_screenshot_count() -> usize {
    6
}

fn default_batch_screenshot_count() -> usize {
    5
}

fn default_feed_spacing() -> Duration {
    Duration::from_secs(30)
}

fn default_torrent_client_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(300)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_check_interval() -> Duration {
    Duration::from_secs(15 * 60) // 15 minutes
}

fn default_crf() -> f64 {
    24.2
}

fn default_deblock() -> String {
    "1,1".to_string()
}

fn default_one() -> f64 {
    1.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
