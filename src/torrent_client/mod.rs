//! Download client seam
//!
//! The acquisition stage talks to a BitTorrent client through
//! [`DownloadClient`]; [`QbittorrentClient`] implements it over the
//! qBittorrent Web API. Torrents are identified by their lowercase hex
//! info-hash and, right after adding, by a per-acquisition tag.

use crate::error::{AcquisitionError, Result};
use async_trait::async_trait;
use data_encoding::BASE32_NOPAD;
use std::path::Path;

mod qbittorrent;

pub use self::qbittorrent::QbittorrentClient;

/// States in which qBittorrent considers a torrent fully downloaded
const COMPLETE_STATES: [&str; 7] = [
    "uploading",
    "stalledUP",
    "pausedUP",
    "stoppedUP",
    "queuedUP",
    "forcedUP",
    "checkingUP",
];

/// Content handed to the client
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TorrentSource {
    /// Magnet URI
    Magnet(String),
    /// Raw `.torrent` file
    File {
        /// File name sent with the upload
        name: String,
        /// Bencoded metainfo
        bytes: Vec<u8>,
    },
}

/// Client-reported state of one torrent
#[derive(Clone, Debug, PartialEq)]
pub struct TorrentStatus {
    /// Info-hash
    pub hash: String,
    /// Torrent name (single-file torrents: the file name)
    pub name: String,
    /// Progress between 0.0 and 1.0
    pub progress: f64,
    /// Client state string
    pub state: String,
    /// Directory the content is saved in
    pub save_path: String,
    /// Total size of selected files in bytes
    pub total_size: u64,
}

impl TorrentStatus {
    /// Whether the content is fully on disk
    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0 && COMPLETE_STATES.contains(&self.state.as_str())
    }
}

/// One file of a torrent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TorrentFileInfo {
    /// Path relative to the save path
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

/// Operations the pipeline needs from a BitTorrent client
#[async_trait]
pub trait DownloadClient: Send + Sync {
    /// Start downloading `source` into `save_path`, labelled with `tag`
    async fn add(&self, source: &TorrentSource, save_path: &Path, tag: &str) -> Result<()>;

    /// Find the torrent labelled with `tag`
    async fn find_by_tag(&self, tag: &str) -> Result<Option<TorrentStatus>>;

    /// Current status of a torrent
    async fn status(&self, hash: &str) -> Result<Option<TorrentStatus>>;

    /// Files of a torrent
    async fn list_files(&self, hash: &str) -> Result<Vec<TorrentFileInfo>>;

    /// Stop managing a torrent, optionally deleting its data
    async fn remove(&self, hash: &str, delete_data: bool) -> Result<()>;

    /// Append announce URLs to a torrent
    async fn add_trackers(&self, hash: &str, urls: &[String]) -> Result<()>;
}

/// Lowercase hex info-hash of a magnet URI
///
/// Accepts both 40-character hex and 32-character base32 `btih` values.
pub fn magnet_info_hash(magnet: &str) -> Result<String> {
    let invalid = || AcquisitionError::InvalidMagnet(magnet.to_string());

    let query = magnet.strip_prefix("magnet:?").ok_or_else(invalid)?;
    let btih = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| *key == "xt")
        .find_map(|(_, value)| {
            let value = urlencoding::decode(value).ok()?;
            value
                .strip_prefix("urn:btih:")
                .map(|hash| hash.to_string())
        })
        .ok_or_else(invalid)?;

    let bytes = match btih.len() {
        40 => hex::decode(&btih).map_err(|_| invalid())?,
        32 => BASE32_NOPAD
            .decode(btih.to_ascii_uppercase().as_bytes())
            .map_err(|_| invalid())?,
        _ => return Err(invalid().into()),
    };
    Ok(hex::encode(bytes))
}
