//! Content acquisition through the download client
//!
//! [`Acquirer::acquire`] turns a feed entry into files on local disk:
//!
//! 1. prefer the entry's `.torrent` file, fall back to its magnet URI
//! 2. add it to the client under a fresh tag, then let the client settle
//! 3. resolve the info-hash (tag lookup, or the magnet's own hash)
//! 4. append every configured tracker
//! 5. poll until the client reports a complete download, up to the ceiling;
//!    failed status checks are polled again and a download still incomplete
//!    at the ceiling is removed along with its data
//! 6. read back the file list and detach the torrent, keeping its data

use crate::error::{AcquisitionError, Result};
use crate::polling::wait_for;
use crate::torrent_client::{DownloadClient, TorrentSource, TorrentStatus, magnet_info_hash};
use crate::types::FeedEntry;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timing of one acquisition
#[derive(Clone, Copy, Debug)]
pub struct AcquisitionTiming {
    /// Pause between adding a torrent and first looking it up
    pub settle_delay: Duration,
    /// Status polling period
    pub poll_period: Duration,
    /// Give up when the download is not complete after this long
    pub timeout: Duration,
}

/// One downloaded file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcquiredFile {
    /// File name, without the torrent's top-level folder
    pub name: String,
    /// Absolute location on disk
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

/// Result of a completed acquisition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Acquired {
    /// Info-hash of the downloaded torrent
    pub hash: String,
    /// Torrent name
    pub name: String,
    /// Downloaded files, sorted by name
    pub files: Vec<AcquiredFile>,
}

impl Acquired {
    /// The episode file of a single-episode torrent (its largest file)
    pub fn primary(&self) -> Option<&AcquiredFile> {
        self.files.iter().max_by_key(|f| f.size)
    }
}

/// Drives the download client for one entry at a time
pub struct Acquirer {
    client: Arc<dyn DownloadClient>,
    http_client: reqwest::Client,
    save_dir: PathBuf,
    trackers: Vec<String>,
    timing: AcquisitionTiming,
}

impl Acquirer {
    /// Create an acquirer saving into `save_dir`
    pub fn new(
        client: Arc<dyn DownloadClient>,
        http_client: reqwest::Client,
        save_dir: PathBuf,
        trackers: Vec<String>,
        timing: AcquisitionTiming,
    ) -> Self {
        Self {
            client,
            http_client,
            save_dir,
            trackers,
            timing,
        }
    }

    /// Download the content of `entry` and detach it from the client
    pub async fn acquire(&self, entry: &FeedEntry) -> Result<Acquired> {
        let source = self.source_for(entry).await?;
        let tag = format!("relay-{:016x}", rand::thread_rng().r#gen::<u64>());

        tokio::fs::create_dir_all(&self.save_dir).await?;
        self.client.add(&source, &self.save_dir, &tag).await?;
        info!(title = %entry.title, tag = %tag, "Added torrent to download client");

        tokio::time::sleep(self.timing.settle_delay).await;
        let hash = self.resolve_hash(&source, &tag).await?;

        if let Err(e) = self.client.add_trackers(&hash, &self.trackers).await {
            warn!(error = %e, hash = %hash, "Failed to add trackers");
        }

        let complete = wait_for(
            || self.poll_status(&hash),
            |status: &Option<TorrentStatus>| status.as_ref().is_some_and(|s| s.is_complete()),
            self.timing.poll_period,
            self.timing.timeout,
        )
        .await;

        if !complete {
            self.abandon(&hash).await;
            return Err(AcquisitionError::Timeout {
                hash,
                timeout_secs: self.timing.timeout.as_secs(),
            }
            .into());
        }

        let status = self
            .client
            .status(&hash)
            .await?
            .ok_or_else(|| AcquisitionError::Missing(hash.clone()))?;
        let files = self.client.list_files(&hash).await?;
        self.client.remove(&hash, false).await?;

        let save_path = if status.save_path.is_empty() {
            self.save_dir.clone()
        } else {
            PathBuf::from(&status.save_path)
        };
        let folder = format!("{}/", status.name);

        let mut files: Vec<AcquiredFile> = files
            .into_iter()
            .map(|f| AcquiredFile {
                path: save_path.join(&f.name),
                name: f
                    .name
                    .strip_prefix(&folder)
                    .unwrap_or(&f.name)
                    .trim()
                    .to_string(),
                size: f.size,
            })
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));

        info!(hash = %hash, name = %status.name, files = files.len(), "Download complete");
        Ok(Acquired {
            hash,
            name: status.name,
            files,
        })
    }

    /// Status for the completion wait; a failed check counts as not done
    async fn poll_status(&self, hash: &str) -> Option<TorrentStatus> {
        match self.client.status(hash).await {
            Ok(status) => status,
            Err(e) => {
                warn!(hash, error = %e, "Status check failed, polling again");
                None
            }
        }
    }

    /// Drop a download that will not complete, data included
    async fn abandon(&self, hash: &str) {
        match self.client.remove(hash, true).await {
            Ok(()) => info!(hash, "Removed abandoned download"),
            Err(e) => warn!(hash, error = %e, "Failed to remove abandoned download"),
        }
    }

    async fn source_for(&self, entry: &FeedEntry) -> Result<TorrentSource> {
        if let Some(url) = entry.torrent_url.as_deref() {
            let bytes = self.fetch_torrent_file(url).await?;
            let name = url
                .rsplit('/')
                .next()
                .filter(|n| !n.is_empty())
                .unwrap_or("source.torrent")
                .to_string();
            return Ok(TorrentSource::File { name, bytes });
        }
        if let Some(magnet) = entry.torrent_magnet.as_deref() {
            return Ok(TorrentSource::Magnet(magnet.to_string()));
        }
        Err(AcquisitionError::NoSource {
            title: entry.title.clone(),
        }
        .into())
    }

    async fn fetch_torrent_file(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "Fetching torrent file");
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| AcquisitionError::Fetch(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(
                AcquisitionError::Fetch(format!("{}: HTTP {}", url, status.as_u16())).into(),
            );
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AcquisitionError::Fetch(format!("{}: {}", url, e)))?;
        Ok(bytes.to_vec())
    }

    async fn resolve_hash(&self, source: &TorrentSource, tag: &str) -> Result<String> {
        if let Some(status) = self.client.find_by_tag(tag).await? {
            return Ok(status.hash);
        }
        match source {
            TorrentSource::Magnet(uri) => magnet_info_hash(uri),
            TorrentSource::File { .. } => Err(AcquisitionError::Missing(tag.to_string()).into()),
        }
    }
}
