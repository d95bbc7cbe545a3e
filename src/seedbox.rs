//! Seedbox transfers
//!
//! Encoded files are pushed to the seedbox's upload area over HTTP PUT and
//! their torrents are handed to ruTorrent, which seeds them from the
//! download directory. ruTorrent answers an add with a redirect whose
//! `Location` carries the outcome; only `result[]=Success` counts as an
//! acknowledgement.

use crate::config::SeedboxConfig;
use crate::error::{Error, PublishError, Result};
use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::multipart::{Form, Part};
use std::path::Path;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// Acknowledgement marker in ruTorrent's redirect
pub const SUCCESS_MARKER: &str = "result[]=Success";

/// Long-term seeding host
#[async_trait]
pub trait Seedbox: Send + Sync {
    /// Copy a local file into the seedbox download directory
    async fn upload_file(&self, local: &Path, remote_name: &str) -> Result<()>;

    /// Start seeding `torrent` from the download directory
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::SeedboxConfirmation`] when the seedbox does
    /// not acknowledge the torrent.
    async fn add_torrent(&self, name: &str, torrent: &[u8]) -> Result<()>;
}

/// ruTorrent seedbox with an HTTP PUT upload area
pub struct RuTorrentSeedbox {
    add_url: String,
    upload_url: String,
    username: String,
    password: String,
    files_dir: String,
    client: reqwest::Client,
}

impl RuTorrentSeedbox {
    /// Create from the seedbox config
    pub fn new(config: &SeedboxConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Other(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            add_url: format!(
                "{}/rutorrent/php/addtorrent.php",
                config.url.trim_end_matches('/')
            ),
            upload_url: config.upload_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            files_dir: config.files_dir(),
            client,
        })
    }
}

#[async_trait]
impl Seedbox for RuTorrentSeedbox {
    async fn upload_file(&self, local: &Path, remote_name: &str) -> Result<()> {
        let file = tokio::fs::File::open(local).await?;
        let size = file.metadata().await?.len();
        let url = format!("{}/{}", self.upload_url, urlencoding::encode(remote_name));

        debug!(file = %local.display(), size, "Uploading to seedbox");
        let response = self
            .client
            .put(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| PublishError::Seedbox(format!("{}: {}", remote_name, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Seedbox(format!(
                "{}: HTTP {}",
                remote_name,
                status.as_u16()
            ))
            .into());
        }

        info!(name = remote_name, size, "Uploaded to seedbox");
        Ok(())
    }

    async fn add_torrent(&self, name: &str, torrent: &[u8]) -> Result<()> {
        let part = Part::bytes(torrent.to_vec())
            .file_name(name.to_string())
            .mime_str("application/x-bittorrent")
            .map_err(|e| Error::Other(format!("invalid torrent part: {}", e)))?;
        let form = Form::new()
            .text("not_add_path", "1")
            .text("dir_edit", self.files_dir.clone())
            .part("torrent_file", part);

        let response = self
            .client
            .post(&self.add_url)
            .basic_auth(&self.username, Some(&self.password))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PublishError::Seedbox(format!("{}: {}", name, e)))?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match location {
            Some(location) if location.contains(SUCCESS_MARKER) => {
                info!(name, "Seedbox acknowledged torrent");
                Ok(())
            }
            Some(location) => Err(PublishError::SeedboxConfirmation {
                name: name.to_string(),
                response: location,
            }
            .into()),
            None => Err(PublishError::SeedboxConfirmation {
                name: name.to_string(),
                response: format!("HTTP {} without redirect", response.status().as_u16()),
            }
            .into()),
        }
    }
}
