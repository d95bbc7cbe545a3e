//! qBittorrent Web API (v2) client.
//!
//! Authenticates with `/api/v2/auth/login` and carries the returned `SID`
//! cookie on every request. A 403 answer means the session expired: the
//! client logs in again and repeats the request once.

use super::{DownloadClient, TorrentFileInfo, TorrentSource, TorrentStatus};
use crate::config::TorrentClientConfig;
use crate::error::{AcquisitionError, Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use tokio::sync::RwLock;

#[derive(Debug, Deserialize)]
struct TorrentInfo {
    hash: String,
    name: String,
    progress: f64,
    state: String,
    #[serde(default)]
    save_path: String,
    // -1 until a magnet's metadata is known
    #[serde(default)]
    total_size: i64,
}

impl From<TorrentInfo> for TorrentStatus {
    fn from(info: TorrentInfo) -> Self {
        Self {
            hash: info.hash.to_lowercase(),
            name: info.name,
            progress: info.progress,
            state: info.state,
            save_path: info.save_path,
            total_size: info.total_size.max(0) as u64,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TorrentFile {
    name: String,
    size: i64,
}

/// qBittorrent Web API client
#[derive(Debug)]
pub struct QbittorrentClient {
    http_client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    sid: RwLock<Option<String>>,
}

impl QbittorrentClient {
    /// Create a client; no request is made until first use
    pub fn new(config: &TorrentClientConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            sid: RwLock::new(None),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/v2{}", self.base_url, endpoint)
    }

    /// Log in and store the session cookie
    pub async fn login(&self) -> Result<()> {
        let username = self.username.as_deref().unwrap_or_default();
        let password = self.password.as_deref().unwrap_or_default();

        let response = self
            .http_client
            .post(self.url("/auth/login"))
            .header(reqwest::header::REFERER, &self.base_url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .map_err(|e| AcquisitionError::Login(e.to_string()))?;

        let sid = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|cookie| {
                cookie
                    .split(';')
                    .next()
                    .and_then(|pair| pair.trim().strip_prefix("SID="))
                    .map(str::to_string)
            });

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() || body.trim() != "Ok." {
            return Err(AcquisitionError::Login(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.trim()
            ))
            .into());
        }

        *self.sid.write().await = sid;
        tracing::debug!("Logged in to qBittorrent");
        Ok(())
    }

    /// Send a request, logging in first or again as needed
    async fn send<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        if self.username.is_some() && self.sid.read().await.is_none() {
            self.login().await?;
        }

        let mut relogged = false;
        loop {
            let mut request = build(&self.http_client);
            if let Some(sid) = self.sid.read().await.as_deref() {
                request = request.header(reqwest::header::COOKIE, format!("SID={}", sid));
            }

            let response = request
                .send()
                .await
                .map_err(|e| AcquisitionError::Client(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::FORBIDDEN && !relogged {
                tracing::debug!("qBittorrent session expired, logging in again");
                self.login().await?;
                relogged = true;
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AcquisitionError::Client(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    body.trim()
                ))
                .into());
            }
            return Ok(response);
        }
    }

    async fn torrents(&self, query: &[(&str, &str)]) -> Result<Vec<TorrentStatus>> {
        let response = self
            .send(|client| client.get(self.url("/torrents/info")).query(query))
            .await?;

        let infos: Vec<TorrentInfo> = response
            .json()
            .await
            .map_err(|e| AcquisitionError::Client(format!("invalid torrent list: {}", e)))?;
        Ok(infos.into_iter().map(TorrentStatus::from).collect())
    }
}

#[async_trait]
impl DownloadClient for QbittorrentClient {
    async fn add(&self, source: &TorrentSource, save_path: &Path, tag: &str) -> Result<()> {
        let save_path = save_path.to_string_lossy().into_owned();

        let response = self
            .send(|client| {
                let form = Form::new()
                    .text("savepath", save_path.clone())
                    .text("tags", tag.to_string());
                let form = match source {
                    TorrentSource::Magnet(uri) => form.text("urls", uri.clone()),
                    TorrentSource::File { name, bytes } => form.part(
                        "torrents",
                        Part::bytes(bytes.clone())
                            .file_name(name.clone())
                            .mime_str("application/x-bittorrent")
                            .unwrap_or_else(|_| Part::bytes(bytes.clone())),
                    ),
                };
                client.post(self.url("/torrents/add")).multipart(form)
            })
            .await?;

        let body = response.text().await.unwrap_or_default();
        if body.trim() != "Ok." {
            return Err(AcquisitionError::Rejected(body.trim().to_string()).into());
        }
        Ok(())
    }

    async fn find_by_tag(&self, tag: &str) -> Result<Option<TorrentStatus>> {
        Ok(self.torrents(&[("tag", tag)]).await?.into_iter().next())
    }

    async fn status(&self, hash: &str) -> Result<Option<TorrentStatus>> {
        Ok(self
            .torrents(&[("hashes", hash)])
            .await?
            .into_iter()
            .find(|t| t.hash.eq_ignore_ascii_case(hash)))
    }

    async fn list_files(&self, hash: &str) -> Result<Vec<TorrentFileInfo>> {
        let response = self
            .send(|client| {
                client
                    .get(self.url("/torrents/files"))
                    .query(&[("hash", hash)])
            })
            .await?;

        let files: Vec<TorrentFile> = response
            .json()
            .await
            .map_err(|e| AcquisitionError::Client(format!("invalid file list: {}", e)))?;
        Ok(files
            .into_iter()
            .map(|f| TorrentFileInfo {
                name: f.name,
                size: f.size.max(0) as u64,
            })
            .collect())
    }

    async fn remove(&self, hash: &str, delete_data: bool) -> Result<()> {
        let delete_files = if delete_data { "true" } else { "false" };
        self.send(|client| {
            client
                .post(self.url("/torrents/delete"))
                .form(&[("hashes", hash), ("deleteFiles", delete_files)])
        })
        .await?;
        Ok(())
    }

    async fn add_trackers(&self, hash: &str, urls: &[String]) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        let joined = urls.join("\n");
        self.send(|client| {
            client
                .post(self.url("/torrents/addTrackers"))
                .form(&[("hash", hash), ("urls", joined.as_str())])
        })
        .await?;
        Ok(())
    }
}
