//! Publishing destinations
//!
//! Every torrent site gets its own request shape behind the [`Destination`]
//! trait; the fanout only depends on the trait. Implementations are chosen
//! once, from the closed [`DestinationKind`] enum, by [`build_destination`].
//!
//! - [`NyaaSi`]: nyaa.si upload API (basic auth, JSON `torrent_data`)
//! - [`NyaaNet`]: nyaa.net upload API (`Authorization` header)
//! - [`Anidex`]: AniDex upload API (`api_key` form field)
//! - [`TokyoTosho`]: Tokyo Toshokan submission by torrent URL
//! - [`AniRena`]: AniRena session login and two-step upload form

mod anidex;
mod anirena;
mod nyaa;
mod tokyotosho;

pub use anidex::Anidex;
pub use anirena::AniRena;
pub use nyaa::{NyaaNet, NyaaSi};
pub use tokyotosho::TokyoTosho;

use crate::config::{DestinationConfig, DestinationKind};
use crate::error::{Error, Result};
use crate::types::{Resolution, SubType};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Everything a destination needs to publish one torrent
#[derive(Clone, Copy, Debug)]
pub struct UploadRequest<'a> {
    /// File name of the torrent, including `.torrent`
    pub torrent_name: &'a str,
    /// Bencoded torrent
    pub torrent: &'a [u8],
    /// Resolution of the release
    pub resolution: Resolution,
    /// Release group(s) of the source
    pub release_group: &'a str,
    /// Subtitle delivery of the release
    pub subtype: SubType,
    /// Public screenshot URLs
    pub screenshot_urls: &'a [String],
    /// Publicly downloadable torrent file, for sites that fetch it themselves
    pub torrent_file_url: Option<&'a str>,
    /// Whether the torrent is a batch
    pub is_batch: bool,
}

/// Successful upload
#[derive(Clone, Debug, PartialEq)]
pub struct UploadOutcome {
    /// Canonical URL of the published torrent
    pub canonical_url: String,
    /// Raw destination response
    pub response: serde_json::Value,
}

/// A site finished torrents are published to
#[async_trait]
pub trait Destination: Send + Sync {
    /// Name upload records are keyed by
    fn name(&self) -> &str;

    /// Publish one torrent
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::PublishError::Destination`] when the site
    /// rejects the upload or answers without its success marker.
    async fn upload(&self, request: &UploadRequest<'_>) -> Result<UploadOutcome>;
}

/// Build the destination described by `config`
///
/// `site_url` is linked from every description.
pub fn build_destination(config: &DestinationConfig, site_url: &str) -> Result<Arc<dyn Destination>> {
    let destination: Arc<dyn Destination> = match config.kind {
        DestinationKind::NyaaSi => Arc::new(NyaaSi::new(config, site_url)?),
        DestinationKind::NyaaNet => Arc::new(NyaaNet::new(config, site_url)?),
        DestinationKind::Anidex => Arc::new(Anidex::new(config, site_url)?),
        DestinationKind::TokyoTosho => Arc::new(TokyoTosho::new(config, site_url)?),
        DestinationKind::AniRena => Arc::new(AniRena::new(config, site_url)?),
    };
    Ok(destination)
}

/// Shared release description; `site` is the site link in the destination's markup
pub(crate) fn description(resolution: Resolution, subtype: SubType, site: &str) -> String {
    let delivery = match subtype {
        SubType::Softsubs => "Softsubs MKV",
        SubType::Hardsubs => "Hardsubs MP4",
    };
    format!(
        "{}p HEVC(x265) AAC {}.\nplease seed as much as possible.\nVisit {} for direct download links for individual episodes and all our releases!",
        resolution.height(),
        delivery,
        site
    )
}

/// HTTP client for one destination
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("release-relay/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Other(format!("failed to build HTTP client: {}", e)))
}

/// Split `user:password` credentials
pub(crate) fn credentials(config: &DestinationConfig) -> Result<(String, String)> {
    config
        .api_key
        .split_once(':')
        .map(|(user, password)| (user.to_string(), password.to_string()))
        .ok_or_else(|| {
            Error::config(
                "destinations",
                format!("{} expects api_key in the form user:password", config.name()),
            )
        })
}

/// Send `request` and return the trimmed response body
pub(crate) async fn send_for_text(name: &str, request: reqwest::RequestBuilder) -> Result<String> {
    let response = request
        .send()
        .await
        .map_err(|e| Error::destination(name, e.to_string()))?;
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| Error::destination(name, format!("HTTP {}: {}", status.as_u16(), e)))?;
    Ok(text.trim().to_string())
}

/// Torrent part of a multipart upload
pub(crate) fn torrent_part(request: &UploadRequest<'_>) -> Result<reqwest::multipart::Part> {
    reqwest::multipart::Part::bytes(request.torrent.to_vec())
        .file_name(request.torrent_name.to_string())
        .mime_str("application/x-bittorrent")
        .map_err(|e| Error::Other(format!("invalid torrent part: {}", e)))
}
