//! AniDex upload API

use super::{
    Destination, UploadOutcome, UploadRequest, description, http_client, send_for_text,
    torrent_part,
};
use crate::config::DestinationConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::Form;
use serde_json::json;
use tracing::debug;

const SUCCESS_PREFIX: &str = "https://anidex.info/torrent";

/// AniDex upload API
///
/// Options: `subcat_id` (default `1`), `lang_id` (default `1`) and
/// `group_id` (uploads are group-less when absent).
pub struct Anidex {
    name: String,
    api_url: String,
    api_key: String,
    subcategory: String,
    language: String,
    group: Option<String>,
    site_url: String,
    client: reqwest::Client,
}

impl Anidex {
    /// Create from a destination config
    pub fn new(config: &DestinationConfig, site_url: &str) -> Result<Self> {
        Ok(Self {
            name: config.name().to_string(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            subcategory: config.option("subcat_id").unwrap_or("1").to_string(),
            language: config.option("lang_id").unwrap_or("1").to_string(),
            group: config.option("group_id").map(str::to_string),
            site_url: site_url.to_string(),
            client: http_client(config.timeout)?,
        })
    }
}

#[async_trait]
impl Destination for Anidex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, request: &UploadRequest<'_>) -> Result<UploadOutcome> {
        let mut text = description(
            request.resolution,
            request.subtype,
            &format!("[url]{}[/url]", self.site_url),
        );
        for url in request.screenshot_urls {
            text.push_str(&format!("\n[img]{}[/img]", url));
        }

        let mut form = Form::new()
            .part("file", torrent_part(request)?)
            .text("subcat_id", self.subcategory.clone())
            .text("lang_id", self.language.clone())
            .text("api_key", self.api_key.clone())
            .text("description", text)
            .text("reencode", "1");
        if let Some(group) = &self.group {
            form = form.text("group_id", group.clone());
        }
        if request.is_batch {
            form = form.text("batch", "1");
        }

        debug!(destination = %self.name, torrent = request.torrent_name, "Uploading");
        let body = send_for_text(&self.name, self.client.post(&self.api_url).multipart(form)).await?;

        if body.starts_with(SUCCESS_PREFIX) {
            Ok(UploadOutcome {
                canonical_url: body.clone(),
                response: json!({ "text": body }),
            })
        } else {
            Err(Error::destination(&self.name, body))
        }
    }
}
