//! nyaa.si and nyaa.net upload APIs

use super::{
    Destination, UploadOutcome, UploadRequest, credentials, description, http_client, torrent_part,
};
use crate::config::DestinationConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::Form;
use serde_json::{Value, json};
use tracing::debug;

const NYAA_NET_SUCCESS: &str = "torrent uploaded successfully!";

/// Markdown screenshot gallery appended to nyaa descriptions
fn markdown_screenshots(description: &mut String, urls: &[String]) {
    if urls.is_empty() {
        return;
    }
    description.push_str("\n\n---\n");
    for url in urls {
        description.push_str(&format!("\n![]({})", url));
    }
}

async fn send_for_json(name: &str, request: reqwest::RequestBuilder) -> Result<Value> {
    let response = request
        .send()
        .await
        .map_err(|e| Error::destination(name, e.to_string()))?;
    let status = response.status();
    response
        .json::<Value>()
        .await
        .map_err(|e| Error::destination(name, format!("HTTP {}: unreadable response: {}", status.as_u16(), e)))
}

/// nyaa.si upload API
///
/// `api_key` holds `user:password` for basic auth. The `category` option
/// overrides the default `1_2` (Anime - English-translated).
pub struct NyaaSi {
    name: String,
    api_url: String,
    username: String,
    password: String,
    category: String,
    site_url: String,
    client: reqwest::Client,
}

impl NyaaSi {
    /// Create from a destination config
    pub fn new(config: &DestinationConfig, site_url: &str) -> Result<Self> {
        let (username, password) = credentials(config)?;
        Ok(Self {
            name: config.name().to_string(),
            api_url: config.api_url.clone(),
            username,
            password,
            category: config.option("category").unwrap_or("1_2").to_string(),
            site_url: site_url.to_string(),
            client: http_client(config.timeout)?,
        })
    }
}

#[async_trait]
impl Destination for NyaaSi {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, request: &UploadRequest<'_>) -> Result<UploadOutcome> {
        let mut text = description(
            request.resolution,
            request.subtype,
            &format!("our [website]({})", self.site_url),
        );
        markdown_screenshots(&mut text, request.screenshot_urls);

        let torrent_data = json!({
            "category": self.category,
            "information": self.site_url,
            "description": text,
            "anonymous": true,
            "hidden": false,
            "complete": request.is_batch,
            "remake": true,
            "trusted": true,
        });
        let form = Form::new()
            .part("torrent", torrent_part(request)?)
            .text("torrent_data", torrent_data.to_string());

        debug!(destination = %self.name, torrent = request.torrent_name, "Uploading");
        let body = send_for_json(
            &self.name,
            self.client
                .post(&self.api_url)
                .basic_auth(&self.username, Some(&self.password))
                .multipart(form),
        )
        .await?;

        match body.get("url").and_then(Value::as_str) {
            Some(url) => Ok(UploadOutcome {
                canonical_url: url.trim().to_string(),
                response: body,
            }),
            None => Err(Error::destination(
                &self.name,
                format!("no url in response: {}", body),
            )),
        }
    }
}

/// nyaa.net upload API
///
/// `api_key` is sent verbatim as the `Authorization` header. Options:
/// `username` (uploader name) and `category` (default `3_5`).
pub struct NyaaNet {
    name: String,
    api_url: String,
    token: String,
    username: Option<String>,
    category: String,
    site_url: String,
    client: reqwest::Client,
}

impl NyaaNet {
    /// Create from a destination config
    pub fn new(config: &DestinationConfig, site_url: &str) -> Result<Self> {
        Ok(Self {
            name: config.name().to_string(),
            api_url: config.api_url.clone(),
            token: config.api_key.clone(),
            username: config.option("username").map(str::to_string),
            category: config.option("category").unwrap_or("3_5").to_string(),
            site_url: site_url.to_string(),
            client: http_client(config.timeout)?,
        })
    }
}

#[async_trait]
impl Destination for NyaaNet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, request: &UploadRequest<'_>) -> Result<UploadOutcome> {
        let mut text = description(
            request.resolution,
            request.subtype,
            &format!("[{0}]({0})", self.site_url),
        );
        markdown_screenshots(&mut text, request.screenshot_urls);

        let mut form = Form::new()
            .part("torrent", torrent_part(request)?)
            .text("c", self.category.clone())
            .text("desc", text)
            .text("languages", "en")
            .text("remake", "false")
            .text("hidden", "false");
        if let Some(username) = &self.username {
            form = form.text("username", username.clone());
        }

        debug!(destination = %self.name, torrent = request.torrent_name, "Uploading");
        let body = send_for_json(
            &self.name,
            self.client
                .post(&self.api_url)
                .header(reqwest::header::AUTHORIZATION, &self.token)
                .multipart(form),
        )
        .await?;

        let accepted = body
            .pointer("/infos/0")
            .and_then(Value::as_str)
            .is_some_and(|info| info.trim() == NYAA_NET_SUCCESS);
        let url = body.pointer("/data/torrent").and_then(Value::as_str);

        match (accepted, url) {
            (true, Some(url)) => Ok(UploadOutcome {
                canonical_url: url.trim().to_string(),
                response: body,
            }),
            _ => Err(Error::destination(
                &self.name,
                format!("upload not accepted: {}", body),
            )),
        }
    }
}
