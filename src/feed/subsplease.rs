//! SubsPlease show pages and JSON API.
//!
//! A show page (`{site}/shows/{slug}/`) embeds the show id as the `sid`
//! attribute of its release table; the episode list then comes from
//! `{site}/api/?f=show&tz=UTC&sid={sid}`. Only the 1080p torrent of each
//! episode is used, rewritten to its nyaa.si download link.
//!
//! The same client serves the page watcher through `f=latest`, whose
//! newest-first ordering is preserved.

use super::FeedFetcher;
use crate::error::{Error, Result};
use crate::types::FeedEntry;
use crate::watcher::{WatcherEntry, WatcherSource};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const BATCH_MARKERS: [&str; 2] = ["[Batch]", "(Batch)"];

/// Client for SubsPlease show pages and API
#[derive(Clone, Debug)]
pub struct SubsPleaseClient {
    http_client: reqwest::Client,
    table_tag: Regex,
    sid_attr: Regex,
    entry_title: Regex,
    markup: Regex,
    torrent_id: Regex,
}

impl SubsPleaseClient {
    /// Create a client with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("release-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            table_tag: compile(r"<table\b[^>]*>")?,
            sid_attr: compile(r#"\bsid=["']?(\d+)"#)?,
            entry_title: compile(r#"(?s)<h1\b[^>]*class="[^"]*\bentry-title\b[^"]*"[^>]*>(.*?)</h1>"#)?,
            markup: compile(r"<[^>]*>")?,
            torrent_id: compile(r"view/(\d+)/torrent")?,
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Feed(format!("Failed to fetch {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Feed(format!(
                "{} returned HTTP {}",
                url,
                status.as_u16()
            )));
        }
        Ok(response)
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        self.get(url)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| Error::Feed(format!("Invalid JSON from {}: {}", url, e)))
    }

    async fn get_page(&self, url: &str) -> Result<String> {
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| Error::Feed(format!("Failed to read {}: {}", url, e)))
    }

    /// Show id embedded in a show page
    pub fn parse_sid(&self, page: &str) -> Option<String> {
        self.table_tag
            .find_iter(page)
            .map(|m| m.as_str())
            .find(|tag| tag.contains("show-release-table"))
            .and_then(|tag| self.sid_attr.captures(tag))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Show title of a show page, with en dashes normalised
    pub fn parse_title(&self, page: &str) -> Option<String> {
        let inner = self.entry_title.captures(page)?.get(1)?.as_str();
        let text = self.markup.replace_all(inner, "");
        let title = normalize_dash(&decode_entities(&text)).trim().to_string();
        (!title.is_empty()).then_some(title)
    }

    /// Episode entries of a `f=show` API response
    pub fn parse_show(&self, api: &Value) -> Vec<FeedEntry> {
        // An empty episode list is sent as [] rather than {}
        let Some(episodes) = api.get("episode").and_then(Value::as_object) else {
            return Vec::new();
        };

        episodes
            .iter()
            .filter_map(|(name, entry)| {
                let download = entry
                    .get("downloads")?
                    .as_array()?
                    .iter()
                    .find(|d| d.get("res").and_then(Value::as_str) == Some("1080"))?;

                let torrent = download.get("torrent").and_then(Value::as_str)?;
                let id = self.torrent_id.captures(torrent)?.get(1)?.as_str();

                Some(FeedEntry {
                    title: format!("[SubsPlease] {} [1080p].mkv", normalize_dash(name)),
                    torrent_magnet: download
                        .get("magnet")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    torrent_url: Some(format!("https://nyaa.si/download/{}.torrent", id)),
                })
            })
            .collect()
    }

    async fn show_sid(&self, show_url: &str) -> Result<(String, String)> {
        let page = self.get_page(show_url).await?;
        let sid = self
            .parse_sid(&page)
            .ok_or_else(|| Error::Feed(format!("No show id on {}", show_url)))?;
        Ok((sid, page))
    }
}

/// Entries of a `f=latest` API response, newest first
pub fn parse_latest(origin: &str, api: &Value) -> Vec<WatcherEntry> {
    let Some(latest) = api.as_object() else {
        return Vec::new();
    };

    latest
        .iter()
        .filter(|(title, _)| !BATCH_MARKERS.iter().any(|m| title.contains(m)))
        .filter_map(|(title, entry)| {
            let page = entry.get("page").and_then(Value::as_str)?;
            Some(WatcherEntry {
                title: normalize_dash(title),
                href: format!("{}/shows/{}/", origin, page),
            })
        })
        .collect()
}

#[async_trait]
impl FeedFetcher for SubsPleaseClient {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>> {
        self.show_entries(url).await
    }
}

#[async_trait]
impl WatcherSource for SubsPleaseClient {
    async fn latest(&self, url: &str) -> Result<Vec<WatcherEntry>> {
        let origin = origin(url)?;
        let api = self
            .get_json(&format!("{}/api/?f=latest&tz=UTC&p=0", origin))
            .await?;
        let entries = parse_latest(&origin, &api);
        debug!(url, count = entries.len(), "Fetched latest releases");
        Ok(entries)
    }

    async fn show_title(&self, show_url: &str) -> Result<String> {
        let page = self.get_page(show_url).await?;
        self.parse_title(&page)
            .ok_or_else(|| Error::Feed(format!("No show title on {}", show_url)))
    }

    async fn show_entries(&self, show_url: &str) -> Result<Vec<FeedEntry>> {
        let (sid, _) = self.show_sid(show_url).await?;
        let api = self
            .get_json(&format!(
                "{}/api/?f=show&tz=UTC&sid={}",
                origin(show_url)?,
                urlencoding::encode(&sid)
            ))
            .await?;
        Ok(self.parse_show(&api))
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::Other(format!("invalid built-in pattern {}: {}", pattern, e)))
}

/// Scheme, host and port of `url`
fn origin(url: &str) -> Result<String> {
    let parsed =
        url::Url::parse(url).map_err(|e| Error::Feed(format!("Invalid URL {}: {}", url, e)))?;
    Ok(parsed.origin().ascii_serialization())
}

fn normalize_dash(text: &str) -> String {
    text.replace('\u{2013}', "-")
}

/// Decode the HTML entities WordPress emits in titles
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find(';').filter(|&end| end <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };

        let entity = &tail[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            "ndash" => Some('-'),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|n| n.parse().ok()))
                .and_then(char::from_u32),
        };

        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
