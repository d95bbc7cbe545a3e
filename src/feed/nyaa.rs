//! nyaa-style RSS feeds.
//!
//! Each item becomes a [`FeedEntry`] whose torrent link is the item link.
//! Feeds that fail to parse as RSS 2.0 are retried as Atom.

use super::FeedFetcher;
use crate::error::{Error, Result};
use crate::types::FeedEntry;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Fetches RSS (or Atom) feeds over HTTP
#[derive(Clone, Debug)]
pub struct RssFeedFetcher {
    http_client: reqwest::Client,
}

impl RssFeedFetcher {
    /// Create a fetcher with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("release-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    fn parse_as_rss(content: &str) -> Result<Vec<FeedEntry>> {
        let channel = content
            .parse::<rss::Channel>()
            .map_err(|e| Error::Feed(format!("RSS parse error: {}", e)))?;

        Ok(channel
            .items()
            .iter()
            .filter_map(|item| {
                let title = item.title()?.trim();
                let link = item
                    .link()
                    .or_else(|| item.enclosure().map(|enc| enc.url()))?;
                Some(FeedEntry::with_torrent_url(title, link))
            })
            .collect())
    }

    fn parse_as_atom(content: &str) -> Result<Vec<FeedEntry>> {
        let feed = atom_syndication::Feed::read_from(content.as_bytes())
            .map_err(|e| Error::Feed(format!("Atom parse error: {}", e)))?;

        Ok(feed
            .entries()
            .iter()
            .filter_map(|entry| {
                let link = entry
                    .links()
                    .iter()
                    .find(|link| {
                        link.href().ends_with(".torrent")
                            || link.mime_type() == Some("application/x-bittorrent")
                    })
                    .or_else(|| entry.links().first())?;
                Some(FeedEntry::with_torrent_url(
                    entry.title().as_str().trim(),
                    link.href(),
                ))
            })
            .collect())
    }

    /// Parse feed content, trying RSS first and Atom second
    pub fn parse(content: &str) -> Result<Vec<FeedEntry>> {
        match Self::parse_as_rss(content) {
            Ok(items) => {
                debug!("Successfully parsed as RSS, found {} items", items.len());
                Ok(items)
            }
            Err(rss_err) => {
                debug!("Failed to parse as RSS: {}, trying Atom", rss_err);
                match Self::parse_as_atom(content) {
                    Ok(items) => {
                        debug!("Successfully parsed as Atom, found {} items", items.len());
                        Ok(items)
                    }
                    Err(atom_err) => Err(Error::Feed(format!(
                        "Failed to parse feed as RSS or Atom. RSS error: {}. Atom error: {}",
                        rss_err, atom_err
                    ))),
                }
            }
        }
    }
}

#[async_trait]
impl FeedFetcher for RssFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>> {
        debug!("Checking RSS feed: {}", url);

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Feed(format!("Failed to fetch RSS feed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Feed(format!(
                "RSS feed returned HTTP {}: {}",
                status.as_u16(),
                url
            )));
        }

        let content = response
            .text()
            .await
            .map_err(|e| Error::Feed(format!("Failed to read RSS feed content: {}", e)))?;

        Self::parse(&content)
    }
}
