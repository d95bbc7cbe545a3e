//! Page watchers
//!
//! A watcher polls a site's "latest releases" view and maps each new entry
//! onto a tracked feed. Unlike feed checks, entries are matched by URL
//! containment: an entry whose show link is part of a feed URL belongs to
//! that feed. Unknown shows are added when the watcher allows it, with
//! upload flags chosen from how far behind the show's catalogue we are.

use crate::config::{EncodeProfile, WatcherConfig};
use crate::db::{Database, UpsertFeedParams};
use crate::error::Result;
use crate::feed::diff;
use crate::parser::TitleParser;
use crate::types::FeedEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fewer missing episodes than this publish everything; more publish only the newest
pub const CATCH_UP_THRESHOLD: usize = 4;

/// One row of a watched "latest releases" view
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherEntry {
    /// Release title
    pub title: String,
    /// Link to the show page
    pub href: String,
}

/// Site access needed by a page watcher
#[async_trait]
pub trait WatcherSource: Send + Sync {
    /// Latest releases, newest first
    async fn latest(&self, url: &str) -> Result<Vec<WatcherEntry>>;

    /// Canonical show title of a show page
    async fn show_title(&self, show_url: &str) -> Result<String>;

    /// Every release listed on a show page
    async fn show_entries(&self, show_url: &str) -> Result<Vec<FeedEntry>>;
}

/// Polls one kind of watched site and resolves entries to feeds
pub struct PageWatcher {
    db: Arc<Database>,
    parser: Arc<TitleParser>,
    source: Arc<dyn WatcherSource>,
}

impl PageWatcher {
    /// Create a watcher over `source`
    pub fn new(
        db: Arc<Database>,
        parser: Arc<TitleParser>,
        source: Arc<dyn WatcherSource>,
    ) -> Self {
        Self { db, parser, source }
    }

    /// Poll the watcher and return the IDs of feeds that have new releases
    ///
    /// The first poll of a watcher treats every listed entry as new.
    pub async fn check(&self, config: &WatcherConfig) -> Result<Vec<i64>> {
        let fresh = self.source.latest(&config.url).await?;
        let cached: Vec<WatcherEntry> = match self.db.get_watcher_snapshot(&config.url).await? {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };

        let updates = diff(&cached, &fresh);
        if !updates.is_empty() {
            self.db
                .save_watcher_snapshot(&config.url, &serde_json::to_string(&fresh)?)
                .await?;
        }
        debug!(url = %config.url, new = updates.len(), "Watcher polled");

        let mut feed_ids = Vec::new();
        for update in &updates {
            match self.resolve(config, update).await {
                Ok(Some(id)) => {
                    if !feed_ids.contains(&id) {
                        feed_ids.push(id);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, href = %update.href, "Failed to resolve watcher entry");
                }
            }
        }

        self.db.update_watcher_last_check(&config.url).await?;
        Ok(feed_ids)
    }

    async fn resolve(&self, config: &WatcherConfig, entry: &WatcherEntry) -> Result<Option<i64>> {
        let href = entry.href.trim_end_matches('/');

        if let Some(feed) = self.db.find_feed_by_url_fragment(href).await? {
            return Ok(feed.enabled.then_some(feed.id));
        }
        if !config.add_missing {
            return Ok(None);
        }

        let title = self.source.show_title(&entry.href).await?;
        let anime = self
            .db
            .get_or_create_anime(&title, &[], &EncodeProfile::default())
            .await?;

        let missing = self
            .missing_episodes(&entry.href, &anime.title, &anime.alt_names, anime.id)
            .await?;
        let upload_all = missing < CATCH_UP_THRESHOLD;

        let feed_id = self
            .db
            .upsert_feed(UpsertFeedParams {
                kind: config.kind.feed_kind(),
                url: &entry.href,
                anime_id: anime.id,
                upload_seedbox: true,
                upload_torrent: upload_all,
                upload_last_episode: !upload_all,
                bluray: false,
                uncensored: false,
                deinterlace: false,
                extra_tags: None,
                check_interval_secs: config.check_interval.as_secs() as i64,
                enabled: true,
            })
            .await?;

        info!(
            anime = %anime.title,
            feed_id,
            missing,
            upload_all,
            "Added feed discovered by watcher"
        );
        Ok(Some(feed_id))
    }

    /// Episodes listed on the show page that have no episode title record yet
    async fn missing_episodes(
        &self,
        show_url: &str,
        anime: &str,
        alt_names: &[String],
        anime_id: i64,
    ) -> Result<usize> {
        let known: HashSet<String> = self
            .db
            .list_episode_titles(anime_id)
            .await?
            .into_iter()
            .collect();

        let listed: HashSet<String> = self
            .source
            .show_entries(show_url)
            .await?
            .iter()
            .filter_map(|e| self.parser.parse(&e.title, anime, alt_names).ok())
            .map(|parsed| parsed.canonical_episode_name)
            .collect();

        Ok(listed.difference(&known).count())
    }
}
