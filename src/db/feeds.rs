//! Feed and watcher state operations.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::{Database, FeedRow, UpsertFeedParams};

const FEED_COLUMNS: &str = r#"
    id, kind, url, anime_id, upload_seedbox, upload_torrent, upload_last_episode,
    bluray, uncensored, deinterlace, extra_tags, check_interval_secs, enabled,
    snapshot, last_check, created_at
"#;

impl Database {
    /// Insert a feed, or refresh the settings of the feed with the same URL
    ///
    /// Upload flags are only written on insert: after that they belong to
    /// the pipeline, which flips them at the end of last-episode batches.
    pub async fn upsert_feed(&self, params: UpsertFeedParams<'_>) -> Result<i64> {
        let UpsertFeedParams {
            kind,
            url,
            anime_id,
            upload_seedbox,
            upload_torrent,
            upload_last_episode,
            bluray,
            uncensored,
            deinterlace,
            extra_tags,
            check_interval_secs,
            enabled,
        } = params;
        let now = chrono::Utc::now().timestamp();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO feeds (kind, url, anime_id, upload_seedbox, upload_torrent,
                               upload_last_episode, bluray, uncensored, deinterlace,
                               extra_tags, check_interval_secs, enabled, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                kind = excluded.kind,
                anime_id = excluded.anime_id,
                bluray = excluded.bluray,
                uncensored = excluded.uncensored,
                deinterlace = excluded.deinterlace,
                extra_tags = excluded.extra_tags,
                check_interval_secs = excluded.check_interval_secs,
                enabled = excluded.enabled
            RETURNING id
            "#,
        )
        .bind(kind.as_str())
        .bind(url)
        .bind(anime_id)
        .bind(upload_seedbox as i32)
        .bind(upload_torrent as i32)
        .bind(upload_last_episode as i32)
        .bind(bluray as i32)
        .bind(uncensored as i32)
        .bind(deinterlace as i32)
        .bind(extra_tags)
        .bind(check_interval_secs)
        .bind(enabled as i32)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert feed: {}",
                e
            )))
        })?;

        Ok(id)
    }

    /// Get a feed by ID
    pub async fn get_feed(&self, id: i64) -> Result<Option<FeedRow>> {
        let feed = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {} FROM feeds WHERE id = ?",
            FEED_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get feed: {}",
                e
            )))
        })?;

        Ok(feed)
    }

    /// Get all feeds
    pub async fn list_feeds(&self) -> Result<Vec<FeedRow>> {
        let feeds = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {} FROM feeds ORDER BY id ASC",
            FEED_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list feeds: {}",
                e
            )))
        })?;

        Ok(feeds)
    }

    /// Find the first feed whose URL contains `fragment`
    pub async fn find_feed_by_url_fragment(&self, fragment: &str) -> Result<Option<FeedRow>> {
        let feed = sqlx::query_as::<_, FeedRow>(&format!(
            "SELECT {} FROM feeds WHERE instr(url, ?) > 0 ORDER BY id ASC LIMIT 1",
            FEED_COLUMNS
        ))
        .bind(fragment)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find feed: {}",
                e
            )))
        })?;

        Ok(feed)
    }

    /// Store a feed's cached snapshot
    pub async fn update_feed_snapshot(&self, id: i64, snapshot: &str) -> Result<()> {
        sqlx::query("UPDATE feeds SET snapshot = ? WHERE id = ?")
            .bind(snapshot)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update feed snapshot: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Stamp a feed's last check time
    pub async fn update_feed_last_check(&self, id: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query("UPDATE feeds SET last_check = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update feed last_check: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Persist a feed's publish flags
    pub async fn set_feed_upload_flags(
        &self,
        id: i64,
        upload_torrent: bool,
        upload_last_episode: bool,
    ) -> Result<()> {
        sqlx::query("UPDATE feeds SET upload_torrent = ?, upload_last_episode = ? WHERE id = ?")
            .bind(upload_torrent as i32)
            .bind(upload_last_episode as i32)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update feed flags: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Cached snapshot of a page watcher
    pub async fn get_watcher_snapshot(&self, url: &str) -> Result<Option<String>> {
        let snapshot: Option<Option<String>> =
            sqlx::query_scalar("SELECT snapshot FROM watcher_state WHERE url = ?")
                .bind(url)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to get watcher snapshot: {}",
                        e
                    )))
                })?;

        Ok(snapshot.flatten())
    }

    /// Store a page watcher's cached snapshot
    pub async fn save_watcher_snapshot(&self, url: &str, snapshot: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watcher_state (url, snapshot) VALUES (?, ?)
            ON CONFLICT(url) DO UPDATE SET snapshot = excluded.snapshot
            "#,
        )
        .bind(url)
        .bind(snapshot)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save watcher snapshot: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Stamp a page watcher's last check time
    pub async fn update_watcher_last_check(&self, url: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO watcher_state (url, last_check) VALUES (?, ?)
            ON CONFLICT(url) DO UPDATE SET last_check = excluded.last_check
            "#,
        )
        .bind(url)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update watcher last_check: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Last check time of a page watcher
    pub async fn get_watcher_last_check(&self, url: &str) -> Result<Option<i64>> {
        let last: Option<Option<i64>> =
            sqlx::query_scalar("SELECT last_check FROM watcher_state WHERE url = ?")
                .bind(url)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to get watcher last_check: {}",
                        e
                    )))
                })?;

        Ok(last.flatten())
    }
}
