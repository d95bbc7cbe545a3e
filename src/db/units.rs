//! Release unit operations.
//!
//! Status changes are compare-and-set: the caller names the status it
//! believes the unit is in and the update only applies if that still holds.

use crate::error::DatabaseError;
use crate::types::{PublicLinks, ReleaseUnit, Resolution, UnitId, UnitStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::Path;

use super::{Database, EpisodeKey, NewReleaseUnit, ScreenshotRow, UnitRow};

const UNIT_COLUMNS: &str = r#"
    id, public_id, kind, anime_id, feed_id, name, original_title, file_name,
    resolution, subtype, uncensored, bluray, release_group, status, completed_stage,
    error_message, source_path, local_path, source_size, encoded_size, seedbox_torrent,
    watch_url, download_url, torrent_url, magnet_url, short_watch_url,
    short_download_url, short_torrent_url, short_magnet_url, created_at, published_at
"#;

impl Database {
    /// Insert a new release unit in the `Discovered` status
    pub async fn insert_unit(&self, unit: NewReleaseUnit<'_>) -> Result<UnitId> {
        let NewReleaseUnit {
            public_id,
            kind,
            anime_id,
            feed_id,
            name,
            original_title,
            file_name,
            resolution,
            subtype,
            uncensored,
            bluray,
            release_group,
            source_path,
            source_size,
            links,
        } = unit;
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO release_units (
                public_id, kind, anime_id, feed_id, name, original_title, file_name,
                resolution, subtype, uncensored, bluray, release_group, status,
                source_path, source_size, watch_url, download_url, torrent_url,
                magnet_url, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(public_id)
        .bind(kind.as_str())
        .bind(anime_id)
        .bind(feed_id)
        .bind(name)
        .bind(original_title)
        .bind(file_name)
        .bind(resolution.height() as i64)
        .bind(subtype.as_str())
        .bind(uncensored as i32)
        .bind(bluray as i32)
        .bind(release_group)
        .bind(UnitStatus::Discovered.as_str())
        .bind(source_path.map(|p| p.to_string_lossy().to_string()))
        .bind(source_size as i64)
        .bind(links.watch_url.as_deref())
        .bind(links.download_url.as_deref())
        .bind(links.torrent_url.as_deref())
        .bind(links.magnet_url.as_deref())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                Error::Database(DatabaseError::ConstraintViolation(format!(
                    "release unit {} already exists",
                    name
                )))
            }
            e => Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert release unit: {}",
                e
            ))),
        })?;

        Ok(UnitId(result.last_insert_rowid()))
    }

    /// Get a release unit by ID
    pub async fn get_unit(&self, id: UnitId) -> Result<Option<ReleaseUnit>> {
        let row = sqlx::query_as::<_, UnitRow>(&format!(
            "SELECT {} FROM release_units WHERE id = ?",
            UNIT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get release unit: {}",
                e
            )))
        })?;

        row.map(ReleaseUnit::try_from).transpose()
    }

    /// Find the episode unit for a dedup key
    pub async fn find_episode(&self, key: EpisodeKey<'_>) -> Result<Option<UnitId>> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM release_units
            WHERE kind = 'episode' AND anime_id = ? AND name = ? AND resolution = ?
              AND bluray = ? AND uncensored = ? AND release_group = ?
            "#,
        )
        .bind(key.anime_id)
        .bind(key.name)
        .bind(key.resolution.height() as i64)
        .bind(key.bluray as i32)
        .bind(key.uncensored as i32)
        .bind(key.release_group)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to look up episode: {}",
                e
            )))
        })?;

        Ok(id.map(UnitId))
    }

    /// Units currently in `status`, oldest first
    pub async fn list_units_by_status(&self, status: UnitStatus) -> Result<Vec<ReleaseUnit>> {
        let rows = sqlx::query_as::<_, UnitRow>(&format!(
            "SELECT {} FROM release_units WHERE status = ? ORDER BY id ASC",
            UNIT_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list release units: {}",
                e
            )))
        })?;

        rows.into_iter().map(ReleaseUnit::try_from).collect()
    }

    /// Finished episodes of an anime at one resolution, ordered by name
    pub async fn list_finished_episodes(
        &self,
        anime_id: i64,
        resolution: Resolution,
    ) -> Result<Vec<ReleaseUnit>> {
        let rows = sqlx::query_as::<_, UnitRow>(&format!(
            r#"
            SELECT {} FROM release_units
            WHERE kind = 'episode' AND anime_id = ? AND resolution = ? AND status = 'finished'
            ORDER BY name ASC
            "#,
            UNIT_COLUMNS
        ))
        .bind(anime_id)
        .bind(resolution.height() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list finished episodes: {}",
                e
            )))
        })?;

        rows.into_iter().map(ReleaseUnit::try_from).collect()
    }

    /// Move a unit from `from` to `to`
    ///
    /// Fails with [`Error::InvalidTransition`] when the state machine forbids
    /// the move or when the stored status is no longer `from`.
    pub async fn update_unit_status(
        &self,
        id: UnitId,
        from: UnitStatus,
        to: UnitStatus,
    ) -> Result<()> {
        if !from.can_advance_to(to) {
            return Err(Error::InvalidTransition { id, from, to });
        }

        let result = sqlx::query("UPDATE release_units SET status = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update unit status: {}",
                    e
                )))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::InvalidTransition { id, from, to });
        }

        Ok(())
    }

    /// Move a unit to `Error` with a detail message
    ///
    /// Returns false when the unit was already terminal.
    pub async fn fail_unit(&self, id: UnitId, message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE release_units SET status = 'error', error_message = ?
            WHERE id = ? AND status NOT IN ('finished', 'error')
            "#,
        )
        .bind(message)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark unit failed: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a unit `Finished` and stamp its publish time
    pub async fn finish_unit(
        &self,
        id: UnitId,
        from: UnitStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if !from.can_advance_to(UnitStatus::Finished) {
            return Err(Error::InvalidTransition {
                id,
                from,
                to: UnitStatus::Finished,
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE release_units SET status = 'finished', completed_stage = 'finished', published_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(at.timestamp())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to finish unit: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            return Err(Error::InvalidTransition {
                id,
                from,
                to: UnitStatus::Finished,
            });
        }

        Ok(())
    }

    /// Put a failed unit back at `stage` for a manual re-run
    ///
    /// Only units in `Error` can be re-queued; returns false otherwise.
    pub async fn requeue_unit(&self, id: UnitId, stage: UnitStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE release_units SET status = ?, error_message = NULL WHERE id = ? AND status = 'error'",
        )
        .bind(stage.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to requeue unit: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Record the last pipeline stage a unit completed
    pub async fn set_completed_stage(&self, id: UnitId, stage: UnitStatus) -> Result<()> {
        self.update_unit_column(id, "completed_stage", Some(stage.as_str()))
            .await
    }

    /// Record (or clear) a unit's error detail without changing its status
    pub async fn set_unit_error_message(&self, id: UnitId, message: Option<&str>) -> Result<()> {
        self.update_unit_column(id, "error_message", message).await
    }

    /// Record (or clear) a unit's acquired source file
    pub async fn set_unit_source(&self, id: UnitId, path: Option<&Path>) -> Result<()> {
        let path = path.map(|p| p.to_string_lossy().to_string());
        self.update_unit_column(id, "source_path", path.as_deref())
            .await
    }

    /// Record the torrent built for the seedbox copy
    pub async fn set_unit_seedbox_torrent(&self, id: UnitId, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        self.update_unit_column(id, "seedbox_torrent", Some(path.as_ref()))
            .await
    }

    /// Record a unit's encoded artifact
    pub async fn set_unit_encoded(&self, id: UnitId, path: &Path, size: u64) -> Result<()> {
        sqlx::query("UPDATE release_units SET local_path = ?, encoded_size = ? WHERE id = ?")
            .bind(path.to_string_lossy().to_string())
            .bind(size as i64)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update encoded artifact: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Store a unit's public links and their shortened forms
    pub async fn set_unit_links(&self, id: UnitId, links: &PublicLinks) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE release_units
            SET watch_url = ?, download_url = ?, torrent_url = ?, magnet_url = ?,
                short_watch_url = ?, short_download_url = ?, short_torrent_url = ?,
                short_magnet_url = ?
            WHERE id = ?
            "#,
        )
        .bind(links.watch_url.as_deref())
        .bind(links.download_url.as_deref())
        .bind(links.torrent_url.as_deref())
        .bind(links.magnet_url.as_deref())
        .bind(links.short_watch_url.as_deref())
        .bind(links.short_download_url.as_deref())
        .bind(links.short_torrent_url.as_deref())
        .bind(links.short_magnet_url.as_deref())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update unit links: {}",
                e
            )))
        })?;

        Ok(())
    }

    async fn update_unit_column(
        &self,
        id: UnitId,
        column: &'static str,
        value: Option<&str>,
    ) -> Result<()> {
        sqlx::query(&format!("UPDATE release_units SET {} = ? WHERE id = ?", column))
            .bind(value)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update {}: {}",
                    column, e
                )))
            })?;

        Ok(())
    }

    /// Attach an episode to a batch
    pub async fn add_batch_member(&self, batch_id: UnitId, episode_id: UnitId) -> Result<()> {
        sqlx::query(
            "INSERT INTO batch_members (batch_id, episode_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(batch_id)
        .bind(episode_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to add batch member: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Episodes of a batch, ordered by name
    pub async fn list_batch_members(&self, batch_id: UnitId) -> Result<Vec<ReleaseUnit>> {
        let columns = UNIT_COLUMNS
            .split(',')
            .map(|c| format!("u.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");

        let rows = sqlx::query_as::<_, UnitRow>(&format!(
            r#"
            SELECT {} FROM release_units u
            JOIN batch_members m ON m.episode_id = u.id
            WHERE m.batch_id = ?
            ORDER BY u.name ASC
            "#,
            columns
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list batch members: {}",
                e
            )))
        })?;

        rows.into_iter().map(ReleaseUnit::try_from).collect()
    }

    /// Record a screenshot of a unit
    pub async fn insert_screenshot(&self, unit_id: UnitId, file_name: &str, path: &Path) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO screenshots (unit_id, file_name, path) VALUES (?, ?, ?)
            ON CONFLICT(unit_id, file_name) DO UPDATE SET path = excluded.path
            "#,
        )
        .bind(unit_id)
        .bind(file_name)
        .bind(path.to_string_lossy().to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert screenshot: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Screenshots of a unit, ordered by file name
    pub async fn list_screenshots(&self, unit_id: UnitId) -> Result<Vec<ScreenshotRow>> {
        let rows = sqlx::query_as::<_, ScreenshotRow>(
            "SELECT id, unit_id, file_name, path FROM screenshots WHERE unit_id = ? ORDER BY file_name ASC",
        )
        .bind(unit_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list screenshots: {}",
                e
            )))
        })?;

        Ok(rows)
    }
}
