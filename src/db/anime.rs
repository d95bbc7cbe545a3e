//! Anime and episode title operations.

use crate::config::EncodeProfile;
use crate::error::DatabaseError;
use crate::{Error, Result};

use super::{Anime, AnimeRow, Database};

impl Database {
    /// Get an anime by ID
    pub async fn get_anime(&self, id: i64) -> Result<Option<Anime>> {
        let row = sqlx::query_as::<_, AnimeRow>(
            "SELECT id, title, alt_names, encode, created_at FROM anime WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get anime: {}",
                e
            )))
        })?;

        row.map(Anime::try_from).transpose()
    }

    /// Find an anime by title, ignoring case
    pub async fn find_anime_by_title(&self, title: &str) -> Result<Option<Anime>> {
        let row = sqlx::query_as::<_, AnimeRow>(
            "SELECT id, title, alt_names, encode, created_at FROM anime WHERE title = ? COLLATE NOCASE",
        )
        .bind(title)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find anime: {}",
                e
            )))
        })?;

        row.map(Anime::try_from).transpose()
    }

    /// Get the anime with this title, creating it when missing
    ///
    /// Existing records keep their stored alternate names and encoder
    /// settings; `alt_names` and `encode` only seed new records.
    pub async fn get_or_create_anime(
        &self,
        title: &str,
        alt_names: &[String],
        encode: &EncodeProfile,
    ) -> Result<Anime> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO anime (title, alt_names, encode, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(title) DO NOTHING
            "#,
        )
        .bind(title)
        .bind(serde_json::to_string(alt_names)?)
        .bind(serde_json::to_string(encode)?)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert anime: {}",
                e
            )))
        })?;

        self.find_anime_by_title(title)
            .await?
            .ok_or_else(|| Error::NotFound(format!("anime {}", title)))
    }

    /// Replace an anime's alternate names and encoder settings
    pub async fn update_anime_settings(
        &self,
        id: i64,
        alt_names: &[String],
        encode: &EncodeProfile,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE anime SET alt_names = ?, encode = ? WHERE id = ?")
            .bind(serde_json::to_string(alt_names)?)
            .bind(serde_json::to_string(encode)?)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update anime: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a known episode title for an anime (no-op when already known)
    pub async fn add_episode_title(&self, anime_id: i64, title: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO episode_titles (anime_id, title)
            VALUES (?, ?)
            ON CONFLICT(anime_id, title) DO NOTHING
            "#,
        )
        .bind(anime_id)
        .bind(title)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert episode title: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Known episode titles of an anime
    pub async fn list_episode_titles(&self, anime_id: i64) -> Result<Vec<String>> {
        let titles: Vec<String> = sqlx::query_scalar(
            "SELECT title FROM episode_titles WHERE anime_id = ? ORDER BY title ASC",
        )
        .bind(anime_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list episode titles: {}",
                e
            )))
        })?;

        Ok(titles)
    }
}
