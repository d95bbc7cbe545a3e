//! Upload record operations.
//!
//! Records are created lazily, once per (unit, destination), and their
//! status only moves from pending to uploaded or failed.

use crate::error::DatabaseError;
use crate::types::{UnitId, UploadRecord, UploadStatus};
use crate::{Error, Result};

use super::{Database, UploadRow};

const UPLOAD_COLUMNS: &str = r#"
    id, unit_id, destination, trackers, canonical_url, magnet_uri, response, status,
    error_message, short_url, short_magnet, created_at
"#;

impl Database {
    /// Get the upload record of a unit for one destination
    pub async fn get_upload_record(
        &self,
        unit_id: UnitId,
        destination: &str,
    ) -> Result<Option<UploadRecord>> {
        let row = sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {} FROM upload_records WHERE unit_id = ? AND destination = ?",
            UPLOAD_COLUMNS
        ))
        .bind(unit_id)
        .bind(destination)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get upload record: {}",
                e
            )))
        })?;

        row.map(UploadRecord::try_from).transpose()
    }

    /// Get the upload record for (unit, destination), creating a pending one if absent
    ///
    /// An existing record is returned untouched, whatever its status.
    pub async fn get_or_create_upload_record(
        &self,
        unit_id: UnitId,
        destination: &str,
        trackers: &[String],
    ) -> Result<UploadRecord> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO upload_records (unit_id, destination, trackers, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(unit_id, destination) DO NOTHING
            "#,
        )
        .bind(unit_id)
        .bind(destination)
        .bind(serde_json::to_string(trackers)?)
        .bind(UploadStatus::Pending.to_i32())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert upload record: {}",
                e
            )))
        })?;

        self.get_upload_record(unit_id, destination)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("upload record {}/{}", unit_id, destination))
            })
    }

    /// Settle a pending record as uploaded
    ///
    /// Returns false when the record was already settled.
    pub async fn mark_upload_succeeded(
        &self,
        id: i64,
        canonical_url: &str,
        magnet_uri: Option<&str>,
        response: &serde_json::Value,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE upload_records
            SET status = ?, canonical_url = ?, magnet_uri = ?, response = ?, error_message = NULL
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(UploadStatus::Uploaded.to_i32())
        .bind(canonical_url)
        .bind(magnet_uri)
        .bind(serde_json::to_string(response)?)
        .bind(id)
        .bind(UploadStatus::Pending.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark upload succeeded: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Settle a pending record as failed
    ///
    /// Returns false when the record was already settled.
    pub async fn mark_upload_failed(&self, id: i64, error: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE upload_records SET status = ?, error_message = ? WHERE id = ? AND status = ?",
        )
        .bind(UploadStatus::Failed.to_i32())
        .bind(error)
        .bind(id)
        .bind(UploadStatus::Pending.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark upload failed: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Store shortened forms of a record's URL and magnet
    pub async fn set_upload_short_urls(
        &self,
        id: i64,
        short_url: Option<&str>,
        short_magnet: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE upload_records SET short_url = ?, short_magnet = ? WHERE id = ?")
            .bind(short_url)
            .bind(short_magnet)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update short URLs: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// All upload records of a unit, in creation order
    pub async fn list_upload_records(&self, unit_id: UnitId) -> Result<Vec<UploadRecord>> {
        let rows = sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {} FROM upload_records WHERE unit_id = ? ORDER BY id ASC",
            UPLOAD_COLUMNS
        ))
        .bind(unit_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list upload records: {}",
                e
            )))
        })?;

        rows.into_iter().map(UploadRecord::try_from).collect()
    }
}
