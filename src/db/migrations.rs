//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        // Connect to database with foreign key enforcement and WAL mode
        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };

        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }
        if current_version < 2 {
            Self::migrate_v2(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: anime, feeds, release units and upload records
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v1");

        // Wrap migration in a transaction so partial failures don't leave the DB in a broken state
        Self::begin(conn).await?;

        let result = async {
            Self::create_anime_schema(conn).await?;
            Self::create_feeds_schema(conn).await?;
            Self::create_units_schema(conn).await?;
            Self::create_uploads_schema(conn).await?;
            Self::record_migration(conn, 1).await?;
            Ok::<(), Error>(())
        }
        .await;

        Self::finish(conn, result, 1).await?;

        tracing::info!("Database migration v1 complete");
        Ok(())
    }

    /// Migration v2: screenshots and batch membership
    async fn migrate_v2(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v2");

        Self::begin(conn).await?;

        let result = async {
            Self::ddl(
                conn,
                r#"
                CREATE TABLE screenshots (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    unit_id INTEGER NOT NULL REFERENCES release_units(id) ON DELETE CASCADE,
                    file_name TEXT NOT NULL,
                    path TEXT NOT NULL,
                    UNIQUE(unit_id, file_name)
                )
                "#,
                "screenshots table",
            )
            .await?;

            Self::ddl(
                conn,
                r#"
                CREATE TABLE batch_members (
                    batch_id INTEGER NOT NULL REFERENCES release_units(id) ON DELETE CASCADE,
                    episode_id INTEGER NOT NULL REFERENCES release_units(id) ON DELETE CASCADE,
                    PRIMARY KEY (batch_id, episode_id)
                )
                "#,
                "batch_members table",
            )
            .await?;

            Self::record_migration(conn, 2).await?;
            Ok::<(), Error>(())
        }
        .await;

        Self::finish(conn, result, 2).await?;

        tracing::info!("Database migration v2 complete");
        Ok(())
    }

    /// Create anime and episode_titles tables
    async fn create_anime_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::ddl(
            conn,
            r#"
            CREATE TABLE anime (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL UNIQUE COLLATE NOCASE,
                alt_names TEXT NOT NULL DEFAULT '[]',
                encode TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            "anime table",
        )
        .await?;

        Self::ddl(
            conn,
            r#"
            CREATE TABLE episode_titles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                anime_id INTEGER NOT NULL REFERENCES anime(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                UNIQUE(anime_id, title)
            )
            "#,
            "episode_titles table",
        )
        .await
    }

    /// Create feeds and watcher_state tables
    async fn create_feeds_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::ddl(
            conn,
            r#"
            CREATE TABLE feeds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                anime_id INTEGER NOT NULL REFERENCES anime(id) ON DELETE CASCADE,
                upload_seedbox INTEGER NOT NULL DEFAULT 1,
                upload_torrent INTEGER NOT NULL DEFAULT 1,
                upload_last_episode INTEGER NOT NULL DEFAULT 0,
                bluray INTEGER NOT NULL DEFAULT 0,
                uncensored INTEGER NOT NULL DEFAULT 0,
                deinterlace INTEGER NOT NULL DEFAULT 0,
                extra_tags TEXT,
                check_interval_secs INTEGER NOT NULL DEFAULT 900,
                enabled INTEGER NOT NULL DEFAULT 1,
                snapshot TEXT,
                last_check INTEGER,
                created_at INTEGER NOT NULL
            )
            "#,
            "feeds table",
        )
        .await?;

        Self::ddl(
            conn,
            r#"
            CREATE TABLE watcher_state (
                url TEXT PRIMARY KEY,
                snapshot TEXT,
                last_check INTEGER
            )
            "#,
            "watcher_state table",
        )
        .await
    }

    /// Create release_units table and its indexes
    async fn create_units_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::ddl(
            conn,
            r#"
            CREATE TABLE release_units (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                public_id TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                anime_id INTEGER NOT NULL REFERENCES anime(id) ON DELETE CASCADE,
                feed_id INTEGER REFERENCES feeds(id) ON DELETE SET NULL,
                name TEXT NOT NULL,
                original_title TEXT NOT NULL,
                file_name TEXT NOT NULL,
                resolution INTEGER NOT NULL,
                subtype TEXT NOT NULL,
                uncensored INTEGER NOT NULL DEFAULT 0,
                bluray INTEGER NOT NULL DEFAULT 0,
                release_group TEXT NOT NULL,
                status TEXT NOT NULL,
                completed_stage TEXT,
                error_message TEXT,
                source_path TEXT,
                local_path TEXT,
                source_size INTEGER NOT NULL DEFAULT 0,
                encoded_size INTEGER NOT NULL DEFAULT 0,
                seedbox_torrent TEXT,
                watch_url TEXT,
                download_url TEXT,
                torrent_url TEXT,
                magnet_url TEXT,
                short_watch_url TEXT,
                short_download_url TEXT,
                short_torrent_url TEXT,
                short_magnet_url TEXT,
                created_at INTEGER NOT NULL,
                published_at INTEGER
            )
            "#,
            "release_units table",
        )
        .await?;

        // One episode per dedup key; batches are not deduplicated
        Self::ddl(
            conn,
            r#"
            CREATE UNIQUE INDEX idx_release_units_episode_key
            ON release_units(anime_id, name, resolution, bluray, uncensored, release_group)
            WHERE kind = 'episode'
            "#,
            "episode key index",
        )
        .await?;

        Self::ddl(
            conn,
            "CREATE INDEX idx_release_units_status ON release_units(status)",
            "status index",
        )
        .await
    }

    /// Create upload_records table
    async fn create_uploads_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::ddl(
            conn,
            r#"
            CREATE TABLE upload_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                unit_id INTEGER NOT NULL REFERENCES release_units(id) ON DELETE CASCADE,
                destination TEXT NOT NULL,
                trackers TEXT NOT NULL DEFAULT '[]',
                canonical_url TEXT,
                magnet_uri TEXT,
                response TEXT,
                status INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                short_url TEXT,
                short_magnet TEXT,
                created_at INTEGER NOT NULL,
                UNIQUE(unit_id, destination)
            )
            "#,
            "upload_records table",
        )
        .await
    }

    async fn ddl(conn: &mut SqliteConnection, sql: &str, what: &str) -> Result<()> {
        sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create {}: {}",
                what, e
            )))
        })?;
        Ok(())
    }

    async fn begin(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;
        Ok(())
    }

    async fn finish(conn: &mut SqliteConnection, result: Result<()>, version: i32) -> Result<()> {
        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v{}: {}",
                            version, e
                        )))
                    })?;
                Ok(())
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    /// Record a migration version
    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
