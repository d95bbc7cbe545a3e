use crate::config::{EncodeProfile, FeedKind};
use crate::db::*;
use crate::types::{PublicLinks, Resolution, SubType, UnitId, UnitKind};
use tempfile::NamedTempFile;

mod close;

/// Helper: create a fresh database with migrations applied
async fn setup_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

/// Helper: insert an anime with default encoder settings, returning its ID
async fn insert_test_anime(db: &Database, title: &str) -> i64 {
    db.get_or_create_anime(title, &[], &EncodeProfile::default())
        .await
        .unwrap()
        .id
}

/// Helper: insert a feed for an anime, returning its ID
async fn insert_test_feed(db: &Database, anime_id: i64, url: &str) -> i64 {
    db.upsert_feed(UpsertFeedParams {
        kind: FeedKind::NyaaRss,
        url,
        anime_id,
        upload_seedbox: true,
        upload_torrent: true,
        upload_last_episode: false,
        bluray: false,
        uncensored: false,
        deinterlace: false,
        extra_tags: None,
        check_interval_secs: 900,
        enabled: true,
    })
    .await
    .unwrap()
}

/// Helper: insert an episode unit with sensible defaults
async fn insert_test_episode(
    db: &Database,
    anime_id: i64,
    name: &str,
    resolution: Resolution,
) -> UnitId {
    let public_id = format!("{}-{}", name.replace(' ', "-"), resolution.height());
    let file_name = format!("[SSA] {} [{}].mkv", name, resolution);
    db.insert_unit(NewReleaseUnit {
        public_id: &public_id,
        kind: UnitKind::Episode,
        anime_id,
        feed_id: None,
        name,
        original_title: &format!("[Group] {} [1080p].mkv", name),
        file_name: &file_name,
        resolution,
        subtype: SubType::Softsubs,
        uncensored: false,
        bluray: false,
        release_group: "Group",
        source_path: None,
        source_size: 1024,
        links: &PublicLinks::default(),
    })
    .await
    .unwrap()
}
