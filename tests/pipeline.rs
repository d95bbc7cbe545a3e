//! End-to-end pipeline tests against mocked HTTP services
//!
//! The feed, the qBittorrent Web API and the nyaa.si upload endpoint are
//! served by wiremock; encoding, screenshots and torrent creation use the
//! stubs in `common::fakes`.

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::*;
use release_relay::destinations::build_destination;
use release_relay::fanout::PublishTarget;
use release_relay::feed::{FeedSources, RssFeedFetcher, SubsPleaseClient};
use release_relay::torrent_client::QbittorrentClient;
use release_relay::{
    Collaborators, Config, Coordinator, Database, Event, Resolution, UnitStatus, UploadStatus,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Pipeline {
    coordinator: Coordinator,
    transcoder: Arc<StubTranscoder>,
    _dir: TempDir,
}

async fn pipeline(server: &MockServer, targets: &[Resolution]) -> Pipeline {
    let dir = tempfile::tempdir().unwrap();
    let mut config = pipeline_config(server, dir.path());
    config.pipeline.target_resolutions = targets.to_vec();
    let timeout = Duration::from_secs(5);

    // The mocked client reports the download as already present
    let downloads = &config.pipeline.download_dir;
    std::fs::create_dir_all(downloads).unwrap();
    std::fs::write(downloads.join(SOURCE_FILE), vec![0u8; 4096]).unwrap();
    mount_qbittorrent(server, downloads).await;

    let destinations = config
        .destinations
        .iter()
        .map(|d| PublishTarget {
            config: d.clone(),
            destination: build_destination(d, &config.site_url).unwrap(),
        })
        .collect();

    let transcoder = Arc::new(StubTranscoder::default());
    let collaborators = Collaborators {
        download_client: Arc::new(QbittorrentClient::new(&config.torrent_client).unwrap()),
        transcoder: transcoder.clone(),
        screenshots: Arc::new(StubScreenshots),
        torrent_maker: Arc::new(StubTorrentMaker::default()),
        destinations,
        seedbox: None,
        shortener: None,
        feeds: FeedSources::new(
            Arc::new(RssFeedFetcher::new(timeout).unwrap()),
            Arc::new(SubsPleaseClient::new(timeout).unwrap()),
        ),
        watcher_source: Arc::new(SubsPleaseClient::new(timeout).unwrap()),
    };

    let db = Database::new(&config.persistence.database_path).await.unwrap();
    let coordinator = Coordinator::with_collaborators(config, db, collaborators).unwrap();

    Pipeline {
        coordinator,
        transcoder,
        _dir: dir,
    }
}

async fn mount_nyaa(server: &MockServer, response: ResponseTemplate, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(response)
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn feed_entry_is_encoded_and_published_to_nyaa() {
    let server = MockServer::start().await;
    mount_feed(&server, "[SubsPlease] Show - 01 (1080p) [0A1B2C3D].mkv").await;
    mount_nyaa(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "url": "https://nyaa.si/view/42" })),
        2,
    )
    .await;

    let p = pipeline(&server, &[Resolution::P1080, Resolution::P720]).await;
    let mut events = p.coordinator.subscribe();
    let ids = p.coordinator.sync_feeds().await.unwrap();
    assert_eq!(ids.len(), 1);

    let report = p.coordinator.check_feed(ids[0]).await.unwrap();
    assert_eq!(report.new_entries, 1);
    assert_eq!(report.published.len(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(p.transcoder.encodes.load(Ordering::SeqCst), 2);

    let mut resolutions = Vec::new();
    for id in &report.published {
        let unit = p.coordinator.db.get_unit(*id).await.unwrap().unwrap();
        assert_eq!(unit.status, UnitStatus::Finished);
        assert_eq!(unit.name, "Show - 01");
        assert!(unit.local_path.unwrap().exists());
        resolutions.push(unit.resolution);

        let records = p.coordinator.db.list_upload_records(*id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].destination, "nyaa.si");
        assert_eq!(records[0].status, UploadStatus::Uploaded);
        assert_eq!(
            records[0].canonical_url.as_deref(),
            Some("https://nyaa.si/view/42")
        );
    }
    assert_eq!(resolutions, vec![Resolution::P1080, Resolution::P720]);

    // Source is discarded once every resolution is encoded
    let config: Arc<Config> = p.coordinator.get_config();
    assert!(!config.pipeline.download_dir.join(SOURCE_FILE).exists());

    let mut published = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::Published { .. }) {
            published += 1;
        }
    }
    assert_eq!(published, 2);

    // A second pass sees nothing new; the upload mock verifies no extra calls
    let again = p.coordinator.check_feed(ids[0]).await.unwrap();
    assert_eq!(again.new_entries, 0);
    assert!(again.published.is_empty());
}

#[tokio::test]
async fn rejected_upload_is_retried_then_recorded_as_failed() {
    let server = MockServer::start().await;
    mount_feed(&server, "[SubsPlease] Show - 01 (1080p).mkv").await;
    mount_nyaa(
        &server,
        ResponseTemplate::new(500).set_body_json(json!({ "errors": ["tracker offline"] })),
        3,
    )
    .await;

    let p = pipeline(&server, &[Resolution::P1080]).await;

    let ids = p.coordinator.sync_feeds().await.unwrap();
    let report = p.coordinator.check_feed(ids[0]).await.unwrap();
    assert_eq!(report.published.len(), 1);

    let records = p
        .coordinator
        .db
        .list_upload_records(report.published[0])
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, UploadStatus::Failed);
    assert!(records[0].canonical_url.is_none());
    assert!(records[0].error_message.as_deref().unwrap().contains("tracker offline"));
}
