use super::*;
use crate::config::{DestinationConfig, DestinationKind};
use crate::error::{Error, PublishError};
use crate::fanout::PublishTarget;
use crate::test_helpers::{
    EmptySite, FakeDestination, FakeDownloadClient, FakeFeed, FakeScreenshots, FakeSeedbox,
    FakeShortener, FakeTorrentMaker, FakeTranscoder, insert_feed_for, setup_db, test_config,
};
use crate::shortener::UrlShortener;
use crate::torrent_client::TorrentFileInfo;
use crate::types::{ReleaseUnit, Resolution, UnitId, UnitKind, UnitStatus};
use std::path::PathBuf;

mod batch;

const HASH: &str = "c12fe1c06bba254a9dc9f519b335aa7c1367a88a";
const SOURCE_FILE: &str = "[SubsPlease] Show - 01 (1080p).mkv";

/// Collaborator behavior for one test
struct Setup {
    transcoder: FakeTranscoder,
    screenshots: FakeScreenshots,
    seedbox: FakeSeedbox,
    shortener: Option<FakeShortener>,
    targets: Vec<Resolution>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            transcoder: FakeTranscoder::default(),
            screenshots: FakeScreenshots::default(),
            seedbox: FakeSeedbox::default(),
            shortener: None,
            targets: vec![Resolution::P1080],
        }
    }
}

struct Harness {
    coordinator: Coordinator,
    feed_id: i64,
    client: Arc<FakeDownloadClient>,
    transcoder: Arc<FakeTranscoder>,
    seedbox: Arc<FakeSeedbox>,
    destination: Arc<FakeDestination>,
    shortener: Option<Arc<FakeShortener>>,
    feed: Arc<FakeFeed>,
    _dir: tempfile::TempDir,
}

async fn harness(setup: Setup) -> Harness {
    let (db, dir) = setup_db().await;
    let mut config = test_config(dir.path());
    config.pipeline.target_resolutions = setup.targets;

    let feed_id = insert_feed_for(&db, "Show", "https://nyaa.si/?page=rss&q=show").await;

    let destination = Arc::new(FakeDestination::new("site"));
    let dest_config = DestinationConfig {
        kind: DestinationKind::NyaaSi,
        name: Some(destination.name.clone()),
        api_url: "https://example.org/upload".to_string(),
        api_key: "key".to_string(),
        tracker_group: None,
        enabled: true,
        timeout: std::time::Duration::from_secs(5),
        options: Default::default(),
    };
    config.destinations.push(dest_config.clone());

    let client = Arc::new(
        FakeDownloadClient::new(
            HASH,
            SOURCE_FILE,
            vec![TorrentFileInfo {
                name: SOURCE_FILE.to_string(),
                size: 4096,
            }],
            1,
        )
        .writing_files(),
    );
    let transcoder = Arc::new(setup.transcoder);
    let seedbox = Arc::new(setup.seedbox);
    let shortener = setup.shortener.map(Arc::new);
    let feed = Arc::new(FakeFeed::default());

    let collaborators = Collaborators {
        download_client: client.clone(),
        transcoder: transcoder.clone(),
        screenshots: Arc::new(setup.screenshots),
        torrent_maker: Arc::new(FakeTorrentMaker::default()),
        destinations: vec![PublishTarget {
            config: dest_config,
            destination: destination.clone(),
        }],
        seedbox: Some(seedbox.clone()),
        shortener: shortener
            .clone()
            .map(|s| s as Arc<dyn UrlShortener>),
        feeds: FeedSources::new(feed.clone(), feed.clone()),
        watcher_source: Arc::new(EmptySite),
    };

    let coordinator = Coordinator::with_collaborators(config, db, collaborators).unwrap();

    Harness {
        coordinator,
        feed_id,
        client,
        transcoder,
        seedbox,
        destination,
        shortener,
        feed,
        _dir: dir,
    }
}

impl Harness {
    async fn unit(&self, id: UnitId) -> ReleaseUnit {
        self.coordinator.db.get_unit(id).await.unwrap().unwrap()
    }

    /// Finished unit whose canonical name is `name`
    async fn finished(&self, name: &str) -> Option<ReleaseUnit> {
        self.coordinator
            .db
            .list_units_by_status(UnitStatus::Finished)
            .await
            .unwrap()
            .into_iter()
            .find(|u| u.name == name)
    }

    fn source_path(&self) -> PathBuf {
        self.coordinator.config.pipeline.download_dir.join(SOURCE_FILE)
    }

    async fn anime_id(&self) -> i64 {
        self.coordinator
            .db
            .get_feed(self.feed_id)
            .await
            .unwrap()
            .unwrap()
            .anime_id
    }
}

/// Drain every event received so far
fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
