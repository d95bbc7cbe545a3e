//! Distribution fanout
//!
//! [`Fanout::publish`] hands one finished unit to every enabled destination.
//! Destinations are independent: each gets its own announce list, its own
//! torrent and its own bounded retry, and a destination that keeps failing
//! is recorded as failed while the others carry on.
//!
//! Upload records make publishing idempotent. A record is created the first
//! time a destination is attempted for a unit; settled records (uploaded or
//! failed) are never attempted again, so re-running a publish only touches
//! destinations that never finished.

use crate::config::{Config, DestinationConfig};
use crate::db::Database;
use crate::destinations::{Destination, UploadOutcome, UploadRequest};
use crate::error::Result;
use crate::media::{TorrentMaker, TorrentMeta};
use crate::retry::with_retry;
use crate::shortener::{UrlShortener, shorten_or_keep};
use crate::types::{Event, ReleaseUnit, UnitKind, UploadRecord, UploadStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// A configured destination and its implementation
#[derive(Clone)]
pub struct PublishTarget {
    /// Destination settings (name, trackers, enabled flag)
    pub config: DestinationConfig,
    /// Upload implementation
    pub destination: Arc<dyn Destination>,
}

/// What to publish
#[derive(Clone, Copy, Debug)]
pub struct PublishRequest<'a> {
    /// Unit being published
    pub unit: &'a ReleaseUnit,
    /// File (episode) or directory (batch) the torrents are built from
    pub content: &'a Path,
    /// Public screenshot URLs shown in descriptions
    pub screenshot_urls: &'a [String],
}

/// Publishes finished units to every enabled destination
pub struct Fanout {
    db: Arc<Database>,
    config: Arc<Config>,
    targets: Vec<PublishTarget>,
    torrent_maker: Arc<dyn TorrentMaker>,
    shortener: Option<Arc<dyn UrlShortener>>,
    event_tx: broadcast::Sender<Event>,
}

impl Fanout {
    /// Create a fanout over `targets`, attempted in order
    pub fn new(
        db: Arc<Database>,
        config: Arc<Config>,
        targets: Vec<PublishTarget>,
        torrent_maker: Arc<dyn TorrentMaker>,
        shortener: Option<Arc<dyn UrlShortener>>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            db,
            config,
            targets,
            torrent_maker,
            shortener,
            event_tx,
        }
    }

    /// Publish `request.unit` and return all of its upload records
    ///
    /// Destination failures are recorded, never returned; an error here
    /// means the repository itself failed.
    pub async fn publish(&self, request: &PublishRequest<'_>) -> Result<Vec<UploadRecord>> {
        let unit = request.unit;
        let mut uploaded = Vec::new();

        for target in self.targets.iter().filter(|t| t.config.enabled) {
            let name = target.config.name();
            let announce = self.config.announce_list_for(&target.config);
            let record = self
                .db
                .get_or_create_upload_record(unit.id, name, &announce)
                .await?;

            if record.status != UploadStatus::Pending {
                info!(unit_id = %unit.id, destination = name, status = ?record.status, "Upload already settled, skipping");
                continue;
            }

            match self.upload_one(target, request, &record.trackers).await {
                Ok((outcome, meta)) => {
                    self.db
                        .mark_upload_succeeded(
                            record.id,
                            &outcome.canonical_url,
                            Some(&meta.magnet),
                            &outcome.response,
                        )
                        .await?;
                    info!(unit_id = %unit.id, destination = name, url = %outcome.canonical_url, "Uploaded");
                    self.emit_event(Event::Uploaded {
                        id: unit.id,
                        destination: name.to_string(),
                        url: outcome.canonical_url.clone(),
                    });
                    uploaded.push((record.id, outcome.canonical_url, meta.magnet));
                }
                Err(e) => {
                    let message = e.to_string();
                    self.db.mark_upload_failed(record.id, &message).await?;
                    warn!(unit_id = %unit.id, destination = name, error = %e, "Upload failed, continuing with other destinations");
                    self.emit_event(Event::UploadFailed {
                        id: unit.id,
                        destination: name.to_string(),
                        error: message,
                    });
                }
            }
        }

        for (record_id, url, magnet) in uploaded {
            let urls = [url, magnet];
            if let Some(short) = shorten_or_keep(self.shortener.as_deref(), &urls).await {
                self.db
                    .set_upload_short_urls(
                        record_id,
                        short.first().map(String::as_str),
                        short.get(1).map(String::as_str),
                    )
                    .await?;
            }
        }

        self.db.list_upload_records(unit.id).await
    }

    async fn upload_one(
        &self,
        target: &PublishTarget,
        request: &PublishRequest<'_>,
        announce: &[String],
    ) -> Result<(UploadOutcome, TorrentMeta)> {
        let unit = request.unit;
        let torrent_name = format!("{}.torrent", unit.file_name);
        let output = self.torrent_path(unit, target.config.name());

        let meta = self
            .torrent_maker
            .create(request.content, &output, announce)
            .await?;

        let torrent_file_url = unit
            .links
            .torrent_url
            .as_deref()
            .map(direct_download_url);

        let upload = UploadRequest {
            torrent_name: &torrent_name,
            torrent: &meta.bytes,
            resolution: unit.resolution,
            release_group: &unit.release_group,
            subtype: unit.subtype,
            screenshot_urls: request.screenshot_urls,
            torrent_file_url: torrent_file_url.as_deref(),
            is_batch: unit.kind == UnitKind::Batch,
        };

        let outcome = with_retry(&self.config.retry, || target.destination.upload(&upload)).await?;
        Ok((outcome, meta))
    }

    /// Where the torrent built for one destination is kept
    fn torrent_path(&self, unit: &ReleaseUnit, destination: &str) -> PathBuf {
        let file: String = destination
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.config
            .pipeline
            .library_dir
            .join("torrents")
            .join(&unit.public_id)
            .join(format!("{}.torrent", file))
    }

    fn emit_event(&self, event: Event) {
        // send() only fails without subscribers
        self.event_tx.send(event).ok();
    }
}

/// Public torrent link that sites can fetch directly
pub fn direct_download_url(torrent_url: &str) -> String {
    torrent_url.replacen("/download/", "/direct_download/", 1)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationKind, TrackerGroup};
    use crate::test_helpers::{
        FakeDestination, FakeShortener, FakeTorrentMaker, insert_episode, setup_db, test_config,
    };
    use crate::types::UnitId;

    struct Harness {
        db: Arc<Database>,
        config: Config,
        maker: Arc<FakeTorrentMaker>,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let (db, dir) = setup_db().await;
        let mut config = test_config(dir.path());
        config.trackers = vec![
            TrackerGroup {
                name: "public".to_string(),
                urls: vec!["udp://open.tracker:1337/announce".to_string()],
            },
            TrackerGroup {
                name: "nyaa".to_string(),
                urls: vec!["http://nyaa.tracker.wf:7777/announce".to_string()],
            },
        ];
        Harness {
            db: Arc::new(db),
            config,
            maker: Arc::new(FakeTorrentMaker::default()),
            _dir: dir,
        }
    }

    fn target(config: &mut Config, fake: &Arc<FakeDestination>, group: Option<&str>) -> PublishTarget {
        let dest = DestinationConfig {
            kind: DestinationKind::NyaaSi,
            name: Some(fake.name.clone()),
            api_url: "https://example.org/upload".to_string(),
            api_key: "key".to_string(),
            tracker_group: group.map(str::to_string),
            enabled: true,
            timeout: std::time::Duration::from_secs(5),
            options: Default::default(),
        };
        config.destinations.push(dest.clone());
        PublishTarget {
            config: dest,
            destination: fake.clone(),
        }
    }

    impl Harness {
        fn fanout(&self, targets: Vec<PublishTarget>, shortener: Option<Arc<FakeShortener>>) -> Fanout {
            let (event_tx, _) = broadcast::channel(64);
            Fanout::new(
                self.db.clone(),
                Arc::new(self.config.clone()),
                targets,
                self.maker.clone(),
                shortener.map(|s| s as Arc<dyn UrlShortener>),
                event_tx,
            )
        }

        async fn publish(&self, fanout: &Fanout, unit: UnitId) -> Vec<UploadRecord> {
            let unit = self.db.get_unit(unit).await.unwrap().unwrap();
            let content = self.config.pipeline.library_dir.join("episode.mkv");
            fanout
                .publish(&PublishRequest {
                    unit: &unit,
                    content: &content,
                    screenshot_urls: &[],
                })
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn one_failing_destination_does_not_block_the_others() {
        let mut h = harness().await;
        let first = Arc::new(FakeDestination::new("first"));
        let broken = Arc::new(FakeDestination::failing("broken"));
        let third = Arc::new(FakeDestination::new("third"));
        let targets = vec![
            target(&mut h.config, &first, None),
            target(&mut h.config, &broken, None),
            target(&mut h.config, &third, None),
        ];
        let unit = insert_episode(&h.db, "Show", "Show - 01").await;
        let fanout = h.fanout(targets, None);

        let records = h.publish(&fanout, unit).await;
        let statuses: Vec<_> = records.iter().map(|r| (r.destination.as_str(), r.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("first", UploadStatus::Uploaded),
                ("broken", UploadStatus::Failed),
                ("third", UploadStatus::Uploaded),
            ]
        );
        assert_eq!(broken.calls(), 3);
        assert!(records[1].error_message.as_deref().unwrap().contains("broken"));

        let again = h.publish(&fanout, unit).await;
        assert_eq!(again, records);
        assert_eq!(first.calls(), 1);
        assert_eq!(broken.calls(), 3);
        assert_eq!(third.calls(), 1);
    }

    #[tokio::test]
    async fn fully_published_unit_makes_no_calls() {
        let mut h = harness().await;
        let only = Arc::new(FakeDestination::new("only"));
        let targets = vec![target(&mut h.config, &only, None)];
        let shortener = Arc::new(FakeShortener::default());
        let unit = insert_episode(&h.db, "Show", "Show - 02").await;
        let fanout = h.fanout(targets, Some(shortener.clone()));

        let first = h.publish(&fanout, unit).await;
        let (uploads, torrents, shortens) = (only.calls(), h.maker.created(), shortener.calls());

        let second = h.publish(&fanout, unit).await;
        assert_eq!(second, first);
        assert_eq!(only.calls(), uploads);
        assert_eq!(h.maker.created(), torrents);
        assert_eq!(shortener.calls(), shortens);
    }

    #[tokio::test]
    async fn own_trackers_lead_the_announce_list() {
        let mut h = harness().await;
        let nyaa = Arc::new(FakeDestination::new("nyaa.si"));
        let targets = vec![target(&mut h.config, &nyaa, Some("nyaa"))];
        let unit = insert_episode(&h.db, "Show", "Show - 03").await;

        let records = h.publish(&h.fanout(targets, None), unit).await;
        assert_eq!(
            records[0].trackers,
            vec![
                "http://nyaa.tracker.wf:7777/announce".to_string(),
                "udp://open.tracker:1337/announce".to_string(),
            ]
        );
        assert_eq!(h.maker.last_announce(), records[0].trackers);
    }

    #[tokio::test]
    async fn uploads_are_shortened_and_magnets_kept() {
        let mut h = harness().await;
        let site = Arc::new(FakeDestination::new("site"));
        let targets = vec![target(&mut h.config, &site, None)];
        let unit = insert_episode(&h.db, "Show", "Show - 04").await;

        let records = h
            .publish(&h.fanout(targets, Some(Arc::new(FakeShortener::default()))), unit)
            .await;
        let record = &records[0];
        let url = record.canonical_url.clone().unwrap();
        let magnet = record.magnet_uri.clone().unwrap();
        assert!(magnet.starts_with("magnet:?xt=urn:btih:"));
        assert_eq!(record.short_url, Some(format!("short:{}", url)));
        assert_eq!(record.short_magnet, Some(format!("short:{}", magnet)));
        assert_eq!(record.display_url(), Some(format!("short:{}", url).as_str()));
    }

    #[tokio::test]
    async fn shortener_failure_keeps_canonical_urls() {
        let mut h = harness().await;
        let site = Arc::new(FakeDestination::new("site"));
        let targets = vec![target(&mut h.config, &site, None)];
        let unit = insert_episode(&h.db, "Show", "Show - 05").await;

        let records = h
            .publish(&h.fanout(targets, Some(Arc::new(FakeShortener::failing()))), unit)
            .await;
        assert_eq!(records[0].status, UploadStatus::Uploaded);
        assert!(records[0].short_url.is_none());
        assert_eq!(records[0].display_url(), records[0].canonical_url.as_deref());
    }

    #[tokio::test]
    async fn disabled_destination_gets_no_record() {
        let mut h = harness().await;
        let off = Arc::new(FakeDestination::new("off"));
        let mut disabled = target(&mut h.config, &off, None);
        disabled.config.enabled = false;
        let unit = insert_episode(&h.db, "Show", "Show - 06").await;

        let records = h.publish(&h.fanout(vec![disabled], None), unit).await;
        assert!(records.is_empty());
        assert_eq!(off.calls(), 0);
    }

    #[tokio::test]
    async fn sites_receive_the_direct_torrent_link() {
        let mut h = harness().await;
        let site = Arc::new(FakeDestination::new("site"));
        let targets = vec![target(&mut h.config, &site, None)];
        let unit = insert_episode(&h.db, "Show", "Show - 07").await;

        h.publish(&h.fanout(targets, None), unit).await;
        let url = site.last_torrent_file_url().unwrap();
        assert!(url.contains("/direct_download/torrent/"), "{url}");
        assert!(!site.last_was_batch());
    }

    #[test]
    fn direct_download_swaps_only_the_first_segment() {
        assert_eq!(
            direct_download_url("https://relay.example.org/download/torrent/u/download/x.torrent"),
            "https://relay.example.org/direct_download/torrent/u/download/x.torrent"
        );
    }
}
