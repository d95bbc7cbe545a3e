//! Shared test helpers: a scratch database, a test config and in-memory
//! fakes for every external collaborator.

use crate::config::{Config, EncodeProfile, FeedKind};
use crate::coordinator::Collaborators;
use crate::db::{Database, NewReleaseUnit, UpsertFeedParams};
use crate::destinations::{Destination, UploadOutcome, UploadRequest};
use crate::error::{AcquisitionError, Error, PublishError, Result};
use crate::feed::{FeedFetcher, FeedSources};
use crate::media::{
    EncodeSettings, MediaInfo, Screenshot, ScreenshotGenerator, TorrentMaker, TorrentMeta,
    Transcoder,
};
use crate::seedbox::Seedbox;
use crate::shortener::UrlShortener;
use crate::torrent_client::{DownloadClient, TorrentFileInfo, TorrentSource, TorrentStatus};
use crate::types::{FeedEntry, PublicLinks, Resolution, SubType, UnitId, UnitKind};
use crate::watcher::{WatcherEntry, WatcherSource};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Fresh database in its own temporary directory
pub(crate) async fn setup_db() -> (Database, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(&dir.path().join("relay.db")).await.unwrap();
    (db, dir)
}

/// Config rooted in `dir` with instant retries and polling
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::new("https://relay.example.org");
    config.pipeline.download_dir = dir.join("downloads");
    config.pipeline.library_dir = dir.join("library");
    config.pipeline.batch_dir = dir.join("batches");
    config.pipeline.poll_period = Duration::from_millis(1);
    config.pipeline.download_timeout = Duration::from_secs(5);
    config.pipeline.feed_spacing = Duration::ZERO;
    config.torrent_client.settle_delay = Duration::ZERO;
    config.retry.max_attempts = 3;
    config.retry.initial_delay = Duration::ZERO;
    config.retry.max_delay = Duration::ZERO;
    config.retry.jitter = false;
    config.persistence.database_path = dir.join("relay.db");
    config
}

/// Insert a NyaaRss feed (seedbox and torrent uploads on) for a new anime
pub(crate) async fn insert_feed_for(db: &Database, anime_title: &str, url: &str) -> i64 {
    let anime = db
        .get_or_create_anime(anime_title, &[], &EncodeProfile::default())
        .await
        .unwrap();
    db.upsert_feed(UpsertFeedParams {
        kind: FeedKind::NyaaRss,
        url,
        anime_id: anime.id,
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

/// Insert a 1080p softsubs episode with public links
pub(crate) async fn insert_episode(db: &Database, anime_title: &str, name: &str) -> UnitId {
    let anime = db
        .get_or_create_anime(anime_title, &[], &EncodeProfile::default())
        .await
        .unwrap();
    let public_id = name.to_lowercase().replace(' ', "-");
    let file_name = format!("[SSA] {} [1080p].mkv", name);
    let links = PublicLinks {
        watch_url: Some(format!("https://relay.example.org/watch/{}", public_id)),
        download_url: Some(format!("https://relay.example.org/download/{}", public_id)),
        torrent_url: Some(format!(
            "https://relay.example.org/download/torrent/{}/{}.torrent",
            public_id,
            urlencoding::encode(&file_name)
        )),
        magnet_url: Some(format!("https://relay.example.org/download/magnet/{}", public_id)),
        ..PublicLinks::default()
    };
    db.insert_unit(NewReleaseUnit {
        public_id: &public_id,
        kind: UnitKind::Episode,
        anime_id: anime.id,
        feed_id: None,
        name,
        original_title: &format!("[Group] {} [1080p].mkv", name),
        file_name: &file_name,
        resolution: Resolution::P1080,
        subtype: SubType::Softsubs,
        uncensored: false,
        bluray: false,
        release_group: "Group",
        source_path: None,
        source_size: 1024,
        links: &links,
    })
    .await
    .unwrap()
}

#[derive(Default)]
struct ClientState {
    added: Vec<TorrentSource>,
    tags: Vec<String>,
    save_path: Option<PathBuf>,
    polls: u32,
    removed: Vec<(String, bool)>,
    failing_adds: u32,
    status_errors: u32,
    trackers_added: usize,
}

/// Download client serving one torrent that completes after a number of polls
pub(crate) struct FakeDownloadClient {
    hash: String,
    name: String,
    files: Vec<TorrentFileInfo>,
    complete_after_polls: u32,
    write_files: bool,
    state: Mutex<ClientState>,
}

impl FakeDownloadClient {
    pub(crate) fn new(
        hash: &str,
        name: &str,
        files: Vec<TorrentFileInfo>,
        complete_after_polls: u32,
    ) -> Self {
        Self {
            hash: hash.to_string(),
            name: name.to_string(),
            files,
            complete_after_polls,
            write_files: false,
            state: Mutex::new(ClientState::default()),
        }
    }

    /// Also create the torrent's files under the save path when added
    pub(crate) fn writing_files(mut self) -> Self {
        self.write_files = true;
        self
    }

    /// Fail the next `count` status checks with a transport error
    pub(crate) fn with_status_errors(mut self, count: u32) -> Self {
        self.state.get_mut().unwrap().status_errors = count;
        self
    }

    /// Reject the next `count` adds
    pub(crate) fn fail_next_adds(&self, count: u32) {
        self.state.lock().unwrap().failing_adds = count;
    }

    pub(crate) fn added(&self) -> Vec<TorrentSource> {
        self.state.lock().unwrap().added.clone()
    }

    pub(crate) fn removed(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().removed.clone()
    }

    pub(crate) fn trackers_added(&self) -> usize {
        self.state.lock().unwrap().trackers_added
    }

    fn current_status(&self, state: &ClientState) -> TorrentStatus {
        let complete = state.polls >= self.complete_after_polls;
        TorrentStatus {
            hash: self.hash.clone(),
            name: self.name.clone(),
            progress: if complete { 1.0 } else { 0.5 },
            state: if complete { "uploading" } else { "downloading" }.to_string(),
            save_path: state
                .save_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            total_size: self.files.iter().map(|f| f.size).sum(),
        }
    }
}

#[async_trait]
impl DownloadClient for FakeDownloadClient {
    async fn add(&self, source: &TorrentSource, save_path: &Path, tag: &str) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.failing_adds > 0 {
                state.failing_adds -= 1;
                return Err(AcquisitionError::Rejected("Fails.".to_string()).into());
            }
        }
        if self.write_files {
            for file in &self.files {
                let path = save_path.join(&file.name);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, vec![0u8; file.size as usize]).await?;
            }
        }

        let mut state = self.state.lock().unwrap();
        state.added.push(source.clone());
        state.tags.push(tag.to_string());
        state.save_path = Some(save_path.to_path_buf());
        state.polls = 0;
        Ok(())
    }

    async fn find_by_tag(&self, tag: &str) -> Result<Option<TorrentStatus>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tags
            .iter()
            .any(|t| t == tag)
            .then(|| self.current_status(&state)))
    }

    async fn status(&self, hash: &str) -> Result<Option<TorrentStatus>> {
        let mut state = self.state.lock().unwrap();
        if hash != self.hash || state.added.is_empty() {
            return Ok(None);
        }
        if state.status_errors > 0 {
            state.status_errors -= 1;
            return Err(AcquisitionError::Client("HTTP 502: Bad Gateway".to_string()).into());
        }
        state.polls = state.polls.saturating_add(1);
        Ok(Some(self.current_status(&state)))
    }

    async fn list_files(&self, _hash: &str) -> Result<Vec<TorrentFileInfo>> {
        Ok(self.files.clone())
    }

    async fn remove(&self, hash: &str, delete_data: bool) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .removed
            .push((hash.to_string(), delete_data));
        Ok(())
    }

    async fn add_trackers(&self, _hash: &str, _urls: &[String]) -> Result<()> {
        self.state.lock().unwrap().trackers_added += 1;
        Ok(())
    }
}

/// Transcoder writing a small output file instead of encoding
#[derive(Default)]
pub(crate) struct FakeTranscoder {
    text_tracks: bool,
    failing: bool,
    encodes: Mutex<Vec<EncodeSettings>>,
}

impl FakeTranscoder {
    /// Sources carry text subtitle tracks
    pub(crate) fn softsubs() -> Self {
        Self {
            text_tracks: true,
            ..Self::default()
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub(crate) fn encodes(&self) -> Vec<EncodeSettings> {
        self.encodes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe(&self, _input: &Path) -> Result<MediaInfo> {
        Ok(MediaInfo {
            has_text_tracks: self.text_tracks,
            frame_count: 34_000,
        })
    }

    async fn encode(&self, input: &Path, output: &Path, settings: &EncodeSettings) -> Result<u64> {
        self.encodes.lock().unwrap().push(settings.clone());
        if self.failing {
            return Err(Error::Transcode {
                path: input.to_path_buf(),
                reason: "encoder exited with status 1".to_string(),
            });
        }
        let data = format!("encoded {}", settings.resolution);
        tokio::fs::write(output, data.as_bytes()).await?;
        Ok(data.len() as u64)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Screenshot generator returning tiny placeholder images
#[derive(Default)]
pub(crate) struct FakeScreenshots {
    failing: bool,
}

impl FakeScreenshots {
    pub(crate) fn failing() -> Self {
        Self { failing: true }
    }
}

#[async_trait]
impl ScreenshotGenerator for FakeScreenshots {
    async fn generate(
        &self,
        _video: &Path,
        _subtype: SubType,
        count: usize,
    ) -> Result<Vec<Screenshot>> {
        if self.failing {
            return Err(Error::Screenshot("no frames decoded".to_string()));
        }
        Ok((0..count)
            .map(|i| Screenshot {
                file_name: format!("{:02}.jpg", i),
                data: vec![0xff, 0xd8, i as u8],
            })
            .collect())
    }
}

/// Torrent maker writing placeholder metainfo
#[derive(Default)]
pub(crate) struct FakeTorrentMaker {
    created: AtomicUsize,
    last_announce: Mutex<Vec<String>>,
}

impl FakeTorrentMaker {
    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn last_announce(&self) -> Vec<String> {
        self.last_announce.lock().unwrap().clone()
    }
}

#[async_trait]
impl TorrentMaker for FakeTorrentMaker {
    async fn create(&self, input: &Path, output: &Path, announce: &[String]) -> Result<TorrentMeta> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        *self.last_announce.lock().unwrap() = announce.to_vec();

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = format!("d4:infod4:name{}:{}ee", input.as_os_str().len(), input.display())
            .into_bytes();
        tokio::fs::write(output, &bytes).await?;

        let info_hash = format!("{:040x}", n + 1);
        Ok(TorrentMeta {
            bytes,
            magnet: format!("magnet:?xt=urn:btih:{}", info_hash),
            info_hash,
        })
    }
}

#[derive(Default)]
struct DestinationLog {
    calls: usize,
    torrent_file_url: Option<String>,
    is_batch: bool,
    release_group: Option<String>,
    screenshots: usize,
}

/// Destination that accepts (or rejects) every upload
pub(crate) struct FakeDestination {
    pub(crate) name: String,
    failing: bool,
    log: Mutex<DestinationLog>,
}

impl FakeDestination {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            failing: false,
            log: Mutex::new(DestinationLog::default()),
        }
    }

    pub(crate) fn failing(name: &str) -> Self {
        Self {
            failing: true,
            ..Self::new(name)
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.log.lock().unwrap().calls
    }

    pub(crate) fn last_torrent_file_url(&self) -> Option<String> {
        self.log.lock().unwrap().torrent_file_url.clone()
    }

    pub(crate) fn last_was_batch(&self) -> bool {
        self.log.lock().unwrap().is_batch
    }

    pub(crate) fn last_release_group(&self) -> Option<String> {
        self.log.lock().unwrap().release_group.clone()
    }

    pub(crate) fn last_screenshot_count(&self) -> usize {
        self.log.lock().unwrap().screenshots
    }
}

#[async_trait]
impl Destination for FakeDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, request: &UploadRequest<'_>) -> Result<UploadOutcome> {
        let calls = {
            let mut log = self.log.lock().unwrap();
            log.calls += 1;
            log.torrent_file_url = request.torrent_file_url.map(str::to_string);
            log.is_batch = request.is_batch;
            log.release_group = Some(request.release_group.to_string());
            log.screenshots = request.screenshot_urls.len();
            log.calls
        };
        if self.failing {
            return Err(Error::destination(&self.name, "site answered HTTP 500"));
        }
        Ok(UploadOutcome {
            canonical_url: format!("https://{}.example/view/{}", self.name, calls),
            response: serde_json::json!({ "id": calls }),
        })
    }
}

/// Shortener prefixing every URL with `short:`
#[derive(Default)]
pub(crate) struct FakeShortener {
    failing: bool,
    calls: AtomicUsize,
}

impl FakeShortener {
    pub(crate) fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UrlShortener for FakeShortener {
    async fn shorten(&self, urls: &[String]) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(Error::Shorten("service unavailable".to_string()));
        }
        Ok(urls.iter().map(|u| format!("short:{}", u)).collect())
    }
}

/// Seedbox recording transfers; can be switched to reject torrents
#[derive(Default)]
pub(crate) struct FakeSeedbox {
    rejecting: AtomicBool,
    uploads: Mutex<Vec<String>>,
    torrents: Mutex<Vec<String>>,
}

impl FakeSeedbox {
    pub(crate) fn rejecting() -> Self {
        let seedbox = Self::default();
        seedbox.set_rejecting(true);
        seedbox
    }

    pub(crate) fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    pub(crate) fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub(crate) fn torrents(&self) -> Vec<String> {
        self.torrents.lock().unwrap().clone()
    }
}

#[async_trait]
impl Seedbox for FakeSeedbox {
    async fn upload_file(&self, _local: &Path, remote_name: &str) -> Result<()> {
        self.uploads.lock().unwrap().push(remote_name.to_string());
        Ok(())
    }

    async fn add_torrent(&self, name: &str, _torrent: &[u8]) -> Result<()> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(PublishError::SeedboxConfirmation {
                name: name.to_string(),
                response: "result[]=Failed".to_string(),
            }
            .into());
        }
        self.torrents.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

/// Feed returning the same configurable entries for every URL
#[derive(Default)]
pub(crate) struct FakeFeed {
    entries: Mutex<Vec<FeedEntry>>,
    failing: AtomicBool,
    fetches: AtomicUsize,
}

impl FakeFeed {
    pub(crate) fn set_entries(&self, titles: &[&str]) {
        *self.entries.lock().unwrap() = titles
            .iter()
            .enumerate()
            .map(|(i, title)| FeedEntry {
                title: title.to_string(),
                torrent_magnet: Some(format!("magnet:?xt=urn:btih:{:040x}", i + 1)),
                torrent_url: None,
            })
            .collect();
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedFetcher for FakeFeed {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Feed(format!("{}: HTTP 503", url)));
        }
        Ok(self.entries.lock().unwrap().clone())
    }
}

/// Watcher site with nothing on it
pub(crate) struct EmptySite;

#[async_trait]
impl WatcherSource for EmptySite {
    async fn latest(&self, _url: &str) -> Result<Vec<WatcherEntry>> {
        Ok(vec![])
    }

    async fn show_title(&self, show_url: &str) -> Result<String> {
        Err(Error::NotFound(show_url.to_string()))
    }

    async fn show_entries(&self, _show_url: &str) -> Result<Vec<FeedEntry>> {
        Ok(vec![])
    }
}

const IDLE_HASH: &str = "0000000000000000000000000000000000000000";

/// Collaborators that do nothing beyond serving `feed`
pub(crate) fn idle_collaborators(feed: Arc<FakeFeed>) -> Collaborators {
    Collaborators {
        download_client: Arc::new(FakeDownloadClient::new(IDLE_HASH, "idle", vec![], 1)),
        transcoder: Arc::new(FakeTranscoder::default()),
        screenshots: Arc::new(FakeScreenshots::default()),
        torrent_maker: Arc::new(FakeTorrentMaker::default()),
        destinations: vec![],
        seedbox: None,
        shortener: None,
        feeds: FeedSources::new(feed.clone(), feed),
        watcher_source: Arc::new(EmptySite),
    }
}
