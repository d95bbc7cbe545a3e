//! Construction, startup recovery and shutdown.

use super::{Coordinator, Discovery, MediaTools, Publishing};
use crate::acquisition::{Acquirer, AcquisitionTiming};
use crate::config::Config;
use crate::db::{Database, UpsertFeedParams};
use crate::destinations::build_destination;
use crate::error::{Error, Result};
use crate::fanout::{Fanout, PublishTarget};
use crate::feed::{FeedSources, RssFeedFetcher, SkipPatterns, SubsPleaseClient};
use crate::media::{
    FfmpegCli, ImdlTorrentMaker, NoOpMedia, ScreenshotGenerator, TorrentMaker, Transcoder,
};
use crate::parser::TitleParser;
use crate::seedbox::{RuTorrentSeedbox, Seedbox};
use crate::shortener::{HttpShortener, UrlShortener};
use crate::torrent_client::{DownloadClient, QbittorrentClient};
use crate::types::{Event, UnitStatus};
use crate::watcher::{PageWatcher, WatcherSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

/// Whole-file seedbox transfers need far more than the API timeout
const SEEDBOX_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// The external services and tools the pipeline drives
///
/// [`Collaborators::from_config`] builds the real implementations; tests
/// and embedders can substitute any of them.
pub struct Collaborators {
    /// BitTorrent client used for acquisition
    pub download_client: Arc<dyn DownloadClient>,
    /// Probing and encoding
    pub transcoder: Arc<dyn Transcoder>,
    /// Screenshot extraction
    pub screenshots: Arc<dyn ScreenshotGenerator>,
    /// `.torrent` creation
    pub torrent_maker: Arc<dyn TorrentMaker>,
    /// Publishing destinations, attempted in order
    pub destinations: Vec<PublishTarget>,
    /// Long-term seeding host
    pub seedbox: Option<Arc<dyn Seedbox>>,
    /// Link shortener
    pub shortener: Option<Arc<dyn UrlShortener>>,
    /// Feed fetchers per kind
    pub feeds: FeedSources,
    /// Site behind the page watchers
    pub watcher_source: Arc<dyn WatcherSource>,
}

impl Collaborators {
    /// Build the real collaborators described by `config`
    ///
    /// Missing `ffmpeg`/`ffprobe` or `imdl` binaries are replaced by
    /// [`NoOpMedia`]; units then fail at the media stages and can be
    /// resumed once the tools are installed.
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = config.torrent_client.timeout;

        let (transcoder, screenshots): (Arc<dyn Transcoder>, Arc<dyn ScreenshotGenerator>) =
            match FfmpegCli::from_path() {
                Some(ffmpeg) => {
                    let ffmpeg = Arc::new(ffmpeg);
                    tracing::info!("Using ffmpeg for encoding and screenshots");
                    (ffmpeg.clone(), ffmpeg)
                }
                None => {
                    tracing::warn!("ffmpeg/ffprobe not found in PATH, media stages will fail");
                    (Arc::new(NoOpMedia), Arc::new(NoOpMedia))
                }
            };

        let torrent_maker: Arc<dyn TorrentMaker> = match ImdlTorrentMaker::from_path() {
            Some(imdl) => Arc::new(imdl),
            None => {
                tracing::warn!("imdl not found in PATH, torrent creation will fail");
                Arc::new(NoOpMedia)
            }
        };

        let destinations = config
            .destinations
            .iter()
            .map(|d| {
                Ok(PublishTarget {
                    config: d.clone(),
                    destination: build_destination(d, &config.site_url)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let seedbox = match &config.seedbox {
            Some(s) => Some(Arc::new(RuTorrentSeedbox::new(s, SEEDBOX_TIMEOUT)?) as Arc<dyn Seedbox>),
            None => None,
        };
        let shortener = match &config.shortener {
            Some(s) => Some(Arc::new(HttpShortener::new(s, timeout)?) as Arc<dyn UrlShortener>),
            None => None,
        };

        let subs_please = Arc::new(SubsPleaseClient::new(timeout)?);

        Ok(Self {
            download_client: Arc::new(QbittorrentClient::new(&config.torrent_client)?),
            transcoder,
            screenshots,
            torrent_maker,
            destinations,
            seedbox,
            shortener,
            feeds: FeedSources::new(Arc::new(RssFeedFetcher::new(timeout)?), subs_please.clone()),
            watcher_source: subs_please,
        })
    }
}

impl Coordinator {
    /// Create a pipeline with the real collaborators
    ///
    /// Creates the work directories, opens (and migrates) the database and
    /// resolves every configured destination.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, a directory cannot
    /// be created or the database cannot be opened.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        for dir in [
            &config.pipeline.download_dir,
            &config.pipeline.library_dir,
            &config.pipeline.batch_dir,
        ] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create directory '{}': {}", dir.display(), e),
                ))
            })?;
        }

        let db = Database::new(&config.persistence.database_path).await?;
        let collaborators = Collaborators::from_config(&config)?;
        Self::with_collaborators(config, db, collaborators)
    }

    /// Create a pipeline over explicit collaborators
    pub fn with_collaborators(
        config: Config,
        db: Database,
        collaborators: Collaborators,
    ) -> Result<Self> {
        // Buffer of 1000 events per subscriber
        let (event_tx, _rx) = broadcast::channel(1000);
        let config = Arc::new(config);
        let db = Arc::new(db);
        let parser = Arc::new(TitleParser::new()?);

        let http_client = reqwest::Client::builder()
            .timeout(config.torrent_client.timeout)
            .build()
            .map_err(|e| Error::Other(format!("failed to build HTTP client: {}", e)))?;

        let acquirer = Acquirer::new(
            collaborators.download_client,
            http_client,
            config.pipeline.download_dir.clone(),
            config.all_trackers(),
            AcquisitionTiming {
                settle_delay: config.torrent_client.settle_delay,
                poll_period: config.pipeline.poll_period,
                timeout: config.pipeline.download_timeout,
            },
        );

        let fanout = Fanout::new(
            db.clone(),
            config.clone(),
            collaborators.destinations,
            collaborators.torrent_maker.clone(),
            collaborators.shortener.clone(),
            event_tx.clone(),
        );

        let watcher = PageWatcher::new(db.clone(), parser.clone(), collaborators.watcher_source);

        Ok(Self {
            db,
            event_tx,
            parser,
            acquirer: Arc::new(acquirer),
            media: MediaTools {
                transcoder: collaborators.transcoder,
                screenshots: collaborators.screenshots,
                torrent_maker: collaborators.torrent_maker,
            },
            publishing: Publishing {
                fanout: Arc::new(fanout),
                seedbox: collaborators.seedbox,
                shortener: collaborators.shortener,
            },
            discovery: Discovery {
                feeds: collaborators.feeds,
                skip: SkipPatterns::default(),
                watcher: Arc::new(watcher),
            },
            unit_slots: Arc::new(Semaphore::new(config.pipeline.max_concurrent_units.max(1))),
            shutdown: CancellationToken::new(),
            config,
        })
    }

    /// Register the configured anime and feeds in the database
    ///
    /// Anime settings follow the config. Feed upload flags only seed new
    /// rows; flags already persisted (e.g. flipped after a last-episode
    /// batch) are kept.
    pub async fn sync_feeds(&self) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(self.config.feeds.len());

        for feed in &self.config.feeds {
            let anime = self
                .db
                .get_or_create_anime(&feed.anime, &feed.alt_names, &feed.encode)
                .await?;
            self.db
                .update_anime_settings(anime.id, &feed.alt_names, &feed.encode)
                .await?;

            let id = self
                .db
                .upsert_feed(UpsertFeedParams {
                    kind: feed.kind,
                    url: &feed.url,
                    anime_id: anime.id,
                    upload_seedbox: feed.upload_seedbox,
                    upload_torrent: feed.upload_torrent,
                    upload_last_episode: feed.upload_last_episode,
                    bluray: feed.bluray,
                    uncensored: feed.uncensored,
                    deinterlace: feed.deinterlace,
                    extra_tags: feed.extra_tags.as_deref(),
                    check_interval_secs: feed.check_interval.as_secs() as i64,
                    enabled: feed.enabled,
                })
                .await?;
            ids.push(id);
        }

        tracing::info!(count = ids.len(), "Synchronized configured feeds");
        Ok(ids)
    }

    /// Mark units left mid-pipeline by a previous run as failed
    ///
    /// Nothing is resumed automatically; the operator re-triggers units
    /// with [`Coordinator::resume_unit`].
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;

        for status in UnitStatus::PIPELINE.iter().filter(|s| !s.is_terminal()) {
            for unit in self.db.list_units_by_status(*status).await? {
                if self.db.fail_unit(unit.id, "interrupted").await? {
                    tracing::warn!(
                        unit_id = %unit.id,
                        status = status.as_str(),
                        "Unit was interrupted, marked as error"
                    );
                    self.emit_event(Event::UnitFailed {
                        id: unit.id,
                        error: "interrupted".to_string(),
                    });
                    recovered += 1;
                }
            }
        }

        if recovered > 0 {
            tracing::info!(recovered, "Recovered interrupted units");
        }
        Ok(recovered)
    }

    /// Stop dispatching new work
    ///
    /// Cancels the scheduler and closes the unit slots so no new acquisition
    /// starts. Units already running are left to finish; any that do not
    /// are marked interrupted on the next startup.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");
        self.shutdown.cancel();
        self.unit_slots.close();
        tracing::info!("Shutdown complete - no new units will start");
        Ok(())
    }
}
