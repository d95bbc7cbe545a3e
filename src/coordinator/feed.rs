//! Feed checks and discovery batches.

use super::unit::{UnitOptions, reached};
use super::{Coordinator, new_public_id};
use crate::acquisition::{Acquired, AcquiredFile};
use crate::config::WatcherConfig;
use crate::db::{Anime, EpisodeKey, FeedRow, NewReleaseUnit};
use crate::error::{AcquisitionError, Error, Result};
use crate::feed::{FeedSnapshot, unseen};
use crate::parser::{ExtraTags, ParsedRelease, episode_file_name};
use crate::types::{Event, FeedEntry, Resolution, SubType, UnitId, UnitKind, UnitStatus};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Outcome of one feed check
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeedCheck {
    /// Entries absent from the cached snapshot
    pub new_entries: usize,
    /// Units that reached `Finished`
    pub published: Vec<UnitId>,
    /// Units that stopped in `Error`
    pub failed: Vec<UnitId>,
    /// Entries skipped: unparsable, not the source resolution, or already processed
    pub skipped: usize,
    /// Entries whose acquisition failed before any unit existed; they are
    /// picked up again on the next check
    pub aborted: usize,
}

/// Feed settings frozen at the start of a discovery batch
///
/// Later changes to the feed row (such as the last-episode flip of a
/// concurrent run) do not affect a batch in progress.
#[derive(Clone, Debug)]
pub(crate) struct BatchContext {
    feed_id: i64,
    upload_seedbox: bool,
    upload_torrent: bool,
    upload_last_episode: bool,
    bluray: bool,
    uncensored: bool,
    deinterlace: bool,
    extra_tags: Option<String>,
    len: usize,
}

impl BatchContext {
    fn freeze(feed: &FeedRow, len: usize) -> Self {
        Self {
            feed_id: feed.id,
            upload_seedbox: feed.upload_seedbox,
            upload_torrent: feed.upload_torrent,
            upload_last_episode: feed.upload_last_episode,
            bluray: feed.bluray,
            uncensored: feed.uncensored,
            deinterlace: feed.deinterlace,
            extra_tags: feed.extra_tags.clone(),
            len,
        }
    }

    /// Whether the entry at `index` is published to torrent sites
    fn publishes(&self, index: usize) -> bool {
        self.upload_torrent || (self.upload_last_episode && index + 1 == self.len)
    }
}

/// Result of a discovery batch, including what the snapshot cache must forget
struct BatchOutcome {
    report: FeedCheck,
    /// Entries whose acquisition failed
    aborted: Vec<FeedEntry>,
    /// Stopped early by shutdown or by the feed being disabled
    interrupted: bool,
}

#[derive(Default)]
struct EntryOutcome {
    created: Vec<UnitId>,
    published: Vec<UnitId>,
    failed: Vec<UnitId>,
}

impl Coordinator {
    /// Poll a feed and, when it changed, run its entries through the pipeline
    ///
    /// A changed feed is processed in full; episodes that already have every
    /// target resolution are skipped. The snapshot is cached after processing,
    /// minus entries whose download failed, so those come back as new on the
    /// next check. An interrupted batch leaves the cached snapshot untouched.
    /// `last_check` is stamped even when fetching fails.
    pub async fn check_feed(&self, feed_id: i64) -> Result<FeedCheck> {
        let feed = self
            .db
            .get_feed(feed_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("feed {}", feed_id)))?;
        if !feed.enabled {
            debug!(feed_id, "Feed disabled, skipping");
            return Ok(FeedCheck::default());
        }
        let anime = self
            .db
            .get_anime(feed.anime_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("anime {}", feed.anime_id)))?;

        let fetcher = self.discovery.feeds.for_kind(feed.feed_kind()?);
        let fetched = match fetcher.fetch(&feed.url).await {
            Ok(entries) => entries,
            Err(e) => {
                self.db.update_feed_last_check(feed.id).await?;
                return Err(e);
            }
        };

        let fresh = FeedSnapshot::new(fetched, &self.discovery.skip);
        let cached = FeedSnapshot::from_cache(feed.snapshot.as_deref()).unwrap_or_else(|e| {
            warn!(feed_id, error = %e, "Cached feed snapshot is unreadable, treating as first run");
            FeedSnapshot::default()
        });

        let new_entries = unseen(&cached, &fresh).len();
        self.db.update_feed_last_check(feed.id).await?;

        info!(
            url = %feed.url,
            entries = fresh.len(),
            new = new_entries,
            "Checked feed"
        );
        self.emit_event(Event::FeedChecked {
            url: feed.url.clone(),
            new_entries,
        });

        if fresh == cached {
            return Ok(FeedCheck::default());
        }

        let batch = self
            .run_feed_batch(&feed, &anime, fresh.entries().to_vec())
            .await?;
        if batch.interrupted {
            info!(feed_id, "Feed batch interrupted, keeping cached snapshot");
        } else {
            let settled = fresh.without(&batch.aborted);
            self.db
                .update_feed_snapshot(feed.id, &settled.to_cache()?)
                .await?;
        }

        let mut report = batch.report;
        report.new_entries = new_entries;
        Ok(report)
    }

    /// Poll a page watcher and check every feed it triggered
    ///
    /// Feeds are checked one after another, `feed_spacing` apart.
    pub async fn check_watcher(&self, watcher: &WatcherConfig) -> Result<Vec<i64>> {
        let feed_ids = self.discovery.watcher.check(watcher).await?;

        let mut urls = Vec::with_capacity(feed_ids.len());
        for id in &feed_ids {
            if let Some(feed) = self.db.get_feed(*id).await? {
                urls.push(feed.url);
            }
        }
        info!(url = %watcher.url, feeds = feed_ids.len(), "Checked watcher");
        self.emit_event(Event::WatcherChecked {
            url: watcher.url.clone(),
            feeds: urls,
        });

        Ok(feed_ids)
    }

    /// Run the entries of one feed through the pipeline, in order
    ///
    /// Unparsable entries, entries not at the source resolution and entries
    /// whose every target resolution already exists are skipped. Each
    /// remaining entry is acquired once and derives one unit per missing
    /// target resolution. A failing entry or unit does not stop the batch;
    /// disabling the feed or shutting down does.
    pub async fn process_feed_batch(
        &self,
        feed: &FeedRow,
        anime: &Anime,
        entries: Vec<FeedEntry>,
    ) -> Result<FeedCheck> {
        Ok(self.run_feed_batch(feed, anime, entries).await?.report)
    }

    async fn run_feed_batch(
        &self,
        feed: &FeedRow,
        anime: &Anime,
        entries: Vec<FeedEntry>,
    ) -> Result<BatchOutcome> {
        let ctx = BatchContext::freeze(feed, entries.len());
        let mut batch = BatchOutcome {
            report: FeedCheck {
                new_entries: entries.len(),
                ..FeedCheck::default()
            },
            aborted: Vec::new(),
            interrupted: false,
        };
        let report = &mut batch.report;

        for (index, entry) in entries.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                info!(feed_id = feed.id, "Shutting down, leaving feed batch");
                batch.interrupted = true;
                break;
            }
            match self.db.get_feed(feed.id).await? {
                Some(current) if current.enabled => {}
                _ => {
                    info!(feed_id = feed.id, "Feed was disabled, stopping batch");
                    batch.interrupted = true;
                    break;
                }
            }

            let parsed = match self.parser.parse(&entry.title, &anime.title, &anime.alt_names) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(title = %entry.title, error = %e, "Skipping unparsable entry");
                    report.skipped += 1;
                    continue;
                }
            };
            if parsed.resolution != self.config.pipeline.source_resolution {
                debug!(title = %entry.title, resolution = %parsed.resolution, "Not the source resolution");
                report.skipped += 1;
                continue;
            }

            let missing = self.missing_resolutions(&ctx, anime.id, &parsed).await?;
            if missing.is_empty() {
                debug!(episode = %parsed.canonical_episode_name, "Already processed");
                report.skipped += 1;
                continue;
            }

            self.db
                .add_episode_title(anime.id, &parsed.canonical_episode_name)
                .await?;

            let publish = ctx.publishes(index);
            match self
                .process_entry(&ctx, anime, entry, &parsed, &missing, publish)
                .await
            {
                Ok(outcome) => {
                    report.published.extend(outcome.published);
                    report.failed.extend(outcome.failed);
                }
                Err(Error::ShuttingDown) => {
                    info!(feed_id = feed.id, "Shutting down, leaving feed batch");
                    batch.interrupted = true;
                    break;
                }
                Err(e) => {
                    error!(title = %entry.title, error = %e, "Failed to acquire entry, retrying on next check");
                    report.aborted += 1;
                    batch.aborted.push(entry.clone());
                }
            }
        }

        if ctx.upload_last_episode {
            self.db.set_feed_upload_flags(feed.id, true, false).await?;
            info!(feed_id = feed.id, "Feed switched from last-episode to publish-all");
        }

        Ok(batch)
    }

    /// Target resolutions that have no unit for this episode yet
    async fn missing_resolutions(
        &self,
        ctx: &BatchContext,
        anime_id: i64,
        parsed: &ParsedRelease,
    ) -> Result<Vec<Resolution>> {
        let mut missing = Vec::new();
        for &resolution in &self.config.pipeline.target_resolutions {
            let existing = self
                .db
                .find_episode(EpisodeKey {
                    anime_id,
                    name: &parsed.canonical_episode_name,
                    resolution,
                    bluray: ctx.bluray,
                    uncensored: ctx.uncensored,
                    release_group: &parsed.release_group,
                })
                .await?;
            if existing.is_none() {
                missing.push(resolution);
            }
        }
        Ok(missing)
    }

    /// Acquire one entry and run a unit per missing resolution
    async fn process_entry(
        &self,
        ctx: &BatchContext,
        anime: &Anime,
        entry: &FeedEntry,
        parsed: &ParsedRelease,
        missing: &[Resolution],
        publish: bool,
    ) -> Result<EntryOutcome> {
        let _permit = self
            .unit_slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::ShuttingDown)?;

        let acquired = self.acquirer.acquire(entry).await?;
        let source = acquired
            .primary()
            .cloned()
            .ok_or_else(|| AcquisitionError::Missing(acquired.hash.clone()))?;

        let result = self
            .derive_units(ctx, anime, parsed, missing, publish, &source)
            .await;

        let created = match &result {
            Ok(outcome) => outcome.created.clone(),
            Err(_) => Vec::new(),
        };
        self.discard_source(&acquired, &created).await;
        result
    }

    async fn derive_units(
        &self,
        ctx: &BatchContext,
        anime: &Anime,
        parsed: &ParsedRelease,
        missing: &[Resolution],
        publish: bool,
        source: &AcquiredFile,
    ) -> Result<EntryOutcome> {
        let info = self.media.transcoder.probe(&source.path).await?;
        let subtype = info.subtype();
        let options = UnitOptions {
            upload_seedbox: ctx.upload_seedbox,
            publish,
            deinterlace: ctx.deinterlace,
            profile: anime.encode.clone(),
        };

        let mut outcome = EntryOutcome::default();
        for &resolution in missing {
            let id = self
                .create_episode(ctx, anime.id, parsed, resolution, subtype, source)
                .await?;
            outcome.created.push(id);

            match self.run_unit(id, &options).await {
                Ok(()) => outcome.published.push(id),
                Err(_) => outcome.failed.push(id),
            }
        }
        Ok(outcome)
    }

    /// Insert an episode unit for an acquired source
    async fn create_episode(
        &self,
        ctx: &BatchContext,
        anime_id: i64,
        parsed: &ParsedRelease,
        resolution: Resolution,
        subtype: SubType,
        source: &AcquiredFile,
    ) -> Result<UnitId> {
        let public_id = new_public_id();
        let file_name = episode_file_name(
            &self.config.pipeline.publisher_tag,
            &parsed.canonical_episode_name,
            resolution,
            ExtraTags {
                others: ctx.extra_tags.as_deref(),
                uncensored: ctx.uncensored,
                bluray: ctx.bluray,
            },
            subtype.extension(),
        );
        let links = self.episode_links(&public_id, &file_name);

        let id = self
            .db
            .insert_unit(NewReleaseUnit {
                public_id: &public_id,
                kind: UnitKind::Episode,
                anime_id,
                feed_id: Some(ctx.feed_id),
                name: &parsed.canonical_episode_name,
                original_title: &parsed.original_title,
                file_name: &file_name,
                resolution,
                subtype,
                uncensored: ctx.uncensored,
                bluray: ctx.bluray,
                release_group: &parsed.release_group,
                source_path: Some(&source.path),
                source_size: source.size,
                links: &links,
            })
            .await?;

        info!(unit_id = %id, file = %file_name, "Created release unit");
        self.emit_event(Event::UnitCreated {
            id,
            name: parsed.canonical_episode_name.clone(),
            resolution,
        });

        self.db
            .update_unit_status(id, UnitStatus::Discovered, UnitStatus::Downloaded)
            .await?;
        self.db.set_completed_stage(id, UnitStatus::Downloaded).await?;
        self.emit_event(Event::StatusChanged {
            id,
            status: UnitStatus::Downloaded,
        });

        Ok(id)
    }

    /// Delete downloaded files once no unit needs them for encoding
    async fn discard_source(&self, acquired: &Acquired, created: &[UnitId]) {
        for id in created {
            match self.db.get_unit(*id).await {
                Ok(Some(unit)) if !reached(&unit, UnitStatus::Encoding) => {
                    info!(
                        unit_id = %id,
                        hash = %acquired.hash,
                        "Keeping source for a unit that was not encoded"
                    );
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(unit_id = %id, error = %e, "Failed to load unit, keeping source");
                    return;
                }
            }
        }

        for file in &acquired.files {
            remove_download(&file.path, &self.config.pipeline.download_dir).await;
        }
        for id in created {
            if let Err(e) = self.db.set_unit_source(*id, None).await {
                warn!(unit_id = %id, error = %e, "Failed to clear unit source");
            }
        }
    }
}

/// Remove a downloaded file and, when left empty, its torrent folder
pub(crate) async fn remove_download(path: &Path, download_dir: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(file = %path.display(), "Removed downloaded file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Failed to remove downloaded file");
            return;
        }
    }

    if let Some(parent) = path.parent()
        && parent != download_dir
        && parent.starts_with(download_dir)
    {
        // Only succeeds once the folder is empty
        tokio::fs::remove_dir(parent).await.ok();
    }
}
