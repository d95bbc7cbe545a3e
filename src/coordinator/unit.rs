//! The per-unit state machine and manual resume.
//!
//! Stages run in pipeline order. After each stage the unit's
//! `completed_stage` is recorded, so a resumed unit skips what already
//! succeeded. Any stage error moves the unit to `Error` with the detail
//! attached, except screenshot failures, which are recorded and skipped.

use super::Coordinator;
use super::feed::remove_download;
use crate::config::EncodeProfile;
use crate::error::{Error, Result};
use crate::fanout::PublishRequest;
use crate::media::EncodeSettings;
use crate::retry::with_retry;
use crate::seedbox::Seedbox;
use crate::shortener::shorten_or_keep;
use crate::types::{Event, ReleaseUnit, UnitId, UnitKind, UnitStatus};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// How one episode unit is processed
#[derive(Clone, Debug)]
pub(crate) struct UnitOptions {
    /// Push the encoded file to the seedbox
    pub(crate) upload_seedbox: bool,
    /// Publish to torrent sites
    pub(crate) publish: bool,
    /// Deinterlace while encoding
    pub(crate) deinterlace: bool,
    /// Encoder tuning of the anime
    pub(crate) profile: EncodeProfile,
}

/// Whether `unit` already completed `stage`
pub(crate) fn reached(unit: &ReleaseUnit, stage: UnitStatus) -> bool {
    match (unit.completed_stage.and_then(|s| s.rank()), stage.rank()) {
        (Some(done), Some(stage)) => done >= stage,
        _ => false,
    }
}

impl Coordinator {
    /// Drive an episode unit from its current stage to `Finished`
    ///
    /// On error the unit is moved to `Error` and the error is returned.
    pub(crate) async fn run_unit(&self, id: UnitId, options: &UnitOptions) -> Result<()> {
        let mut unit = self
            .db
            .get_unit(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("unit {}", id)))?;

        match self.run_episode_stages(&mut unit, options).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail_unit(&unit, &e).await;
                Err(e)
            }
        }
    }

    async fn run_episode_stages(&self, unit: &mut ReleaseUnit, options: &UnitOptions) -> Result<()> {
        let encoded = if reached(unit, UnitStatus::Encoding) {
            unit.local_path
                .clone()
                .ok_or_else(|| Error::NotFound(format!("encoded file of unit {}", unit.id)))?
        } else {
            self.advance(unit, UnitStatus::Encoding).await?;
            let output = self.encode(unit, options).await?;
            self.checkpoint(unit, UnitStatus::Encoding).await?;
            output
        };

        if !reached(unit, UnitStatus::GeneratingScreenshots) {
            self.advance(unit, UnitStatus::GeneratingScreenshots).await?;
            if let Err(e) = self.store_screenshots(unit, &encoded).await {
                warn!(unit_id = %unit.id, error = %e, "Screenshot generation failed, continuing");
                self.db
                    .set_unit_error_message(unit.id, Some(&e.to_string()))
                    .await?;
                self.emit_event(Event::ScreenshotsFailed {
                    id: unit.id,
                    error: e.to_string(),
                });
            }
            self.checkpoint(unit, UnitStatus::GeneratingScreenshots).await?;
        }

        if !reached(unit, UnitStatus::UploadingToSeedbox) {
            self.advance(unit, UnitStatus::UploadingToSeedbox).await?;
            match (&self.publishing.seedbox, options.upload_seedbox) {
                (Some(seedbox), true) => self.seed_episode(unit, seedbox.as_ref(), &encoded).await?,
                (None, true) => warn!(unit_id = %unit.id, "Seedbox upload requested but no seedbox is configured"),
                (_, false) => debug!(unit_id = %unit.id, "Seedbox upload not requested"),
            }
            self.checkpoint(unit, UnitStatus::UploadingToSeedbox).await?;
        }

        if !reached(unit, UnitStatus::UploadingToTorrentSites) {
            self.advance(unit, UnitStatus::UploadingToTorrentSites).await?;
            if options.publish {
                let screenshot_urls = self.screenshot_urls(unit).await?;
                let records = self
                    .publishing
                    .fanout
                    .publish(&PublishRequest {
                        unit,
                        content: &encoded,
                        screenshot_urls: &screenshot_urls,
                    })
                    .await?;
                debug!(unit_id = %unit.id, records = records.len(), "Fanout finished");
            } else {
                debug!(unit_id = %unit.id, "Publishing to torrent sites not requested");
            }
            self.checkpoint(unit, UnitStatus::UploadingToTorrentSites).await?;
        }

        self.finish(unit).await
    }

    async fn encode(&self, unit: &mut ReleaseUnit, options: &UnitOptions) -> Result<PathBuf> {
        let source = unit
            .source_path
            .clone()
            .ok_or_else(|| Error::NotFound(format!("source file of unit {}", unit.id)))?;
        let output = self
            .config
            .pipeline
            .library_dir
            .join(&unit.public_id)
            .join(&unit.file_name);
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let settings = EncodeSettings {
            resolution: unit.resolution,
            subtype: unit.subtype,
            deinterlace: options.deinterlace,
            profile: options.profile.clone(),
        };
        info!(
            unit_id = %unit.id,
            encoder = self.media.transcoder.name(),
            resolution = %unit.resolution,
            "Encoding"
        );
        let size = self
            .media
            .transcoder
            .encode(&source, &output, &settings)
            .await?;

        self.db.set_unit_encoded(unit.id, &output, size).await?;
        unit.local_path = Some(output.clone());
        unit.encoded_size = size;
        Ok(output)
    }

    async fn store_screenshots(&self, unit: &ReleaseUnit, video: &Path) -> Result<usize> {
        let shots = self
            .media
            .screenshots
            .generate(video, unit.subtype, self.config.pipeline.screenshot_count)
            .await?;

        let dir = self
            .config
            .pipeline
            .library_dir
            .join("screenshots")
            .join(&unit.public_id);
        tokio::fs::create_dir_all(&dir).await?;

        for shot in &shots {
            let path = dir.join(&shot.file_name);
            tokio::fs::write(&path, &shot.data).await?;
            self.db.insert_screenshot(unit.id, &shot.file_name, &path).await?;
        }
        debug!(unit_id = %unit.id, count = shots.len(), "Stored screenshots");
        Ok(shots.len())
    }

    /// Public URLs of a unit's screenshots
    pub(crate) async fn screenshot_urls(&self, unit: &ReleaseUnit) -> Result<Vec<String>> {
        Ok(self
            .db
            .list_screenshots(unit.id)
            .await?
            .iter()
            .map(|s| self.screenshot_url(&unit.public_id, &s.file_name))
            .collect())
    }

    /// Build the seedbox torrent of `content` with every tracker
    pub(crate) async fn seedbox_torrent(&self, unit: &ReleaseUnit, content: &Path) -> Result<Vec<u8>> {
        let path = self
            .config
            .pipeline
            .library_dir
            .join("torrents")
            .join(&unit.public_id)
            .join("seedbox.torrent");
        let meta = self
            .media
            .torrent_maker
            .create(content, &path, &self.config.all_trackers())
            .await?;
        self.db.set_unit_seedbox_torrent(unit.id, &path).await?;
        Ok(meta.bytes)
    }

    async fn seed_episode(&self, unit: &ReleaseUnit, seedbox: &dyn Seedbox, encoded: &Path) -> Result<()> {
        let torrent = self.seedbox_torrent(unit, encoded).await?;
        let torrent_name = format!("{}.torrent", unit.file_name);

        with_retry(&self.config.retry, || seedbox.upload_file(encoded, &unit.file_name)).await?;
        with_retry(&self.config.retry, || seedbox.add_torrent(&torrent_name, &torrent)).await?;
        info!(unit_id = %unit.id, "Seeding from seedbox");
        Ok(())
    }

    /// Move `unit` forward to `to`, unless it is already there
    pub(crate) async fn advance(&self, unit: &mut ReleaseUnit, to: UnitStatus) -> Result<()> {
        if unit.status == to {
            return Ok(());
        }
        self.db.update_unit_status(unit.id, unit.status, to).await?;
        unit.status = to;
        debug!(unit_id = %unit.id, status = to.as_str(), "Unit advanced");
        self.emit_event(Event::StatusChanged { id: unit.id, status: to });
        Ok(())
    }

    /// Record that `unit` completed `stage`
    pub(crate) async fn checkpoint(&self, unit: &mut ReleaseUnit, stage: UnitStatus) -> Result<()> {
        self.db.set_completed_stage(unit.id, stage).await?;
        unit.completed_stage = Some(stage);
        Ok(())
    }

    /// Stamp `unit` finished, then shorten its links
    pub(crate) async fn finish(&self, unit: &mut ReleaseUnit) -> Result<()> {
        let at = Utc::now();
        self.db.finish_unit(unit.id, unit.status, at).await?;
        unit.status = UnitStatus::Finished;
        unit.published_at = Some(at);

        info!(unit_id = %unit.id, name = %unit.file_name, "Published");
        self.emit_event(Event::StatusChanged {
            id: unit.id,
            status: UnitStatus::Finished,
        });
        self.emit_event(Event::Published { id: unit.id, at });

        self.shorten_links(unit).await;
        Ok(())
    }

    /// Best-effort shortening of a unit's public links
    pub(crate) async fn shorten_links(&self, unit: &mut ReleaseUnit) {
        let links = &unit.links;
        let present: Vec<(usize, String)> = [
            &links.watch_url,
            &links.download_url,
            &links.torrent_url,
            &links.magnet_url,
        ]
        .into_iter()
        .enumerate()
        .filter_map(|(slot, url)| url.clone().map(|url| (slot, url)))
        .collect();
        if present.is_empty() {
            return;
        }

        let urls: Vec<String> = present.iter().map(|(_, url)| url.clone()).collect();
        let Some(short) = shorten_or_keep(self.publishing.shortener.as_deref(), &urls).await else {
            return;
        };

        let mut links = unit.links.clone();
        for ((slot, _), short) in present.iter().zip(short) {
            let target = match slot {
                0 => &mut links.short_watch_url,
                1 => &mut links.short_download_url,
                2 => &mut links.short_torrent_url,
                _ => &mut links.short_magnet_url,
            };
            *target = Some(short);
        }

        match self.db.set_unit_links(unit.id, &links).await {
            Ok(()) => unit.links = links,
            Err(e) => warn!(unit_id = %unit.id, error = %e, "Failed to store short links"),
        }
    }

    /// Move `unit` to `Error` with the detail of `error`
    pub(crate) async fn fail_unit(&self, unit: &ReleaseUnit, error: &Error) {
        let message = error.to_string();
        error!(unit_id = %unit.id, status = unit.status.as_str(), error = %message, "Unit failed");

        match self.db.fail_unit(unit.id, &message).await {
            Ok(true) => self.emit_event(Event::UnitFailed {
                id: unit.id,
                error: message,
            }),
            Ok(false) => debug!(unit_id = %unit.id, "Unit was already terminal"),
            Err(e) => error!(unit_id = %unit.id, error = %e, "Failed to record unit failure"),
        }
    }

    /// Re-run a failed unit from after its last completed stage
    ///
    /// Only units in `Error` can be resumed; completed stages are skipped.
    /// Episodes reuse their feed's current upload flags and are published
    /// to torrent sites when the feed publishes everything or when an
    /// earlier run already started publishing them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] when the unit is not in `Error`,
    /// or the error the re-run stopped with.
    pub async fn resume_unit(&self, id: UnitId) -> Result<()> {
        let unit = self
            .db
            .get_unit(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("unit {}", id)))?;
        let stage = unit.completed_stage.unwrap_or(UnitStatus::Discovered);

        if unit.status != UnitStatus::Error || !self.db.requeue_unit(id, stage).await? {
            return Err(Error::InvalidTransition {
                id,
                from: unit.status,
                to: stage,
            });
        }
        info!(unit_id = %id, stage = stage.as_str(), "Resuming unit");
        self.emit_event(Event::StatusChanged { id, status: stage });

        let _permit = self
            .unit_slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::ShuttingDown)?;

        match unit.kind {
            UnitKind::Batch => self.run_batch(id).await,
            UnitKind::Episode => {
                let options = self.resume_options(&unit).await?;
                self.run_unit(id, &options).await?;
                if let Some(source) = &unit.source_path {
                    self.release_source(id, source).await?;
                }
                Ok(())
            }
        }
    }

    async fn resume_options(&self, unit: &ReleaseUnit) -> Result<UnitOptions> {
        let feed = match unit.feed_id {
            Some(feed_id) => self.db.get_feed(feed_id).await?,
            None => None,
        };
        let anime = self
            .db
            .get_anime(unit.anime_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("anime {}", unit.anime_id)))?;
        let publishing_started = !self.db.list_upload_records(unit.id).await?.is_empty();

        Ok(UnitOptions {
            upload_seedbox: feed.as_ref().is_some_and(|f| f.upload_seedbox),
            publish: publishing_started || feed.as_ref().is_some_and(|f| f.upload_torrent),
            deinterlace: feed.as_ref().is_some_and(|f| f.deinterlace),
            profile: anime.encode,
        })
    }

    /// Delete a resumed unit's source unless another failed unit still needs it
    async fn release_source(&self, id: UnitId, source: &Path) -> Result<()> {
        let needed = self
            .db
            .list_units_by_status(UnitStatus::Error)
            .await?
            .iter()
            .any(|u| u.source_path.as_deref() == Some(source) && !reached(u, UnitStatus::Encoding));
        if needed {
            return Ok(());
        }

        remove_download(source, &self.config.pipeline.download_dir).await;
        self.db.set_unit_source(id, None).await
    }
}
