//! Batch creation and publishing.
//!
//! A batch bundles the finished episodes of one anime at one resolution.
//! Its torrent is built from a temporary folder of the encoded files and
//! must be acknowledged by the seedbox before any destination sees it.

use super::unit::reached;
use super::{Coordinator, new_public_id};
use crate::db::NewReleaseUnit;
use crate::error::{Error, Result};
use crate::fanout::PublishRequest;
use crate::parser::{ExtraTags, batch_name};
use crate::retry::with_retry;
use crate::types::{Event, ReleaseUnit, Resolution, UnitId, UnitKind, UnitStatus};
use rand::seq::SliceRandom;
use std::path::Path;
use tracing::{debug, info, warn};

impl Coordinator {
    /// Create a batch of every finished episode of an anime at `resolution`
    ///
    /// Release groups of the members are joined with `", "` in episode
    /// order; subtype and source flags follow the first episode.
    pub async fn create_batch(&self, anime_id: i64, resolution: Resolution) -> Result<UnitId> {
        let anime = self
            .db
            .get_anime(anime_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("anime {}", anime_id)))?;
        let members = self.db.list_finished_episodes(anime_id, resolution).await?;
        let first = members.first().ok_or_else(|| {
            Error::NotFound(format!("finished {} episodes of {}", resolution, anime.title))
        })?;

        let mut groups: Vec<&str> = Vec::new();
        for member in &members {
            if !groups.contains(&member.release_group.as_str()) {
                groups.push(&member.release_group);
            }
        }
        let release_group = groups.join(", ");

        let name = batch_name(
            &self.config.pipeline.publisher_tag,
            &anime.title,
            resolution,
            ExtraTags {
                others: None,
                uncensored: first.uncensored,
                bluray: first.bluray,
            },
        );
        let public_id = new_public_id();
        let links = self.batch_links(&public_id, &name);

        let id = self
            .db
            .insert_unit(NewReleaseUnit {
                public_id: &public_id,
                kind: UnitKind::Batch,
                anime_id,
                feed_id: None,
                name: &anime.title,
                original_title: &name,
                file_name: &name,
                resolution,
                subtype: first.subtype,
                uncensored: first.uncensored,
                bluray: first.bluray,
                release_group: &release_group,
                source_path: None,
                source_size: members.iter().map(|m| m.encoded_size).sum(),
                links: &links,
            })
            .await?;
        for member in &members {
            self.db.add_batch_member(id, member.id).await?;
        }

        info!(unit_id = %id, name = %name, episodes = members.len(), "Created batch");
        self.emit_event(Event::UnitCreated {
            id,
            name,
            resolution,
        });
        Ok(id)
    }

    /// Publish a batch: seedbox first, then every destination
    ///
    /// # Errors
    ///
    /// Fails (and moves the batch to `Error`) when the files cannot be
    /// assembled, no seedbox is configured or the seedbox does not
    /// acknowledge the torrent. Destination problems after the
    /// acknowledgement are recorded on the batch, which still finishes.
    pub async fn publish_batch(&self, id: UnitId) -> Result<()> {
        let _permit = self
            .unit_slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::ShuttingDown)?;
        self.run_batch(id).await
    }

    pub(crate) async fn run_batch(&self, id: UnitId) -> Result<()> {
        let mut unit = self
            .db
            .get_unit(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("unit {}", id)))?;
        if unit.kind != UnitKind::Batch {
            return Err(Error::NotSupported(format!("unit {} is not a batch", id)));
        }

        let workspace = self.config.pipeline.batch_dir.join(&unit.public_id);
        let result = self.run_batch_stages(&mut unit, &workspace).await;

        match tokio::fs::remove_dir_all(&workspace).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(unit_id = %id, error = %e, "Failed to remove batch workspace"),
        }

        if let Err(e) = &result {
            self.fail_unit(&unit, e).await;
        }
        result
    }

    async fn run_batch_stages(&self, unit: &mut ReleaseUnit, workspace: &Path) -> Result<()> {
        let members = self.db.list_batch_members(unit.id).await?;
        if members.is_empty() {
            return Err(Error::NotFound(format!("members of batch {}", unit.id)));
        }

        let content = workspace.join(&unit.file_name);
        assemble(&members, &content).await?;
        if !reached(unit, UnitStatus::Downloaded) {
            self.advance(unit, UnitStatus::Downloaded).await?;
            self.checkpoint(unit, UnitStatus::Downloaded).await?;
        }

        if !reached(unit, UnitStatus::UploadingToSeedbox) {
            self.advance(unit, UnitStatus::UploadingToSeedbox).await?;
            let seedbox = self
                .publishing
                .seedbox
                .as_ref()
                .ok_or_else(|| Error::config("seedbox", "publishing a batch requires a seedbox"))?;

            let torrent = self.seedbox_torrent(unit, &content).await?;
            let torrent_name = format!("{}.torrent", unit.file_name);
            with_retry(&self.config.retry, || seedbox.add_torrent(&torrent_name, &torrent)).await?;
            info!(unit_id = %unit.id, "Seedbox acknowledged batch");

            self.checkpoint(unit, UnitStatus::UploadingToSeedbox).await?;
        }

        if !reached(unit, UnitStatus::UploadingToTorrentSites) {
            self.advance(unit, UnitStatus::UploadingToTorrentSites).await?;
            let screenshot_urls = self.batch_screenshots(&members).await?;
            let published = self
                .publishing
                .fanout
                .publish(&PublishRequest {
                    unit,
                    content: &content,
                    screenshot_urls: &screenshot_urls,
                })
                .await;
            if let Err(e) = published {
                warn!(unit_id = %unit.id, error = %e, "Batch fanout failed after seedbox acknowledgement");
                self.db
                    .set_unit_error_message(unit.id, Some(&e.to_string()))
                    .await?;
            }
            self.checkpoint(unit, UnitStatus::UploadingToTorrentSites).await?;
        }

        self.finish(unit).await
    }

    /// Up to `batch_screenshot_count` distinct random screenshots of the members
    async fn batch_screenshots(&self, members: &[ReleaseUnit]) -> Result<Vec<String>> {
        let mut urls = Vec::new();
        for member in members {
            urls.extend(self.screenshot_urls(member).await?);
        }

        let count = self.config.pipeline.batch_screenshot_count;
        let chosen: Vec<String> = urls
            .choose_multiple(&mut rand::thread_rng(), count)
            .cloned()
            .collect();
        debug!(available = urls.len(), chosen = chosen.len(), "Picked batch screenshots");
        Ok(chosen)
    }
}

/// Gather the members' encoded files into `dir`
///
/// Files are hard-linked where possible and copied otherwise; files already
/// present are kept.
async fn assemble(members: &[ReleaseUnit], dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    for member in members {
        let source = member
            .local_path
            .as_ref()
            .ok_or_else(|| Error::NotFound(format!("encoded file of {}", member.file_name)))?;
        let target = dir.join(&member.file_name);
        if tokio::fs::try_exists(&target).await? {
            continue;
        }
        if tokio::fs::hard_link(source, &target).await.is_err() {
            tokio::fs::copy(source, &target).await?;
        }
    }
    Ok(())
}
