use super::*;

async fn two_finished_episodes(h: &Harness) {
    h.feed.set_entries(&[
        "[SubsPlease] Show - 01 (1080p).mkv",
        "[SubsPlease] Show - 02 (1080p).mkv",
    ]);
    let report = h.coordinator.check_feed(h.feed_id).await.unwrap();
    assert_eq!(report.published.len(), 2);
}

#[tokio::test]
async fn batch_bundles_every_finished_episode() {
    let h = harness(Setup::default()).await;
    two_finished_episodes(&h).await;

    let id = h
        .coordinator
        .create_batch(h.anime_id().await, Resolution::P1080)
        .await
        .unwrap();

    let batch = h.unit(id).await;
    assert_eq!(batch.kind, UnitKind::Batch);
    assert_eq!(batch.status, UnitStatus::Discovered);
    assert_eq!(batch.file_name, "[SSA] Show [1080p][Batch]");
    assert_eq!(batch.release_group, "SubsPlease");
    assert!(batch.links.torrent_url.unwrap().contains("/download/batch/torrent/"));

    let members = h.coordinator.db.list_batch_members(id).await.unwrap();
    let names: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["Show - 01", "Show - 02"]);
}

#[tokio::test]
async fn published_batch_reaches_seedbox_then_destinations() {
    let h = harness(Setup::default()).await;
    two_finished_episodes(&h).await;
    let episode_uploads = h.destination.calls();

    let id = h
        .coordinator
        .create_batch(h.anime_id().await, Resolution::P1080)
        .await
        .unwrap();
    h.coordinator.publish_batch(id).await.unwrap();

    let batch = h.unit(id).await;
    assert_eq!(batch.status, UnitStatus::Finished);
    assert!(batch.seedbox_torrent.is_some());
    assert!(
        h.seedbox
            .torrents()
            .contains(&"[SSA] Show [1080p][Batch].torrent".to_string())
    );

    assert_eq!(h.destination.calls(), episode_uploads + 1);
    assert!(h.destination.last_was_batch());
    assert_eq!(
        h.destination.last_screenshot_count(),
        h.coordinator.config.pipeline.batch_screenshot_count
    );
    assert_eq!(h.coordinator.db.list_upload_records(id).await.unwrap().len(), 1);

    let workspace = h.coordinator.config.pipeline.batch_dir.join(&batch.public_id);
    assert!(!workspace.exists());
}

#[tokio::test]
async fn unacknowledged_batch_never_reaches_destinations() {
    let h = harness(Setup::default()).await;
    two_finished_episodes(&h).await;
    let episode_uploads = h.destination.calls();

    let id = h
        .coordinator
        .create_batch(h.anime_id().await, Resolution::P1080)
        .await
        .unwrap();
    h.seedbox.set_rejecting(true);

    let err = h.coordinator.publish_batch(id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Publish(PublishError::SeedboxConfirmation { .. })
    ));

    let batch = h.unit(id).await;
    assert_eq!(batch.status, UnitStatus::Error);
    assert_eq!(batch.completed_stage, Some(UnitStatus::Downloaded));
    assert_eq!(h.destination.calls(), episode_uploads);
    assert!(h.coordinator.db.list_upload_records(id).await.unwrap().is_empty());

    // Resumable once the seedbox acknowledges
    h.seedbox.set_rejecting(false);
    h.coordinator.resume_unit(id).await.unwrap();
    assert_eq!(h.unit(id).await.status, UnitStatus::Finished);
    assert_eq!(h.destination.calls(), episode_uploads + 1);
}

#[tokio::test]
async fn batch_without_finished_episodes_is_not_created() {
    let h = harness(Setup::default()).await;

    let err = h
        .coordinator
        .create_batch(h.anime_id().await, Resolution::P720)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn episodes_cannot_be_published_as_batches() {
    let h = harness(Setup::default()).await;
    h.feed.set_entries(&["[SubsPlease] Show - 01 (1080p).mkv"]);
    let report = h.coordinator.check_feed(h.feed_id).await.unwrap();

    let err = h
        .coordinator
        .publish_batch(report.published[0])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotSupported(_)));
}
