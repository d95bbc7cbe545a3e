use super::*;
use crate::config::{FeedKind, WatcherKind};
use crate::db::UpsertFeedParams;
use crate::test_helpers::{FakeFeed, idle_collaborators, insert_feed_for, setup_db, test_config};

struct Fixture {
    coordinator: Arc<Coordinator>,
    feed: Arc<FakeFeed>,
    _dir: tempfile::TempDir,
}

async fn fixture(watchers: Vec<WatcherConfig>) -> Fixture {
    let (db, dir) = setup_db().await;
    let mut config = test_config(dir.path());
    config.watchers = watchers;
    let feed = Arc::new(FakeFeed::default());
    let coordinator =
        Coordinator::with_collaborators(config, db, idle_collaborators(feed.clone())).unwrap();
    Fixture {
        coordinator: Arc::new(coordinator),
        feed,
        _dir: dir,
    }
}

fn row(enabled: bool, last_check: Option<i64>) -> FeedRow {
    FeedRow {
        id: 7,
        kind: FeedKind::NyaaRss.as_str().to_string(),
        url: "https://nyaa.si/?page=rss&q=show".to_string(),
        anime_id: 1,
        upload_seedbox: false,
        upload_torrent: true,
        upload_last_episode: false,
        bluray: false,
        uncensored: false,
        deinterlace: false,
        extra_tags: None,
        check_interval_secs: 900,
        enabled,
        snapshot: None,
        last_check,
        created_at: 0,
    }
}

/// Run the scheduler briefly, then shut it down
async fn run_for(coordinator: &Arc<Coordinator>, duration: Duration) {
    let token = CancellationToken::new();
    let scheduler = Scheduler::new(coordinator.clone()).with_tick(Duration::from_millis(10));
    let handle = tokio::spawn(scheduler.run(token.clone()));
    tokio::time::sleep(duration).await;
    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

#[test]
fn never_checked_source_is_due() {
    assert!(is_due(None, Duration::from_secs(900), 1_000));
}

#[test]
fn source_is_due_once_its_interval_elapsed() {
    let interval = Duration::from_secs(60);
    assert!(!is_due(Some(100), interval, 159));
    assert!(is_due(Some(100), interval, 160));
}

#[test]
fn clock_going_backwards_makes_source_due() {
    assert!(is_due(Some(2_000), Duration::from_secs(60), 1_000));
}

#[test]
fn watcher_triggered_feed_is_due_regardless_of_interval() {
    let feed = row(true, Some(1_000));
    assert!(!feed_is_due(&feed, &[], 1_010));
    assert!(feed_is_due(&feed, &[7], 1_010));
}

#[test]
fn disabled_feed_is_never_due() {
    let feed = row(false, None);
    assert!(!feed_is_due(&feed, &[7], 1_000));
}

#[tokio::test]
async fn due_feed_is_checked_once_per_interval() {
    let f = fixture(vec![]).await;
    let feed_id = insert_feed_for(&f.coordinator.db, "Show", "https://nyaa.si/?page=rss&q=show").await;

    run_for(&f.coordinator, Duration::from_millis(200)).await;

    assert_eq!(f.feed.fetches(), 1);
    let row = f.coordinator.db.get_feed(feed_id).await.unwrap().unwrap();
    assert!(row.last_check.is_some());
}

#[tokio::test]
async fn disabled_feed_is_not_checked() {
    let f = fixture(vec![]).await;
    let anime = f
        .coordinator
        .db
        .get_or_create_anime("Show", &[], &Default::default())
        .await
        .unwrap();
    f.coordinator
        .db
        .upsert_feed(UpsertFeedParams {
            kind: FeedKind::NyaaRss,
            url: "https://nyaa.si/?page=rss&q=show",
            anime_id: anime.id,
            upload_seedbox: false,
            upload_torrent: true,
            upload_last_episode: false,
            bluray: false,
            uncensored: false,
            deinterlace: false,
            extra_tags: None,
            check_interval_secs: 900,
            enabled: false,
        })
        .await
        .unwrap();

    run_for(&f.coordinator, Duration::from_millis(100)).await;

    assert_eq!(f.feed.fetches(), 0);
}

#[tokio::test]
async fn failing_feed_is_not_retried_before_its_interval() {
    let f = fixture(vec![]).await;
    insert_feed_for(&f.coordinator.db, "Show", "https://nyaa.si/?page=rss&q=show").await;
    f.feed.set_failing(true);

    run_for(&f.coordinator, Duration::from_millis(200)).await;

    assert_eq!(f.feed.fetches(), 1);
}

#[tokio::test]
async fn due_watcher_is_polled_and_stamped() {
    let url = "https://subsplease.org/api/?f=latest&tz=UTC";
    let f = fixture(vec![WatcherConfig {
        kind: WatcherKind::SubsPlease,
        url: url.to_string(),
        add_missing: false,
        check_interval: Duration::from_secs(300),
        enabled: true,
    }])
    .await;
    let mut rx = f.coordinator.subscribe();

    run_for(&f.coordinator, Duration::from_millis(100)).await;

    assert!(f.coordinator.db.get_watcher_last_check(url).await.unwrap().is_some());
    let mut polls = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, crate::types::Event::WatcherChecked { .. }) {
            polls += 1;
        }
    }
    assert_eq!(polls, 1);
}

#[tokio::test]
async fn cancelled_scheduler_stops_promptly() {
    let f = fixture(vec![]).await;
    let token = CancellationToken::new();
    token.cancel();

    tokio::time::timeout(
        Duration::from_secs(1),
        Scheduler::new(f.coordinator.clone()).run(token),
    )
    .await
    .unwrap();
}

#[test]
fn feed_claim_is_exclusive_until_dropped() {
    let in_flight = InFlight::default();
    let claim = in_flight.claim(7).unwrap();
    assert!(in_flight.claim(7).is_none());
    assert!(in_flight.claim(8).is_some());

    drop(claim);
    assert!(in_flight.claim(7).is_some());
}

#[tokio::test]
async fn feed_claim_is_released_when_the_check_panics() {
    let in_flight = InFlight::default();
    let claim = in_flight.claim(7).unwrap();

    let result = tokio::spawn(async move {
        let _claim = claim;
        panic!("feed check blew up");
    })
    .await;

    assert!(result.unwrap_err().is_panic());
    assert!(in_flight.claim(7).is_some());
}

#[tokio::test]
async fn feed_claim_is_released_when_the_check_is_aborted() {
    let in_flight = InFlight::default();
    let claim = in_flight.claim(7).unwrap();

    let handle = tokio::spawn(async move {
        let _claim = claim;
        std::future::pending::<()>().await;
    });
    tokio::task::yield_now().await;
    assert!(in_flight.claim(7).is_none());

    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
    assert!(in_flight.claim(7).is_some());
}
