//! Mock services and configuration for pipeline tests

use release_relay::config::{DestinationConfig, FeedConfig};
use release_relay::{Config, DestinationKind, FeedKind, Resolution};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Info-hash of the torrent the mock client serves
pub const HASH: &str = "c12fe1c06bba254a9dc9f519b335aa7c1367a88a";

/// File the mock client reports as downloaded
pub const SOURCE_FILE: &str = "[SubsPlease] Show - 01 (1080p).mkv";

/// RSS 2.0 document with one item per `(title, link)`
pub fn rss_feed(items: &[(&str, String)]) -> String {
    let items: String = items
        .iter()
        .map(|(title, link)| format!("<item><title>{}</title><link>{}</link></item>", title, link))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Show</title><link>https://nyaa.si/</link><description>Show releases</description>{}</channel></rss>"#,
        items
    )
}

/// Serve an RSS feed at `/rss` whose single entry links to `/download/1001.torrent`
pub async fn mount_feed(server: &MockServer, title: &str) {
    let link = format!("{}/download/1001.torrent", server.uri());
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(rss_feed(&[(title, link)])),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/download/1001.torrent"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"d4:infod4:name1:xee".to_vec()))
        .mount(server)
        .await;
}

/// qBittorrent Web API that finishes every download instantly
pub async fn mount_qbittorrent(server: &MockServer, save_path: &Path) {
    let info = json!([{
        "hash": HASH,
        "name": SOURCE_FILE,
        "progress": 1.0,
        "state": "uploading",
        "save_path": save_path.display().to_string(),
        "total_size": 4096,
    }]);

    Mock::given(method("POST"))
        .and(path("/api/v2/torrents/add"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/torrents/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(info))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/torrents/addTrackers"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/torrents/files"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "name": SOURCE_FILE, "size": 4096 }])),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/torrents/delete"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

/// Config pointing every service at `server`, with one feed and one nyaa.si destination
pub fn pipeline_config(server: &MockServer, dir: &Path) -> Config {
    let mut config = Config::new("https://relay.example.org");
    config.pipeline.download_dir = dir.join("downloads");
    config.pipeline.library_dir = dir.join("library");
    config.pipeline.batch_dir = dir.join("batches");
    config.pipeline.poll_period = Duration::from_millis(10);
    config.pipeline.download_timeout = Duration::from_secs(10);
    config.pipeline.target_resolutions = vec![Resolution::P1080, Resolution::P720];
    config.torrent_client.url = server.uri();
    config.torrent_client.settle_delay = Duration::ZERO;
    config.retry.max_attempts = 3;
    config.retry.initial_delay = Duration::ZERO;
    config.retry.max_delay = Duration::ZERO;
    config.retry.jitter = false;
    config.persistence.database_path = dir.join("relay.db");

    config.destinations.push(DestinationConfig {
        kind: DestinationKind::NyaaSi,
        name: None,
        api_url: format!("{}/upload", server.uri()),
        api_key: "relay:secret".to_string(),
        tracker_group: None,
        enabled: true,
        timeout: Duration::from_secs(5),
        options: Default::default(),
    });
    config.feeds.push(FeedConfig {
        kind: FeedKind::NyaaRss,
        url: format!("{}/rss", server.uri()),
        anime: "Show".to_string(),
        alt_names: vec![],
        encode: Default::default(),
        check_interval: Duration::from_secs(900),
        upload_seedbox: false,
        upload_torrent: true,
        upload_last_episode: false,
        bluray: false,
        uncensored: false,
        deinterlace: false,
        extra_tags: None,
        enabled: true,
    });
    config
}
