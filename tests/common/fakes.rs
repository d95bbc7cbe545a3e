//! Stand-ins for the external media tools

use async_trait::async_trait;
use release_relay::media::{
    EncodeSettings, MediaInfo, Screenshot, ScreenshotGenerator, TorrentMaker, TorrentMeta,
    Transcoder,
};
use release_relay::{Result, SubType};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Transcoder that writes a marker file instead of encoding
#[derive(Default)]
pub struct StubTranscoder {
    pub encodes: AtomicUsize,
}

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn probe(&self, _input: &Path) -> Result<MediaInfo> {
        Ok(MediaInfo {
            has_text_tracks: true,
            frame_count: 34_000,
        })
    }

    async fn encode(&self, _input: &Path, output: &Path, settings: &EncodeSettings) -> Result<u64> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        let data = format!("{} {:?}", settings.resolution, settings.subtype);
        tokio::fs::write(output, data.as_bytes()).await?;
        Ok(data.len() as u64)
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Screenshot generator returning placeholder JPEGs
pub struct StubScreenshots;

#[async_trait]
impl ScreenshotGenerator for StubScreenshots {
    async fn generate(&self, _video: &Path, _subtype: SubType, count: usize) -> Result<Vec<Screenshot>> {
        Ok((0..count)
            .map(|i| Screenshot {
                file_name: format!("{:02}.jpg", i),
                data: vec![0xff, 0xd8, 0xff, i as u8],
            })
            .collect())
    }
}

/// Torrent maker writing placeholder metainfo
#[derive(Default)]
pub struct StubTorrentMaker {
    pub created: AtomicUsize,
}

#[async_trait]
impl TorrentMaker for StubTorrentMaker {
    async fn create(&self, input: &Path, output: &Path, _announce: &[String]) -> Result<TorrentMeta> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = format!("d4:infod4:name{}:{}ee", input.as_os_str().len(), input.display())
            .into_bytes();
        tokio::fs::write(output, &bytes).await?;

        let info_hash = format!("{:040x}", n);
        Ok(TorrentMeta {
            bytes,
            magnet: format!("magnet:?xt=urn:btih:{}", info_hash),
            info_hash,
        })
    }
}
