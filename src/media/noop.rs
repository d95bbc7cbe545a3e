//! No-op media collaborators for hosts without the external tools

use super::traits::{
    EncodeSettings, MediaInfo, Screenshot, ScreenshotGenerator, TorrentMaker, TorrentMeta,
    Transcoder,
};
use crate::types::SubType;
use async_trait::async_trait;
use std::path::Path;

/// Stand-in used when `ffmpeg` or `imdl` cannot be found
///
/// Every operation returns `Error::NotSupported`. Units reaching a media
/// stage fail with that error and can be resumed once the tools are installed.
///
/// # Examples
///
/// ```
/// use release_relay::media::{NoOpMedia, Transcoder};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let media = NoOpMedia;
/// assert!(media.probe(Path::new("episode.mkv")).await.is_err());
/// # Ok(())
/// # }
/// ```
pub struct NoOpMedia;

fn unsupported(what: &str, tool: &str) -> crate::Error {
    crate::Error::NotSupported(format!(
        "{} requires the external {} binary in PATH",
        what, tool
    ))
}

#[async_trait]
impl Transcoder for NoOpMedia {
    async fn probe(&self, _input: &Path) -> crate::Result<MediaInfo> {
        Err(unsupported("Probing", "ffprobe"))
    }

    async fn encode(
        &self,
        _input: &Path,
        _output: &Path,
        _settings: &EncodeSettings,
    ) -> crate::Result<u64> {
        Err(unsupported("Encoding", "ffmpeg"))
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[async_trait]
impl ScreenshotGenerator for NoOpMedia {
    async fn generate(
        &self,
        _video: &Path,
        _subtype: SubType,
        _count: usize,
    ) -> crate::Result<Vec<Screenshot>> {
        Err(unsupported("Screenshot generation", "ffmpeg"))
    }
}

#[async_trait]
impl TorrentMaker for NoOpMedia {
    async fn create(
        &self,
        _input: &Path,
        _output: &Path,
        _announce: &[String],
    ) -> crate::Result<TorrentMeta> {
        Err(unsupported("Torrent creation", "imdl"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_operation_is_not_supported() {
        let media = NoOpMedia;
        assert!(matches!(
            media.probe(Path::new("a.mkv")).await,
            Err(crate::Error::NotSupported(_))
        ));
        assert!(matches!(
            media.generate(Path::new("a.mkv"), SubType::Softsubs, 6).await,
            Err(crate::Error::NotSupported(_))
        ));
        assert!(matches!(
            media.create(Path::new("a.mkv"), Path::new("a.torrent"), &[]).await,
            Err(crate::Error::NotSupported(_))
        ));
    }
}
