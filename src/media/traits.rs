//! Traits and types for media collaborators

use crate::config::EncodeProfile;
use crate::types::{Resolution, SubType};
use async_trait::async_trait;
use std::path::Path;

/// What the pipeline needs to know about a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaInfo {
    /// Whether the file carries text subtitle tracks
    pub has_text_tracks: bool,
    /// Number of video frames
    pub frame_count: u64,
}

impl MediaInfo {
    /// Subtitle delivery for encodes of this source
    pub fn subtype(&self) -> SubType {
        if self.has_text_tracks {
            SubType::Softsubs
        } else {
            SubType::Hardsubs
        }
    }
}

/// Settings of one encode
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    /// Target resolution
    pub resolution: Resolution,
    /// Softsubs keep subtitle streams (MKV); hardsubs produce MP4
    pub subtype: SubType,
    /// Deinterlace and force 23.976 fps
    pub deinterlace: bool,
    /// Per-anime encoder tuning
    pub profile: EncodeProfile,
}

/// One extracted screenshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    /// File name, e.g. `00.jpg`
    pub file_name: String,
    /// JPEG data
    pub data: Vec<u8>,
}

/// A created `.torrent` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentMeta {
    /// Bencoded metainfo
    pub bytes: Vec<u8>,
    /// Magnet URI of the torrent
    pub magnet: String,
    /// Lowercase hex info-hash
    pub info_hash: String,
}

/// Video probing and encoding
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Inspect a source file
    async fn probe(&self, input: &Path) -> crate::Result<MediaInfo>;

    /// Encode `input` into `output`, returning the output size in bytes
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Transcode`] when the encoder fails or leaves
    /// no output behind.
    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        settings: &EncodeSettings,
    ) -> crate::Result<u64>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Screenshot extraction
#[async_trait]
pub trait ScreenshotGenerator: Send + Sync {
    /// Extract `count` screenshots from distinct random frames, in frame order
    ///
    /// Softsubs videos have their subtitles rendered into the images.
    async fn generate(
        &self,
        video: &Path,
        subtype: SubType,
        count: usize,
    ) -> crate::Result<Vec<Screenshot>>;
}

/// `.torrent` creation
#[async_trait]
pub trait TorrentMaker: Send + Sync {
    /// Create a torrent of `input` (file or directory) at `output`
    ///
    /// Each announce URL is its own tier, in the given order.
    async fn create(
        &self,
        input: &Path,
        output: &Path,
        announce: &[String],
    ) -> crate::Result<TorrentMeta>;
}
