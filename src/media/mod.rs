//! Media collaborators: probing, encoding, screenshots and torrent creation
//!
//! The pipeline only talks to these through traits, so the external tools
//! can be swapped or faked in tests.
//!
//! ## Architecture
//!
//! - [`Transcoder`]: probes a source for text subtitle tracks and frame count,
//!   then encodes it to one target resolution
//! - [`ScreenshotGenerator`]: extracts JPEG stills from distinct random frames
//! - [`TorrentMaker`]: creates a `.torrent` (one announce tier per tracker)
//!
//! Implementations:
//!
//! - [`FfmpegCli`]: external `ffmpeg` and `ffprobe`
//! - [`ImdlTorrentMaker`]: external `imdl`
//! - [`NoOpMedia`]: stand-in when the tools are missing
//!
//! ## Usage
//!
//! ```no_run
//! use release_relay::config::EncodeProfile;
//! use release_relay::media::{EncodeSettings, FfmpegCli, Transcoder};
//! use release_relay::types::Resolution;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ffmpeg = FfmpegCli::from_path().expect("ffmpeg not found");
//!     let input = Path::new("Show - 01.mkv");
//!     let info = ffmpeg.probe(input).await?;
//!
//!     let settings = EncodeSettings {
//!         resolution: Resolution::P720,
//!         subtype: info.subtype(),
//!         deinterlace: false,
//!         profile: EncodeProfile::default(),
//!     };
//!     let size = ffmpeg.encode(input, Path::new("out.mkv"), &settings).await?;
//!     println!("encoded {} bytes", size);
//!     Ok(())
//! }
//! ```

mod ffmpeg;
mod imdl;
mod noop;
pub(crate) mod parser;
mod traits;

pub use ffmpeg::FfmpegCli;
pub use imdl::ImdlTorrentMaker;
pub use noop::NoOpMedia;
pub use traits::{
    EncodeSettings, MediaInfo, Screenshot, ScreenshotGenerator, TorrentMaker, TorrentMeta,
    Transcoder,
};
