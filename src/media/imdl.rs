//! Torrent creation through the `imdl` (intermodal) CLI

use super::parser::{ExitStatus, parse_magnet_output};
use super::traits::{TorrentMaker, TorrentMeta};
use crate::torrent_client::magnet_info_hash;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// Creates `.torrent` files with the external `imdl` binary
pub struct ImdlTorrentMaker {
    binary_path: PathBuf,
}

impl ImdlTorrentMaker {
    /// Create a maker with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find `imdl` in PATH
    pub fn from_path() -> Option<Self> {
        which::which("imdl").ok().map(Self::new)
    }

    async fn run(&self, args: &[std::ffi::OsString]) -> crate::Result<std::process::Output> {
        Command::new(&self.binary_path)
            .args(args)
            .output()
            .await
            .map_err(|e| crate::Error::ExternalTool(format!("Failed to execute imdl: {}", e)))
    }
}

/// `imdl torrent create` arguments: the first tracker announces, every tracker is its own tier
pub(crate) fn create_args(input: &Path, output: &Path, announce: &[String]) -> Vec<std::ffi::OsString> {
    let mut args: Vec<std::ffi::OsString> = vec![
        "torrent".into(),
        "create".into(),
        "--force".into(),
        "--input".into(),
        input.as_os_str().to_owned(),
        "--output".into(),
        output.as_os_str().to_owned(),
    ];
    if let Some(first) = announce.first() {
        args.push("--announce".into());
        args.push(first.into());
    }
    for url in announce {
        args.push("--announce-tier".into());
        args.push(url.into());
    }
    args
}

#[async_trait]
impl TorrentMaker for ImdlTorrentMaker {
    async fn create(
        &self,
        input: &Path,
        output: &Path,
        announce: &[String],
    ) -> crate::Result<TorrentMeta> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let created = self.run(&create_args(input, output, announce)).await?;
        if !ExitStatus::from(created.status.success()).is_success() {
            return Err(crate::Error::ExternalTool(format!(
                "imdl torrent create failed: {}",
                String::from_utf8_lossy(&created.stderr).trim()
            )));
        }

        let linked = self
            .run(&[
                "torrent".into(),
                "link".into(),
                "--input".into(),
                output.as_os_str().to_owned(),
            ])
            .await?;
        let magnet = parse_magnet_output(&linked.stdout).ok_or_else(|| {
            crate::Error::ExternalTool(format!(
                "imdl torrent link produced no magnet: {}",
                String::from_utf8_lossy(&linked.stderr).trim()
            ))
        })?;
        let info_hash = magnet_info_hash(&magnet)?;
        let bytes = tokio::fs::read(output).await?;

        info!(torrent = %output.display(), info_hash = %info_hash, "Created torrent");
        Ok(TorrentMeta {
            bytes,
            magnet,
            info_hash,
        })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tracker_gets_its_own_tier() {
        let args = create_args(
            Path::new("/library/Show - 01.mkv"),
            Path::new("/library/Show - 01.mkv.torrent"),
            &["udp://a:1/announce".to_string(), "http://b/announce".to_string()],
        );
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let announce = args.iter().position(|a| a == "--announce").unwrap();
        assert_eq!(args[announce + 1], "udp://a:1/announce");
        let tiers: Vec<&String> = args
            .iter()
            .enumerate()
            .filter(|(i, _)| *i > 0 && args[i - 1] == "--announce-tier")
            .map(|(_, a)| a)
            .collect();
        assert_eq!(tiers, vec!["udp://a:1/announce", "http://b/announce"]);
    }

    #[test]
    fn no_trackers_means_no_announce() {
        let args = create_args(Path::new("in"), Path::new("out"), &[]);
        assert!(!args.iter().any(|a| a == "--announce"));
    }

    #[tokio::test]
    async fn missing_binary_is_an_external_tool_error() {
        let maker = ImdlTorrentMaker::new(PathBuf::from("/nonexistent/imdl-xyz"));
        let out = tempfile::tempdir().unwrap();
        let err = maker
            .create(Path::new("in.mkv"), &out.path().join("in.torrent"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::ExternalTool(_)));
    }

    #[test]
    fn from_path_matches_which() {
        assert_eq!(
            ImdlTorrentMaker::from_path().is_some(),
            which::which("imdl").is_ok()
        );
    }
}
