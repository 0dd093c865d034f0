//! Media source locator validation.

use std::path::{Path, PathBuf};

use url::Url;

use crate::video::VideoError;

/// URL schemes handed to the engine as network streams.
pub const NETWORK_SCHEMES: &[&str] = &[
    "http", "https", "rtsp", "rtsps", "rtmp", "rtmps", "rtp", "udp", "mms", "mmsh", "srt", "ftp",
];

/// A validated media source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// A stream reachable through one of [`NETWORK_SCHEMES`]
    Network(Url),
    /// An existing local file
    File(PathBuf),
}

impl SourceLocator {
    /// Validates user input.
    ///
    /// Strings containing `://` are parsed as URLs: network schemes need a
    /// host, `file://` URLs must name an existing file. Anything else is
    /// treated as a local path that must exist and be a regular file.
    pub fn parse(input: &str) -> Result<Self, VideoError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(VideoError::InvalidSource("empty source".into()));
        }

        if input.contains("://") {
            let url = Url::parse(input)
                .map_err(|e| VideoError::InvalidSource(format!("{input}: {e}")))?;
            return Self::from_url(url);
        }

        Self::from_path(Path::new(input))
    }

    fn from_url(url: Url) -> Result<Self, VideoError> {
        let scheme = url.scheme();
        if scheme == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| VideoError::InvalidSource(format!("not a local file URL: {url}")))?;
            return Self::from_path(&path);
        }
        if !NETWORK_SCHEMES.contains(&scheme) {
            return Err(VideoError::InvalidSource(format!(
                "unsupported scheme '{scheme}'"
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(VideoError::InvalidSource(format!("missing host: {url}")));
        }
        Ok(SourceLocator::Network(url))
    }

    fn from_path(path: &Path) -> Result<Self, VideoError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => Ok(SourceLocator::File(path.to_path_buf())),
            Ok(_) => Err(VideoError::InvalidSource(format!(
                "not a regular file: {}",
                path.display()
            ))),
            Err(e) => Err(VideoError::InvalidSource(format!(
                "{}: {e}",
                path.display()
            ))),
        }
    }

    /// Returns true for network streams.
    pub fn is_network(&self) -> bool {
        matches!(self, SourceLocator::Network(_))
    }

    /// Returns the locator in the form the engine expects (URL or path).
    pub fn as_engine_mrl(&self) -> String {
        match self {
            SourceLocator::Network(url) => url.to_string(),
            SourceLocator::File(path) => path.display().to_string(),
        }
    }
}

impl std::fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_engine_mrl())
    }
}
