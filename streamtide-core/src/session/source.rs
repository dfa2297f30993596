//! Resolution of the user-supplied torrent source.

use std::fmt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::ConstructionError;

/// Where a torrent comes from, classified from the raw argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentSource {
    /// `magnet:` URI
    Magnet(String),
    /// `http://` or `https://` URL of a `.torrent` file
    Remote(String),
    /// Path to a `.torrent` file on disk
    LocalFile(PathBuf),
}

impl TorrentSource {
    /// Classifies `input` by prefix.
    pub fn parse(input: &str) -> Self {
        let lowered = input.to_ascii_lowercase();
        if lowered.starts_with("magnet:") {
            TorrentSource::Magnet(input.to_string())
        } else if lowered.starts_with("http://") || lowered.starts_with("https://") {
            TorrentSource::Remote(input.to_string())
        } else {
            TorrentSource::LocalFile(PathBuf::from(input))
        }
    }

    /// Turns the source into something a download engine accepts.
    ///
    /// Remote files are downloaded into a temporary file that lives as
    /// long as the returned value.
    ///
    /// # Errors
    /// - `ConstructionError::FileNotFound` - Local path does not exist
    /// - `ConstructionError::RemoteFetch` - Remote download failed
    /// - `ConstructionError::TempFile` - Temporary file could not be written
    pub async fn resolve(self) -> Result<ResolvedSource, ConstructionError> {
        match self {
            TorrentSource::Magnet(uri) => Ok(ResolvedSource::Magnet(uri)),
            TorrentSource::LocalFile(path) => {
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(ConstructionError::FileNotFound { path });
                }
                Ok(ResolvedSource::File {
                    path,
                    _download: None,
                })
            }
            TorrentSource::Remote(url) => {
                let download = fetch_remote_torrent(&url).await?;
                Ok(ResolvedSource::File {
                    path: download.path().to_path_buf(),
                    _download: Some(download),
                })
            }
        }
    }
}

impl fmt::Display for TorrentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TorrentSource::Magnet(uri) => write!(f, "magnet {uri}"),
            TorrentSource::Remote(url) => write!(f, "remote file {url}"),
            TorrentSource::LocalFile(path) => write!(f, "file {}", path.display()),
        }
    }
}

/// A source ready to hand to the engine.
#[derive(Debug)]
pub enum ResolvedSource {
    Magnet(String),
    File {
        path: PathBuf,
        /// Keeps a downloaded file alive until the session ends
        _download: Option<NamedTempFile>,
    },
}

impl ResolvedSource {
    /// Path of the `.torrent` file, if this is a file source.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ResolvedSource::Magnet(_) => None,
            ResolvedSource::File { path, .. } => Some(path),
        }
    }
}

async fn fetch_remote_torrent(url: &str) -> Result<NamedTempFile, ConstructionError> {
    let fetch_error = |reason: String| ConstructionError::RemoteFetch {
        url: url.to_string(),
        reason,
    };

    let parsed = url::Url::parse(url).map_err(|e| fetch_error(e.to_string()))?;
    tracing::info!("Fetching torrent file from {}", parsed);

    let response = reqwest::get(parsed)
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| fetch_error(e.to_string()))?;
    let body = response
        .bytes()
        .await
        .map_err(|e| fetch_error(e.to_string()))?;

    let download = tempfile::Builder::new()
        .prefix("streamtide-")
        .suffix(".torrent")
        .tempfile()?;
    tokio::fs::write(download.path(), &body).await?;

    tracing::debug!(
        "Saved {} bytes of torrent file to {}",
        body.len(),
        download.path().display()
    );
    Ok(download)
}
