//! Streamtide Core - progressive streaming over partially downloaded torrents
//!
//! This crate provides the building blocks for watching a torrent while it
//! downloads: metainfo parsing, the download engine interface, piece
//! priority scheduling, the progressive reader and the session controller
//! tying them together.

pub mod config;
pub mod engine;
pub mod session;
pub mod streaming;
pub mod torrent;
pub mod tracing_setup;

pub use config::StreamtideConfig;
pub use engine::{DownloadEngine, EngineError, TorrentHandle, TorrentInfo};
pub use session::{ConstructionError, StreamSession, StreamTarget, TorrentSource};
pub use streaming::{FileStream, LocateError, ProgressiveReader, ReadError};
pub use torrent::{InfoHash, PieceIndex, TorrentError};

/// Errors that can bubble up from any Streamtide subsystem.
#[derive(Debug, thiserror::Error)]
pub enum StreamtideError {
    #[error("Torrent error: {0}")]
    Torrent(#[from] TorrentError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Read error: {0}")]
    Read(#[from] ReadError),

    #[error("Locate error: {0}")]
    Locate(#[from] LocateError),

    #[error("Session error: {0}")]
    Construction(#[from] ConstructionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamtideError {
    /// Returns a short message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            StreamtideError::Construction(ConstructionError::FileNotFound { path }) => {
                format!("Torrent file not found: {}", path.display())
            }
            StreamtideError::Construction(ConstructionError::EngineInit(e)) => {
                format!("Could not start the download engine: {e}")
            }
            StreamtideError::Construction(ConstructionError::RemoteFetch { url, .. }) => {
                format!("Could not download torrent file from {url}")
            }
            StreamtideError::Construction(ConstructionError::AddTorrent(e))
            | StreamtideError::Engine(e) => format!("Download engine error: {e}"),
            StreamtideError::Torrent(e) => format!("Invalid torrent: {e}"),
            StreamtideError::Read(ReadError::Cancelled) => "Stream was cancelled".to_string(),
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamtideError>;
