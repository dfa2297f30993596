//! Download engine collaborator interface.
//!
//! The torrent protocol itself (peers, wire protocol, verification, piece
//! storage) lives behind these traits. The streaming core only reads
//! completion state and requests priority raises; it never mutates pieces.

#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use crate::torrent::{InfoHash, PieceIndex, TorrentError, TorrentMetadata};

/// Download priority of a single piece.
///
/// Totally ordered: `Normal < Readahead < Now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum PiecePriority {
    /// Fetched whenever the engine gets to it
    #[default]
    Normal = 0,
    /// Fetched ahead of need to hide latency
    Readahead = 1,
    /// Blocking a reader right now
    Now = 2,
}

impl PiecePriority {
    /// Returns the raw level used for atomic storage.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stored level back, saturating unknown values to `Now`.
    pub fn from_u8(level: u8) -> Self {
        match level {
            0 => Self::Normal,
            1 => Self::Readahead,
            _ => Self::Now,
        }
    }
}

/// Completion state of a piece as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PieceState {
    Missing = 0,
    Downloading = 1,
    Verified = 2,
}

impl PieceState {
    /// Converts a stored state back, treating unknown values as missing.
    pub fn from_u8(state: u8) -> Self {
        match state {
            1 => Self::Downloading,
            2 => Self::Verified,
            _ => Self::Missing,
        }
    }
}

/// A logical file inside a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Display path relative to the torrent root
    pub path: String,
    /// File length in bytes
    pub length: u64,
    /// Byte offset of the file's first byte within the torrent
    pub offset: u64,
}

/// Piece layout and file list, known once metadata has arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentInfo {
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u32,
    pub piece_count: u32,
    pub total_length: u64,
    pub files: Vec<FileEntry>,
}

impl TorrentInfo {
    /// Length of piece `index`; the final piece may be shorter.
    pub fn piece_size(&self, index: PieceIndex) -> u32 {
        crate::streaming::piece_length(self.total_length, self.piece_length, index.as_u32())
    }

    /// Byte offset of piece `index` within the torrent.
    pub fn piece_offset(&self, index: PieceIndex) -> u64 {
        u64::from(index.as_u32()) * u64::from(self.piece_length)
    }

    /// The file with the greatest length; the first one wins a tie.
    pub fn largest_file(&self) -> Option<&FileEntry> {
        self.files
            .iter()
            .reduce(|best, file| if file.length > best.length { file } else { best })
    }
}

impl From<&TorrentMetadata> for TorrentInfo {
    fn from(metadata: &TorrentMetadata) -> Self {
        let mut offset = 0;
        let files = metadata
            .files
            .iter()
            .map(|file| {
                let entry = FileEntry {
                    path: file.display_path(),
                    length: file.length,
                    offset,
                };
                offset += file.length;
                entry
            })
            .collect();

        Self {
            info_hash: metadata.info_hash,
            name: metadata.name.clone(),
            piece_length: metadata.piece_length,
            piece_count: metadata.piece_hashes.len() as u32,
            total_length: metadata.total_length,
            files,
        }
    }
}

/// Completion signal broadcast by the engine.
///
/// `verified_pieces` changes on every verification event; subscribers wake
/// on each change and re-check the pieces they care about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwarmStatus {
    /// Number of pieces verified so far
    pub verified_pieces: u32,
    /// Set once the engine gives up on this torrent
    pub failure: Option<String>,
}

/// Errors reported by a download engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("engine initialization failed: {reason}")]
    Init { reason: String },

    #[error("invalid torrent: {reason}")]
    InvalidTorrent { reason: String },

    #[error("torrent metadata is not available yet")]
    MetadataUnavailable,

    #[error("piece {index} is not verified")]
    PieceNotVerified { index: PieceIndex },

    #[error("download failed: {reason}")]
    DownloadFailed { reason: String },

    #[error("storage error: {reason}")]
    Storage { reason: String },

    #[error("engine has been closed")]
    Closed,
}

impl From<TorrentError> for EngineError {
    fn from(error: TorrentError) -> Self {
        EngineError::InvalidTorrent {
            reason: error.to_string(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        EngineError::Storage {
            reason: error.to_string(),
        }
    }
}

/// A download engine session that torrents are added to.
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Adds a torrent by magnet URI. Metadata arrives asynchronously.
    ///
    /// # Errors
    /// - `EngineError::InvalidTorrent` - Malformed magnet URI
    /// - `EngineError::Closed` - Engine already closed
    async fn add_magnet(&self, uri: &str) -> Result<Arc<dyn TorrentHandle>, EngineError>;

    /// Adds a torrent from a `.torrent` file on disk.
    ///
    /// # Errors
    /// - `EngineError::InvalidTorrent` - Unreadable or malformed metainfo
    /// - `EngineError::Closed` - Engine already closed
    async fn add_torrent_file(&self, path: &Path) -> Result<Arc<dyn TorrentHandle>, EngineError>;

    /// Releases engine resources. Torrents must be dropped first.
    ///
    /// # Errors
    /// - `EngineError::Storage` - Scratch data could not be cleaned up
    async fn close(&self) -> Result<(), EngineError>;
}

/// One torrent inside an engine session.
#[async_trait]
pub trait TorrentHandle: Send + Sync {
    /// Info hash identifying the torrent.
    fn info_hash(&self) -> InfoHash;

    /// Suspends until the piece layout is known.
    ///
    /// # Errors
    /// - `EngineError::DownloadFailed` - Metadata could not be resolved
    /// - `EngineError::Closed` - Torrent dropped while waiting
    async fn wait_for_metadata(&self) -> Result<Arc<TorrentInfo>, EngineError>;

    /// Metadata if it has already arrived.
    fn metadata(&self) -> Option<Arc<TorrentInfo>>;

    /// Instructs the engine to eventually fetch every piece.
    fn download_all(&self);

    /// Requests that `index` be fetched at `priority` or higher.
    ///
    /// Engines apply this as a raise: a lower level never replaces a
    /// higher one already in effect.
    fn set_piece_priority(&self, index: PieceIndex, priority: PiecePriority);

    /// Current completion state of `index`.
    fn piece_state(&self, index: PieceIndex) -> PieceState;

    /// Sum of the lengths of verified pieces.
    fn bytes_completed(&self) -> u64;

    /// Number of open peer connections.
    fn connection_count(&self) -> usize;

    /// Subscribes to the completion/failure signal.
    fn subscribe(&self) -> watch::Receiver<SwarmStatus>;

    /// Reads bytes of a verified piece.
    ///
    /// # Errors
    /// - `EngineError::PieceNotVerified` - Piece is not verified
    /// - `EngineError::Storage` - Piece storage could not be read
    async fn read_verified(
        &self,
        index: PieceIndex,
        inner_offset: u32,
        length: u32,
    ) -> Result<Bytes, EngineError>;

    /// Removes the torrent from the engine and discards its pieces.
    ///
    /// # Errors
    /// - `EngineError::Storage` - Piece storage could not be removed
    async fn drop_torrent(&self) -> Result<(), EngineError>;

    /// Total torrent length, or 0 before metadata.
    fn total_length(&self) -> u64 {
        self.metadata().map(|info| info.total_length).unwrap_or(0)
    }

    /// Piece count, or 0 before metadata.
    fn piece_count(&self) -> u32 {
        self.metadata().map(|info| info.piece_count).unwrap_or(0)
    }

    /// Display name, falling back to the info hash before metadata.
    fn name(&self) -> String {
        self.metadata()
            .map(|info| info.name.clone())
            .unwrap_or_else(|| self.info_hash().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::TorrentFile;

    fn metadata_with_files(files: &[(&str, u64)]) -> TorrentMetadata {
        let total_length = files.iter().map(|(_, len)| len).sum::<u64>();
        TorrentMetadata {
            info_hash: InfoHash::new([7u8; 20]),
            name: "show".to_string(),
            piece_length: 16,
            piece_hashes: vec![[0u8; 20]; total_length.div_ceil(16) as usize],
            total_length,
            files: files
                .iter()
                .map(|(name, length)| TorrentFile {
                    path: name.split('/').map(str::to_string).collect(),
                    length: *length,
                })
                .collect(),
            announce_urls: Vec::new(),
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(PiecePriority::Normal < PiecePriority::Readahead);
        assert!(PiecePriority::Readahead < PiecePriority::Now);
        assert_eq!(PiecePriority::from_u8(PiecePriority::Now.as_u8()), PiecePriority::Now);
    }

    #[test]
    fn test_info_assigns_file_offsets() {
        let info = TorrentInfo::from(&metadata_with_files(&[
            ("a/sample.txt", 10),
            ("a/movie.mkv", 40),
            ("a/sub.srt", 5),
        ]));

        assert_eq!(info.piece_count, 4);
        assert_eq!(info.files[1].offset, 10);
        assert_eq!(info.files[2].offset, 50);
        assert_eq!(info.largest_file().unwrap().path, "a/movie.mkv");
    }

    #[test]
    fn test_largest_file_prefers_first_on_tie() {
        let info = TorrentInfo::from(&metadata_with_files(&[("one", 8), ("two", 8)]));
        assert_eq!(info.largest_file().unwrap().path, "one");
    }

    #[test]
    fn test_short_final_piece() {
        let info = TorrentInfo::from(&metadata_with_files(&[("f", 40)]));
        assert_eq!(info.piece_size(PieceIndex::new(0)), 16);
        assert_eq!(info.piece_size(PieceIndex::new(2)), 8);
        assert_eq!(info.piece_offset(PieceIndex::new(2)), 32);
    }
}
