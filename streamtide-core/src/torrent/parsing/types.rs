//! Parsed metainfo and magnet link types

use super::super::InfoHash;

/// Complete metadata extracted from a torrent file.
///
/// Contains the piece layout and file structure needed to address
/// torrent content by byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentMetadata {
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u32,
    pub piece_hashes: Vec<[u8; 20]>,
    pub total_length: u64,
    pub files: Vec<TorrentFile>,
    pub announce_urls: Vec<String>,
}

impl TorrentMetadata {
    /// Returns true when the info dictionary describes a directory of files.
    pub fn is_multi_file(&self) -> bool {
        self.files.len() > 1 || self.files.first().is_some_and(|file| file.path.len() > 1)
    }
}

/// Individual file within a torrent.
///
/// Path components are relative to the torrent root. Single-file
/// torrents carry one component equal to the torrent name.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentFile {
    pub path: Vec<String>,
    pub length: u64,
}

impl TorrentFile {
    /// Path components joined with `/` for display.
    pub fn display_path(&self) -> String {
        self.path.join("/")
    }
}

/// Magnet link components.
#[derive(Debug, Clone, PartialEq)]
pub struct MagnetLink {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}
