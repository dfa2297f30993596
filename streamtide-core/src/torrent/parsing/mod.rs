//! `.torrent` file and magnet link parsing.
//!
//! Metainfo decoding uses bencode-rs, magnet URIs use magnet-url.

pub mod bencode;
pub mod magnet;
pub mod types;

use std::path::Path;

pub use types::{MagnetLink, TorrentFile, TorrentMetadata};

use super::TorrentError;

/// Entry point for turning torrent sources into metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetainfoParser;

impl MetainfoParser {
    /// Creates new parser instance.
    pub fn new() -> Self {
        Self
    }

    /// Parses raw `.torrent` bytes.
    ///
    /// # Errors
    /// - `TorrentError::InvalidTorrentFile` - Malformed bencode or missing fields
    pub fn parse_torrent_data(&self, data: &[u8]) -> Result<TorrentMetadata, TorrentError> {
        bencode::parse_bencode_data(data)
    }

    /// Reads and parses a `.torrent` file from disk.
    ///
    /// # Errors
    /// - `TorrentError::Io` - File could not be read
    /// - `TorrentError::InvalidTorrentFile` - Parsing failure
    pub async fn parse_torrent_file(&self, path: &Path) -> Result<TorrentMetadata, TorrentError> {
        let contents = tokio::fs::read(path).await?;
        self.parse_torrent_data(&contents)
    }

    /// Parses a magnet URI.
    ///
    /// # Errors
    /// - `TorrentError::InvalidMagnetLink` - Malformed magnet URI
    pub fn parse_magnet_link(&self, magnet_url: &str) -> Result<MagnetLink, TorrentError> {
        magnet::parse_magnet_link(magnet_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_torrent_file_parsing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test.torrent");
        let torrent_data = b"d8:announce9:test:80804:infod6:lengthi1000e4:name8:test.txt12:piece lengthi32768e6:pieces20:12345678901234567890ee";
        tokio::fs::write(&file_path, torrent_data).await.unwrap();

        let metadata = MetainfoParser::new()
            .parse_torrent_file(&file_path)
            .await
            .unwrap();
        assert_eq!(metadata.name, "test.txt");
        assert_eq!(metadata.total_length, 1000);
    }

    #[tokio::test]
    async fn test_nonexistent_file() {
        let result = MetainfoParser::new()
            .parse_torrent_file(Path::new("/nonexistent/file.torrent"))
            .await;
        assert!(matches!(result, Err(TorrentError::Io(_))));
    }

    #[test]
    fn test_error_handling_patterns() {
        let parser = MetainfoParser::new();
        assert!(parser.parse_torrent_data(b"le").is_err());
        assert!(parser.parse_torrent_data(b"l4:teste").is_err());
        assert!(parser.parse_torrent_data(b"invalid torrent data").is_err());
    }
}
