//! Seed directory scanning and content access.

use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use streamtide_core::torrent::{InfoHash, MetainfoParser, TorrentMetadata};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// One file of seed content placed at a torrent offset.
#[derive(Debug, Clone)]
struct Segment {
    path: PathBuf,
    offset: u64,
    length: u64,
}

/// Seed content for a torrent, possibly spread over several files.
#[derive(Debug, Clone)]
pub struct SeedContent {
    segments: Vec<Segment>,
    total_length: u64,
}

impl SeedContent {
    /// Maps `metadata`'s files onto paths below `swarm_dir`.
    pub fn locate(swarm_dir: &Path, metadata: &TorrentMetadata) -> Self {
        let root = swarm_dir.join(&metadata.name);
        let mut offset = 0;
        let segments = metadata
            .files
            .iter()
            .map(|file| {
                let path = if metadata.is_multi_file() {
                    file.path.iter().fold(root.clone(), |dir, part| dir.join(part))
                } else {
                    root.clone()
                };
                let segment = Segment {
                    path,
                    offset,
                    length: file.length,
                };
                offset += file.length;
                segment
            })
            .collect();

        Self {
            segments,
            total_length: metadata.total_length,
        }
    }

    /// Total content length.
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Reads `length` bytes at torrent offset `offset`.
    ///
    /// # Errors
    ///
    /// - `io::Error` - A backing file is missing or shorter than described
    pub async fn read(&self, offset: u64, length: u64) -> io::Result<Vec<u8>> {
        let end = offset + length;
        if end > self.total_length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read {offset}..{end} past content end {}", self.total_length),
            ));
        }

        let mut data = Vec::with_capacity(length as usize);
        for segment in &self.segments {
            let segment_end = segment.offset + segment.length;
            if segment_end <= offset || segment.offset >= end {
                continue;
            }

            let start = offset.max(segment.offset);
            let stop = end.min(segment_end);
            let mut file = tokio::fs::File::open(&segment.path).await?;
            file.seek(SeekFrom::Start(start - segment.offset)).await?;

            let filled = data.len();
            data.resize(filled + (stop - start) as usize, 0);
            file.read_exact(&mut data[filled..]).await?;
        }
        Ok(data)
    }
}

/// A torrent that the local swarm can serve.
#[derive(Debug, Clone)]
pub struct Seed {
    /// Parsed metainfo of the seed torrent
    pub metadata: TorrentMetadata,
    /// Content the seed serves pieces from
    pub content: Arc<SeedContent>,
}

/// Seeds found in a swarm directory, keyed by info hash.
#[derive(Debug, Default)]
pub struct SeedRegistry {
    seeds: HashMap<InfoHash, Seed>,
}

impl SeedRegistry {
    /// Registers every parseable `.torrent` file in `swarm_dir`.
    ///
    /// A missing directory yields an empty registry; unparseable files are
    /// skipped with a warning.
    pub async fn scan(swarm_dir: &Path) -> Self {
        let mut registry = Self::default();

        let mut entries = match tokio::fs::read_dir(swarm_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Swarm directory {} unavailable: {}", swarm_dir.display(), e);
                return registry;
            }
        };

        let parser = MetainfoParser::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "torrent") {
                continue;
            }

            match parser.parse_torrent_file(&path).await {
                Ok(metadata) => {
                    tracing::debug!("Registered seed {} ({})", metadata.name, metadata.info_hash);
                    registry.insert(swarm_dir, metadata);
                }
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }

        tracing::info!(
            "Swarm directory {} holds {} seeds",
            swarm_dir.display(),
            registry.len()
        );
        registry
    }

    /// Registers `metadata` with content below `swarm_dir`.
    pub fn insert(&mut self, swarm_dir: &Path, metadata: TorrentMetadata) {
        let content = Arc::new(SeedContent::locate(swarm_dir, &metadata));
        self.seeds
            .insert(metadata.info_hash, Seed { metadata, content });
    }

    /// Seed with the given info hash.
    pub fn get(&self, info_hash: &InfoHash) -> Option<&Seed> {
        self.seeds.get(info_hash)
    }

    /// Number of registered seeds.
    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    /// Returns true when no seeds are registered.
    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }
}
