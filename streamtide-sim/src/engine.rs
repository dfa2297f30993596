//! Download engine serving torrents from a local seed directory.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use streamtide_core::config::{EngineConfig, SwarmConfig};
use streamtide_core::engine::{DownloadEngine, EngineError, TorrentHandle};
use streamtide_core::torrent::{InfoHash, MetainfoParser};

use crate::seeds::SeedRegistry;
use crate::token_bucket::Throttle;
use crate::torrent::{SwarmSettings, SwarmTorrent};

/// Download engine whose swarm is a directory of seed torrents.
pub struct LocalSwarmEngine {
    registry: SeedRegistry,
    settings: SwarmSettings,
    parser: MetainfoParser,
    torrents: Mutex<Vec<Arc<SwarmTorrent>>>,
    closed: AtomicBool,
}

impl LocalSwarmEngine {
    /// Scans `swarm.swarm_dir` for seeds and prepares `engine.data_dir`.
    ///
    /// # Errors
    ///
    /// - `EngineError::Init` - Data directory could not be created
    pub async fn new(swarm: &SwarmConfig, engine: &EngineConfig) -> Result<Self, EngineError> {
        tokio::fs::create_dir_all(&engine.data_dir)
            .await
            .map_err(|e| EngineError::Init {
                reason: format!("data directory {}: {e}", engine.data_dir.display()),
            })?;

        let registry = SeedRegistry::scan(&swarm.swarm_dir).await;
        let settings = SwarmSettings {
            peers: swarm.peers.max(1),
            metadata_delay: swarm.metadata_delay,
            seed: engine.seed,
            data_dir: engine.data_dir.clone(),
            throttle: Arc::new(Throttle::new(swarm.download_rate)),
        };
        tracing::info!(
            "Local swarm engine ready: {} seeds, {} peers per torrent, rate limit {:?}",
            registry.len(),
            settings.peers,
            swarm.download_rate
        );

        Ok(Self {
            registry,
            settings,
            parser: MetainfoParser::new(),
            torrents: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Number of seeds found in the swarm directory.
    pub fn seed_count(&self) -> usize {
        self.registry.len()
    }

    /// Torrents currently added.
    pub fn torrents(&self) -> Vec<Arc<SwarmTorrent>> {
        self.torrents.lock().clone()
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    fn existing(&self, info_hash: InfoHash) -> Option<Arc<SwarmTorrent>> {
        self.torrents
            .lock()
            .iter()
            .find(|torrent| torrent.info_hash() == info_hash && !torrent.is_dropped())
            .cloned()
    }

    fn register(&self, torrent: Arc<SwarmTorrent>) -> Arc<dyn TorrentHandle> {
        self.torrents.lock().push(torrent.clone());
        torrent
    }
}

#[async_trait]
impl DownloadEngine for LocalSwarmEngine {
    async fn add_magnet(&self, uri: &str) -> Result<Arc<dyn TorrentHandle>, EngineError> {
        self.ensure_open()?;
        let magnet = self.parser.parse_magnet_link(uri)?;

        if let Some(torrent) = self.existing(magnet.info_hash) {
            return Ok(torrent);
        }

        let seed = self.registry.get(&magnet.info_hash).cloned();
        if seed.is_none() {
            tracing::warn!("No seed for {} in the local swarm", magnet.info_hash);
        }
        tracing::info!("Adding magnet {}", magnet.info_hash);

        let torrent = SwarmTorrent::spawn(magnet.info_hash, self.settings.clone(), None, seed);
        Ok(self.register(torrent))
    }

    async fn add_torrent_file(&self, path: &Path) -> Result<Arc<dyn TorrentHandle>, EngineError> {
        self.ensure_open()?;
        let metadata = self.parser.parse_torrent_file(path).await?;

        if let Some(torrent) = self.existing(metadata.info_hash) {
            return Ok(torrent);
        }

        let seed = self.registry.get(&metadata.info_hash).cloned();
        if seed.is_none() {
            tracing::warn!("No seed for {} in the local swarm", metadata.name);
        }
        tracing::info!("Adding torrent {} from {}", metadata.name, path.display());

        let torrent = SwarmTorrent::spawn(
            metadata.info_hash,
            self.settings.clone(),
            Some(metadata),
            seed,
        );
        Ok(self.register(torrent))
    }

    async fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let torrents = std::mem::take(&mut *self.torrents.lock());
        for torrent in torrents {
            if let Err(e) = torrent.drop_torrent().await {
                tracing::warn!("Failed to drop {} on close: {}", torrent.info_hash(), e);
            }
        }
        tracing::info!("Local swarm engine closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use streamtide_core::engine::{PiecePriority, PieceState};
    use streamtide_core::torrent::PieceIndex;

    use super::*;
    use crate::fixtures::{SeedFixture, create_seed, pattern};

    struct Swarm {
        _dir: tempfile::TempDir,
        swarm: SwarmConfig,
        engine: EngineConfig,
    }

    fn swarm(peers: usize, download_rate: Option<u64>) -> Swarm {
        let dir = tempfile::tempdir().unwrap();
        Swarm {
            swarm: SwarmConfig {
                swarm_dir: dir.path().join("swarm"),
                peers,
                download_rate,
                metadata_delay: Duration::from_millis(10),
            },
            engine: EngineConfig {
                data_dir: dir.path().join("data"),
                seed: false,
            },
            _dir: dir,
        }
    }

    fn seed_movie(swarm: &Swarm, len: usize) -> SeedFixture {
        create_seed(&swarm.swarm.swarm_dir, "movie.mp4", &[("movie.mp4", pattern(len, 5))], 64).unwrap()
    }

    async fn wait_complete(handle: &Arc<dyn TorrentHandle>) {
        let mut status = handle.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if handle.piece_count() > 0 && status.borrow_and_update().verified_pieces == handle.piece_count() {
                    return;
                }
                status.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_magnet_download_completes() {
        let swarm = swarm(3, None);
        let fixture = seed_movie(&swarm, 1000);
        let engine = LocalSwarmEngine::new(&swarm.swarm, &swarm.engine).await.unwrap();
        assert_eq!(engine.seed_count(), 1);

        let handle = engine.add_magnet(&fixture.magnet_uri()).await.unwrap();
        let info = handle.wait_for_metadata().await.unwrap();
        assert_eq!(info.total_length, 1000);
        assert_eq!(info.piece_count, 16);

        handle.download_all();
        wait_complete(&handle).await;

        assert_eq!(handle.bytes_completed(), 1000);
        let tail = handle.read_verified(PieceIndex::new(15), 0, 40).await.unwrap();
        assert_eq!(&tail[..], &fixture.content[960..1000]);

        // Not seeding: connections close once everything is verified.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.connection_count(), 0);
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_only_prioritized_pieces_before_download_all() {
        let swarm = swarm(2, None);
        let fixture = seed_movie(&swarm, 640);
        let engine = LocalSwarmEngine::new(&swarm.swarm, &swarm.engine).await.unwrap();

        let handle = engine.add_torrent_file(&fixture.torrent_path).await.unwrap();
        handle.wait_for_metadata().await.unwrap();
        handle.set_piece_priority(PieceIndex::new(7), PiecePriority::Now);

        let mut status = handle.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.piece_state(PieceIndex::new(7)) != PieceState::Verified {
                status.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.bytes_completed(), 64);
        assert_eq!(handle.piece_state(PieceIndex::new(0)), PieceState::Missing);
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_magnet_fails_with_no_peers() {
        let swarm = swarm(1, None);
        let engine = LocalSwarmEngine::new(&swarm.swarm, &swarm.engine).await.unwrap();

        let handle = engine
            .add_magnet("magnet:?xt=urn:btih:abcdefabcdefabcdefabcdefabcdefabcdefabcd")
            .await
            .unwrap();
        let error = handle.wait_for_metadata().await.unwrap_err();
        assert!(matches!(error, EngineError::DownloadFailed { reason } if reason == "no peers"));
        assert_eq!(handle.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_magnet_rejected() {
        let swarm = swarm(1, None);
        let engine = LocalSwarmEngine::new(&swarm.swarm, &swarm.engine).await.unwrap();
        assert!(matches!(
            engine.add_magnet("magnet:?dn=nothing").await,
            Err(EngineError::InvalidTorrent { .. })
        ));
    }

    #[tokio::test]
    async fn test_corrupt_seed_fails_after_retries() {
        let swarm = swarm(1, None);
        let fixture = seed_movie(&swarm, 128);
        std::fs::write(swarm.swarm.swarm_dir.join("movie.mp4"), vec![0u8; 128]).unwrap();
        let engine = LocalSwarmEngine::new(&swarm.swarm, &swarm.engine).await.unwrap();

        let handle = engine.add_torrent_file(&fixture.torrent_path).await.unwrap();
        handle.wait_for_metadata().await.unwrap();
        handle.download_all();

        let mut status = handle.subscribe();
        let failure = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(reason) = status.borrow_and_update().failure.clone() {
                    return reason;
                }
                status.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert!(failure.contains("failed verification 3 times"), "{failure}");
        assert_eq!(handle.bytes_completed(), 0);
    }

    #[tokio::test]
    async fn test_close_drops_torrents_and_rejects_adds() {
        let swarm = swarm(1, Some(64));
        let fixture = seed_movie(&swarm, 4096);
        let engine = LocalSwarmEngine::new(&swarm.swarm, &swarm.engine).await.unwrap();

        let handle = engine.add_torrent_file(&fixture.torrent_path).await.unwrap();
        handle.wait_for_metadata().await.unwrap();
        handle.download_all();
        let scratch = swarm.engine.data_dir.join(format!("{}.part", fixture.info_hash));
        assert!(scratch.exists());

        engine.close().await.unwrap();
        assert!(!scratch.exists());
        assert!(engine.torrents().is_empty());
        assert!(matches!(
            engine.add_magnet(&fixture.magnet_uri()).await,
            Err(EngineError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_seeding_keeps_connections_open() {
        let mut swarm = swarm(2, None);
        swarm.engine.seed = true;
        let fixture = seed_movie(&swarm, 256);
        let engine = LocalSwarmEngine::new(&swarm.swarm, &swarm.engine).await.unwrap();

        let handle = engine.add_magnet(&fixture.magnet_uri()).await.unwrap();
        handle.wait_for_metadata().await.unwrap();
        handle.download_all();
        wait_complete(&handle).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.connection_count(), 2);

        handle.drop_torrent().await.unwrap();
        assert_eq!(handle.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_same_torrent_added_twice_shares_handle() {
        let swarm = swarm(1, None);
        let fixture = seed_movie(&swarm, 64);
        let engine = LocalSwarmEngine::new(&swarm.swarm, &swarm.engine).await.unwrap();

        engine.add_torrent_file(&fixture.torrent_path).await.unwrap();
        engine.add_magnet(&fixture.magnet_uri()).await.unwrap();
        assert_eq!(engine.torrents().len(), 1);
    }
}
