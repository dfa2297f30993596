//! Shared setup: a temporary swarm directory with one seed torrent.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use streamtide_core::config::{EngineConfig, StreamingConfig, SwarmConfig};
use streamtide_core::session::{StreamSession, TorrentSource};
use streamtide_sim::{LocalSwarmEngine, SeedFixture, create_seed};
use streamtide_web::{AppState, router};
use tempfile::TempDir;

pub const STREAM_URL: &str = "http://localhost:8080";

pub struct Harness {
    pub dir: TempDir,
    pub seed: SeedFixture,
    pub swarm: SwarmConfig,
    pub engine: EngineConfig,
}

impl Harness {
    pub fn new(name: &str, files: &[(&str, Vec<u8>)], piece_length: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let swarm = SwarmConfig {
            swarm_dir: dir.path().join("swarm"),
            peers: 2,
            download_rate: None,
            metadata_delay: Duration::from_millis(10),
        };
        let engine = EngineConfig {
            data_dir: dir.path().join("data"),
            seed: false,
        };
        let seed = create_seed(&swarm.swarm_dir, name, files, piece_length).unwrap();
        Self {
            dir,
            seed,
            swarm,
            engine,
        }
    }

    /// Limits the engine's download rate, making pieces effectively never arrive.
    pub fn throttled(mut self, bytes_per_second: u64) -> Self {
        self.swarm.download_rate = Some(bytes_per_second);
        self
    }

    pub fn data_dir(&self) -> PathBuf {
        self.engine.data_dir.clone()
    }

    pub async fn engine(&self) -> Arc<LocalSwarmEngine> {
        Arc::new(
            LocalSwarmEngine::new(&self.swarm, &self.engine)
                .await
                .unwrap(),
        )
    }

    pub async fn start(&self, source: TorrentSource) -> (Arc<LocalSwarmEngine>, Arc<StreamSession>) {
        let engine = self.engine().await;
        let session = StreamSession::start(engine.clone(), source, StreamingConfig::default())
            .await
            .unwrap();
        (engine, session)
    }

    pub async fn start_magnet(&self) -> (Arc<LocalSwarmEngine>, Arc<StreamSession>) {
        self.start(TorrentSource::parse(&self.seed.magnet_uri())).await
    }
}

pub fn app(session: &Arc<StreamSession>) -> Router {
    router(AppState {
        session: session.clone(),
        stream_url: STREAM_URL.to_string(),
    })
}

/// Waits for `condition` with a generous timeout.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
