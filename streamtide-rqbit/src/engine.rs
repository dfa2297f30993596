//! Download engine backed by a librqbit session.

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use librqbit::{AddTorrent, Session, SessionOptions};
use parking_lot::Mutex;
use streamtide_core::config::EngineConfig;
use streamtide_core::engine::{DownloadEngine, EngineError, TorrentHandle};
use streamtide_core::torrent::{InfoHash, MetainfoParser};

use crate::torrent::{RqbitSettings, RqbitTorrent};

/// Download engine joining the public BitTorrent swarm.
pub struct RqbitEngine {
    session: Arc<Session>,
    settings: RqbitSettings,
    parser: MetainfoParser,
    torrents: Mutex<Vec<Arc<RqbitTorrent>>>,
    closed: AtomicBool,
}

impl RqbitEngine {
    /// Starts a librqbit session writing under `engine.data_dir`.
    ///
    /// # Errors
    ///
    /// - `EngineError::Init` - Data directory or session could not be created
    pub async fn new(engine: &EngineConfig) -> Result<Self, EngineError> {
        tokio::fs::create_dir_all(&engine.data_dir)
            .await
            .map_err(|e| EngineError::Init {
                reason: format!("data directory {}: {e}", engine.data_dir.display()),
            })?;

        let options = SessionOptions {
            disable_dht_persistence: true,
            ..Default::default()
        };
        let session: Arc<Session> = Session::new_with_opts(engine.data_dir.clone(), options)
            .await
            .map_err(|e| EngineError::Init {
                reason: format!("{e:#}"),
            })?;
        tracing::info!(
            "Swarm engine ready, writing to {}",
            engine.data_dir.display()
        );

        Ok(Self {
            session,
            settings: RqbitSettings {
                data_dir: engine.data_dir.clone(),
                seed: engine.seed,
            },
            parser: MetainfoParser::new(),
            torrents: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Torrents currently added.
    pub fn torrents(&self) -> Vec<Arc<RqbitTorrent>> {
        self.torrents.lock().clone()
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    fn existing(&self, info_hash: InfoHash) -> Option<Arc<RqbitTorrent>> {
        self.torrents
            .lock()
            .iter()
            .find(|torrent| torrent.info_hash() == info_hash && !torrent.is_dropped())
            .cloned()
    }

    fn register(&self, info_hash: InfoHash, add: AddTorrent<'static>) -> Arc<dyn TorrentHandle> {
        let torrent = RqbitTorrent::spawn(
            info_hash,
            self.session.clone(),
            self.settings.clone(),
            add,
        );
        self.torrents.lock().push(torrent.clone());
        torrent
    }
}

#[async_trait]
impl DownloadEngine for RqbitEngine {
    async fn add_magnet(&self, uri: &str) -> Result<Arc<dyn TorrentHandle>, EngineError> {
        self.ensure_open()?;
        let magnet = self.parser.parse_magnet_link(uri)?;

        if let Some(torrent) = self.existing(magnet.info_hash) {
            return Ok(torrent);
        }
        tracing::info!("Adding magnet {}", magnet.info_hash);

        let add = AddTorrent::Url(Cow::Owned(uri.to_string()));
        Ok(self.register(magnet.info_hash, add))
    }

    async fn add_torrent_file(&self, path: &Path) -> Result<Arc<dyn TorrentHandle>, EngineError> {
        self.ensure_open()?;
        let metadata = self.parser.parse_torrent_file(path).await?;

        if let Some(torrent) = self.existing(metadata.info_hash) {
            return Ok(torrent);
        }
        tracing::info!("Adding torrent {} from {}", metadata.name, path.display());

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| EngineError::InvalidTorrent {
                reason: format!("{}: {e}", path.display()),
            })?;
        Ok(self.register(metadata.info_hash, AddTorrent::from_bytes(bytes)))
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
        self.session.stop().await;
        tracing::info!("Swarm engine closed");
        Ok(())
    }
}
