//! One torrent being fetched from the local swarm.
//!
//! A driver task waits out the metadata delay, publishes the piece layout,
//! then runs one worker per simulated peer connection. Workers claim pieces
//! from the shared [`PieceBook`], read them from seed content through the
//! engine's bandwidth throttle, verify their SHA-1 hash and write them to
//! the scratch file before announcing them.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use streamtide_core::engine::{
    EngineError, PiecePriority, PieceState, SwarmStatus, TorrentHandle, TorrentInfo,
};
use streamtide_core::torrent::{InfoHash, PieceIndex, TorrentMetadata};
use tokio::sync::{Notify, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::pieces::PieceBook;
use crate::seeds::{Seed, SeedContent};
use crate::storage::ScratchFile;
use crate::token_bucket::Throttle;

/// Verification failures of a single piece before the torrent is abandoned.
pub const MAX_VERIFY_FAILURES: u8 = 3;

/// Engine-wide settings copied into each torrent.
#[derive(Debug, Clone)]
pub struct SwarmSettings {
    /// Simulated peer connections per torrent
    pub peers: usize,
    /// Time before metadata is published
    pub metadata_delay: Duration,
    /// Keep connections open after completion
    pub seed: bool,
    /// Directory for scratch files
    pub data_dir: PathBuf,
    /// Bandwidth limit shared by every torrent
    pub throttle: Arc<Throttle>,
}

/// Piece data a worker needs besides the torrent itself.
struct PieceSource {
    content: Arc<SeedContent>,
    hashes: Arc<Vec<[u8; 20]>>,
    info: Arc<TorrentInfo>,
}

/// Torrent handle backed by the local swarm.
pub struct SwarmTorrent {
    info_hash: InfoHash,
    settings: SwarmSettings,
    metadata: watch::Sender<Option<Arc<TorrentInfo>>>,
    status: watch::Sender<SwarmStatus>,
    book: OnceLock<PieceBook>,
    storage: OnceLock<ScratchFile>,
    download_all: AtomicBool,
    wake: Notify,
    bytes_completed: AtomicU64,
    connections: AtomicUsize,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicBool,
}

impl SwarmTorrent {
    /// Starts fetching a torrent.
    ///
    /// `metadata` is known up front for `.torrent` adds; magnet adds learn
    /// it from `seed`. Without a seed the torrent fails with "no peers".
    pub fn spawn(
        info_hash: InfoHash,
        settings: SwarmSettings,
        metadata: Option<TorrentMetadata>,
        seed: Option<Seed>,
    ) -> Arc<Self> {
        let torrent = Arc::new(Self {
            info_hash,
            settings,
            metadata: watch::Sender::new(None),
            status: watch::Sender::new(SwarmStatus::default()),
            book: OnceLock::new(),
            storage: OnceLock::new(),
            download_all: AtomicBool::new(false),
            wake: Notify::new(),
            bytes_completed: AtomicU64::new(0),
            connections: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
            dropped: AtomicBool::new(false),
        });

        let driver = tokio::spawn(torrent.clone().drive(metadata, seed));
        *torrent.driver.lock() = Some(driver);
        torrent
    }

    /// Whether `drop_torrent` has run.
    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    /// Priority the engine currently applies to `index`.
    pub fn priority(&self, index: u32) -> PiecePriority {
        self.book
            .get()
            .map(|book| book.priority(index))
            .unwrap_or_default()
    }

    fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!("Torrent {} failed: {}", self.info_hash, reason);
        self.status.send_if_modified(|status| {
            if status.failure.is_some() {
                return false;
            }
            status.failure = Some(reason);
            true
        });
        self.cancel.cancel();
    }

    async fn drive(self: Arc<Self>, metadata: Option<TorrentMetadata>, seed: Option<Seed>) {
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = tokio::time::sleep(self.settings.metadata_delay) => {}
        }

        let Some(metadata) = metadata.or_else(|| seed.as_ref().map(|s| s.metadata.clone())) else {
            self.fail("no peers");
            return;
        };
        let info = Arc::new(TorrentInfo::from(&metadata));

        let storage =
            match ScratchFile::create(&self.settings.data_dir, self.info_hash, info.total_length)
                .await
            {
                Ok(storage) => storage,
                Err(e) => {
                    self.fail(format!("scratch file unavailable: {e}"));
                    return;
                }
            };
        let _ = self.storage.set(storage);
        let _ = self.book.set(PieceBook::new(info.piece_count));
        self.metadata.send_replace(Some(info.clone()));
        tracing::info!(
            "Metadata ready for {} ({} pieces)",
            info.name,
            info.piece_count
        );

        let Some(seed) = seed else {
            self.fail("no peers");
            return;
        };

        let hashes = Arc::new(metadata.piece_hashes);
        let mut workers = JoinSet::new();
        self.connections
            .store(self.settings.peers, Ordering::Release);
        for peer in 0..self.settings.peers {
            let source = PieceSource {
                content: seed.content.clone(),
                hashes: hashes.clone(),
                info: info.clone(),
            };
            workers.spawn(self.clone().run_peer(peer, source));
        }
        while workers.join_next().await.is_some() {}

        tracing::debug!("All peer connections closed for {}", info.name);
    }

    async fn run_peer(self: Arc<Self>, peer: usize, source: PieceSource) {
        tracing::trace!("Peer {} connected to {}", peer, self.info_hash);

        if let Some(book) = self.book.get() {
            loop {
                let notified = self.wake.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let download_all = self.download_all.load(Ordering::Acquire);
                match book.claim_next(download_all) {
                    Some(index) => {
                        let fetched = tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            fetched = self.fetch_piece(book, index, &source) => fetched,
                        };
                        if let Err(reason) = fetched {
                            self.fail(reason);
                            break;
                        }
                    }
                    None if book.all_verified() => {
                        if self.settings.seed {
                            self.cancel.cancelled().await;
                        }
                        break;
                    }
                    None => {
                        tokio::select! {
                            _ = self.cancel.cancelled() => break,
                            _ = &mut notified => {}
                        }
                    }
                }
            }
        }

        self.connections.fetch_sub(1, Ordering::AcqRel);
        tracing::trace!("Peer {} disconnected from {}", peer, self.info_hash);
    }

    async fn fetch_piece(
        &self,
        book: &PieceBook,
        index: u32,
        source: &PieceSource,
    ) -> Result<(), String> {
        let piece = PieceIndex::new(index);
        let length = source.info.piece_size(piece);
        let offset = source.info.piece_offset(piece);

        self.settings.throttle.acquire(u64::from(length)).await;
        let data = source
            .content
            .read(offset, u64::from(length))
            .await
            .map_err(|e| format!("seed content unreadable: {e}"))?;

        if Sha1::digest(&data).as_slice() != source.hashes[index as usize] {
            let failures = book.mark_failed(index);
            tracing::warn!(
                "Piece {} of {} failed verification ({}/{})",
                index,
                self.info_hash,
                failures,
                MAX_VERIFY_FAILURES
            );
            self.wake.notify_waiters();
            if failures >= MAX_VERIFY_FAILURES {
                return Err(format!(
                    "piece {index} failed verification {failures} times"
                ));
            }
            return Ok(());
        }

        let storage = self
            .storage
            .get()
            .ok_or_else(|| "scratch file missing".to_string())?;
        storage
            .write_at(offset, &data)
            .await
            .map_err(|e| format!("scratch write failed: {e}"))?;

        book.mark_verified(index);
        self.bytes_completed
            .fetch_add(u64::from(length), Ordering::AcqRel);
        self.status
            .send_modify(|status| status.verified_pieces += 1);
        self.wake.notify_waiters();

        tracing::trace!("Piece {} of {} verified", index, self.info_hash);
        Ok(())
    }
}

#[async_trait]
impl TorrentHandle for SwarmTorrent {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    async fn wait_for_metadata(&self) -> Result<Arc<TorrentInfo>, EngineError> {
        let mut metadata = self.metadata.subscribe();
        let mut status = self.status.subscribe();

        loop {
            if let Some(info) = metadata.borrow_and_update().clone() {
                return Ok(info);
            }
            if let Some(reason) = status.borrow_and_update().failure.clone() {
                return Err(EngineError::DownloadFailed { reason });
            }

            tokio::select! {
                changed = metadata.changed() => changed.map_err(|_| EngineError::Closed)?,
                changed = status.changed() => changed.map_err(|_| EngineError::Closed)?,
            }
        }
    }

    fn metadata(&self) -> Option<Arc<TorrentInfo>> {
        self.metadata.borrow().clone()
    }

    fn download_all(&self) {
        if !self.download_all.swap(true, Ordering::AcqRel) {
            tracing::debug!("Downloading all pieces of {}", self.info_hash);
            self.wake.notify_waiters();
        }
    }

    fn set_piece_priority(&self, index: PieceIndex, priority: PiecePriority) {
        let Some(book) = self.book.get() else {
            return;
        };
        if book.raise(index.as_u32(), priority) {
            self.wake.notify_waiters();
        }
    }

    fn piece_state(&self, index: PieceIndex) -> PieceState {
        self.book
            .get()
            .map(|book| book.state(index.as_u32()))
            .unwrap_or(PieceState::Missing)
    }

    fn bytes_completed(&self) -> u64 {
        self.bytes_completed.load(Ordering::Acquire)
    }

    fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    fn subscribe(&self) -> watch::Receiver<SwarmStatus> {
        self.status.subscribe()
    }

    async fn read_verified(
        &self,
        index: PieceIndex,
        inner_offset: u32,
        length: u32,
    ) -> Result<Bytes, EngineError> {
        if self.piece_state(index) != PieceState::Verified {
            return Err(EngineError::PieceNotVerified { index });
        }
        let info = self.metadata().ok_or(EngineError::MetadataUnavailable)?;
        let storage = self.storage.get().ok_or(EngineError::Closed)?;

        let offset = info.piece_offset(index) + u64::from(inner_offset);
        let data = storage.read_at(offset, length as usize).await?;
        Ok(Bytes::from(data))
    }

    async fn drop_torrent(&self) -> Result<(), EngineError> {
        if self.dropped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.cancel.cancel();
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            driver.abort();
            let _ = driver.await;
        }
        self.connections.store(0, Ordering::Release);
        self.status.send_if_modified(|status| {
            if status.failure.is_some() {
                return false;
            }
            status.failure = Some("torrent removed".to_string());
            true
        });

        if let Some(storage) = self.storage.get() {
            storage.remove().await?;
        }
        tracing::info!("Dropped torrent {}", self.info_hash);
        Ok(())
    }
}
