//! One torrent inside the librqbit session.
//!
//! A driver task adds the torrent to the session, waits for librqbit to
//! resolve metadata and check existing data, publishes the piece layout and
//! then mirrors librqbit's statistics until the torrent is dropped. Raised
//! pieces are awaited through librqbit file streams; each one that arrives
//! is recorded in [`PieceStates`] and announced to subscribers.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use librqbit::api::TorrentIdOrHash;
use librqbit::{AddTorrent, AddTorrentOptions, AddTorrentResponse, ManagedTorrent, Session};
use parking_lot::Mutex;
use streamtide_core::engine::{
    EngineError, FileEntry, PiecePriority, PieceState, SwarmStatus, TorrentHandle, TorrentInfo,
};
use streamtide_core::torrent::{InfoHash, PieceIndex};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::layout::file_segments;

/// Same as librqbit's `ManagedTorrentHandle`, which is not re-exported.
type ManagedTorrentHandle = Arc<ManagedTorrent>;

const STATS_INTERVAL: Duration = Duration::from_millis(500);

/// Engine-wide settings copied into each torrent.
#[derive(Debug, Clone)]
pub struct RqbitSettings {
    /// Directory torrent data is written under
    pub data_dir: PathBuf,
    /// Keep serving peers after the download completes
    pub seed: bool,
}

/// Which pieces are known to be verified, and which are being awaited.
pub struct PieceStates {
    states: Vec<AtomicU8>,
    awaited: Vec<AtomicBool>,
}

impl PieceStates {
    /// Every piece starts out missing.
    pub fn new(piece_count: u32) -> Self {
        Self {
            states: (0..piece_count)
                .map(|_| AtomicU8::new(PieceState::Missing as u8))
                .collect(),
            awaited: (0..piece_count).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// State of `index`; unknown pieces are missing.
    pub fn state(&self, index: u32) -> PieceState {
        self.states
            .get(index as usize)
            .map(|state| PieceState::from_u8(state.load(Ordering::Acquire)))
            .unwrap_or(PieceState::Missing)
    }

    /// Claims `index` for a wait. Returns false when the piece is already
    /// verified or someone else is waiting on it.
    pub fn claim(&self, index: u32) -> bool {
        let Some(awaited) = self.awaited.get(index as usize) else {
            return false;
        };
        if self.state(index) == PieceState::Verified || awaited.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.states[index as usize].store(PieceState::Downloading as u8, Ordering::Release);
        true
    }

    /// Gives up a claim so a later raise can retry.
    pub fn release(&self, index: u32) {
        if let Some(awaited) = self.awaited.get(index as usize) {
            let _ = self.states[index as usize].compare_exchange(
                PieceState::Downloading as u8,
                PieceState::Missing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            awaited.store(false, Ordering::Release);
        }
    }

    /// Marks `index` verified. Returns true the first time only.
    pub fn mark_verified(&self, index: u32) -> bool {
        self.states
            .get(index as usize)
            .map(|state| state.swap(PieceState::Verified as u8, Ordering::AcqRel))
            .is_some_and(|previous| previous != PieceState::Verified as u8)
    }

    /// Marks every piece verified and returns how many were not already.
    pub fn mark_all_verified(&self) -> u32 {
        (0..self.states.len() as u32)
            .filter(|index| self.mark_verified(*index))
            .count() as u32
    }

    /// Number of verified pieces.
    pub fn verified_count(&self) -> u32 {
        (0..self.states.len() as u32)
            .filter(|index| self.state(*index) == PieceState::Verified)
            .count() as u32
    }
}

/// Everything known once librqbit has the torrent ready.
struct Live {
    id: usize,
    handle: ManagedTorrentHandle,
    info: Arc<TorrentInfo>,
    pieces: PieceStates,
}

impl Live {
    /// Reads `length` torrent bytes from `offset`, waiting for librqbit to
    /// fetch and verify them.
    async fn read_range(&self, offset: u64, length: u64) -> Result<Bytes, EngineError> {
        let mut data = BytesMut::with_capacity(length as usize);

        for segment in file_segments(&self.info.files, offset, length) {
            let stream = self
                .handle
                .clone()
                .stream(segment.file_index)
                .map_err(|e| EngineError::Storage {
                    reason: format!("{e:#}"),
                })?;
            let mut stream = Box::pin(stream);
            stream.seek(SeekFrom::Start(segment.file_offset)).await?;

            let start = data.len();
            data.resize(start + segment.length as usize, 0);
            stream.read_exact(&mut data[start..]).await?;
        }
        Ok(data.freeze())
    }

    async fn await_piece(&self, index: PieceIndex, status: &watch::Sender<SwarmStatus>) {
        // librqbit only hands out verified data, so one byte proves the piece.
        match self.read_range(self.info.piece_offset(index), 1).await {
            Ok(_) => {
                if self.pieces.mark_verified(index.as_u32()) {
                    status.send_modify(|status| status.verified_pieces += 1);
                }
            }
            Err(e) => {
                tracing::debug!("Waiting on piece {} failed: {}", index, e);
                self.pieces.release(index.as_u32());
            }
        }
    }
}

/// Torrent handle backed by a librqbit session.
pub struct RqbitTorrent {
    info_hash: InfoHash,
    session: Arc<Session>,
    settings: RqbitSettings,
    metadata: watch::Sender<Option<Arc<TorrentInfo>>>,
    status: Arc<watch::Sender<SwarmStatus>>,
    live: OnceLock<Arc<Live>>,
    waits: Mutex<JoinSet<()>>,
    bytes_completed: AtomicU64,
    connections: AtomicUsize,
    download_all: AtomicBool,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicBool,
}

impl RqbitTorrent {
    /// Adds `add` to `session` in the background.
    pub fn spawn(
        info_hash: InfoHash,
        session: Arc<Session>,
        settings: RqbitSettings,
        add: AddTorrent<'static>,
    ) -> Arc<Self> {
        let torrent = Arc::new(Self {
            info_hash,
            session,
            settings,
            metadata: watch::Sender::new(None),
            status: Arc::new(watch::Sender::new(SwarmStatus::default())),
            live: OnceLock::new(),
            waits: Mutex::new(JoinSet::new()),
            bytes_completed: AtomicU64::new(0),
            connections: AtomicUsize::new(0),
            download_all: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
            dropped: AtomicBool::new(false),
        });

        let driver = tokio::spawn(torrent.clone().drive(add));
        *torrent.driver.lock() = Some(driver);
        torrent
    }

    /// Whether `drop_torrent` has run.
    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    /// Directory librqbit writes this torrent's files to.
    pub fn output_folder(&self) -> PathBuf {
        self.settings.data_dir.join(self.info_hash.to_string())
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

    async fn drive(self: Arc<Self>, add: AddTorrent<'static>) {
        let options = AddTorrentOptions {
            overwrite: true,
            output_folder: Some(self.output_folder().to_string_lossy().into_owned()),
            ..Default::default()
        };

        let added = tokio::select! {
            _ = self.cancel.cancelled() => return,
            added = self.session.add_torrent(add, Some(options)) => added,
        };
        let (id, handle) = match added {
            Ok(AddTorrentResponse::Added(id, handle))
            | Ok(AddTorrentResponse::AlreadyManaged(id, handle)) => (id, handle),
            Ok(AddTorrentResponse::ListOnly(_)) => {
                self.fail("session only listed the torrent");
                return;
            }
            Err(e) => {
                self.fail(format!("{e:#}"));
                return;
            }
        };

        let initialized = tokio::select! {
            _ = self.cancel.cancelled() => return,
            initialized = handle.wait_until_initialized() => initialized,
        };
        if let Err(e) = initialized {
            self.fail(format!("{e:#}"));
            return;
        }

        let Some(info) = torrent_info(self.info_hash, &handle) else {
            self.fail("metadata unavailable after initialization");
            return;
        };
        let info = Arc::new(info);
        let live = Arc::new(Live {
            id,
            handle,
            pieces: PieceStates::new(info.piece_count),
            info: info.clone(),
        });
        let _ = self.live.set(live.clone());
        self.metadata.send_replace(Some(info.clone()));
        tracing::info!(
            "Metadata ready for {} ({} pieces)",
            info.name,
            info.piece_count
        );

        self.mirror_stats(&live).await;
    }

    /// Copies librqbit statistics into the handle until cancelled.
    async fn mirror_stats(&self, live: &Live) {
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        let mut finished = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let stats = live.handle.stats();
            self.bytes_completed
                .store(stats.progress_bytes, Ordering::Release);
            let peers = stats
                .live
                .as_ref()
                .map(|l| l.snapshot.peer_stats.live as usize)
                .unwrap_or(0);
            self.connections.store(peers, Ordering::Release);

            if let Some(error) = stats.error {
                self.fail(error);
                return;
            }
            if stats.finished && !finished {
                finished = true;
                let newly_verified = live.pieces.mark_all_verified();
                if newly_verified > 0 {
                    self.status
                        .send_modify(|status| status.verified_pieces += newly_verified);
                }
                if self.settings.seed {
                    tracing::info!("Download of {} complete, seeding", live.info.name);
                } else {
                    tracing::info!("Download of {} complete", live.info.name);
                }
            }
        }
    }
}

/// Piece layout and file list from librqbit's metadata.
fn torrent_info(info_hash: InfoHash, handle: &ManagedTorrentHandle) -> Option<TorrentInfo> {
    let metadata = handle.metadata.load();
    let Some(meta) = &*metadata else {
        return None;
    };

    let mut offset = 0;
    let files = meta
        .info
        .iter_file_details()
        .ok()?
        .map(|file| {
            let entry = FileEntry {
                path: file
                    .filename
                    .to_string()
                    .unwrap_or_else(|_| format!("file-{offset}")),
                length: file.len,
                offset,
            };
            offset += file.len;
            entry
        })
        .collect();

    Some(TorrentInfo {
        info_hash,
        name: meta.name.clone().unwrap_or_else(|| info_hash.to_string()),
        piece_length: meta.lengths.default_piece_length(),
        piece_count: meta.lengths.total_pieces(),
        total_length: meta.lengths.total_length(),
        files,
    })
}

#[async_trait]
impl TorrentHandle for RqbitTorrent {
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
        // librqbit fetches every selected piece on its own.
        if !self.download_all.swap(true, Ordering::AcqRel) {
            tracing::debug!("Downloading all pieces of {}", self.info_hash);
        }
    }

    fn set_piece_priority(&self, index: PieceIndex, priority: PiecePriority) {
        if priority == PiecePriority::Normal {
            return;
        }
        let Some(live) = self.live.get() else {
            return;
        };
        if !live.pieces.claim(index.as_u32()) {
            return;
        }

        tracing::trace!(
            "Awaiting piece {} of {} at {:?}",
            index,
            self.info_hash,
            priority
        );
        let live = live.clone();
        let status = self.status.clone();
        let cancel = self.cancel.clone();

        let mut waits = self.waits.lock();
        while waits.try_join_next().is_some() {}
        waits.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = live.await_piece(index, &status) => {}
            }
        });
    }

    fn piece_state(&self, index: PieceIndex) -> PieceState {
        self.live
            .get()
            .map(|live| live.pieces.state(index.as_u32()))
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
        let live = self.live.get().ok_or(EngineError::MetadataUnavailable)?;

        let offset = live.info.piece_offset(index) + u64::from(inner_offset);
        tokio::select! {
            _ = self.cancel.cancelled() => Err(EngineError::Closed),
            data = live.read_range(offset, u64::from(length)) => data,
        }
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
        self.waits.lock().abort_all();
        self.connections.store(0, Ordering::Release);
        self.status.send_if_modified(|status| {
            if status.failure.is_some() {
                return false;
            }
            status.failure = Some("torrent removed".to_string());
            true
        });

        if let Some(live) = self.live.get() {
            self.session
                .delete(TorrentIdOrHash::Id(live.id), true)
                .await
                .map_err(|e| EngineError::Storage {
                    reason: format!("{e:#}"),
                })?;
        }
        match tokio::fs::remove_dir_all(self.output_folder()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!("Dropped torrent {}", self.info_hash);
        Ok(())
    }
}
