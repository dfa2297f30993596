//! Controllable engine doubles for unit and integration tests.
//!
//! `MockTorrent` never downloads anything on its own: tests decide when
//! metadata arrives and which pieces become verified.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{
    DownloadEngine, EngineError, FileEntry, PiecePriority, PieceState, SwarmStatus,
    TorrentHandle, TorrentInfo,
};
use crate::streaming::{piece_count, piece_length};
use crate::torrent::{InfoHash, PieceIndex};

/// Torrent whose piece completion is driven by the test.
pub struct MockTorrent {
    info: Arc<TorrentInfo>,
    content: Bytes,
    metadata: watch::Sender<Option<Arc<TorrentInfo>>>,
    status: watch::Sender<SwarmStatus>,
    states: Vec<AtomicU8>,
    priorities: Vec<AtomicU8>,
    priority_calls: Mutex<Vec<(PieceIndex, PiecePriority)>>,
    bytes_completed: AtomicU64,
    download_all_requested: AtomicBool,
    dropped: AtomicBool,
    events: Arc<Mutex<Vec<String>>>,
}

impl MockTorrent {
    /// Single-file torrent over `content`, metadata available immediately.
    pub fn new(name: &str, content: Vec<u8>, piece_length: u32) -> Self {
        let length = content.len() as u64;
        Self::with_files(name, content, piece_length, &[(name, length)])
    }

    /// Multi-file torrent; `files` lengths must sum to `content.len()`.
    ///
    /// # Panics
    ///
    /// Panics if file lengths do not cover `content` exactly.
    pub fn with_files(name: &str, content: Vec<u8>, piece_len: u32, files: &[(&str, u64)]) -> Self {
        let total_length = content.len() as u64;
        assert_eq!(
            files.iter().map(|(_, len)| len).sum::<u64>(),
            total_length,
            "file lengths must cover content"
        );

        let mut offset = 0;
        let files = files
            .iter()
            .map(|(path, length)| {
                let entry = FileEntry {
                    path: path.to_string(),
                    length: *length,
                    offset,
                };
                offset += length;
                entry
            })
            .collect();

        let count = piece_count(total_length, piece_len);
        let info = Arc::new(TorrentInfo {
            info_hash: InfoHash::new([9u8; 20]),
            name: name.to_string(),
            piece_length: piece_len,
            piece_count: count,
            total_length,
            files,
        });

        Self {
            metadata: watch::Sender::new(Some(info.clone())),
            info,
            content: Bytes::from(content),
            status: watch::Sender::new(SwarmStatus::default()),
            states: (0..count).map(|_| AtomicU8::new(0)).collect(),
            priorities: (0..count).map(|_| AtomicU8::new(0)).collect(),
            priority_calls: Mutex::new(Vec::new()),
            bytes_completed: AtomicU64::new(0),
            download_all_requested: AtomicBool::new(false),
            dropped: AtomicBool::new(false),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Holds metadata back until [`MockTorrent::publish_metadata`].
    pub fn without_metadata(self) -> Self {
        self.metadata.send_replace(None);
        self
    }

    /// Makes metadata available to waiters.
    pub fn publish_metadata(&self) {
        self.metadata.send_replace(Some(self.info.clone()));
    }

    /// Marks piece `index` verified and broadcasts the change.
    pub fn verify_piece(&self, index: u32) {
        let previous = self.states[index as usize].swap(PieceState::Verified as u8, Ordering::AcqRel);
        if previous != PieceState::Verified as u8 {
            let len = piece_length(self.info.total_length, self.info.piece_length, index);
            self.bytes_completed
                .fetch_add(u64::from(len), Ordering::AcqRel);
            self.status.send_modify(|status| status.verified_pieces += 1);
        }
    }

    /// Verifies every piece.
    pub fn verify_all(&self) {
        for index in 0..self.info.piece_count {
            self.verify_piece(index);
        }
    }

    /// Marks the torrent as failed.
    pub fn fail(&self, reason: &str) {
        self.status
            .send_modify(|status| status.failure = Some(reason.to_string()));
    }

    /// Every priority raise forwarded by callers, in order.
    pub fn priority_calls(&self) -> Vec<(PieceIndex, PiecePriority)> {
        self.priority_calls.lock().clone()
    }

    /// Highest priority requested for `index`.
    pub fn priority(&self, index: u32) -> PiecePriority {
        PiecePriority::from_u8(self.priorities[index as usize].load(Ordering::Acquire))
    }

    /// Whether `download_all` was called.
    pub fn download_all_requested(&self) -> bool {
        self.download_all_requested.load(Ordering::Acquire)
    }

    /// Whether `drop_torrent` was called.
    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    /// Full torrent content.
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Layout of the torrent.
    pub fn info(&self) -> Arc<TorrentInfo> {
        self.info.clone()
    }

    /// Lifecycle events shared with the owning [`MockEngine`].
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl TorrentHandle for MockTorrent {
    fn info_hash(&self) -> InfoHash {
        self.info.info_hash
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
        self.download_all_requested.store(true, Ordering::Release);
        self.events.lock().push("download_all".to_string());
    }

    fn set_piece_priority(&self, index: PieceIndex, priority: PiecePriority) {
        self.priorities[index.as_usize()].fetch_max(priority.as_u8(), Ordering::AcqRel);
        self.priority_calls.lock().push((index, priority));
    }

    fn piece_state(&self, index: PieceIndex) -> PieceState {
        PieceState::from_u8(self.states[index.as_usize()].load(Ordering::Acquire))
    }

    fn bytes_completed(&self) -> u64 {
        self.bytes_completed.load(Ordering::Acquire)
    }

    fn connection_count(&self) -> usize {
        3
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

        let start = self.info.piece_offset(index) as usize + inner_offset as usize;
        let end = start + length as usize;
        if end > self.content.len() {
            return Err(EngineError::Storage {
                reason: format!("read {start}..{end} past end of content"),
            });
        }
        Ok(self.content.slice(start..end))
    }

    async fn drop_torrent(&self) -> Result<(), EngineError> {
        self.dropped.store(true, Ordering::Release);
        self.events.lock().push("drop".to_string());
        Ok(())
    }
}

/// Engine that hands out a preconfigured [`MockTorrent`].
pub struct MockEngine {
    torrent: Arc<MockTorrent>,
    reject_adds: bool,
    closed: AtomicBool,
}

impl MockEngine {
    /// Engine whose adds all resolve to `torrent`.
    pub fn new(torrent: Arc<MockTorrent>) -> Self {
        Self {
            torrent,
            reject_adds: false,
            closed: AtomicBool::new(false),
        }
    }

    /// Engine whose adds all fail with `InvalidTorrent`.
    pub fn rejecting(torrent: Arc<MockTorrent>) -> Self {
        Self {
            reject_adds: true,
            ..Self::new(torrent)
        }
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn add(&self, event: String) -> Result<Arc<dyn TorrentHandle>, EngineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        if self.reject_adds {
            return Err(EngineError::InvalidTorrent {
                reason: "rejected by mock".to_string(),
            });
        }
        self.torrent.events.lock().push(event);
        Ok(self.torrent.clone())
    }
}

#[async_trait]
impl DownloadEngine for MockEngine {
    async fn add_magnet(&self, uri: &str) -> Result<Arc<dyn TorrentHandle>, EngineError> {
        self.add(format!("add_magnet:{uri}"))
    }

    async fn add_torrent_file(&self, path: &Path) -> Result<Arc<dyn TorrentHandle>, EngineError> {
        self.add(format!("add_file:{}", path.display()))
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.closed.store(true, Ordering::Release);
        self.torrent.events.lock().push("close".to_string());
        Ok(())
    }
}
