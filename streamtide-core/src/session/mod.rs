//! Stream session lifecycle.
//!
//! A [`StreamSession`] owns one torrent inside a download engine. Starting
//! it resolves the source and adds the torrent; a background task then
//! waits for metadata, requests the full download, applies the initial
//! readahead and publishes the largest file as the stream target.
//! [`StreamSession::shutdown`] tears everything down in a fixed order:
//! cancel reads, stop the background task, drop the torrent, close the
//! engine.

pub mod source;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use source::{ResolvedSource, TorrentSource};

use crate::config::StreamingConfig;
use crate::engine::{DownloadEngine, EngineError, TorrentHandle, TorrentInfo};
use crate::streaming::{
    FileStream, PriorityScheduler, ProgressiveReader, ReadError, ReadinessGate,
};

/// Errors that prevent a session from starting.
#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    #[error("download engine could not be started: {0}")]
    EngineInit(#[source] EngineError),

    #[error("torrent could not be added: {0}")]
    AddTorrent(#[source] EngineError),

    #[error("failed to fetch {url}: {reason}")]
    RemoteFetch { url: String, reason: String },

    #[error("torrent file not found: {}", path.display())]
    FileNotFound { path: std::path::PathBuf },

    #[error("temporary file error: {0}")]
    TempFile(#[from] std::io::Error),
}

/// The file being streamed, available once metadata has arrived.
pub struct StreamTarget {
    pub info: Arc<TorrentInfo>,
    pub reader: Arc<ProgressiveReader>,
    pub scheduler: Arc<PriorityScheduler>,
}

impl StreamTarget {
    /// Torrent display name.
    pub fn name(&self) -> &str {
        &self.info.name
    }
}

/// Progress of the background setup task.
#[derive(Clone, Default)]
pub enum TargetState {
    #[default]
    Pending,
    Ready(Arc<StreamTarget>),
    Failed(String),
}

/// Point-in-time view of the session for status displays.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SessionStatus {
    pub name: String,
    pub total_bytes: u64,
    pub completed_bytes: u64,
    pub connections: usize,
    pub ready: bool,
}

/// One torrent being streamed.
pub struct StreamSession {
    engine: Arc<dyn DownloadEngine>,
    handle: Arc<dyn TorrentHandle>,
    config: StreamingConfig,
    target: Arc<watch::Sender<TargetState>>,
    readiness: ReadinessGate,
    cancel: CancellationToken,
    setup_task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
    _source: ResolvedSource,
}

impl StreamSession {
    /// Adds `source` to `engine` and starts background setup.
    ///
    /// Returns as soon as the torrent is added; metadata arrives later.
    ///
    /// # Errors
    /// - `ConstructionError::FileNotFound` - Local torrent file missing
    /// - `ConstructionError::RemoteFetch` - Remote torrent file download failed
    /// - `ConstructionError::AddTorrent` - Engine rejected the torrent
    pub async fn start(
        engine: Arc<dyn DownloadEngine>,
        source: TorrentSource,
        config: StreamingConfig,
    ) -> Result<Arc<Self>, ConstructionError> {
        tracing::info!("Starting session for {}", source);
        let resolved = source.resolve().await?;

        let handle = match &resolved {
            ResolvedSource::Magnet(uri) => engine.add_magnet(uri).await,
            ResolvedSource::File { path, .. } => engine.add_torrent_file(path).await,
        }
        .map_err(ConstructionError::AddTorrent)?;
        tracing::info!("Added torrent {}", handle.info_hash());

        let session = Arc::new(Self {
            readiness: ReadinessGate::new(handle.clone(), config.readiness_threshold),
            engine,
            handle,
            config,
            target: Arc::new(watch::Sender::new(TargetState::Pending)),
            cancel: CancellationToken::new(),
            setup_task: Mutex::new(None),
            shut_down: AtomicBool::new(false),
            _source: resolved,
        });

        let task = tokio::spawn(prepare_target(
            session.handle.clone(),
            session.config.clone(),
            session.target.clone(),
            session.cancel.clone(),
        ));
        *session.setup_task.lock() = Some(task);

        Ok(session)
    }

    /// Torrent handle owned by this session.
    pub fn handle(&self) -> &Arc<dyn TorrentHandle> {
        &self.handle
    }

    /// Streaming settings in effect.
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Stream target, if setup has finished.
    pub fn target(&self) -> Option<Arc<StreamTarget>> {
        match &*self.target.borrow() {
            TargetState::Ready(target) => Some(target.clone()),
            _ => None,
        }
    }

    /// Suspends until the stream target is published.
    ///
    /// # Errors
    /// - `ReadError::EngineFailure` - Metadata could not be resolved
    /// - `ReadError::Cancelled` - Session shut down first
    pub async fn wait_for_target(&self) -> Result<Arc<StreamTarget>, ReadError> {
        let mut state = self.target.subscribe();
        loop {
            match &*state.borrow_and_update() {
                TargetState::Ready(target) => return Ok(target.clone()),
                TargetState::Failed(reason) => {
                    return Err(ReadError::EngineFailure {
                        reason: reason.clone(),
                    });
                }
                TargetState::Pending => {}
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ReadError::Cancelled),
                changed = state.changed() => {
                    if changed.is_err() {
                        return Err(ReadError::Cancelled);
                    }
                }
            }
        }
    }

    /// Opens a fresh cursor over the stream target.
    ///
    /// Each stream gets a child of the session's cancellation token, so
    /// shutdown releases every blocked read.
    pub fn open_stream(&self) -> Option<FileStream> {
        let target = self.target()?;
        Some(FileStream::new(
            target.reader.clone(),
            self.cancel.child_token(),
            self.config.max_read_chunk,
        ))
    }

    /// Token cancelled on shutdown.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether enough has been downloaded to start playback.
    pub fn ready(&self) -> bool {
        self.readiness.ready()
    }

    /// True exactly once, when readiness first turns on.
    pub fn became_ready(&self) -> bool {
        self.readiness.became_ready()
    }

    /// Snapshot of aggregate progress.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            name: self.handle.name(),
            total_bytes: self.handle.total_length(),
            completed_bytes: self.handle.bytes_completed(),
            connections: self.handle.connection_count(),
            ready: self.ready(),
        }
    }

    /// Whether [`StreamSession::shutdown`] has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Tears the session down. Later calls do nothing.
    ///
    /// Failures are logged rather than returned; there is nothing left for
    /// the caller to do about them.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Shutting down session for {}", self.handle.name());

        self.cancel.cancel();
        if let Some(task) = self.setup_task.lock().take() {
            task.abort();
        }

        if let Err(e) = self.handle.drop_torrent().await {
            tracing::warn!("Failed to drop torrent: {}", e);
        }
        if let Err(e) = self.engine.close().await {
            tracing::warn!("Failed to close download engine: {}", e);
        }
    }
}

async fn prepare_target(
    handle: Arc<dyn TorrentHandle>,
    config: StreamingConfig,
    target: Arc<watch::Sender<TargetState>>,
    cancel: CancellationToken,
) {
    let metadata = tokio::select! {
        _ = cancel.cancelled() => return,
        metadata = handle.wait_for_metadata() => metadata,
    };
    let info = match metadata {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!("Metadata unavailable for {}: {}", handle.info_hash(), e);
            target.send_replace(TargetState::Failed(e.to_string()));
            return;
        }
    };
    tracing::info!(
        "Metadata for {}: {} pieces of {} bytes, {} files",
        info.name,
        info.piece_count,
        info.piece_length,
        info.files.len()
    );

    handle.download_all();
    let scheduler = Arc::new(PriorityScheduler::new(
        handle.clone(),
        info.piece_count,
        config.initial_readahead_percent,
    ));
    scheduler.initial_readahead();

    let Some(file) = info.largest_file().cloned() else {
        tracing::warn!("Torrent {} contains no files", info.name);
        target.send_replace(TargetState::Failed("torrent contains no files".to_string()));
        return;
    };
    tracing::info!("Streaming {} ({} bytes)", file.path, file.length);

    let reader = Arc::new(ProgressiveReader::new(
        handle,
        scheduler.clone(),
        info.clone(),
        file,
        config.readahead_window_pieces,
    ));
    target.send_replace(TargetState::Ready(Arc::new(StreamTarget {
        info,
        reader,
        scheduler,
    })));
}
