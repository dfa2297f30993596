//! Random-access reads over a file whose pieces are still downloading.
//!
//! Each read maps its byte range onto pieces, raises their priority to
//! `Now` (and the following window to `Readahead`), then suspends on the
//! engine's completion signal until every piece is verified before copying
//! the bytes out of engine storage.

use std::io;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;

use super::piece_index::{LocateError, PieceSpan, locate};
use super::scheduler::PriorityScheduler;
use crate::engine::{FileEntry, PiecePriority, PieceState, TorrentHandle, TorrentInfo};
use crate::torrent::PieceIndex;

/// Errors returned by [`ProgressiveReader::read_at`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    #[error("offset {offset} is past the end of the file ({file_length} bytes)")]
    OutOfRange { offset: u64, file_length: u64 },

    #[error("read cancelled")]
    Cancelled,

    #[error("download engine failure: {reason}")]
    EngineFailure { reason: String },
}

impl ReadError {
    /// Recovers a `ReadError` carried inside an `io::Error`.
    pub fn from_io(error: &io::Error) -> Option<&ReadError> {
        error
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<ReadError>())
    }
}

impl From<ReadError> for io::Error {
    fn from(error: ReadError) -> Self {
        let kind = match error {
            ReadError::OutOfRange { .. } => io::ErrorKind::InvalidInput,
            ReadError::Cancelled => io::ErrorKind::ConnectionAborted,
            ReadError::EngineFailure { .. } => io::ErrorKind::Other,
        };
        io::Error::new(kind, error)
    }
}

/// Reads one file of a torrent, waiting for pieces as needed.
pub struct ProgressiveReader {
    handle: Arc<dyn TorrentHandle>,
    scheduler: Arc<PriorityScheduler>,
    info: Arc<TorrentInfo>,
    file: FileEntry,
    readahead_window: u32,
    last_read_end: AtomicU64,
}

impl ProgressiveReader {
    /// Creates a reader for `file`, which must belong to `info`.
    pub fn new(
        handle: Arc<dyn TorrentHandle>,
        scheduler: Arc<PriorityScheduler>,
        info: Arc<TorrentInfo>,
        file: FileEntry,
        readahead_window: u32,
    ) -> Self {
        Self {
            handle,
            scheduler,
            info,
            file,
            readahead_window,
            last_read_end: AtomicU64::new(0),
        }
    }

    /// File being read.
    pub fn file(&self) -> &FileEntry {
        &self.file
    }

    /// File length in bytes.
    pub fn len(&self) -> u64 {
        self.file.length
    }

    /// Returns true for a zero-length file.
    pub fn is_empty(&self) -> bool {
        self.file.length == 0
    }

    /// End offset of the most recent completed read.
    pub fn last_read_offset(&self) -> u64 {
        self.last_read_end.load(Ordering::Acquire)
    }

    /// Reads up to `length` bytes at `offset`.
    ///
    /// Returns exactly `length` bytes unless the request crosses the end of
    /// the file, in which case the bytes up to the end are returned.
    /// Suspends until the backing pieces are verified.
    ///
    /// # Errors
    /// - `ReadError::OutOfRange` - `offset` is at or past the end of the file
    /// - `ReadError::Cancelled` - `cancel` fired before the pieces arrived
    /// - `ReadError::EngineFailure` - Engine gave up or storage read failed
    pub async fn read_at(
        &self,
        offset: u64,
        length: u64,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ReadError> {
        if offset >= self.file.length {
            return Err(ReadError::OutOfRange {
                offset,
                file_length: self.file.length,
            });
        }
        if cancel.is_cancelled() {
            return Err(ReadError::Cancelled);
        }

        let length = length.min(self.file.length - offset);
        let span = match locate(
            self.file.offset,
            self.file.length,
            self.info.piece_length,
            offset,
            length,
        ) {
            Ok(span) => span,
            Err(LocateError::EmptyRequest { .. }) => return Ok(Bytes::new()),
            Err(LocateError::OutOfRange { .. }) => {
                return Err(ReadError::OutOfRange {
                    offset,
                    file_length: self.file.length,
                });
            }
        };

        self.scheduler.bump(span.pieces(), PiecePriority::Now);
        if let Some(window) = self.readahead_pieces(&span) {
            self.scheduler.bump(window, PiecePriority::Readahead);
        }

        self.wait_for_pieces(span.pieces(), cancel).await?;
        let data = self.copy_out(&span).await?;

        self.last_read_end
            .store(offset + data.len() as u64, Ordering::Release);
        Ok(data)
    }

    /// Pieces following `span` that belong to this file, up to the window size.
    fn readahead_pieces(&self, span: &PieceSpan) -> Option<RangeInclusive<u32>> {
        if self.readahead_window == 0 {
            return None;
        }
        let file_end = self.file.offset + self.file.length;
        let last_file_piece = ((file_end - 1) / u64::from(self.info.piece_length)) as u32;

        let start = span.last_piece + 1;
        let end = span
            .last_piece
            .saturating_add(self.readahead_window)
            .min(last_file_piece);
        (start <= end).then_some(start..=end)
    }

    async fn wait_for_pieces(
        &self,
        pieces: RangeInclusive<u32>,
        cancel: &CancellationToken,
    ) -> Result<(), ReadError> {
        let mut status = self.handle.subscribe();

        loop {
            let failure = status.borrow_and_update().failure.clone();

            let all_verified = pieces
                .clone()
                .all(|piece| self.handle.piece_state(PieceIndex::new(piece)) == PieceState::Verified);
            if all_verified {
                return Ok(());
            }
            if let Some(reason) = failure {
                return Err(ReadError::EngineFailure { reason });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ReadError::Cancelled),
                changed = status.changed() => {
                    if changed.is_err() {
                        return Err(ReadError::EngineFailure {
                            reason: "completion signal closed".to_string(),
                        });
                    }
                }
            }
        }
    }

    async fn copy_out(&self, span: &PieceSpan) -> Result<Bytes, ReadError> {
        let mut buffer = BytesMut::new();

        for piece in span.pieces() {
            let index = PieceIndex::new(piece);
            let range = span.inner_range(piece, self.info.piece_size(index));
            let chunk = self
                .handle
                .read_verified(index, range.start, range.len() as u32)
                .await
                .map_err(|e| ReadError::EngineFailure {
                    reason: e.to_string(),
                })?;

            if span.piece_count() == 1 {
                return Ok(chunk);
            }
            buffer.extend_from_slice(&chunk);
        }

        Ok(buffer.freeze())
    }
}
