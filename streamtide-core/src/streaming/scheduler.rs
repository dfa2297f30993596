//! Per-piece download priority bookkeeping.
//!
//! Levels only ever rise. The scheduler records the highest level requested
//! for each piece and forwards a raise to the engine only when the recorded
//! level actually changed, so overlapping reads do not flood the engine
//! with duplicate requests.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::engine::{PiecePriority, PieceState, TorrentHandle};
use crate::torrent::PieceIndex;

/// Number of pieces covered by the initial readahead for `piece_count`
/// pieces at `percent` percent, rounded up.
pub fn initial_readahead_count(piece_count: u32, percent: u32) -> u32 {
    (u64::from(piece_count) * u64::from(percent)).div_ceil(100) as u32
}

/// Tracks the priority level of every piece of one torrent.
pub struct PriorityScheduler {
    handle: Arc<dyn TorrentHandle>,
    levels: Vec<AtomicU8>,
    readahead_percent: u32,
    initial_readahead_done: AtomicBool,
}

impl PriorityScheduler {
    /// Creates a scheduler with every piece at `Normal`.
    pub fn new(handle: Arc<dyn TorrentHandle>, piece_count: u32, readahead_percent: u32) -> Self {
        Self {
            handle,
            levels: (0..piece_count).map(|_| AtomicU8::new(0)).collect(),
            readahead_percent,
            initial_readahead_done: AtomicBool::new(false),
        }
    }

    /// Number of pieces tracked.
    pub fn piece_count(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Raises every piece in `pieces` to at least `level`.
    ///
    /// # Panics
    ///
    /// Panics if the range reaches past the last piece.
    pub fn bump(&self, pieces: RangeInclusive<u32>, level: PiecePriority) {
        if pieces.is_empty() {
            return;
        }
        assert!(
            (*pieces.end() as usize) < self.levels.len(),
            "piece {} out of range for {} pieces",
            pieces.end(),
            self.levels.len()
        );

        for index in pieces {
            let slot = &self.levels[index as usize];
            let previous = slot.fetch_max(level.as_u8(), Ordering::AcqRel);
            if previous >= level.as_u8() {
                continue;
            }

            let piece = PieceIndex::new(index);
            if self.handle.piece_state(piece) == PieceState::Verified {
                continue;
            }

            // A racing bump may forward a lower level after a higher one;
            // engines treat every call as a raise.
            tracing::trace!("Raising piece {} to {:?}", index, level);
            self.handle.set_piece_priority(piece, level);
        }
    }

    /// Current recorded level of `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn level(&self, index: u32) -> PiecePriority {
        PiecePriority::from_u8(self.levels[index as usize].load(Ordering::Acquire))
    }

    /// Bumps the leading pieces of the torrent to `Readahead`.
    ///
    /// Only the first call has any effect.
    pub fn initial_readahead(&self) {
        if self.initial_readahead_done.swap(true, Ordering::AcqRel) {
            return;
        }

        let count = initial_readahead_count(self.piece_count(), self.readahead_percent);
        if count == 0 {
            return;
        }
        tracing::debug!(
            "Initial readahead of {} of {} pieces",
            count,
            self.piece_count()
        );
        self.bump(0..=count - 1, PiecePriority::Readahead);
    }
}
