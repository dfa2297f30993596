//! Per-piece download bookkeeping shared by peer workers.

use std::sync::atomic::{AtomicU8, Ordering};

use streamtide_core::engine::{PiecePriority, PieceState};

/// State, priority and verification failures of every piece.
#[derive(Debug)]
pub struct PieceBook {
    states: Vec<AtomicU8>,
    priorities: Vec<AtomicU8>,
    failures: Vec<AtomicU8>,
}

impl PieceBook {
    /// All pieces missing at `Normal` priority.
    pub fn new(piece_count: u32) -> Self {
        let atomics = || (0..piece_count).map(|_| AtomicU8::new(0)).collect();
        Self {
            states: atomics(),
            priorities: atomics(),
            failures: atomics(),
        }
    }

    /// Number of pieces.
    pub fn len(&self) -> u32 {
        self.states.len() as u32
    }

    /// Returns true for a torrent without pieces.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Current state of `index`; out-of-range pieces read as missing.
    pub fn state(&self, index: u32) -> PieceState {
        self.states
            .get(index as usize)
            .map(|state| PieceState::from_u8(state.load(Ordering::Acquire)))
            .unwrap_or(PieceState::Missing)
    }

    /// Raises `index` to at least `priority`. Returns whether it rose.
    pub fn raise(&self, index: u32, priority: PiecePriority) -> bool {
        self.priorities
            .get(index as usize)
            .is_some_and(|slot| slot.fetch_max(priority.as_u8(), Ordering::AcqRel) < priority.as_u8())
    }

    /// Priority currently recorded for `index`.
    pub fn priority(&self, index: u32) -> PiecePriority {
        self.priorities
            .get(index as usize)
            .map(|slot| PiecePriority::from_u8(slot.load(Ordering::Acquire)))
            .unwrap_or_default()
    }

    /// Claims the next piece to fetch and marks it downloading.
    ///
    /// Highest priority wins, then lowest index. `Normal` pieces are only
    /// eligible once `download_all` is set.
    pub fn claim_next(&self, download_all: bool) -> Option<u32> {
        loop {
            let mut best: Option<(u8, usize)> = None;
            for (index, state) in self.states.iter().enumerate() {
                if state.load(Ordering::Acquire) != PieceState::Missing as u8 {
                    continue;
                }
                let priority = self.priorities[index].load(Ordering::Acquire);
                if priority == PiecePriority::Normal.as_u8() && !download_all {
                    continue;
                }
                if best.is_none_or(|(top, _)| priority > top) {
                    best = Some((priority, index));
                }
            }

            let (_, index) = best?;
            let claimed = self.states[index].compare_exchange(
                PieceState::Missing as u8,
                PieceState::Downloading as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            if claimed.is_ok() {
                return Some(index as u32);
            }
        }
    }

    /// Marks `index` verified.
    pub fn mark_verified(&self, index: u32) {
        self.states[index as usize].store(PieceState::Verified as u8, Ordering::Release);
    }

    /// Returns `index` to missing after a failed check, counting the failure.
    ///
    /// Returns the number of failures so far.
    pub fn mark_failed(&self, index: u32) -> u8 {
        self.states[index as usize].store(PieceState::Missing as u8, Ordering::Release);
        self.failures[index as usize].fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Whether every piece is verified.
    pub fn all_verified(&self) -> bool {
        self.states
            .iter()
            .all(|state| state.load(Ordering::Acquire) == PieceState::Verified as u8)
    }
}
