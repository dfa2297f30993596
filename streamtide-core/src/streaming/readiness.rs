//! Playback readiness gate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::engine::TorrentHandle;

/// Declares playback safe once a fraction of the torrent is verified.
///
/// The gate latches: after the first `true` it stays `true` for the
/// lifetime of the session.
pub struct ReadinessGate {
    handle: Arc<dyn TorrentHandle>,
    threshold: f64,
    latched: AtomicBool,
    announced: AtomicBool,
}

impl ReadinessGate {
    /// Creates a gate that opens at `threshold` (0.0 to 1.0) completion.
    pub fn new(handle: Arc<dyn TorrentHandle>, threshold: f64) -> Self {
        Self {
            handle,
            threshold,
            latched: AtomicBool::new(false),
            announced: AtomicBool::new(false),
        }
    }

    /// Returns whether enough has been downloaded to start streaming.
    pub fn ready(&self) -> bool {
        if self.latched.load(Ordering::Acquire) {
            return true;
        }

        let total = self.handle.total_length();
        if total == 0 {
            return false;
        }

        let fraction = self.handle.bytes_completed() as f64 / total as f64;
        if fraction >= self.threshold {
            self.latched.store(true, Ordering::Release);
            return true;
        }
        false
    }

    /// Returns `true` exactly once: on the first call made while ready.
    ///
    /// Independent of [`ReadinessGate::ready`], so polling readiness for
    /// display does not swallow the transition.
    pub fn became_ready(&self) -> bool {
        self.ready() && !self.announced.swap(true, Ordering::AcqRel)
    }
}
