//! Streamtide Swarm - a download engine talking to the real BitTorrent swarm.

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
//!
//! [`RqbitEngine`] implements the `streamtide-core` engine traits on top of
//! a librqbit session: peers come from trackers and the DHT, pieces are
//! verified and stored by librqbit, and magnet links resolve their
//! metadata from the swarm.
//!
//! librqbit does not expose per-piece priorities. A raised piece is instead
//! waited for through a librqbit file stream positioned on it, which makes
//! librqbit fetch that region first. Pieces learned this way are reported
//! verified to the streaming core.
//!
//! # Example
//!
//! ```rust,no_run
//! use streamtide_core::config::EngineConfig;
//! use streamtide_core::engine::DownloadEngine;
//! use streamtide_rqbit::RqbitEngine;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = RqbitEngine::new(&EngineConfig::default()).await?;
//! let torrent = engine.add_magnet("magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567").await?;
//! let info = torrent.wait_for_metadata().await?;
//! println!("{} has {} pieces", info.name, info.piece_count);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod layout;
pub mod torrent;

pub use engine::RqbitEngine;
pub use layout::{FileSegment, file_segments};
pub use torrent::{PieceStates, RqbitTorrent};
