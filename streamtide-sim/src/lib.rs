//! Streamtide Local Swarm - a download engine backed by a seed directory.

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
//!
//! [`LocalSwarmEngine`] implements the `streamtide-core` engine traits
//! without touching the network. Torrents are resolved against `.torrent`
//! files in a swarm directory and their pieces are fetched from the
//! matching content through simulated peer connections, with SHA-1
//! verification and an optional bandwidth limit. It lets the streaming
//! core run end to end during development and in tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use streamtide_core::config::{EngineConfig, SwarmConfig};
//! use streamtide_core::engine::DownloadEngine;
//! use streamtide_sim::LocalSwarmEngine;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = LocalSwarmEngine::new(&SwarmConfig::default(), &EngineConfig::default()).await?;
//! let torrent = engine.add_magnet("magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567").await?;
//! let info = torrent.wait_for_metadata().await?;
//! println!("{} has {} pieces", info.name, info.piece_count);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod fixtures;
pub mod pieces;
pub mod seeds;
pub mod storage;
pub mod token_bucket;
pub mod torrent;

pub use engine::LocalSwarmEngine;
pub use fixtures::{SeedFixture, create_seed};
pub use seeds::{Seed, SeedContent, SeedRegistry};
pub use token_bucket::{Throttle, TokenBucket};
pub use torrent::{MAX_VERIFY_FAILURES, SwarmTorrent};
