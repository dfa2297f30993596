//! Integration tests for Streamtide
//!
//! These run the streaming core, the local swarm engine and the HTTP
//! content server together against seed torrents written to temporary
//! directories.

#[path = "integration/harness.rs"]
mod harness;

#[path = "integration/http_streaming.rs"]
mod http_streaming;
#[path = "integration/session_lifecycle.rs"]
mod session_lifecycle;
#[path = "integration/torrent_sources.rs"]
mod torrent_sources;
