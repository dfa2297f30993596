//! Streamtide Web - HTTP content server

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]
//!
//! Serves the file a [`streamtide_core::session::StreamSession`] is
//! streaming over HTTP with byte-range support, so any media player can
//! open it while the torrent is still downloading. Also exposes a small
//! JSON progress endpoint.

pub mod error;
pub mod handlers;
pub mod server;

pub use error::WebError;
pub use server::{AppState, router, run_server, serve};
