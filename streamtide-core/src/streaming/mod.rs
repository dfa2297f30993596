//! Progressive streaming over partially downloaded torrents.
//!
//! Leaf-first: [`piece_index`] maps byte ranges to pieces, the
//! [`scheduler`] raises piece priorities, the [`reader`] waits for
//! verified pieces and copies them out, and [`stream`] wraps the reader
//! in `AsyncRead + AsyncSeek` for the HTTP layer. [`readiness`] and
//! [`progress`] observe aggregate completion.

pub mod piece_index;
pub mod progress;
pub mod reader;
pub mod readiness;
pub mod scheduler;
pub mod stream;

pub use piece_index::{LocateError, PieceSpan, locate, piece_count, piece_length};
pub use progress::{ProgressReporter, ProgressSample, format_bytes};
pub use reader::{ProgressiveReader, ReadError};
pub use readiness::ReadinessGate;
pub use scheduler::{PriorityScheduler, initial_readahead_count};
pub use stream::FileStream;
