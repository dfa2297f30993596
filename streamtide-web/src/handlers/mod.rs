//! HTTP request handlers organized by functionality

pub mod range;
pub mod status;
pub mod stream;

pub use range::{ByteRange, extract_range_header, parse_range_header};
pub use status::{StatusResponse, api_status};
pub use stream::stream_file;
