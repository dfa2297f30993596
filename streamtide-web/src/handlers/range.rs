//! HTTP Range request handling
//!
//! Single byte ranges per RFC 7233: `bytes=a-b`, `bytes=a-` and
//! `bytes=-n`. Multi-range and malformed headers are ignored and the whole
//! file is served.

use axum::http::HeaderMap;
use axum::http::header::RANGE;

/// Outcome of interpreting a Range header against a file length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// Serve the whole file with `200 OK`
    Full,
    /// Serve `start..=end` with `206 Partial Content`
    Partial { start: u64, end: u64 },
    /// Respond `416 Range Not Satisfiable`
    Unsatisfiable,
}

impl ByteRange {
    /// Number of bytes the response body carries for a file of `total` bytes.
    pub fn content_length(&self, total: u64) -> u64 {
        match self {
            ByteRange::Full => total,
            ByteRange::Partial { start, end } => end - start + 1,
            ByteRange::Unsatisfiable => 0,
        }
    }

    /// First byte served.
    pub fn start(&self) -> u64 {
        match self {
            ByteRange::Partial { start, .. } => *start,
            _ => 0,
        }
    }
}

/// Parses a Range header value for a file of `total_size` bytes.
///
/// # Examples
/// ```
/// use streamtide_web::handlers::range::{ByteRange, parse_range_header};
/// assert_eq!(
///     parse_range_header(Some("bytes=100-199"), 1000),
///     ByteRange::Partial { start: 100, end: 199 }
/// );
/// ```
pub fn parse_range_header(range: Option<&str>, total_size: u64) -> ByteRange {
    let Some(ranges) = range.and_then(|value| value.trim().strip_prefix("bytes=")) else {
        return ByteRange::Full;
    };
    if ranges.contains(',') {
        return ByteRange::Full;
    }
    let Some((start, end)) = ranges.split_once('-') else {
        return ByteRange::Full;
    };
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        let Ok(suffix) = end.parse::<u64>() else {
            return ByteRange::Full;
        };
        if suffix == 0 || total_size == 0 {
            return ByteRange::Unsatisfiable;
        }
        return ByteRange::Partial {
            start: total_size.saturating_sub(suffix),
            end: total_size - 1,
        };
    }

    let Ok(start) = start.parse::<u64>() else {
        return ByteRange::Full;
    };
    let end = if end.is_empty() {
        None
    } else {
        match end.parse::<u64>() {
            Ok(end) if end >= start => Some(end),
            _ => return ByteRange::Full,
        }
    };

    if start >= total_size {
        return ByteRange::Unsatisfiable;
    }
    ByteRange::Partial {
        start,
        end: end.map_or(total_size - 1, |end| end.min(total_size - 1)),
    }
}

/// Extracts the Range header value if present and valid UTF-8.
pub fn extract_range_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(RANGE).and_then(|range| range.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_header_valid() {
        assert_eq!(
            parse_range_header(Some("bytes=100-199"), 1000),
            ByteRange::Partial { start: 100, end: 199 }
        );
    }

    #[test]
    fn test_parse_range_header_open_end() {
        let range = parse_range_header(Some("bytes=500-"), 1000);
        assert_eq!(range, ByteRange::Partial { start: 500, end: 999 });
        assert_eq!(range.content_length(1000), 500);
    }

    #[test]
    fn test_parse_range_header_suffix() {
        assert_eq!(
            parse_range_header(Some("bytes=-100"), 1000),
            ByteRange::Partial { start: 900, end: 999 }
        );
        assert_eq!(
            parse_range_header(Some("bytes=-5000"), 1000),
            ByteRange::Partial { start: 0, end: 999 }
        );
        assert_eq!(
            parse_range_header(Some("bytes=-0"), 1000),
            ByteRange::Unsatisfiable
        );
    }

    #[test]
    fn test_parse_range_header_clamps_end() {
        assert_eq!(
            parse_range_header(Some("bytes=900-5000"), 1000),
            ByteRange::Partial { start: 900, end: 999 }
        );
    }

    #[test]
    fn test_parse_range_header_unsatisfiable() {
        assert_eq!(
            parse_range_header(Some("bytes=1000-"), 1000),
            ByteRange::Unsatisfiable
        );
        assert_eq!(
            parse_range_header(Some("bytes=0-"), 0),
            ByteRange::Unsatisfiable
        );
    }

    #[test]
    fn test_parse_range_header_ignored() {
        assert_eq!(parse_range_header(None, 1000), ByteRange::Full);
        assert_eq!(parse_range_header(Some("invalid"), 1000), ByteRange::Full);
        assert_eq!(
            parse_range_header(Some("bytes=0-10,20-30"), 1000),
            ByteRange::Full
        );
        assert_eq!(
            parse_range_header(Some("bytes=50-10"), 1000),
            ByteRange::Full
        );
        assert_eq!(parse_range_header(Some("bytes=x-10"), 1000), ByteRange::Full);
    }
}
