//! Byte range to piece range mapping.
//!
//! Pure arithmetic over (file start, file length, piece size). Files inside
//! multi-file torrents start at arbitrary offsets, so piece indices are
//! computed on absolute torrent offsets.

use std::ops::{Range, RangeInclusive};

/// Errors from [`locate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocateError {
    /// Request extends past the end of the file.
    #[error("range {offset}+{length} exceeds file length {file_length}")]
    OutOfRange {
        offset: u64,
        length: u64,
        file_length: u64,
    },

    /// Zero-length request.
    #[error("empty read request at offset {offset}")]
    EmptyRequest { offset: u64 },
}

/// Pieces backing a byte range, with the slice needed from each end piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceSpan {
    pub first_piece: u32,
    /// Offset of the first requested byte within `first_piece`
    pub first_inner_offset: u32,
    pub last_piece: u32,
    /// Exclusive end of the requested bytes within `last_piece`
    pub last_inner_end: u32,
}

impl PieceSpan {
    /// Inclusive range of piece indices.
    pub fn pieces(&self) -> RangeInclusive<u32> {
        self.first_piece..=self.last_piece
    }

    /// Number of pieces spanned.
    pub fn piece_count(&self) -> u32 {
        self.last_piece - self.first_piece + 1
    }

    /// Byte range needed from `piece`, whose full length is `piece_len`.
    ///
    /// # Panics
    ///
    /// Panics if `piece` lies outside the span.
    pub fn inner_range(&self, piece: u32, piece_len: u32) -> Range<u32> {
        assert!(
            self.pieces().contains(&piece),
            "piece {piece} outside span {}..={}",
            self.first_piece,
            self.last_piece
        );

        let start = if piece == self.first_piece {
            self.first_inner_offset
        } else {
            0
        };
        let end = if piece == self.last_piece {
            self.last_inner_end
        } else {
            piece_len
        };
        start..end
    }
}

/// Maps `length` bytes at `offset` of a file onto torrent pieces.
///
/// # Errors
///
/// - `LocateError::OutOfRange` - `offset + length` exceeds `file_length`
/// - `LocateError::EmptyRequest` - `length` is zero
///
/// # Panics
///
/// Panics if `piece_size` is zero.
pub fn locate(
    file_start: u64,
    file_length: u64,
    piece_size: u32,
    offset: u64,
    length: u64,
) -> Result<PieceSpan, LocateError> {
    assert!(piece_size > 0, "piece size must be non-zero");

    let out_of_range = LocateError::OutOfRange {
        offset,
        length,
        file_length,
    };
    let request_end = offset.checked_add(length).ok_or(out_of_range.clone())?;
    if request_end > file_length {
        return Err(out_of_range);
    }
    if length == 0 {
        return Err(LocateError::EmptyRequest { offset });
    }

    let piece_size = u64::from(piece_size);
    let absolute_start = file_start + offset;
    let absolute_end = file_start + request_end;

    let first_piece = absolute_start / piece_size;
    let last_piece = (absolute_end - 1) / piece_size;

    Ok(PieceSpan {
        first_piece: first_piece as u32,
        first_inner_offset: (absolute_start - first_piece * piece_size) as u32,
        last_piece: last_piece as u32,
        last_inner_end: (absolute_end - last_piece * piece_size) as u32,
    })
}

/// Length of piece `index` in a torrent of `total_length` bytes.
///
/// The final piece holds `total_length % piece_size` bytes, or a full
/// piece when the total divides evenly.
pub fn piece_length(total_length: u64, piece_size: u32, index: u32) -> u32 {
    let piece_start = u64::from(index) * u64::from(piece_size);
    total_length
        .saturating_sub(piece_start)
        .min(u64::from(piece_size)) as u32
}

/// Number of pieces needed for `total_length` bytes.
pub fn piece_count(total_length: u64, piece_size: u32) -> u32 {
    total_length.div_ceil(u64::from(piece_size)) as u32
}
