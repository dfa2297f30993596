//! Mapping torrent byte ranges onto the files that hold them.

use streamtide_core::engine::FileEntry;

/// A run of bytes inside one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSegment {
    /// Index of the file in torrent order
    pub file_index: usize,
    /// Offset of the first byte within the file
    pub file_offset: u64,
    /// Number of bytes
    pub length: u64,
}

/// Splits the torrent range `offset..offset + length` into per-file runs,
/// in torrent order. Zero-length files never produce a segment and bytes
/// past the last file are dropped.
pub fn file_segments(files: &[FileEntry], offset: u64, length: u64) -> Vec<FileSegment> {
    let end = offset.saturating_add(length);

    files
        .iter()
        .enumerate()
        .filter_map(|(file_index, file)| {
            let start = offset.max(file.offset);
            let stop = end.min(file.offset + file.length);
            (start < stop).then(|| FileSegment {
                file_index,
                file_offset: start - file.offset,
                length: stop - start,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(lengths: &[u64]) -> Vec<FileEntry> {
        let mut offset = 0;
        lengths
            .iter()
            .enumerate()
            .map(|(i, length)| {
                let entry = FileEntry {
                    path: format!("file{i}"),
                    length: *length,
                    offset,
                };
                offset += length;
                entry
            })
            .collect()
    }

    #[test]
    fn test_range_inside_one_file() {
        let files = files(&[100, 200]);
        assert_eq!(
            file_segments(&files, 120, 50),
            vec![FileSegment {
                file_index: 1,
                file_offset: 20,
                length: 50
            }]
        );
    }

    #[test]
    fn test_piece_spanning_files() {
        let files = files(&[10, 0, 5, 40]);
        let segments = file_segments(&files, 8, 16);

        assert_eq!(
            segments,
            vec![
                FileSegment {
                    file_index: 0,
                    file_offset: 8,
                    length: 2
                },
                FileSegment {
                    file_index: 2,
                    file_offset: 0,
                    length: 5
                },
                FileSegment {
                    file_index: 3,
                    file_offset: 0,
                    length: 9
                },
            ]
        );
        assert_eq!(segments.iter().map(|s| s.length).sum::<u64>(), 16);
    }

    #[test]
    fn test_range_past_last_file() {
        let files = files(&[10]);
        assert_eq!(file_segments(&files, 6, 100)[0].length, 4);
        assert!(file_segments(&files, 10, 4).is_empty());
    }
}
