//! Bencode metainfo decoding and info hash calculation

use sha1::{Digest, Sha1};

use super::types::{TorrentFile, TorrentMetadata};
use crate::torrent::{InfoHash, TorrentError};

pub(super) type BencodeDict<'a> = std::collections::HashMap<&'a [u8], bencode_rs::Value<'a>>;
pub(super) type ParseResult<T> = Result<T, TorrentError>;

fn invalid(reason: impl Into<String>) -> TorrentError {
    TorrentError::InvalidTorrentFile {
        reason: reason.into(),
    }
}

/// Decodes `.torrent` bytes into [`TorrentMetadata`].
///
/// # Errors
///
/// - `TorrentError::InvalidTorrentFile` - If bencode parsing or metadata extraction failed
pub fn parse_bencode_data(torrent_bytes: &[u8]) -> ParseResult<TorrentMetadata> {
    let parsed = bencode_rs::Value::parse(torrent_bytes)
        .map_err(|e| invalid(format!("Bencode parsing failed: {e:?}")))?;

    let Some(root) = parsed.first() else {
        return Err(invalid("Empty bencode data"));
    };

    let bencode_rs::Value::Dictionary(dict) = root else {
        return Err(invalid("Root element must be dictionary"));
    };

    let Some(bencode_rs::Value::Dictionary(info)) = dict.get(b"info".as_slice()) else {
        return Err(invalid("Missing 'info' field"));
    };

    let info_hash = calculate_info_hash(torrent_bytes)?;
    let name = extract_string(info, b"name")?;

    let piece_length = extract_integer(info, b"piece length")?;
    if piece_length <= 0 || piece_length > i64::from(u32::MAX) {
        return Err(invalid(format!("Invalid piece length: {piece_length}")));
    }

    let pieces_bytes = extract_bytes(info, b"pieces")?;
    if !pieces_bytes.len().is_multiple_of(20) {
        return Err(invalid("Invalid pieces length"));
    }
    let piece_hashes: Vec<[u8; 20]> = pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect();

    let files = match (info.get(b"length".as_slice()), info.get(b"files".as_slice())) {
        (Some(bencode_rs::Value::Integer(length)), _) if *length >= 0 => vec![TorrentFile {
            path: vec![name.clone()],
            length: *length as u64,
        }],
        (_, Some(bencode_rs::Value::List(files))) => extract_files(files)?,
        _ => return Err(invalid("Missing 'files' or 'length' field")),
    };
    let total_length: u64 = files.iter().map(|file| file.length).sum();

    let piece_length = piece_length as u32;
    let expected_pieces = total_length.div_ceil(u64::from(piece_length));
    if expected_pieces != piece_hashes.len() as u64 {
        return Err(invalid(format!(
            "Piece count mismatch: {} hashes for {expected_pieces} pieces",
            piece_hashes.len()
        )));
    }

    Ok(TorrentMetadata {
        info_hash,
        name,
        piece_length,
        piece_hashes,
        total_length,
        files,
        announce_urls: extract_announce_urls(dict),
    })
}

/// SHA-1 of the raw `info` value exactly as it appears in the input.
///
/// # Errors
///
/// - `TorrentError::InvalidTorrentFile` - If the root dictionary has no `info` key
pub fn calculate_info_hash(torrent_bytes: &[u8]) -> ParseResult<InfoHash> {
    let info_bytes = find_info_dictionary(torrent_bytes)?;
    let digest = Sha1::digest(info_bytes);
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest);
    Ok(InfoHash::new(hash))
}

/// Returns the byte span of the top-level `info` value.
fn find_info_dictionary(data: &[u8]) -> ParseResult<&[u8]> {
    if data.first() != Some(&b'd') {
        return Err(invalid("Expected dictionary start"));
    }

    let mut pos = 1;
    while data.get(pos).is_some_and(|&b| b != b'e') {
        let key_end = find_value_end(data, pos)?;
        let key = string_payload(&data[pos..key_end])?;
        let value_end = find_value_end(data, key_end)?;
        if key == b"info" {
            return Ok(&data[key_end..value_end]);
        }
        pos = value_end;
    }

    Err(invalid("Missing 'info' field"))
}

/// Find the end position of a bencode dictionary starting at `data[0]`.
///
/// # Errors
///
/// - `TorrentError::InvalidTorrentFile` - If invalid bencode dictionary format
pub fn find_bencode_dictionary_end(data: &[u8]) -> ParseResult<usize> {
    if data.first() != Some(&b'd') {
        return Err(invalid("Expected dictionary start"));
    }
    find_value_end(data, 0)
}

/// Returns the exclusive end offset of the value starting at `start`.
fn find_value_end(data: &[u8], start: usize) -> ParseResult<usize> {
    let mut pos = start;
    let mut depth = 0usize;

    loop {
        let byte = *data
            .get(pos)
            .ok_or_else(|| invalid("Incomplete bencode value"))?;

        match byte {
            b'd' | b'l' => {
                depth += 1;
                pos += 1;
            }
            b'e' => {
                if depth == 0 {
                    return Err(invalid("Unexpected end marker"));
                }
                depth -= 1;
                pos += 1;
            }
            b'i' => {
                let terminator = data[pos..]
                    .iter()
                    .position(|&b| b == b'e')
                    .ok_or_else(|| invalid("Unterminated integer"))?;
                pos += terminator + 1;
            }
            b'0'..=b'9' => {
                let colon = data[pos..]
                    .iter()
                    .position(|&b| b == b':')
                    .ok_or_else(|| invalid("Invalid string format"))?;
                let length: usize = std::str::from_utf8(&data[pos..pos + colon])
                    .ok()
                    .and_then(|digits| digits.parse().ok())
                    .ok_or_else(|| invalid("Invalid string length"))?;
                pos += colon + 1 + length;
                if pos > data.len() {
                    return Err(invalid("Invalid string length"));
                }
            }
            _ => return Err(invalid("Invalid bencode character")),
        }

        if depth == 0 {
            return Ok(pos);
        }
    }
}

/// Strips the `<len>:` prefix from an encoded byte string.
fn string_payload(encoded: &[u8]) -> ParseResult<&[u8]> {
    encoded
        .iter()
        .position(|&b| b == b':')
        .map(|colon| &encoded[colon + 1..])
        .ok_or_else(|| invalid("Dictionary key must be a string"))
}

fn extract_string(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<String> {
    let bytes = extract_bytes(dict, key)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| {
        invalid(format!(
            "Invalid UTF-8 in field: {:?}",
            String::from_utf8_lossy(key)
        ))
    })
}

fn extract_bytes<'a>(dict: &'a BencodeDict<'_>, key: &[u8]) -> ParseResult<&'a [u8]> {
    match dict.get(key) {
        Some(bencode_rs::Value::Bytes(bytes)) => Ok(bytes),
        _ => Err(invalid(format!(
            "Missing or invalid field: {:?}",
            String::from_utf8_lossy(key)
        ))),
    }
}

fn extract_integer(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<i64> {
    match dict.get(key) {
        Some(bencode_rs::Value::Integer(value)) => Ok(*value),
        _ => Err(invalid(format!(
            "Missing or invalid integer field: {:?}",
            String::from_utf8_lossy(key)
        ))),
    }
}

fn extract_files(files_list: &[bencode_rs::Value<'_>]) -> ParseResult<Vec<TorrentFile>> {
    let mut files = Vec::with_capacity(files_list.len());

    for file_value in files_list {
        let bencode_rs::Value::Dictionary(file_dict) = file_value else {
            return Err(invalid("Invalid file entry type"));
        };

        let length = extract_integer(file_dict, b"length")?;
        if length < 0 {
            return Err(invalid("Negative file length"));
        }

        let Some(bencode_rs::Value::List(components)) = file_dict.get(b"path".as_slice()) else {
            return Err(invalid("Missing or invalid path in file"));
        };

        let mut path = Vec::with_capacity(components.len());
        for component in components {
            let bencode_rs::Value::Bytes(component) = component else {
                return Err(invalid("Invalid path component type"));
            };
            let component = String::from_utf8(component.to_vec())
                .map_err(|_| invalid("Invalid UTF-8 in file path"))?;
            if component.is_empty() || component == ".." {
                return Err(invalid(format!("Unsafe path component: {component:?}")));
            }
            path.push(component);
        }
        if path.is_empty() {
            return Err(invalid("Empty file path"));
        }

        files.push(TorrentFile {
            path,
            length: length as u64,
        });
    }

    if files.is_empty() {
        return Err(invalid("Torrent contains no files"));
    }
    Ok(files)
}

/// Announce URLs are optional; trackerless torrents return an empty list.
fn extract_announce_urls(dict: &BencodeDict<'_>) -> Vec<String> {
    let mut announce_urls = Vec::new();

    if let Ok(announce) = extract_string(dict, b"announce") {
        announce_urls.push(announce);
    }

    if let Some(bencode_rs::Value::List(announce_list)) = dict.get(b"announce-list".as_slice()) {
        for tier in announce_list {
            if let bencode_rs::Value::List(tier_urls) = tier {
                for url_value in tier_urls {
                    if let bencode_rs::Value::Bytes(url_bytes) = url_value
                        && let Ok(url) = String::from_utf8(url_bytes.to_vec())
                        && !announce_urls.contains(&url)
                    {
                        announce_urls.push(url);
                    }
                }
            }
        }
    }

    announce_urls
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE_FILE: &[u8] = b"d8:announce9:test:80804:infod6:lengthi1000e4:name8:test.txt12:piece lengthi32768e6:pieces20:12345678901234567890ee";

    #[test]
    fn test_parse_single_file() {
        let metadata = parse_bencode_data(SINGLE_FILE).unwrap();
        assert_eq!(metadata.name, "test.txt");
        assert_eq!(metadata.piece_length, 32768);
        assert_eq!(metadata.total_length, 1000);
        assert_eq!(metadata.piece_hashes.len(), 1);
        assert_eq!(metadata.files[0].path, vec!["test.txt"]);
        assert_eq!(metadata.announce_urls, vec!["test:8080"]);
        assert!(!metadata.is_multi_file());
    }

    #[test]
    fn test_parse_multi_file() {
        let data = b"d4:infod5:filesld6:lengthi500e4:pathl5:file1eed6:lengthi300e4:pathl3:sub5:file2eee4:name8:test.dir12:piece lengthi512e6:pieces40:12345678901234567890ABCDEFGHIJ1234567890ee";
        let metadata = parse_bencode_data(data).unwrap();
        assert_eq!(metadata.total_length, 800);
        assert_eq!(metadata.files.len(), 2);
        assert_eq!(metadata.files[1].display_path(), "sub/file2");
        assert!(metadata.announce_urls.is_empty());
        assert!(metadata.is_multi_file());
    }

    #[test]
    fn test_info_hash_covers_only_info_value() {
        let info = b"d6:lengthi1000e4:name8:test.txt12:piece lengthi32768e6:pieces20:12345678901234567890e";
        let expected = Sha1::digest(info);

        let info_hash = calculate_info_hash(SINGLE_FILE).unwrap();
        assert_eq!(info_hash.as_bytes().as_slice(), expected.as_slice());
    }

    #[test]
    fn test_info_hash_ignores_info_text_inside_strings() {
        let data = b"d7:comment6:4:info4:infod6:lengthi1e4:name1:a12:piece lengthi1e6:pieces20:12345678901234567890ee";
        let info = b"d6:lengthi1e4:name1:a12:piece lengthi1e6:pieces20:12345678901234567890e";
        let info_hash = calculate_info_hash(data).unwrap();
        assert_eq!(info_hash.as_bytes().as_slice(), Sha1::digest(info).as_slice());
    }

    #[test]
    fn test_missing_info_field() {
        let err = parse_bencode_data(b"d8:announce9:test:8080e").unwrap_err();
        assert!(err.to_string().contains("Missing 'info' field"));
    }

    #[test]
    fn test_invalid_pieces_length() {
        let data = b"d4:infod6:lengthi1000e4:name8:test.txt12:piece lengthi32768e6:pieces19:1234567890123456789ee";
        let err = parse_bencode_data(data).unwrap_err();
        assert!(err.to_string().contains("Invalid pieces length"));
    }

    #[test]
    fn test_piece_count_mismatch() {
        let data = b"d4:infod6:lengthi1000e4:name8:test.txt12:piece lengthi100e6:pieces20:12345678901234567890ee";
        let err = parse_bencode_data(data).unwrap_err();
        assert!(err.to_string().contains("Piece count mismatch"));
    }

    #[test]
    fn test_rejects_parent_directory_component() {
        let data = b"d4:infod5:filesld6:lengthi1e4:pathl2:..4:evileee4:name1:x12:piece lengthi1e6:pieces20:12345678901234567890ee";
        assert!(parse_bencode_data(data).is_err());
    }

    #[test]
    fn test_find_bencode_dictionary_end() {
        let nested = b"d4:infod4:name4:testee";
        assert_eq!(find_bencode_dictionary_end(nested).unwrap(), nested.len());

        let with_list = b"d4:listl4:iteme4:name4:teste";
        assert_eq!(find_bencode_dictionary_end(with_list).unwrap(), with_list.len());

        let with_int = b"d4:sizei1000e4:name4:teste";
        assert_eq!(find_bencode_dictionary_end(with_int).unwrap(), with_int.len());
    }

    #[test]
    fn test_find_bencode_dictionary_end_errors() {
        assert!(find_bencode_dictionary_end(b"l4:teste").is_err());
        assert!(find_bencode_dictionary_end(b"d3:key").is_err());
        assert!(find_bencode_dictionary_end(b"d3:key999:").is_err());
    }
}
