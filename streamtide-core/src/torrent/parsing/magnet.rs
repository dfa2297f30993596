//! Magnet link parsing

use super::types::MagnetLink;
use crate::torrent::{InfoHash, TorrentError};

const BTIH_PREFIX: &str = "xt=urn:btih:";

/// Parses a magnet URI into its info hash, display name and trackers.
///
/// # Errors
/// - `TorrentError::InvalidMagnetLink` - Malformed URI or missing/invalid btih hash
pub fn parse_magnet_link(magnet_url: &str) -> Result<MagnetLink, TorrentError> {
    if !magnet_url.starts_with("magnet:") {
        return Err(TorrentError::InvalidMagnetLink {
            reason: format!("Not a magnet URI: {magnet_url}"),
        });
    }

    let magnet =
        magnet_url::Magnet::new(magnet_url).map_err(|e| TorrentError::InvalidMagnetLink {
            reason: format!("{e}"),
        })?;

    let info_hash = extract_info_hash(magnet_url)?;

    Ok(MagnetLink {
        info_hash,
        display_name: magnet.display_name().map(|s| s.to_string()),
        trackers: magnet.trackers().to_vec(),
    })
}

/// Finds the `xt=urn:btih:` parameter in the raw query string.
fn extract_info_hash(magnet_url: &str) -> Result<InfoHash, TorrentError> {
    let query = magnet_url
        .split_once('?')
        .map(|(_, query)| query)
        .unwrap_or_default();

    query
        .split('&')
        .find_map(|param| param.strip_prefix(BTIH_PREFIX))
        .ok_or_else(|| TorrentError::InvalidMagnetLink {
            reason: format!("Missing or invalid info hash in magnet link: {magnet_url}"),
        })
        .and_then(InfoHash::from_hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnet_link_parsing() {
        let magnet_url = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567&dn=Test%20Torrent&tr=http://tracker.example.com/announce";
        let magnet = parse_magnet_link(magnet_url).unwrap();

        assert_eq!(
            magnet.info_hash.to_string(),
            "0123456789abcdef0123456789abcdef01234567"
        );
        assert!(magnet.display_name.is_some());
        assert_eq!(magnet.trackers, vec!["http://tracker.example.com/announce"]);
    }

    #[test]
    fn test_uppercase_hash_accepted() {
        let magnet_url = "magnet:?xt=urn:btih:0123456789ABCDEF0123456789ABCDEF01234567";
        let magnet = parse_magnet_link(magnet_url).unwrap();
        assert_eq!(magnet.info_hash.as_bytes()[1], 0x23);
    }

    #[test]
    fn test_invalid_magnet_link() {
        assert!(parse_magnet_link("invalid://not-a-magnet").is_err());
    }

    #[test]
    fn test_magnet_link_without_info_hash() {
        let result = parse_magnet_link("magnet:?dn=Test&tr=http://tracker.example.com/announce");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Missing or invalid info hash"));
    }

    #[test]
    fn test_magnet_link_invalid_hash_length() {
        let result = parse_magnet_link("magnet:?xt=urn:btih:tooshort&dn=Test");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Invalid hash length"));
    }
}
