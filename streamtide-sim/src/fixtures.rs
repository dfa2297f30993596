//! Seed directory fixtures.
//!
//! Writes content files plus a matching `.torrent` into a swarm directory,
//! laid out the way [`crate::LocalSwarmEngine`] expects: single-file
//! torrents at `<swarm_dir>/<name>`, multi-file torrents under
//! `<swarm_dir>/<name>/`.

use std::io;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use streamtide_core::torrent::InfoHash;

/// Minimal bencode value used to write metainfo files.
enum Bencode {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Bencode>),
    Dict(Vec<(&'static str, Bencode)>),
}

impl Bencode {
    fn text(value: &str) -> Self {
        Bencode::Bytes(value.as_bytes().to_vec())
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Bencode::Int(value) => out.extend_from_slice(format!("i{value}e").as_bytes()),
            Bencode::Bytes(bytes) => {
                out.extend_from_slice(format!("{}:", bytes.len()).as_bytes());
                out.extend_from_slice(bytes);
            }
            Bencode::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode(out);
                }
                out.push(b'e');
            }
            Bencode::Dict(entries) => {
                let mut sorted: Vec<_> = entries.iter().collect();
                sorted.sort_by_key(|(key, _)| *key);

                out.push(b'd');
                for (key, value) in sorted {
                    Bencode::text(key).encode(out);
                    value.encode(out);
                }
                out.push(b'e');
            }
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// A torrent written into a swarm directory.
#[derive(Debug, Clone)]
pub struct SeedFixture {
    /// Path of the written `.torrent` file
    pub torrent_path: PathBuf,
    /// Info hash of the torrent
    pub info_hash: InfoHash,
    /// All file contents concatenated in torrent order
    pub content: Vec<u8>,
}

impl SeedFixture {
    /// Magnet URI for this torrent.
    pub fn magnet_uri(&self) -> String {
        format!("magnet:?xt=urn:btih:{}", self.info_hash)
    }
}

/// Writes `files` and a `.torrent` describing them into `swarm_dir`.
///
/// A single file whose path equals `name` produces a single-file torrent;
/// anything else produces a multi-file torrent rooted at `name`.
///
/// # Errors
///
/// - `io::Error` - Content or metainfo could not be written
///
/// # Panics
///
/// Panics if `files` is empty or `piece_length` is zero.
pub fn create_seed(
    swarm_dir: &Path,
    name: &str,
    files: &[(&str, Vec<u8>)],
    piece_length: u32,
) -> io::Result<SeedFixture> {
    assert!(!files.is_empty(), "a torrent needs at least one file");
    assert!(piece_length > 0, "piece length must be non-zero");

    std::fs::create_dir_all(swarm_dir)?;
    let single_file = files.len() == 1 && files[0].0 == name;

    let mut content = Vec::new();
    for (path, data) in files {
        let target = if single_file {
            swarm_dir.join(name)
        } else {
            path.split('/')
                .fold(swarm_dir.join(name), |dir, part| dir.join(part))
        };
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, data)?;
        content.extend_from_slice(data);
    }

    let pieces: Vec<u8> = content
        .chunks(piece_length as usize)
        .flat_map(|piece| Sha1::digest(piece).to_vec())
        .collect();

    let mut info = vec![
        ("name", Bencode::text(name)),
        ("piece length", Bencode::Int(i64::from(piece_length))),
        ("pieces", Bencode::Bytes(pieces)),
    ];
    if single_file {
        info.push(("length", Bencode::Int(content.len() as i64)));
    } else {
        let entries = files
            .iter()
            .map(|(path, data)| {
                Bencode::Dict(vec![
                    ("length", Bencode::Int(data.len() as i64)),
                    (
                        "path",
                        Bencode::List(path.split('/').map(Bencode::text).collect()),
                    ),
                ])
            })
            .collect();
        info.push(("files", Bencode::List(entries)));
    }

    let info = Bencode::Dict(info);
    let info_hash = InfoHash::new(Sha1::digest(info.to_bytes()).into());
    let metainfo = Bencode::Dict(vec![
        ("announce", Bencode::text("http://127.0.0.1:6969/announce")),
        ("info", info),
    ]);

    let torrent_path = swarm_dir.join(format!("{name}.torrent"));
    std::fs::write(&torrent_path, metainfo.to_bytes())?;

    Ok(SeedFixture {
        torrent_path,
        info_hash,
        content,
    })
}

/// Deterministic filler bytes for fixture content.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(u32::from(seed)) as u8)
        .collect()
}

#[cfg(test)]
mod tests {
    use streamtide_core::torrent::MetainfoParser;

    use super::*;

    #[test]
    fn test_bencode_dict_keys_sorted() {
        let dict = Bencode::Dict(vec![
            ("zeta", Bencode::Int(1)),
            ("alpha", Bencode::List(vec![Bencode::text("x")])),
        ]);
        assert_eq!(dict.to_bytes(), b"d5:alphal1:xe4:zetai1ee");
    }

    #[test]
    fn test_single_file_seed_parses() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = create_seed(dir.path(), "movie.mp4", &[("movie.mp4", pattern(100, 1))], 32).unwrap();

        let data = std::fs::read(&fixture.torrent_path).unwrap();
        let metadata = MetainfoParser::new().parse_torrent_data(&data).unwrap();

        assert_eq!(metadata.info_hash, fixture.info_hash);
        assert_eq!(metadata.total_length, 100);
        assert_eq!(metadata.piece_hashes.len(), 4);
        assert_eq!(std::fs::read(dir.path().join("movie.mp4")).unwrap(), pattern(100, 1));
    }

    #[test]
    fn test_multi_file_seed_layout() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = create_seed(
            dir.path(),
            "show",
            &[("extras/sample.mkv", pattern(10, 2)), ("episode.mkv", pattern(50, 3))],
            16,
        )
        .unwrap();

        let data = std::fs::read(&fixture.torrent_path).unwrap();
        let metadata = MetainfoParser::new().parse_torrent_data(&data).unwrap();

        assert!(metadata.is_multi_file());
        assert_eq!(metadata.files[0].display_path(), "extras/sample.mkv");
        assert!(dir.path().join("show/extras/sample.mkv").exists());
        assert_eq!(fixture.content.len(), 60);
        assert!(fixture.magnet_uri().ends_with(&fixture.info_hash.to_string()));
    }
}
