//! Scratch file holding downloaded piece data.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use streamtide_core::torrent::InfoHash;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// Sparse file sized to the torrent, written piece by piece.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl ScratchFile {
    /// Creates `<data_dir>/<info_hash>.part` with `total_length` bytes.
    ///
    /// # Errors
    ///
    /// - `io::Error` - Directory or file could not be created
    pub async fn create(data_dir: &Path, info_hash: InfoHash, total_length: u64) -> io::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(format!("{info_hash}.part"));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;
        file.set_len(total_length).await?;

        tracing::debug!("Created scratch file {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Location on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `data` at `offset`.
    ///
    /// # Errors
    ///
    /// - `io::Error` - Seek or write failed
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await
    }

    /// Reads `length` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// - `io::Error` - Seek or read failed
    pub async fn read_at(&self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut data = vec![0u8; length];
        file.read_exact(&mut data).await?;
        Ok(data)
    }

    /// Deletes the file from disk.
    ///
    /// # Errors
    ///
    /// - `io::Error` - Removal failed for a reason other than absence
    pub async fn remove(&self) -> io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
