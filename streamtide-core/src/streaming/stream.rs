//! `AsyncRead + AsyncSeek` cursor over a [`ProgressiveReader`].

use std::future::Future;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tokio_util::sync::CancellationToken;

use super::reader::{ProgressiveReader, ReadError};

type ChunkFuture = Pin<Box<dyn Future<Output = Result<Bytes, ReadError>> + Send>>;

/// Seekable byte stream over one torrent file.
///
/// Every underlying read fetches at most `chunk_size` bytes and never
/// reaches past the read limit, so a poll waits on exactly the pieces that
/// will be handed out. Seeking only moves the cursor; the next read does
/// the work.
pub struct FileStream {
    reader: Arc<ProgressiveReader>,
    cancel: CancellationToken,
    chunk_size: u64,
    position: u64,
    limit: u64,
    buffered: Bytes,
    pending: Option<ChunkFuture>,
}

impl FileStream {
    /// Creates a stream positioned at the start of the file.
    pub fn new(reader: Arc<ProgressiveReader>, cancel: CancellationToken, chunk_size: u64) -> Self {
        Self {
            limit: reader.len(),
            reader,
            cancel,
            chunk_size: chunk_size.max(1),
            position: 0,
            buffered: Bytes::new(),
            pending: None,
        }
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Stops reads at file offset `end` (exclusive), clamped to the file.
    ///
    /// Reads at or past the limit behave like end of file, and a read that
    /// straddles it only asks the reader for the bytes before it.
    pub fn set_limit(&mut self, end: u64) {
        self.limit = end.min(self.reader.len());
        self.pending = None;
        let allowed = self.limit.saturating_sub(self.position) as usize;
        if self.buffered.len() > allowed {
            self.buffered.truncate(allowed);
        }
    }

    /// Current read limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Length of the underlying file.
    pub fn len(&self) -> u64 {
        self.reader.len()
    }

    /// Returns true for a zero-length file.
    pub fn is_empty(&self) -> bool {
        self.reader.is_empty()
    }

    /// Reads the next chunk at the cursor without going through `AsyncRead`.
    ///
    /// Returns an empty buffer at end of file or at the read limit.
    ///
    /// # Errors
    /// - `ReadError::Cancelled` - Session shut down while waiting
    /// - `ReadError::EngineFailure` - Engine gave up on the torrent
    pub async fn next_chunk(&mut self) -> Result<Bytes, ReadError> {
        if !self.buffered.is_empty() {
            let chunk = std::mem::take(&mut self.buffered);
            self.position += chunk.len() as u64;
            return Ok(chunk);
        }
        let length = self.next_length();
        if length == 0 {
            return Ok(Bytes::new());
        }

        self.pending = None;
        let chunk = self
            .reader
            .read_at(self.position, length, &self.cancel)
            .await?;
        self.position += chunk.len() as u64;
        Ok(chunk)
    }

    fn next_length(&self) -> u64 {
        self.chunk_size.min(self.limit.saturating_sub(self.position))
    }

    fn start_chunk(&self, length: u64) -> ChunkFuture {
        let reader = self.reader.clone();
        let cancel = self.cancel.clone();
        let offset = self.position;
        Box::pin(async move { reader.read_at(offset, length, &cancel).await })
    }

    fn drain_into(&mut self, buf: &mut ReadBuf<'_>) {
        let count = self.buffered.len().min(buf.remaining());
        buf.put_slice(&self.buffered[..count]);
        self.buffered.advance(count);
        self.position += count as u64;
    }
}

impl AsyncRead for FileStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        if !this.buffered.is_empty() {
            this.drain_into(buf);
            return Poll::Ready(Ok(()));
        }
        let length = this.next_length();
        if length == 0 {
            return Poll::Ready(Ok(()));
        }

        let mut pending = match this.pending.take() {
            Some(pending) => pending,
            None => this.start_chunk(length),
        };

        match pending.as_mut().poll(cx) {
            Poll::Pending => {
                this.pending = Some(pending);
                Poll::Pending
            }
            Poll::Ready(Ok(chunk)) => {
                this.buffered = chunk;
                this.drain_into(buf);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(error)) => Poll::Ready(Err(error.into())),
        }
    }
}

impl AsyncSeek for FileStream {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();

        let target = match position {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => this.reader.len().checked_add_signed(delta),
            SeekFrom::Current(delta) => this.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;

        if target != this.position {
            this.position = target;
            this.buffered = Bytes::new();
            this.pending = None;
        }
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.position))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    use super::*;
    use crate::engine::test_mocks::MockTorrent;
    use crate::engine::{PiecePriority, TorrentHandle};
    use crate::streaming::PriorityScheduler;

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn stream_over(torrent: &Arc<MockTorrent>, chunk_size: u64) -> FileStream {
        let info = torrent.info();
        let handle: Arc<dyn TorrentHandle> = torrent.clone();
        let scheduler = Arc::new(PriorityScheduler::new(handle.clone(), info.piece_count, 5));
        let reader = Arc::new(ProgressiveReader::new(
            handle,
            scheduler,
            info.clone(),
            info.files[0].clone(),
            0,
        ));
        FileStream::new(reader, CancellationToken::new(), chunk_size)
    }

    #[tokio::test]
    async fn test_read_to_end() {
        let torrent = Arc::new(MockTorrent::new("f", content(100), 16));
        torrent.verify_all();
        let mut stream = stream_over(&torrent, 7);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, content(100));
        assert_eq!(stream.position(), 100);
    }

    #[tokio::test]
    async fn test_seek_moves_cursor_without_io() {
        let torrent = Arc::new(MockTorrent::new("f", content(64), 16));
        let mut stream = stream_over(&torrent, 8);

        assert_eq!(stream.seek(SeekFrom::Start(40)).await.unwrap(), 40);
        assert_eq!(stream.seek(SeekFrom::Current(-8)).await.unwrap(), 32);
        assert_eq!(stream.seek(SeekFrom::End(-4)).await.unwrap(), 60);
        assert!(stream.seek(SeekFrom::Current(-100)).await.is_err());
        assert!(torrent.priority_calls().is_empty());

        torrent.verify_piece(3);
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..], &content(64)[60..64]);
    }

    #[tokio::test]
    async fn test_eof_reads_zero_bytes() {
        let torrent = Arc::new(MockTorrent::new("f", content(10), 4));
        let mut stream = stream_over(&torrent, 4);

        stream.seek(SeekFrom::Start(10)).await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
        assert!(stream.next_chunk().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_small_buffer_keeps_leftover() {
        let torrent = Arc::new(MockTorrent::new("f", content(32), 16));
        torrent.verify_all();
        let mut stream = stream_over(&torrent, 16);

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..], &content(32)[0..5]);

        let chunk = stream.next_chunk().await.unwrap();
        assert_eq!(&chunk[..], &content(32)[5..16]);
        assert_eq!(stream.position(), 16);
    }

    #[tokio::test]
    async fn test_poll_pending_until_piece_verified() {
        let torrent = Arc::new(MockTorrent::new("f", content(16), 4));
        let mut stream = stream_over(&torrent, 4);
        let mut buf = [0u8; 4];

        {
            let mut read = tokio_test::task::spawn(stream.read(&mut buf));
            tokio_test::assert_pending!(read.poll());

            torrent.verify_piece(0);
            assert!(read.is_woken());
            let count = tokio_test::assert_ready_ok!(read.poll());
            assert_eq!(count, 4);
        }
        assert_eq!(&buf[..], &content(16)[0..4]);
    }

    #[tokio::test]
    async fn test_limit_bounds_underlying_reads() {
        let torrent = Arc::new(MockTorrent::new("f", content(64), 16));
        torrent.verify_piece(1);
        let mut stream = stream_over(&torrent, 64);

        stream.seek(SeekFrom::Start(20)).await.unwrap();
        stream.set_limit(30);
        let chunk = stream.next_chunk().await.unwrap();
        assert_eq!(&chunk[..], &content(64)[20..30]);
        assert!(stream.next_chunk().await.unwrap().is_empty());

        assert!(torrent.priority_calls().is_empty());
        assert_eq!(torrent.priority(2), PiecePriority::Normal);
    }

    #[tokio::test]
    async fn test_limit_ends_async_read() {
        let torrent = Arc::new(MockTorrent::new("f", content(64), 16));
        torrent.verify_piece(0);
        let mut stream = stream_over(&torrent, 64);
        stream.set_limit(10);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, content(64)[..10].to_vec());
        assert_eq!(stream.limit(), 10);
    }

    #[tokio::test]
    async fn test_cancelled_read_surfaces_as_io_error() {
        let torrent = Arc::new(MockTorrent::new("f", content(32), 16));
        let mut stream = stream_over(&torrent, 16);
        stream.cancel.cancel();

        let mut buf = [0u8; 4];
        let error = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(ReadError::from_io(&error), Some(&ReadError::Cancelled));
    }
}
