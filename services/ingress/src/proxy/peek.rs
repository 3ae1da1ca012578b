//! Peek-then-replay stream adapter.
//!
//! The handshake has to be parsed before a backend can be chosen, but the
//! backend still needs to see it. [`PeekableStream`] records everything pulled
//! off the network while an [`Inspector`] is reading, then hands those bytes out
//! again, in order, before reading live data.
//!
//! ```text
//! network -> [replay buffer] -> Inspector   (handshake parsing)
//!                  |
//!                  +-----------> PeekableStream::poll_read (relay)
//! ```

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Bytes pulled from the network per inspector refill.
///
/// The inspector is usually read a byte at a time; refilling in chunks keeps
/// that from turning into one syscall per byte.
const INSPECT_CHUNK: usize = 512;

/// A duplex stream whose first reads replay what was already inspected.
#[derive(Debug)]
pub struct PeekableStream<S> {
    inner: S,
    replay: BytesMut,
}

impl<S> PeekableStream<S> {
    /// Wrap a freshly accepted connection.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            replay: BytesMut::new(),
        }
    }

    /// Bytes read from the network that the stream has not yet handed out.
    pub fn buffered(&self) -> &[u8] {
        &self.replay
    }

    /// The underlying connection.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Borrow an inspection reader.
    ///
    /// Inspection has to finish before the stream itself is read from; the
    /// inspector's view starts at the front of the replay buffer.
    pub fn inspector(&mut self) -> Inspector<'_, S> {
        Inspector {
            stream: self,
            cursor: 0,
        }
    }
}

/// Reader used while parsing the handshake.
///
/// Everything it consumes stays in the owning stream's replay buffer.
#[derive(Debug)]
pub struct Inspector<'a, S> {
    stream: &'a mut PeekableStream<S>,
    cursor: usize,
}

impl<S> Inspector<'_, S> {
    /// Number of bytes handed to the caller so far.
    pub fn consumed(&self) -> usize {
        self.cursor
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Inspector<'_, S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.cursor == this.stream.replay.len() {
            let mut chunk = [0u8; INSPECT_CHUNK];
            let mut chunk_buf = ReadBuf::new(&mut chunk);
            ready!(Pin::new(&mut this.stream.inner).poll_read(cx, &mut chunk_buf))?;

            let filled = chunk_buf.filled();
            if filled.is_empty() {
                // EOF
                return Poll::Ready(Ok(()));
            }
            this.stream.replay.extend_from_slice(filled);
        }

        let pending = &this.stream.replay[this.cursor..];
        let n = pending.len().min(buf.remaining());
        buf.put_slice(&pending[..n]);
        this.cursor += n;

        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekableStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.replay.is_empty() {
            let n = this.replay.len().min(buf.remaining());
            buf.put_slice(&this.replay[..n]);
            this.replay.advance(n);
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekableStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
