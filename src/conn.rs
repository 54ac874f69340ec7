//! Write-throttled connection wrapper
//!
//! [`ThrottledConn`] decorates an accepted stream and intercepts outbound
//! writes: every chunk must be granted by *both* the connection's private
//! token bucket and the listener's shared global bucket before it reaches
//! the wire. Reads pass through untouched.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::core::TokenBucket;
use crate::error::{WaitError, WriteError};

#[cfg(test)]
mod tests;

/// Opaque, listener-scoped connection identity.
///
/// Allocated sequentially by [`ThrottledListener::accept`] and never reused
/// for the listener's lifetime, even after the connection is closed.
///
/// [`ThrottledListener::accept`]: crate::ThrottledListener::accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub(crate) u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connection whose outbound bandwidth is capped by two token buckets.
///
/// Produced by [`ThrottledListener::accept`]. The wrapper owns the raw
/// stream; the global bucket is shared with every other connection of the
/// same listener, while the private bucket belongs to this connection alone.
/// Writes are split into chunks of at most the listener's chunk size, and
/// each chunk acquires joint permission from both buckets before it is
/// transmitted (see [`write`](ThrottledConn::write)).
///
/// Reads are **not** throttled: `ThrottledConn` implements [`AsyncRead`] by
/// direct delegation, so the `AsyncReadExt` combinators work unchanged.
///
/// [`ThrottledListener::accept`]: crate::ThrottledListener::accept
pub struct ThrottledConn<S = TcpStream> {
    id: ConnId,
    stream: S,
    global: Arc<TokenBucket>,
    local: Arc<TokenBucket>,
    chunk: usize,
    write_timeout: Option<Duration>,
}

impl<S> ThrottledConn<S> {
    pub(crate) fn new(
        id: ConnId,
        stream: S,
        global: Arc<TokenBucket>,
        local: Arc<TokenBucket>,
        chunk: usize,
    ) -> Self {
        ThrottledConn {
            id,
            stream,
            global,
            local,
            chunk,
            write_timeout: None,
        }
    }

    /// This connection's identity within its listener.
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Current private (per-connection) rate limit in bytes per second.
    pub fn limit(&self) -> u64 {
        self.local.rate()
    }

    /// Replace this connection's private rate limit in place.
    ///
    /// Takes effect for the next chunk; an in-flight chunk that is already
    /// waiting picks the new rate up on its next refill. The listener's
    /// `set_limits` calls this for every live connection through the
    /// registry, so there is rarely a reason to call it directly.
    pub fn set_limit(&self, rate: u64) {
        self.local.set_rate(rate);
        tracing::trace!(id = %self.id, rate, "per-connection limit updated");
    }

    /// Maximum bytes checked against the limiters per write segment.
    pub fn chunk_size(&self) -> usize {
        self.chunk
    }

    /// Bound every subsequent [`write`](ThrottledConn::write) call: the
    /// timeout is converted to an absolute deadline when the call starts and
    /// applied to each chunk's limiter wait. `None` (the default) waits
    /// indefinitely.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    /// Shared reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Unwrap the underlying stream, discarding the limiters.
    ///
    /// The listener's registry entry is unaffected; prefer
    /// [`ThrottledListener::close_connection`] to retire a connection.
    ///
    /// [`ThrottledListener::close_connection`]: crate::ThrottledListener::close_connection
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ThrottledConn<S> {
    /// Write the whole buffer through both rate limiters.
    ///
    /// The buffer is transmitted in chunks of at most
    /// [`chunk_size`](ThrottledConn::chunk_size) bytes. Each chunk first
    /// acquires joint permission for its length from the private and the
    /// global bucket (both waits run concurrently; the effective delay is
    /// the stricter of the two), then goes out through the raw stream.
    /// Chunks are strictly sequential: chunk N+1 is not requested until
    /// chunk N is on the wire.
    ///
    /// On success the return value equals `buf.len()`. On failure the error
    /// carries the number of bytes already transmitted; for limiter failures
    /// that count is always a multiple of the chunk size, since permission
    /// is only ever granted for whole chunks. Transmitted bytes are never
    /// retransmitted.
    ///
    /// # Errors
    ///
    /// - [`WriteError::Throttled`] if a limiter wait fails (e.g. the write
    ///   timeout elapses; see
    ///   [`set_write_timeout`](ThrottledConn::set_write_timeout))
    /// - [`WriteError::Io`] if the raw transport write fails
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, WriteError> {
        let deadline = self.write_timeout.map(|t| Instant::now() + t);
        let mut written = 0;
        for chunk in buf.chunks(self.chunk) {
            if let Err(source) = self.acquire_both(chunk.len(), deadline).await {
                return Err(WriteError::Throttled { written, source });
            }
            if let Err(source) = self.stream.write_all(chunk).await {
                return Err(WriteError::Io { written, source });
            }
            written += chunk.len();
        }
        Ok(written)
    }

    /// Shut down the write side of the underlying stream.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    /// Joint permission for one chunk: both buckets must independently
    /// grant `n` bytes. `try_join!` drives both waits concurrently in this
    /// task and resolves as soon as either both succeed or one fails; on
    /// failure the unfinished branch is dropped, which cancels it without
    /// consuming tokens.
    async fn acquire_both(&self, n: usize, deadline: Option<Instant>) -> Result<(), WaitError> {
        tokio::try_join!(
            self.local.wait_n(n, deadline),
            self.global.wait_n(n, deadline),
        )?;
        Ok(())
    }
}

impl ThrottledConn<TcpStream> {
    /// Local address of the underlying socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    /// Remote address of the underlying socket.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for ThrottledConn<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl<S: fmt::Debug> fmt::Debug for ThrottledConn<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottledConn")
            .field("id", &self.id)
            .field("stream", &self.stream)
            .field("chunk", &self.chunk)
            .finish_non_exhaustive()
    }
}
