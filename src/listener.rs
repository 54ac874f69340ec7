//! Bandwidth-throttled TCP listener
//!
//! [`ThrottledListener`] wraps a [`TcpListener`] and decorates every
//! accepted connection with two rate limiters: a global token bucket owned
//! by the listener and shared by all connections, and a private bucket
//! created per connection at accept time. Limits can be changed at any
//! point; the global bucket is mutated in place (never replaced), so every
//! live connection observes the new rate without any broadcast.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::conn::{ConnId, ThrottledConn};
use crate::core::TokenBucket;


/// Default maximum bytes checked against the limiters per write segment.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// A [`TcpListener`] decorator enforcing global and per-connection
/// bandwidth limits on everything it accepts.
///
/// All methods take `&self`, so the listener can live in an `Arc` and be
/// driven from the accept loop while other tasks adjust limits or close
/// connections; the internal registry lock keeps those operations mutually
/// exclusive.
///
/// # Lifecycle
///
/// Connections must be retired through
/// [`close_connection`](ThrottledListener::close_connection). Dropping a
/// [`ThrottledConn`] closes its socket but leaves its registry entry (and
/// private bucket) behind, and later `set_limits` calls will keep updating
/// the orphaned bucket.
pub struct ThrottledListener {
    inner: TcpListener,
    chunk: usize,
    shared: Mutex<Shared>,
}

/// Listener state behind one lock: `accept`, `set_limits` and
/// `close_connection` may run concurrently and all touch the registry.
struct Shared {
    /// Created on the first `set_limits` (or first accept, at
    /// [`TokenBucket::UNLIMITED`]); only ever rate-mutated afterwards so
    /// every connection aliases this exact bucket.
    global: Option<Arc<TokenBucket>>,
    /// Rate newly accepted connections are seeded with.
    conn_rate: u64,
    /// Source of connection identities, monotonically increasing.
    next_id: u64,
    /// Live connections' private buckets, keyed by identity.
    conns: HashMap<ConnId, Arc<TokenBucket>>,
}

impl ThrottledListener {
    /// Wrap an existing listener with the default chunk size.
    ///
    /// No limits are in place until [`set_limits`](ThrottledListener::set_limits)
    /// is called; connections accepted before that are unthrottled.
    pub fn new(listener: TcpListener) -> Self {
        Self::with_chunk_size(listener, DEFAULT_CHUNK_SIZE)
    }

    /// Wrap an existing listener with an explicit chunk size (the
    /// transmission unit checked against the limiters, inherited by every
    /// accepted connection and used as the buckets' burst capacity).
    ///
    /// # Panics
    ///
    /// Panics if `chunk` is zero.
    pub fn with_chunk_size(listener: TcpListener, chunk: usize) -> Self {
        assert!(chunk > 0, "chunk size must be positive");
        ThrottledListener {
            inner: listener,
            chunk,
            shared: Mutex::new(Shared {
                global: None,
                conn_rate: TokenBucket::UNLIMITED,
                next_id: 0,
                conns: HashMap::new(),
            }),
        }
    }

    /// Set both bandwidth ceilings, in bytes per second.
    ///
    /// The global bucket is created on the first call and rate-mutated in
    /// place on every later one, which is what makes the change visible to
    /// already-open connections without any notification. `conn_rate` is
    /// recorded for future accepts *and* pushed to every live connection's
    /// private bucket. Idempotent: repeating the same values changes
    /// nothing.
    ///
    /// # Panics
    ///
    /// Panics if either rate is zero.
    pub fn set_limits(&self, global_rate: u64, conn_rate: u64) {
        assert!(
            global_rate > 0 && conn_rate > 0,
            "bandwidth limits must be positive"
        );
        let mut shared = self.shared.lock();
        match &shared.global {
            Some(bucket) => bucket.set_rate(global_rate),
            None => shared.global = Some(Arc::new(TokenBucket::new(global_rate, self.chunk))),
        }
        shared.conn_rate = conn_rate;
        for bucket in shared.conns.values() {
            bucket.set_rate(conn_rate);
        }
        tracing::debug!(
            global_rate,
            conn_rate,
            connections = shared.conns.len(),
            "limits updated"
        );
    }

    /// Accept the next connection and wrap it with both limiters.
    ///
    /// Suspends on the underlying accept. On success the connection gets
    /// the next sequential identity, a reference to the shared global
    /// bucket, and a fresh private bucket seeded with the current
    /// per-connection rate, and is recorded in the live registry. A raw
    /// accept failure is propagated verbatim; no identity or registry entry
    /// is allocated.
    pub async fn accept(&self) -> io::Result<ThrottledConn> {
        let (stream, peer) = self.inner.accept().await?;
        let (id, global, local) = {
            let mut shared = self.shared.lock();
            let id = ConnId(shared.next_id);
            shared.next_id += 1;
            let global = Arc::clone(shared.global.get_or_insert_with(|| {
                Arc::new(TokenBucket::new(TokenBucket::UNLIMITED, self.chunk))
            }));
            let local = Arc::new(TokenBucket::new(shared.conn_rate, self.chunk));
            shared.conns.insert(id, Arc::clone(&local));
            (id, global, local)
        };
        tracing::debug!(%id, %peer, "connection accepted");
        Ok(ThrottledConn::new(id, stream, global, local, self.chunk))
    }

    /// Retire a connection: shut its stream down and remove it from the
    /// live registry.
    ///
    /// This is the only sanctioned way to close an accepted connection:
    /// dropping it (or calling [`ThrottledConn::shutdown`] and then
    /// dropping) closes the socket but leaks the registry entry. The entry
    /// is removed even if the shutdown itself fails; the I/O error is
    /// returned afterwards.
    pub async fn close_connection(&self, mut conn: ThrottledConn) -> io::Result<()> {
        let id = conn.id();
        let result = conn.shutdown().await;
        self.shared.lock().conns.remove(&id);
        tracing::debug!(%id, "connection closed");
        result
    }

    /// Close the underlying listener.
    ///
    /// Live connections are untouched: they hold their own stream and
    /// bucket references and remain usable until individually closed.
    pub fn close(self) {}

    /// Local address of the underlying listener.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Number of accepted-but-not-yet-closed connections.
    pub fn connection_count(&self) -> usize {
        self.shared.lock().conns.len()
    }
}
