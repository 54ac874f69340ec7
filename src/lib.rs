//! # tricklenet
//!
//! Global and per-connection bandwidth throttling for Tokio TCP listeners.
//!
//! ## Overview
//!
//! [`ThrottledListener`] wraps a [`tokio::net::TcpListener`] and hands out
//! [`ThrottledConn`]s whose outbound writes are paced by two token buckets
//! at once:
//!
//! - a **global** bucket, owned by the listener and shared by every live
//!   connection, bounding aggregate throughput
//! - a **per-connection** bucket, private to each connection, bounding its
//!   individual throughput
//!
//! A write is split into chunks (1024 bytes by default) and each chunk must
//! be granted by *both* buckets before it reaches the wire, so the stricter
//! limit always governs. Reads are never throttled.
//!
//! Limits can be changed at any time with
//! [`ThrottledListener::set_limits`]: the global bucket is mutated in place
//! and the per-connection rate is swept over every live connection, so no
//! reconnect or notification is needed.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tricklenet::ThrottledListener;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let listener = TcpListener::bind("127.0.0.1:7000").await?;
//! let listener = Arc::new(ThrottledListener::new(listener));
//!
//! // 20 MB/s across all connections, 5 MB/s for any single one
//! listener.set_limits(20 * 1024 * 1024, 5 * 1024 * 1024);
//!
//! loop {
//!     let mut conn = listener.accept().await?;
//!     let listener = Arc::clone(&listener);
//!     tokio::spawn(async move {
//!         if let Err(e) = conn.write(b"hello").await {
//!             eprintln!("write failed after {} bytes: {e}", e.written());
//!         }
//!         let _ = listener.close_connection(conn).await;
//!     });
//! }
//! # }
//! ```
//!
//! ## Lifecycle
//!
//! Retire connections through [`ThrottledListener::close_connection`],
//! which shuts the stream down *and* removes the listener's registry entry.
//! A connection that is merely dropped closes its socket but keeps its
//! registry entry (and private bucket) alive until the listener goes away.

pub mod conn;
pub mod core;
pub mod error;
pub mod listener;

pub use conn::{ConnId, ThrottledConn};
pub use core::TokenBucket;
pub use error::{WaitError, WriteError};
pub use listener::{DEFAULT_CHUNK_SIZE, ThrottledListener};
