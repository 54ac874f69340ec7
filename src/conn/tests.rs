use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::time::Instant;

use super::{ConnId, ThrottledConn};
use crate::core::TokenBucket;
use crate::error::{WaitError, WriteError};

const CHUNK: usize = 1024;

fn throttled(
    stream: DuplexStream,
    global: &Arc<TokenBucket>,
    conn_rate: u64,
) -> ThrottledConn<DuplexStream> {
    let local = Arc::new(TokenBucket::new(conn_rate, CHUNK));
    ThrottledConn::new(ConnId(0), stream, Arc::clone(global), local, CHUNK)
}

fn unlimited() -> Arc<TokenBucket> {
    Arc::new(TokenBucket::new(TokenBucket::UNLIMITED, CHUNK))
}

#[tokio::test(start_paused = true)]
async fn whole_buffer_is_written_and_arrives_intact() {
    let (local_end, mut peer) = duplex(256);
    let mut conn = throttled(local_end, &unlimited(), TokenBucket::UNLIMITED);

    let payload: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
    let reader = tokio::spawn(async move {
        let mut received = vec![0u8; 10_000];
        peer.read_exact(&mut received).await.unwrap();
        received
    });

    let n = conn.write(&payload).await.unwrap();
    assert_eq!(n, payload.len());
    assert_eq!(reader.await.unwrap(), payload);
}

#[tokio::test(start_paused = true)]
async fn writes_are_paced_by_the_private_limiter() {
    let (local_end, _peer) = duplex(8192);
    let mut conn = throttled(local_end, &unlimited(), 1024);

    // 4 chunks: the burst covers the first, the remaining 3 arrive one per
    // second at 1024 B/s
    let start = Instant::now();
    conn.write(&[0u8; 4096]).await.unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(2900), "elapsed {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(3300), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn the_stricter_limiter_governs_the_pace() {
    let (local_end, _peer) = duplex(8192);
    let global = Arc::new(TokenBucket::new(512, CHUNK));
    // The private limiter alone would allow a chunk every 250ms; the
    // global one only every 2s
    let mut conn = throttled(local_end, &global, 4096);

    let start = Instant::now();
    conn.write(&[0u8; 4096]).await.unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(5900), "elapsed {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(6500), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn the_global_bucket_is_shared_across_connections() {
    let global = Arc::new(TokenBucket::new(1024, CHUNK));
    let (end_a, _peer_a) = duplex(4096);
    let (end_b, _peer_b) = duplex(4096);
    let mut conn_a = throttled(end_a, &global, TokenBucket::UNLIMITED);
    let mut conn_b = throttled(end_b, &global, TokenBucket::UNLIMITED);

    // 4096 bytes total through a shared 1024 B/s bucket: the last chunk is
    // granted at the 3s mark no matter how the two writers interleave
    let start = Instant::now();
    let a = tokio::spawn(async move { conn_a.write(&[0u8; 2048]).await.unwrap() });
    let b = tokio::spawn(async move { conn_b.write(&[0u8; 2048]).await.unwrap() });
    a.await.unwrap();
    b.await.unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(2900), "elapsed {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(3400), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn write_timeout_cancels_on_a_chunk_boundary() {
    let (local_end, _peer) = duplex(8192);
    let mut conn = throttled(local_end, &unlimited(), 1024);
    conn.set_write_timeout(Some(Duration::from_millis(1500)));

    // Chunks 1 and 2 go out at t=0 and t=1s; chunk 3 would be granted at
    // t=2s, past the deadline, so the write fails fast at t=1s
    let start = Instant::now();
    let err = conn.write(&[0u8; 4096]).await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(
        err,
        WriteError::Throttled {
            source: WaitError::DeadlineExceeded,
            ..
        }
    ));
    assert_eq!(err.written(), 2048);
    assert_eq!(err.written() % CHUNK, 0);
    assert!(elapsed >= Duration::from_millis(900), "elapsed {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(1300), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn set_limit_changes_the_pace_of_subsequent_writes() {
    let (local_end, _peer) = duplex(8192);
    let local = Arc::new(TokenBucket::new(512, 512));
    let mut conn = ThrottledConn::new(ConnId(0), local_end, unlimited(), local, 512);

    let start = Instant::now();
    conn.write(&[0u8; 2048]).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(2900));

    conn.set_limit(1 << 20);
    assert_eq!(conn.limit(), 1 << 20);
    let start = Instant::now();
    conn.write(&[0u8; 2048]).await.unwrap();
    assert!(start.elapsed() <= Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn reads_are_not_throttled() {
    let (local_end, mut peer) = duplex(8192);
    // A write-side rate this low would take over an hour for 4 KB
    let mut conn = throttled(local_end, &Arc::new(TokenBucket::new(1, CHUNK)), 1);

    peer.write_all(&[7u8; 4096]).await.unwrap();

    let start = Instant::now();
    let mut received = vec![0u8; 4096];
    conn.read_exact(&mut received).await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(received, vec![7u8; 4096]);
}

#[tokio::test(start_paused = true)]
async fn empty_write_is_a_no_op() {
    let (local_end, _peer) = duplex(64);
    let mut conn = throttled(local_end, &Arc::new(TokenBucket::new(1, CHUNK)), 1);

    let start = Instant::now();
    let n = conn.write(&[]).await.unwrap();
    assert_eq!(n, 0);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn io_failure_reports_transmitted_bytes() {
    let (local_end, peer) = duplex(64);
    drop(peer);
    let mut conn = throttled(local_end, &unlimited(), TokenBucket::UNLIMITED);

    let err = conn.write(&[0u8; 2048]).await.unwrap_err();
    assert!(matches!(err, WriteError::Io { .. }));
    assert_eq!(err.written(), 0);
}
