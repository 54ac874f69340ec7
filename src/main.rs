mod config;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tricklenet::ThrottledListener;

use crate::config::Config;

const MEGABYTE: u64 = 1024 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("tricklenet={}", config.log_level).parse()?),
        )
        .init();

    let listener = TcpListener::bind(&config.listen).await?;
    let listener = Arc::new(ThrottledListener::with_chunk_size(
        listener,
        config.chunk_size,
    ));

    let mut global_limit = config.global_limit * MEGABYTE;
    let mut conn_limit = config.conn_limit * MEGABYTE;
    listener.set_limits(global_limit, conn_limit);

    tracing::info!("listening on {}", listener.local_addr()?);

    let payload: Arc<Vec<u8>> = Arc::new((0..config.payload * MEGABYTE).map(|i| i as u8).collect());

    loop {
        let mut conn = listener.accept().await?;

        // Each connection doubles the per-connection cap until it reaches
        // the global cap; from then on the global cap grows by 10% per
        // connection.
        if conn_limit >= global_limit {
            global_limit += global_limit / 10;
        } else {
            conn_limit *= 2;
        }
        listener.set_limits(global_limit, conn_limit);
        tracing::info!(
            "connection {} accepted, throttling at {} MB/s, global {} MB/s",
            conn.id(),
            conn_limit / MEGABYTE,
            global_limit / MEGABYTE
        );

        let listener = Arc::clone(&listener);
        let payload = Arc::clone(&payload);
        tokio::spawn(async move {
            let id = conn.id();
            let start = Instant::now();
            match conn.write(&payload).await {
                Ok(n) => {
                    let elapsed = start.elapsed();
                    let rate = n as f64 / MEGABYTE as f64 / elapsed.as_secs_f64();
                    tracing::info!(
                        "{n} bytes sent on connection {id} in {}ms ({rate:.1} MB/s)",
                        elapsed.as_millis()
                    );
                }
                Err(e) => {
                    tracing::warn!("write on connection {id} aborted: {e}");
                }
            }
            if let Err(e) = listener.close_connection(conn).await {
                tracing::warn!("closing connection {id} failed: {e}");
            }
        });
    }
}
