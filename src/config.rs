//! Demo server configuration
//!
//! All knobs are plain CLI flags; run with `--help` for the full list.

use clap::Parser;

/// Bandwidth-throttled payload blast server.
///
/// Streams a fixed payload to every client that connects, throttled both
/// globally and per connection, and logs the measured throughput.
#[derive(Debug, Parser)]
#[command(name = "tricklenet", version, about)]
pub struct Config {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:7000")]
    pub listen: String,

    /// Global bandwidth cap in MB/s, shared by all connections
    #[arg(long, default_value_t = 20)]
    pub global_limit: u64,

    /// Per-connection bandwidth cap in MB/s
    #[arg(long, default_value_t = 5)]
    pub conn_limit: u64,

    /// Payload size streamed to each client, in MB
    #[arg(long, default_value_t = 16)]
    pub payload: u64,

    /// Maximum bytes checked against the limiters per write segment
    #[arg(long, default_value_t = tricklenet::DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
