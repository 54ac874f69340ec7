use std::io;

use thiserror::Error;

/// Errors returned by [`TokenBucket::wait_n`](crate::TokenBucket::wait_n).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The request is larger than the bucket can ever hold, so waiting
    /// would never complete.
    #[error("requested {requested} bytes exceeds the burst capacity of {burst}")]
    BurstExceeded { requested: usize, burst: usize },

    /// The tokens could not accrue before the caller's deadline. Reported
    /// without sleeping out the remaining wait.
    #[error("deadline exceeded while waiting for bandwidth")]
    DeadlineExceeded,
}

/// Errors returned by [`ThrottledConn::write`](crate::ThrottledConn::write).
///
/// Both variants carry the number of bytes that were actually transmitted
/// before the failure. Those bytes are on the wire and are never
/// retransmitted; callers that resume a partial transfer should skip past
/// [`written`](WriteError::written) bytes.
#[derive(Error, Debug)]
pub enum WriteError {
    /// The joint limiter wait failed mid-write.
    #[error("throttled write aborted after {written} bytes: {source}")]
    Throttled { written: usize, source: WaitError },

    /// The underlying transport write failed.
    #[error("I/O error after {written} throttled bytes: {source}")]
    Io { written: usize, source: io::Error },
}

impl WriteError {
    /// Bytes transmitted through the raw connection before the failure.
    pub fn written(&self) -> usize {
        match self {
            WriteError::Throttled { written, .. } => *written,
            WriteError::Io { written, .. } => *written,
        }
    }
}
