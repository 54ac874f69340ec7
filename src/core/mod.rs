//! Core building blocks of the tricklenet throttling library
//!
//! This module contains the fundamental primitive:
//! - [`bucket`]: the asynchronous token bucket both throttling layers are
//!   built from

pub mod bucket;

pub use bucket::TokenBucket;
