//! Sustained HTTP object-storage load generation.
//!
//! The crate drives a paced stream of object-storage operations against a
//! target endpoint, under either a fixed concurrency level or a sampled
//! request rate, while a statistics store tracks per-operation counters
//! and stop/fail conditions decide when the run halts.
pub mod args;
pub mod client;
pub mod conditions;
pub mod config;
pub mod distribution;
pub mod driver;
pub mod entry;
pub mod error;
pub mod logger;
pub mod scheduler;
pub mod shutdown;
pub mod stats;
pub mod summary;
pub mod supply;
pub mod types;
