//! # Rust AIQ Core Library
//!
//! Bounded, time- and count-indexed queue for multi-channel acquisition
//! streams. One producer appends hardware buffers while any number of
//! readers pull copies by scan count or absolute time, search for debounced
//! edges, and align independently clocked streams on a shared sync signal.
//!
//! ## Crate Structure
//!
//! - **`data`**: `SampleBlock` storage units, the `SampleQueue` itself,
//!   block-spanning cursors, edge detection and per-block filters.
//! - **`sync`**: `StreamSync`, cross-stream alignment from sync edges.
//! - **`sim`**: `SyntheticSource`, a seeded producer used by the CLI, tests
//!   and benchmarks.
//! - **`config`**: figment-loaded, validated configuration.
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: `AiqError` for real failures and `Miss` for routine
//!   out-of-window queries.

pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod sim;
pub mod sync;

pub use data::{EdgeSearch, SampleBlock, SampleQueue};
pub use error::{AiqError, AiqResult, Miss};
pub use sync::StreamSync;
