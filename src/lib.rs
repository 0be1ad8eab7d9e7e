//! Concurrent HTTP resource prober.
//!
//! Addresses are submitted one at a time to an [`Engine`]. Each one gets a
//! worker slot and its own task, which requests every [`ProbeSpec`] in
//! order over fresh TCP connections, checks the response headers and, for
//! range scans, searches the body for the spec's pattern.

pub mod action;
pub mod admission;
pub mod config;
pub mod counters;
pub mod engine;
pub mod error;
pub mod limits;
pub mod line_buffer;
pub mod logging;
pub mod protocol;
pub mod socket;
pub mod targets;
pub mod types;

pub use engine::{Engine, Launcher, Submission, TokioLauncher};
pub use types::{EngineConfig, ProbeSpec, ScanMode};
