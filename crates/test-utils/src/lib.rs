//! Shared test utilities for proofkv crates.
//!
//! This crate provides common test helpers to reduce boilerplate across test modules:
//!
//! - [`TestDir`] - Managed temporary directory with segment file surgery
//! - [`CrashInjector`] - Deterministic crash points for backend wrappers
//! - [`strategies`] - Proptest generators for keys, values and batches
//! - [`init_test_tracing`] - Test-writer tracing subscriber

#![deny(unsafe_code)]

mod test_dir;
pub use test_dir::TestDir;

mod crash_injector;
pub use crash_injector::{CrashInjector, CrashMode, CrashPoint, Segment};

pub mod strategies;

mod logging;
pub use logging::init_test_tracing;
