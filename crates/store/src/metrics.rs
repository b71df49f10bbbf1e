//! Store metrics recorded through the `metrics` crate facade.
//!
//! ## Metric Naming Conventions
//!
//! All metrics follow the pattern: `proofkv_{subsystem}_{name}_{unit}`
//!
//! - Counters: `_total` suffix
//! - Histograms: `_seconds` or `_bytes` suffix
//! - Gauges: no suffix
//!
//! Without an installed recorder every call is a no-op.

use std::time::Instant;

use metrics::{counter, gauge, histogram};

// =============================================================================
// Metric Names (constants for consistency)
// =============================================================================

// Commit path
const COMMITS_TOTAL: &str = "proofkv_commits_total";
const COMMIT_LATENCY: &str = "proofkv_commit_latency_seconds";
const COMMIT_BATCH_SIZE: &str = "proofkv_commit_batch_size";
const SLOW_COMMITS_TOTAL: &str = "proofkv_slow_commits_total";
const LATEST_TX: &str = "proofkv_latest_tx";

// Reads
const READS_TOTAL: &str = "proofkv_reads_total";
const READ_LATENCY: &str = "proofkv_read_latency_seconds";
const VERIFIED_READS_TOTAL: &str = "proofkv_verified_reads_total";
const SCAN_ENTRIES_TOTAL: &str = "proofkv_scan_entries_total";

// Proofs
const PROOFS_TOTAL: &str = "proofkv_proofs_generated_total";
const PROOF_LATENCY: &str = "proofkv_proof_latency_seconds";

// Storage
const STORAGE_BYTES_WRITTEN: &str = "proofkv_storage_bytes_written_total";
const RECOVERY_REPAIRS_TOTAL: &str = "proofkv_recovery_repairs_total";
const STORE_FAILED: &str = "proofkv_store_failed";

// Sessions
const ACTIVE_SESSIONS: &str = "proofkv_active_sessions";

fn status(success: bool) -> &'static str {
    if success { "success" } else { "error" }
}

// =============================================================================
// Commit Metrics
// =============================================================================

/// Records a commit attempt.
#[inline]
pub fn record_commit(success: bool, batch_size: usize, latency_secs: f64) {
    let status = status(success);
    counter!(COMMITS_TOTAL, "status" => status).increment(1);
    histogram!(COMMIT_LATENCY, "status" => status).record(latency_secs);
    histogram!(COMMIT_BATCH_SIZE).record(batch_size as f64);
}

/// Records a commit slower than the configured threshold.
#[inline]
pub fn record_slow_commit() {
    counter!(SLOW_COMMITS_TOTAL).increment(1);
}

/// Sets the latest committed transaction id.
#[inline]
pub fn set_latest_tx(tx_id: u64) {
    gauge!(LATEST_TX).set(tx_id as f64);
}

// =============================================================================
// Read Metrics
// =============================================================================

/// Records a point read or history read.
#[inline]
pub fn record_read(kind: &'static str, success: bool, latency_secs: f64) {
    let status = status(success);
    counter!(READS_TOTAL, "kind" => kind, "status" => status).increment(1);
    histogram!(READ_LATENCY, "kind" => kind).record(latency_secs);
}

/// Records a read that returned proofs.
#[inline]
pub fn record_verified_read(success: bool) {
    counter!(VERIFIED_READS_TOTAL, "status" => status(success)).increment(1);
}

/// Records entries produced by a sorted-set scan page.
#[inline]
pub fn record_scan_entries(count: usize) {
    counter!(SCAN_ENTRIES_TOTAL).increment(count as u64);
}

// =============================================================================
// Proof Metrics
// =============================================================================

/// Records proof generation.
///
/// `kind` is `inclusion` or `consistency`.
#[inline]
pub fn record_proof(kind: &'static str, latency_secs: f64) {
    counter!(PROOFS_TOTAL, "kind" => kind).increment(1);
    histogram!(PROOF_LATENCY, "kind" => kind).record(latency_secs);
}

// =============================================================================
// Storage Metrics
// =============================================================================

/// Records bytes appended to a segment.
#[inline]
pub fn record_bytes_written(segment: &'static str, bytes: u64) {
    counter!(STORAGE_BYTES_WRITTEN, "segment" => segment).increment(bytes);
}

/// Records Merkle nodes rebuilt or dropped while opening.
#[inline]
pub fn record_recovery_repairs(count: u64) {
    counter!(RECOVERY_REPAIRS_TOTAL).increment(count);
}

/// Flags the store as failed after an unrecoverable commit error.
#[inline]
pub fn set_store_failed(failed: bool) {
    gauge!(STORE_FAILED).set(if failed { 1.0 } else { 0.0 });
}

// =============================================================================
// Session Metrics
// =============================================================================

/// Sets the number of open sessions.
#[inline]
pub fn set_active_sessions(count: usize) {
    gauge!(ACTIVE_SESSIONS).set(count as f64);
}

// =============================================================================
// Timer Helper
// =============================================================================

/// A timer that records latency on drop.
pub struct Timer {
    start: Instant,
    record_fn: Option<Box<dyn FnOnce(f64) + Send>>,
}

impl Timer {
    /// Creates a new timer.
    pub fn new<F: FnOnce(f64) + Send + 'static>(record_fn: F) -> Self {
        Self { start: Instant::now(), record_fn: Some(Box::new(record_fn)) }
    }

    /// Returns elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(record_fn) = self.record_fn.take() {
            record_fn(self.elapsed_secs());
        }
    }
}

/// Timer for one kind of proof.
pub fn proof_timer(kind: &'static str) -> Timer {
    Timer::new(move |secs| record_proof(kind, secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_commit(true, 3, 0.002);
        record_commit(false, 1, 0.5);
        record_slow_commit();
        set_latest_tx(42);
        record_read("get", true, 0.0001);
        record_verified_read(false);
        record_scan_entries(10);
        record_bytes_written("log", 128);
        record_recovery_repairs(2);
        set_store_failed(true);
        set_active_sessions(4);
        drop(proof_timer("inclusion"));
    }

    #[test]
    fn test_timer_reports_elapsed() {
        let timer = Timer::new(|_| {});
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(timer.elapsed_secs() >= 0.002);
    }
}
