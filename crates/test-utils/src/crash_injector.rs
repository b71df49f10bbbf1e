//! Crash injection utilities for testing crash recovery.
//!
//! Provides a [`CrashInjector`] that observes the writes a commit makes and
//! reports when a simulated crash should happen. A backend wrapper in the test
//! consults it on every append, sync and truncate.
//!
//! # Crash Points
//!
//! A commit writes two segments, each with one append followed by a sync:
//!
//! ```text
//! Append log frame → Sync log → Append Merkle nodes → Sync nodes
//!        ↑              ↑               ↑                  ↑
//! DuringLogAppend  BeforeLogSync  DuringNodeAppend   BeforeNodeSync
//! ```
//!
//! A crash during an append leaves a torn tail. A crash before a sync leaves
//! the append in place but reports failure.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

/// Segment a write goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Transaction log.
    Log,
    /// Merkle node store.
    Nodes,
}

/// Points in the commit sequence where a crash can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashPoint {
    /// The log append writes half its bytes, then fails.
    DuringLogAppend,
    /// The log frame is written in full; its sync fails.
    BeforeLogSync,
    /// The node append writes half its bytes, then fails.
    DuringNodeAppend,
    /// The nodes are written in full; their sync fails.
    BeforeNodeSync,
}

impl CrashPoint {
    /// Every crash point, in commit order.
    pub const ALL: [CrashPoint; 4] = [
        CrashPoint::DuringLogAppend,
        CrashPoint::BeforeLogSync,
        CrashPoint::DuringNodeAppend,
        CrashPoint::BeforeNodeSync,
    ];

    /// Segment the crash hits.
    pub fn segment(self) -> Segment {
        match self {
            CrashPoint::DuringLogAppend | CrashPoint::BeforeLogSync => Segment::Log,
            CrashPoint::DuringNodeAppend | CrashPoint::BeforeNodeSync => Segment::Nodes,
        }
    }
}

/// What happens to writes after the crash fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashMode {
    /// Only the crashing write fails; cleanup writes succeed.
    Transient,
    /// Every later write, sync and truncate fails, as on a dead disk.
    Persistent,
}

/// Tracks crash injection state for deterministic crash simulation.
///
/// # Thread Safety
///
/// All state is atomic, making `CrashInjector` safe to share across threads.
#[derive(Debug)]
pub struct CrashInjector {
    /// The crash point to trigger.
    crash_point: CrashPoint,
    /// Behavior after the crash.
    mode: CrashMode,
    /// Number of appends observed while armed.
    append_count: AtomicU32,
    /// Number of syncs observed while armed.
    sync_count: AtomicU32,
    /// Whether the crash has been triggered.
    crashed: AtomicBool,
    /// Whether injection is armed (enabled).
    armed: AtomicBool,
}

impl CrashInjector {
    /// Creates a new crash injector targeting the specified crash point.
    pub fn new(crash_point: CrashPoint, mode: CrashMode) -> Arc<Self> {
        Arc::new(Self {
            crash_point,
            mode,
            append_count: AtomicU32::new(0),
            sync_count: AtomicU32::new(0),
            crashed: AtomicBool::new(false),
            armed: AtomicBool::new(false),
        })
    }

    /// Arms the injector so it will trigger on the next matching operation.
    ///
    /// The injector starts disarmed to allow setup writes (segment headers,
    /// initial data) without interference.
    pub fn arm(&self) {
        self.append_count.store(0, Ordering::SeqCst);
        self.sync_count.store(0, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Disarms the injector.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    /// Checks if the crash has been triggered.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn dead(&self) -> bool {
        self.mode == CrashMode::Persistent && self.has_crashed()
    }

    fn trigger(&self, segment: Segment, during_append: bool) -> bool {
        if !self.armed.load(Ordering::SeqCst) || self.has_crashed() {
            return false;
        }
        let point_is_append = matches!(
            self.crash_point,
            CrashPoint::DuringLogAppend | CrashPoint::DuringNodeAppend
        );
        let hit = self.crash_point.segment() == segment && point_is_append == during_append;
        if hit {
            self.crashed.store(true, Ordering::SeqCst);
        }
        hit
    }

    /// Records an append and checks whether it should fail.
    ///
    /// Returns `true` if the write must fail; the caller decides how much of it
    /// lands first.
    pub fn on_append(&self, segment: Segment) -> bool {
        if self.dead() {
            return true;
        }
        if self.armed.load(Ordering::SeqCst) {
            self.append_count.fetch_add(1, Ordering::SeqCst);
        }
        self.trigger(segment, true)
    }

    /// Records a sync and checks whether it should fail.
    pub fn on_sync(&self, segment: Segment) -> bool {
        if self.dead() {
            return true;
        }
        if self.armed.load(Ordering::SeqCst) {
            self.sync_count.fetch_add(1, Ordering::SeqCst);
        }
        self.trigger(segment, false)
    }

    /// Checks whether a truncate should fail. Truncates never trigger a crash.
    pub fn on_truncate(&self) -> bool {
        self.dead()
    }

    /// Returns the configured crash point.
    pub fn crash_point(&self) -> CrashPoint {
        self.crash_point
    }

    /// Returns the configured mode.
    pub fn mode(&self) -> CrashMode {
        self.mode
    }

    /// Returns the number of appends observed while armed.
    pub fn append_count(&self) -> u32 {
        self.append_count.load(Ordering::SeqCst)
    }

    /// Returns the number of syncs observed while armed.
    pub fn sync_count(&self) -> u32 {
        self.sync_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_injector_starts_disarmed() {
        let injector = CrashInjector::new(CrashPoint::DuringLogAppend, CrashMode::Transient);
        assert!(!injector.has_crashed());
        assert!(!injector.on_append(Segment::Log));
        assert!(!injector.has_crashed());
    }

    #[test]
    fn test_crash_during_log_append() {
        let injector = CrashInjector::new(CrashPoint::DuringLogAppend, CrashMode::Transient);
        injector.arm();

        assert!(injector.on_append(Segment::Log));
        assert!(injector.has_crashed());

        // Transient: later writes go through
        assert!(!injector.on_append(Segment::Log));
        assert!(!injector.on_truncate());
    }

    #[test]
    fn test_crash_before_node_sync_skips_earlier_writes() {
        let injector = CrashInjector::new(CrashPoint::BeforeNodeSync, CrashMode::Transient);
        injector.arm();

        assert!(!injector.on_append(Segment::Log));
        assert!(!injector.on_sync(Segment::Log));
        assert!(!injector.on_append(Segment::Nodes));
        assert!(injector.on_sync(Segment::Nodes));
        assert_eq!(injector.append_count(), 2);
        assert_eq!(injector.sync_count(), 2);
    }

    #[test]
    fn test_persistent_mode_fails_everything_after_crash() {
        let injector = CrashInjector::new(CrashPoint::BeforeLogSync, CrashMode::Persistent);
        injector.arm();

        assert!(!injector.on_append(Segment::Log));
        assert!(injector.on_sync(Segment::Log));
        assert!(injector.on_truncate());
        assert!(injector.on_append(Segment::Nodes));
        assert!(injector.on_sync(Segment::Nodes));
    }

    #[test]
    fn test_arm_resets_state() {
        let injector = CrashInjector::new(CrashPoint::DuringNodeAppend, CrashMode::Persistent);
        injector.arm();
        assert!(injector.on_append(Segment::Nodes));
        assert!(injector.has_crashed());

        injector.arm();
        assert!(!injector.has_crashed());
        assert!(!injector.on_truncate());
        assert_eq!(injector.append_count(), 0);
    }

    #[test]
    fn test_disarm_prevents_crash() {
        let injector = CrashInjector::new(CrashPoint::DuringLogAppend, CrashMode::Transient);
        injector.arm();
        injector.disarm();

        assert!(!injector.on_append(Segment::Log));
        assert!(!injector.has_crashed());
    }

    #[test]
    fn test_segments_of_crash_points() {
        assert_eq!(CrashPoint::BeforeLogSync.segment(), Segment::Log);
        assert_eq!(CrashPoint::DuringNodeAppend.segment(), Segment::Nodes);
        assert_eq!(CrashPoint::ALL.len(), 4);
    }
}
