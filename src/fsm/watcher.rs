//! Counting wrapper around a user state machine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::Fsm;
use crate::error::Result;

/// Monotonic counters of the calls the engine made into one machine.
///
/// Written only by the node's driver thread (Release), read by the control
/// facility from the test thread (Acquire).
#[derive(Debug, Default)]
pub struct FsmCounters {
    applied: AtomicU64,
    snapshots: AtomicU64,
    restores: AtomicU64,
}

impl FsmCounters {
    /// Number of commands applied.
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }

    /// Number of snapshots taken successfully.
    pub fn snapshots(&self) -> u64 {
        self.snapshots.load(Ordering::Acquire)
    }

    /// Number of snapshots restored successfully.
    pub fn restores(&self) -> u64 {
        self.restores.load(Ordering::Acquire)
    }
}

/// Forwards every call to the wrapped machine and counts it.
pub struct FsmWatcher<F> {
    inner: F,
    counters: Arc<FsmCounters>,
}

impl<F: Fsm> FsmWatcher<F> {
    pub fn new(inner: F) -> Self {
        FsmWatcher {
            inner,
            counters: Arc::new(FsmCounters::default()),
        }
    }

    /// Shared counters, readable after the watcher moves into the engine.
    pub fn counters(&self) -> Arc<FsmCounters> {
        self.counters.clone()
    }
}

impl<F: Fsm> Fsm for FsmWatcher<F> {
    fn apply(&mut self, index: u64, command: &[u8]) {
        self.inner.apply(index, command);
        self.counters.applied.fetch_add(1, Ordering::AcqRel);
    }

    fn snapshot(&mut self) -> Result<Vec<u8>> {
        let data = self.inner.snapshot()?;
        self.counters.snapshots.fetch_add(1, Ordering::AcqRel);
        Ok(data)
    }

    fn restore(&mut self, snapshot: &[u8]) -> Result<()> {
        self.inner.restore(snapshot)?;
        self.counters.restores.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
