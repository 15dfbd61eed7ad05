//! State machines driven by the engine.
//!
//! The engine hands every committed command to an [`Fsm`], asks it for a
//! snapshot when the log grows past the configured threshold, and restores
//! it when a leader ships a snapshot. The harness wraps each user machine in
//! a [`FsmWatcher`] so the control facility can observe those calls without
//! knowing the machine's type.

pub mod stub;
pub mod watcher;

pub use stub::{fsms, StubFsm};
pub use watcher::{FsmCounters, FsmWatcher};

use crate::error::Result;

/// A replicated state machine.
///
/// # Laws
///
/// 1. `apply()` is called once per committed command, in log order.
/// 2. `snapshot()` captures everything applied so far: restoring its bytes
///    yields an equivalent machine.
/// 3. `restore()` replaces the whole state; nothing applied before survives.
pub trait Fsm: Send + 'static {
    /// Apply the command committed at `index`.
    fn apply(&mut self, index: u64, command: &[u8]);

    /// Serialize the entire state.
    fn snapshot(&mut self) -> Result<Vec<u8>>;

    /// Rebuild the state from bytes produced by `snapshot()`.
    fn restore(&mut self, snapshot: &[u8]) -> Result<()>;
}

impl<F: Fsm + ?Sized> Fsm for Box<F> {
    fn apply(&mut self, index: u64, command: &[u8]) {
        (**self).apply(index, command)
    }

    fn snapshot(&mut self) -> Result<Vec<u8>> {
        (**self).snapshot()
    }

    fn restore(&mut self, snapshot: &[u8]) -> Result<()> {
        (**self).restore(snapshot)
    }
}
