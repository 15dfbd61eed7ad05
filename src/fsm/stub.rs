//! Stub state machine: remembers every command it was given.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::Fsm;
use crate::error::Result;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StubState {
    /// Index of the last applied command.
    last_index: u64,
    /// Every applied command, in log order.
    commands: Vec<Vec<u8>>,
}

/// A trivial machine that records applied commands.
///
/// Cloning returns another handle to the same state, so tests can keep a
/// copy after handing the machine to the cluster.
#[derive(Clone, Debug, Default)]
pub struct StubFsm {
    state: Arc<Mutex<StubState>>,
}

impl StubFsm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command applied so far, including those restored from snapshots.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Index of the last applied command, 0 if none.
    pub fn last_index(&self) -> u64 {
        self.state.lock().unwrap().last_index
    }
}

impl Fsm for StubFsm {
    fn apply(&mut self, index: u64, command: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.last_index = index;
        state.commands.push(command.to_vec());
    }

    fn snapshot(&mut self) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        Ok(bincode::serialize(&*state)?)
    }

    fn restore(&mut self, snapshot: &[u8]) -> Result<()> {
        let restored: StubState = bincode::deserialize(snapshot)?;
        *self.state.lock().unwrap() = restored;
        Ok(())
    }
}

/// Create `n` fresh stub machines.
pub fn fsms(n: usize) -> Vec<StubFsm> {
    (0..n).map(|_| StubFsm::new()).collect()
}
