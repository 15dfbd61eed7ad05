//! In-memory stable store: the hard state (term, vote, commit) and the
//! current membership.

use std::sync::{Arc, RwLock};

use raft::eraftpb::{ConfState, HardState};
use raft::RaftState;

/// Shared handle to a node's stable metadata.
#[derive(Debug, Clone, Default)]
pub struct StableStore {
    state: Arc<RwLock<RaftState>>,
}

impl StableStore {
    /// Create an empty store: term 0, no vote, no membership.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored hard state and membership.
    pub fn raft_state(&self) -> RaftState {
        self.state.read().unwrap().clone()
    }

    pub fn set_hard_state(&self, hard_state: HardState) {
        self.state.write().unwrap().hard_state = hard_state;
    }

    /// Advance the persisted commit index.
    pub fn set_commit(&self, commit: u64) {
        self.state.write().unwrap().hard_state.commit = commit;
    }

    pub fn conf_state(&self) -> ConfState {
        self.state.read().unwrap().conf_state.clone()
    }

    pub fn set_conf_state(&self, conf_state: ConfState) {
        self.state.write().unwrap().conf_state = conf_state;
    }

    /// Whether a membership has ever been recorded.
    pub fn is_initialized(&self) -> bool {
        !self.state.read().unwrap().conf_state.voters.is_empty()
    }

    /// Record the effect of restoring a snapshot at `index`/`term`.
    pub fn restore(&self, index: u64, term: u64, conf_state: ConfState) {
        let mut state = self.state.write().unwrap();
        state.hard_state.commit = index;
        state.hard_state.term = state.hard_state.term.max(term);
        state.conf_state = conf_state;
    }
}
