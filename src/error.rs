//! Error types for the harness and the engine it drives.

use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the engine, its stores and the control facility.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration rejected before the engine was started.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Error reported by the raft-rs state machine.
    #[error("raft: {0}")]
    Raft(#[from] raft::Error),

    /// In-memory store invariant broken (gap, overwrite of compacted entries).
    #[error("storage: {0}")]
    Storage(String),

    /// The node is not the leader. Carries the leader id when known.
    #[error("node is not the leader (leader: {leader:?})")]
    NotLeader { leader: Option<u64> },

    /// The node lost leadership before the proposal committed.
    #[error("leadership lost while committing command")]
    LeadershipLost,

    /// The engine has been shut down.
    #[error("raft is shutdown")]
    Shutdown,

    /// A bounded engine operation did not complete in time.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The target address is not registered with the local transport.
    #[error("peer {to} is unreachable")]
    Unreachable { to: String },

    /// The state machine failed to snapshot or restore.
    #[error("fsm: {0}")]
    Fsm(String),

    /// A snapshot was requested but nothing was applied since the last one.
    #[error("nothing new to snapshot")]
    NothingNewToSnapshot,

    /// The driver thread of a node panicked.
    #[error("driver thread of node {0} panicked")]
    Panicked(u64),

    /// A control facility wait exceeded its bound.
    /// `subject` is either `node <index>` or `cluster`.
    #[error("{subject}: timed out after {timeout:?} waiting for {predicate} (last observed: {observed})")]
    WaitTimeout {
        subject: String,
        predicate: String,
        timeout: Duration,
        observed: String,
    },
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Fsm(err.to_string())
    }
}
