//! In-process cluster harness for testing Raft consensus.
//!
//! Builds clusters of real consensus engines (raft-rs, one driver thread per
//! node) wired over an in-memory network, and gives tests bounded waits for
//! distributed events plus network partitions, without fixed sleeps.
//!
//! Layout:
//! - `storage`: per-node in-memory log, stable and snapshot stores
//! - `fsm`: the state machine trait, a recording stub and a counting wrapper
//! - `network`: transport endpoints, the fabric and peer directories
//! - `consensus`: the engine handle and its driver
//! - `cluster`: node builder, knobs, cluster builder and control facility

pub mod cluster;
pub mod consensus;
pub mod error;
pub mod fsm;
pub mod logging;
pub mod network;
pub mod storage;

pub use cluster::{
    cluster, config, drop_rate, servers, shutdown, wait_leader, Cluster, Control, Knob, Node,
    Rafts,
};
pub use consensus::{ApplyFuture, Config, Configuration, Raft, ShutdownFuture, State};
pub use error::{Error, Result};
pub use fsm::{fsms, Fsm, FsmCounters, FsmWatcher, StubFsm};
pub use network::{Network, Peer, PeerStore, Transport};
