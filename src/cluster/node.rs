//! Dependencies of a single test node.

use std::time::Duration;

use crate::consensus::{Config, Raft};
use crate::error::Result;
use crate::fsm::Fsm;
use crate::network::{Network, PeerStore, Transport};
use crate::storage::{LogStore, SnapshotStore, StableStore};

/// Everything an engine needs, built with test-oriented defaults.
///
/// Node `index` has raft id `index + 1` and transport address `"index"`.
/// The handles are clones of the ones the engine receives, so the stores and
/// the transport stay inspectable after startup.
#[derive(Debug)]
pub struct Node {
    pub index: usize,
    pub id: u64,
    pub config: Config,
    pub logs: LogStore,
    pub stable: StableStore,
    pub snapshots: SnapshotStore,
    pub peers: PeerStore,
    pub transport: Transport,
}

impl Node {
    /// Build node `index` and register its endpoint with `network`.
    pub fn new(index: usize, network: &mut Network) -> Node {
        let id = index as u64 + 1;
        Node {
            index,
            id,
            config: test_config(),
            logs: LogStore::new(),
            stable: StableStore::new(),
            snapshots: SnapshotStore::new(),
            peers: PeerStore::new(),
            transport: network.add_endpoint(id, index.to_string()),
        }
    }

    pub fn address(&self) -> &str {
        self.transport.local_addr()
    }

    /// Start an engine over this node's dependencies.
    pub fn start(&self, fsm: impl Fsm) -> Result<Raft> {
        Raft::new(
            self.id,
            self.config.clone(),
            fsm,
            self.logs.clone(),
            self.stable.clone(),
            self.snapshots.clone(),
            self.peers.clone(),
            self.transport.clone(),
        )
    }
}

/// Engine configuration with timeouts scaled down for in-memory clusters.
///
/// The snapshot threshold stays at its production value, so nodes only
/// snapshot when a test lowers it.
pub fn test_config() -> Config {
    Config {
        tick_interval: Duration::from_millis(10),
        heartbeat_interval: Duration::from_millis(20),
        election_timeout: Duration::from_millis(50),
        snapshot_interval: Duration::from_millis(50),
        ..Config::default()
    }
}
