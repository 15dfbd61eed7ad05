//! In-process test clusters.
//!
//! [`cluster`] builds N nodes over an in-memory [`Network`], applies the
//! given knobs, starts one engine per selected node and hands back the engine
//! handles together with a [`Control`] for waiting on and perturbing them.
//!
//! ```ignore
//! let (rafts, control) = cluster(fsms(3), vec![]);
//! let leader = control.leadership_acquired(Duration::from_secs(1));
//! leader.apply(b"x".to_vec(), Duration::from_secs(1)).wait()?;
//! for raft in &rafts {
//!     control.wait_index(raft, 2, Duration::from_secs(1));
//! }
//! control.close();
//! ```

pub mod builder;
pub mod control;
pub mod knob;
pub mod node;

#[cfg(test)]
mod tests;

pub use builder::{cluster, Rafts};
pub use control::{shutdown, wait_leader, Control};
pub use knob::{config, drop_rate, servers, Knob};
pub use node::{test_config, Node};

use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use crate::network::{populate_peer_stores, Network, PeerStore};

/// The nodes of a test cluster and the fabric connecting them.
///
/// Knobs receive a `&mut Cluster` to customize it before engines start.
pub struct Cluster {
    size: usize,
    nodes: BTreeMap<usize, Node>,
    network: Network,
}

impl Cluster {
    /// Build `size` nodes, connect every pair and point every peer directory
    /// at all other nodes.
    pub fn new(size: usize) -> Cluster {
        let mut network = Network::new();
        let nodes: BTreeMap<usize, Node> = (0..size)
            .map(|i| (i, Node::new(i, &mut network)))
            .collect();

        network.connect_all();
        let stores: Vec<PeerStore> = nodes.values().map(|n| n.peers.clone()).collect();
        populate_peer_stores(&stores, network.transports());

        Cluster {
            size,
            nodes,
            network,
        }
    }

    /// Indexes of the nodes that will be started, ascending.
    pub fn indexes(&self) -> Vec<usize> {
        self.nodes.keys().copied().collect()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.nodes.contains_key(&index)
    }

    /// # Panics
    ///
    /// Panics if node `index` was never built or has been discarded.
    #[track_caller]
    pub fn node(&self, index: usize) -> &Node {
        match self.nodes.get(&index) {
            Some(node) => node,
            None => panic!("node {} is not in the cluster", index),
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Discard every node not in `indexes` and restrict the remaining
    /// nodes' peer directories to each other.
    ///
    /// # Panics
    ///
    /// Panics if an index is outside the cluster.
    #[track_caller]
    pub fn keep_only(&mut self, indexes: &[usize]) {
        for &index in indexes {
            assert!(
                index < self.size,
                "server index {} out of range for a cluster of {}",
                index,
                self.size
            );
        }
        let keep: BTreeSet<usize> = indexes.iter().copied().collect();

        let discarded: Vec<usize> = self
            .nodes
            .keys()
            .copied()
            .filter(|i| !keep.contains(i))
            .collect();
        for index in discarded {
            self.network.detach(index);
            self.nodes.remove(&index);
        }

        let ids: BTreeSet<u64> = self.nodes.values().map(|n| n.id).collect();
        for node in self.nodes.values() {
            node.peers.retain(|p| ids.contains(&p.id));
        }
        info!(servers = ?self.indexes(), "cluster restricted");
    }
}
