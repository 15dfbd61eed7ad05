//! Peer directory: the other nodes a node votes with and replicates to.

use std::sync::{Arc, Mutex};

use super::Transport;

/// One entry of a peer directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: u64,
    pub address: String,
}

/// A node's list of peers. Cloning yields another handle to the same list.
#[derive(Debug, Clone, Default)]
pub struct PeerStore {
    peers: Arc<Mutex<Vec<Peer>>>,
}

impl PeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.peers.lock().unwrap().clone()
    }

    pub fn set_peers(&self, peers: Vec<Peer>) {
        *self.peers.lock().unwrap() = peers;
    }

    /// Keep only the peers matching `keep`.
    pub fn retain(&self, keep: impl FnMut(&Peer) -> bool) {
        self.peers.lock().unwrap().retain(keep);
    }

    pub fn ids(&self) -> Vec<u64> {
        self.peers.lock().unwrap().iter().map(|p| p.id).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Point every node's peer directory at all the other nodes.
///
/// `stores[i]` and `transports[i]` belong to the same node. Each directory
/// receives every other transport's id and address in index order.
///
/// # Panics
///
/// Panics if the two slices differ in length: the caller wired the cluster
/// wrong.
pub fn populate_peer_stores(stores: &[PeerStore], transports: &[Transport]) {
    assert_eq!(
        stores.len(),
        transports.len(),
        "peer store count ({}) does not match transport count ({})",
        stores.len(),
        transports.len()
    );

    for (i, store) in stores.iter().enumerate() {
        let peers = transports
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, t)| Peer {
                id: t.id(),
                address: t.local_addr().to_string(),
            })
            .collect();
        store.set_peers(peers);
    }
}
