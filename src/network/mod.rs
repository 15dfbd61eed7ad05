//! In-memory network fabric.
//!
//! The fabric owns one [`Transport`] per node, indexed by node index, and
//! controls which endpoints can reach which. Links are registrations in each
//! endpoint's peer registry; cutting a link removes both directions at once.
//! Faults:
//! - Partitions (`disconnect`, `isolate`)
//! - Packet loss (`set_drop_rate`)

pub mod peers;
pub mod transport;

pub use peers::{populate_peer_stores, Peer, PeerStore};
pub use transport::{FaultConfig, Transport};

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

/// The set of transports making up one cluster's network.
pub struct Network {
    transports: Vec<Transport>,
    /// Nodes removed from the cluster; never reconnected.
    detached: Mutex<HashSet<usize>>,
    /// Fault settings shared with every endpoint.
    faults: Arc<RwLock<FaultConfig>>,
    /// Serializes topology changes so pairs are never left half-linked.
    topology: Mutex<()>,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    /// Create an empty fabric with no fault injection.
    pub fn new() -> Self {
        Network {
            transports: Vec::new(),
            detached: Mutex::new(HashSet::new()),
            faults: Arc::new(RwLock::new(FaultConfig::default())),
            topology: Mutex::new(()),
        }
    }

    /// Create the endpoint for the next node index and return a handle to it.
    pub fn add_endpoint(&mut self, id: u64, addr: impl Into<String>) -> Transport {
        let transport = Transport::with_faults(id, addr, self.faults.clone());
        self.transports.push(transport.clone());
        transport
    }

    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    /// Endpoint of node `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn transport(&self, index: usize) -> &Transport {
        &self.transports[index]
    }

    pub fn transports(&self) -> &[Transport] {
        &self.transports
    }

    /// Link every endpoint to every other endpoint, in both directions.
    pub fn connect_all(&self) {
        let _guard = self.topology.lock().unwrap();
        let detached = self.detached.lock().unwrap();
        for (i, from) in self.transports.iter().enumerate() {
            for (j, to) in self.transports.iter().enumerate() {
                if i != j && !detached.contains(&i) && !detached.contains(&j) {
                    from.connect(to);
                }
            }
        }
        debug!(nodes = self.transports.len(), "network fully connected");
    }

    /// Cut the link between `i` and `j` in both directions.
    pub fn disconnect(&self, i: usize, j: usize) {
        let _guard = self.topology.lock().unwrap();
        self.unlink(i, j);
        debug!(a = i, b = j, "link cut");
    }

    /// Restore the link between `i` and `j` in both directions.
    pub fn reconnect(&self, i: usize, j: usize) {
        let _guard = self.topology.lock().unwrap();
        let detached = self.detached.lock().unwrap();
        if detached.contains(&i) || detached.contains(&j) {
            return;
        }
        self.link(i, j);
        debug!(a = i, b = j, "link restored");
    }

    /// Cut every link touching node `index`.
    pub fn isolate(&self, index: usize) {
        let _guard = self.topology.lock().unwrap();
        for j in 0..self.transports.len() {
            if j != index {
                self.unlink(index, j);
            }
        }
        info!(node = index, "node isolated");
    }

    /// Restore every link touching node `index`, except to detached nodes.
    pub fn heal(&self, index: usize) {
        let _guard = self.topology.lock().unwrap();
        let detached = self.detached.lock().unwrap();
        if detached.contains(&index) {
            return;
        }
        for j in 0..self.transports.len() {
            if j != index && !detached.contains(&j) {
                self.link(index, j);
            }
        }
        info!(node = index, "node healed");
    }

    /// Remove node `index` from the fabric for good.
    pub fn detach(&self, index: usize) {
        self.isolate(index);
        self.detached.lock().unwrap().insert(index);
    }

    pub fn is_detached(&self, index: usize) -> bool {
        self.detached.lock().unwrap().contains(&index)
    }

    /// Whether `i` can currently send to `j`.
    pub fn is_linked(&self, i: usize, j: usize) -> bool {
        self.transports[i].is_connected(self.transports[j].local_addr())
    }

    /// Drop a fraction `rate` of otherwise deliverable messages.
    ///
    /// # Panics
    ///
    /// Panics if `rate` is outside `0.0..=1.0`.
    pub fn set_drop_rate(&self, rate: f64) {
        assert!(
            (0.0..=1.0).contains(&rate),
            "drop rate {} outside 0.0..=1.0",
            rate
        );
        self.faults.write().unwrap().drop_rate = rate;
        info!(rate, "message drop rate set");
    }

    pub fn drop_rate(&self) -> f64 {
        self.faults.read().unwrap().drop_rate
    }

    /// Total (sent, dropped) across all endpoints.
    pub fn stats(&self) -> (u64, u64) {
        self.transports.iter().fold((0, 0), |(sent, dropped), t| {
            (sent + t.messages_sent(), dropped + t.messages_dropped())
        })
    }

    fn link(&self, i: usize, j: usize) {
        let (a, b) = (&self.transports[i], &self.transports[j]);
        a.connect(b);
        b.connect(a);
    }

    fn unlink(&self, i: usize, j: usize) {
        let (a, b) = (&self.transports[i], &self.transports[j]);
        a.disconnect(b.local_addr());
        b.disconnect(a.local_addr());
    }
}
