//! Cluster construction.

use std::iter::Flatten;
use std::ops::Index;
use std::slice;

use tracing::{error, info};

use super::control::{shutdown_all, Control};
use super::knob::Knob;
use super::Cluster;
use crate::consensus::Raft;
use crate::fsm::{Fsm, FsmWatcher};

/// Engine handles of a cluster, one slot per state machine it was built
/// from, so `rafts[i]` is always node `i`.
///
/// The slot of a node discarded by a `servers` knob is empty; indexing it
/// panics and iteration skips it.
#[derive(Debug, Clone)]
pub struct Rafts {
    slots: Vec<Option<Raft>>,
}

impl Rafts {
    /// Number of slots, running or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of running engines.
    pub fn running(&self) -> usize {
        self.iter().count()
    }

    /// Engine of node `index`, unless it was never started.
    pub fn get(&self, index: usize) -> Option<&Raft> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Running engines in index order.
    pub fn iter(&self) -> Flatten<slice::Iter<'_, Option<Raft>>> {
        self.slots.iter().flatten()
    }
}

impl Index<usize> for Rafts {
    type Output = Raft;

    #[track_caller]
    fn index(&self, index: usize) -> &Raft {
        match self.get(index) {
            Some(raft) => raft,
            None => panic!("node {} is not running", index),
        }
    }
}

impl<'a> IntoIterator for &'a Rafts {
    type Item = &'a Raft;
    type IntoIter = Flatten<slice::Iter<'a, Option<Raft>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Start a cluster with one node per state machine.
///
/// Node `i` is driven by `fsms[i]` and its handle sits at `rafts[i]`. Knobs
/// are initialized in order after the fabric is wired and before any engine
/// starts.
///
/// # Panics
///
/// Panics if `fsms` is empty, or if any engine fails to start. In the latter
/// case the engines already started are shut down first.
#[track_caller]
pub fn cluster<F: Fsm>(fsms: Vec<F>, mut knobs: Vec<Box<dyn Knob>>) -> (Rafts, Control) {
    assert!(!fsms.is_empty(), "a cluster needs at least one state machine");

    let mut cluster = Cluster::new(fsms.len());
    for knob in knobs.iter_mut() {
        knob.init(&mut cluster);
    }

    let mut slots = Vec::with_capacity(fsms.len());
    let mut started = Vec::new();
    let mut counters = Vec::new();
    for (index, fsm) in fsms.into_iter().enumerate() {
        if !cluster.contains(index) {
            slots.push(None);
            continue;
        }
        let watcher = FsmWatcher::new(fsm);
        let watched = watcher.counters();
        match cluster.node(index).start(watcher) {
            Ok(raft) => {
                slots.push(Some(raft.clone()));
                started.push(raft);
                counters.push((index, watched));
            }
            Err(err) => {
                error!(node = index, error = %err, "failed to start node");
                let _ = shutdown_all(&started);
                panic!("failed to start raft node {}: {}", index, err);
            }
        }
    }
    info!(nodes = started.len(), "cluster started");

    let control = Control::new(started, counters, cluster, knobs);
    (Rafts { slots }, control)
}
