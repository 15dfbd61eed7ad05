//! In-memory snapshot store.
//!
//! Holds the most recent snapshot a node has taken or restored. That is the
//! one shipped to lagging followers; an older snapshot is replaced as soon as
//! a newer one arrives.

use std::sync::{Arc, RwLock};

use raft::eraftpb::{ConfState, Snapshot};

/// Shared handle to a node's latest snapshot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    latest: Arc<RwLock<Option<Snapshot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot covering the log up to `index`.
    pub fn create(&self, index: u64, term: u64, conf_state: ConfState, data: Vec<u8>) -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.set_data(data.into());
        let meta = snapshot.mut_metadata();
        meta.index = index;
        meta.term = term;
        meta.set_conf_state(conf_state);

        self.insert(snapshot.clone());
        snapshot
    }

    /// Store a snapshot received from another node. A snapshot older than
    /// the one already held is ignored.
    pub fn insert(&self, snapshot: Snapshot) {
        let mut latest = self.latest.write().unwrap();
        let newer = latest
            .as_ref()
            .map_or(true, |s| snapshot.get_metadata().index >= s.get_metadata().index);
        if newer {
            *latest = Some(snapshot);
        }
    }

    /// The most recent snapshot, if any.
    pub fn latest(&self) -> Option<Snapshot> {
        self.latest.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_newest() {
        let store = SnapshotStore::new();
        for index in [3, 12, 7] {
            store.create(index, 1, ConfState::default(), vec![index as u8]);
        }

        let latest = store.latest().unwrap();
        assert_eq!(latest.get_metadata().index, 12);
        assert_eq!(latest.get_data(), &[12u8][..]);
    }

    #[test]
    fn test_create_carries_state_machine_bytes() {
        let store = SnapshotStore::new();
        let conf = ConfState::from((vec![1, 2, 3], vec![]));
        let created = store.create(5, 2, conf.clone(), b"fsm state".to_vec());

        let latest = store.latest().unwrap();
        assert_eq!(latest, created);
        assert_eq!(latest.get_data(), b"fsm state");
        assert_eq!(latest.get_metadata().term, 2);
        assert_eq!(latest.get_metadata().get_conf_state(), &conf);
    }

    #[test]
    fn test_empty_store() {
        assert!(SnapshotStore::new().latest().is_none());
    }
}
