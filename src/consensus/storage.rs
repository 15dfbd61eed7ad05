//! raft-rs `Storage` view over a node's in-memory stores.

use raft::eraftpb::{Entry, Snapshot};
use raft::storage::GetEntriesContext;
use raft::{RaftState, Storage, StorageError};

use crate::storage::{LogStore, SnapshotStore, StableStore};

/// Read side of a node's stores, as consumed by `RawNode`.
///
/// The driver writes through its own handles to the same stores; this type
/// only answers the queries raft-rs makes while stepping.
#[derive(Clone)]
pub struct NodeStorage {
    logs: LogStore,
    stable: StableStore,
    snapshots: SnapshotStore,
}

impl NodeStorage {
    pub fn new(logs: LogStore, stable: StableStore, snapshots: SnapshotStore) -> Self {
        NodeStorage {
            logs,
            stable,
            snapshots,
        }
    }
}

impl Storage for NodeStorage {
    fn initial_state(&self) -> raft::Result<RaftState> {
        Ok(self.stable.raft_state())
    }

    fn entries(
        &self,
        low: u64,
        high: u64,
        max_size: impl Into<Option<u64>>,
        _context: GetEntriesContext,
    ) -> raft::Result<Vec<Entry>> {
        let mut entries = self.logs.entries(low, high)?;
        raft::util::limit_size(&mut entries, max_size.into());
        Ok(entries)
    }

    fn term(&self, idx: u64) -> raft::Result<u64> {
        self.logs.term(idx)
    }

    fn first_index(&self) -> raft::Result<u64> {
        Ok(self.logs.first_index())
    }

    fn last_index(&self) -> raft::Result<u64> {
        Ok(self.logs.last_index())
    }

    /// The latest stored snapshot. raft-rs retries later if none covers
    /// `request_index` yet.
    fn snapshot(&self, request_index: u64, _to: u64) -> raft::Result<Snapshot> {
        match self.snapshots.latest() {
            Some(snapshot) if snapshot.get_metadata().index >= request_index => Ok(snapshot),
            _ => Err(raft::Error::Store(
                StorageError::SnapshotTemporarilyUnavailable,
            )),
        }
    }
}
