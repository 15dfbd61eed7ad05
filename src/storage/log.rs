//! In-memory Raft log store.
//!
//! Holds a contiguous run of entries plus the index and term of the entry
//! immediately before the first one (the compaction point). Reads follow the
//! raft-rs `Storage` contract: indexes below the compaction point report
//! `Compacted`, indexes past the tail report `Unavailable`.

use std::sync::{Arc, RwLock};

use raft::eraftpb::Entry;
use raft::StorageError;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct LogCore {
    /// Index of the last entry dropped by compaction or covered by a snapshot.
    offset_index: u64,
    /// Term of the entry at `offset_index`.
    offset_term: u64,
    /// Entries `offset_index + 1 ..= last`.
    entries: Vec<Entry>,
}

impl LogCore {
    fn first_index(&self) -> u64 {
        self.offset_index + 1
    }

    fn last_index(&self) -> u64 {
        self.offset_index + self.entries.len() as u64
    }
}

/// Shared handle to a node's log. Cloning yields another handle to the same log.
#[derive(Debug, Clone, Default)]
pub struct LogStore {
    core: Arc<RwLock<LogCore>>,
}

impl LogStore {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// First index still held in the log.
    pub fn first_index(&self) -> u64 {
        self.core.read().unwrap().first_index()
    }

    /// Index of the last entry, or of the compaction point when empty.
    pub fn last_index(&self) -> u64 {
        self.core.read().unwrap().last_index()
    }

    /// Number of entries currently retained.
    pub fn len(&self) -> usize {
        self.core.read().unwrap().entries.len()
    }

    /// Whether the log retains no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Term of the entry at `index`.
    pub fn term(&self, index: u64) -> raft::Result<u64> {
        let core = self.core.read().unwrap();
        if index == core.offset_index {
            return Ok(core.offset_term);
        }
        if index < core.offset_index {
            return Err(raft::Error::Store(StorageError::Compacted));
        }
        if index > core.last_index() {
            return Err(raft::Error::Store(StorageError::Unavailable));
        }
        Ok(core.entries[(index - core.first_index()) as usize].term)
    }

    /// Entries in `[low, high)`.
    pub fn entries(&self, low: u64, high: u64) -> raft::Result<Vec<Entry>> {
        let core = self.core.read().unwrap();
        if low < core.first_index() {
            return Err(raft::Error::Store(StorageError::Compacted));
        }
        if high > core.last_index() + 1 || low > high {
            return Err(raft::Error::Store(StorageError::Unavailable));
        }
        let start = (low - core.first_index()) as usize;
        let end = (high - core.first_index()) as usize;
        Ok(core.entries[start..end].to_vec())
    }

    /// Append entries, truncating any conflicting suffix.
    ///
    /// The first new entry may overlap the existing tail but must not leave a
    /// gap, and must not rewrite compacted history.
    pub fn append(&self, entries: &[Entry]) -> Result<()> {
        let first_new = match entries.first() {
            Some(entry) => entry.index,
            None => return Ok(()),
        };

        let mut core = self.core.write().unwrap();
        if first_new < core.first_index() {
            return Err(Error::Storage(format!(
                "overwriting compacted entry {} (first index {})",
                first_new,
                core.first_index()
            )));
        }
        if first_new > core.last_index() + 1 {
            return Err(Error::Storage(format!(
                "gap in log: last index {}, appending {}",
                core.last_index(),
                first_new
            )));
        }

        let keep = (first_new - core.first_index()) as usize;
        core.entries.truncate(keep);
        core.entries.extend_from_slice(entries);
        Ok(())
    }

    /// Drop every entry before `compact_index`.
    ///
    /// The entry at `compact_index - 1` becomes the new compaction point, so
    /// its term stays answerable after the entries are gone.
    pub fn compact(&self, compact_index: u64) -> Result<()> {
        let mut core = self.core.write().unwrap();
        if compact_index <= core.first_index() {
            return Ok(());
        }
        if compact_index > core.last_index() + 1 {
            return Err(Error::Storage(format!(
                "compacting to {} beyond last index {}",
                compact_index,
                core.last_index()
            )));
        }

        let drop = (compact_index - core.first_index()) as usize;
        let term = core.entries[drop - 1].term;
        core.entries.drain(..drop);
        core.offset_index = compact_index - 1;
        core.offset_term = term;
        Ok(())
    }

    /// Discard the whole log and restart it after a restored snapshot.
    pub fn reset(&self, index: u64, term: u64) {
        let mut core = self.core.write().unwrap();
        core.entries.clear();
        core.offset_index = index;
        core.offset_term = term;
    }
}
