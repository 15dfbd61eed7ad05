//! Per-node in-memory stores.
//!
//! Every node gets its own log, stable and snapshot store. Nothing here is
//! shared across nodes; the handles are cloneable only so the engine driver
//! and the harness can both reach the same node's data.

pub mod log;
pub mod snapshot;
pub mod stable;

pub use log::LogStore;
pub use snapshot::SnapshotStore;
pub use stable::StableStore;
