//! Consensus engine: a runnable node around the raft-rs state machine.
//!
//! raft-rs is pure protocol logic. This module supplies everything it leaves
//! to the embedder: a driver thread with a tick clock, message delivery over
//! a [`Transport`], persistence into the node's in-memory stores, application
//! of committed entries to an [`Fsm`], and a snapshot policy that compacts
//! the log and lets lagging followers catch up by snapshot transfer.
//!
//! [`Raft`] is the handle test code holds. It is cheap to clone; all clones
//! refer to the same engine.

pub mod config;
pub mod future;
mod runner;
pub mod storage;

pub use config::Config;
pub use future::{ApplyFuture, Pending, ShutdownFuture};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, SendTimeoutError, Sender};
use raft::eraftpb::ConfState;
use tracing::info_span;

use crate::error::{Error, Result};
use crate::fsm::Fsm;
use crate::network::{PeerStore, Transport};
use crate::storage::{LogStore, SnapshotStore, StableStore};

use runner::{Command, NodeRunner, Shared, Stores};

/// Depth of the command channel between a handle and its driver.
const COMMAND_QUEUE_DEPTH: usize = 100;

/// How long queries wait for the driver to answer.
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Role of a node as last published by its driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Follower = 0,
    Candidate = 1,
    Leader = 2,
    Shutdown = 3,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            1 => State::Candidate,
            2 => State::Leader,
            3 => State::Shutdown,
            _ => State::Follower,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Follower => "Follower",
            State::Candidate => "Candidate",
            State::Leader => "Leader",
            State::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Cluster membership as seen by one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub voters: Vec<u64>,
    pub learners: Vec<u64>,
}

struct Inner {
    id: u64,
    shared: Arc<Shared>,
    commands: Sender<Command>,
    driver: Mutex<Option<JoinHandle<Result<()>>>>,
}

/// Handle to a running consensus engine.
#[derive(Clone)]
pub struct Raft {
    inner: Arc<Inner>,
}

impl fmt::Debug for Raft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raft")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("term", &self.term())
            .field("applied", &self.applied_index())
            .finish()
    }
}

impl PartialEq for Raft {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Raft {}

impl Raft {
    /// Start an engine for node `id`.
    ///
    /// Unless the stable store already records a membership, the initial one
    /// is this node plus everything in `peers`. The peer directory also
    /// provides the address each raft id is reached at.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        config: Config,
        fsm: impl Fsm,
        logs: LogStore,
        stable: StableStore,
        snapshots: SnapshotStore,
        peers: PeerStore,
        transport: Transport,
    ) -> Result<Raft> {
        if id == raft::INVALID_ID {
            return Err(Error::Config("node id must be non-zero".into()));
        }

        let peer_list = peers.peers();
        if peer_list.iter().any(|p| p.id == id) {
            return Err(Error::Config(format!(
                "node {} lists itself as a peer",
                id
            )));
        }
        if !stable.is_initialized() {
            let mut voters: Vec<u64> = peer_list.iter().map(|p| p.id).collect();
            voters.push(id);
            voters.sort_unstable();
            stable.set_conf_state(ConfState::from((voters, vec![])));
        }
        let peer_addrs: HashMap<u64, String> = peer_list
            .into_iter()
            .map(|p| (p.id, p.address))
            .collect();

        let shared = Arc::new(Shared::default());
        let (command_tx, command_rx) = bounded(COMMAND_QUEUE_DEPTH);
        let runner = NodeRunner::new(
            id,
            config,
            Box::new(fsm),
            Stores {
                logs,
                stable,
                snapshots,
            },
            transport,
            peer_addrs,
            shared.clone(),
            command_rx,
        )?;

        let driver = thread::Builder::new()
            .name(format!("raft-{}", id))
            .spawn(move || {
                let span = info_span!("node", id);
                let _enter = span.enter();
                runner.run()
            })
            .map_err(|e| Error::Config(format!("spawning driver thread: {}", e)))?;

        Ok(Raft {
            inner: Arc::new(Inner {
                id,
                shared,
                commands: command_tx,
                driver: Mutex::new(Some(driver)),
            }),
        })
    }

    /// Raft id of this node.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn state(&self) -> State {
        self.inner.shared.state()
    }

    /// Id of the leader this node currently follows, if known.
    pub fn leader(&self) -> Option<u64> {
        match self.inner.shared.leader() {
            raft::INVALID_ID => None,
            id => Some(id),
        }
    }

    pub fn term(&self) -> u64 {
        self.inner.shared.term()
    }

    /// Index of the last entry applied to the state machine, or covered by
    /// the last restored snapshot.
    pub fn applied_index(&self) -> u64 {
        self.inner.shared.applied()
    }

    /// Index of the last entry in the log.
    pub fn last_index(&self) -> u64 {
        self.inner.shared.last_index()
    }

    /// Propose `command` for replication.
    ///
    /// `timeout` bounds how long to wait for the driver to accept the
    /// command; the returned future resolves once it is applied, or fails
    /// with `NotLeader`, `LeadershipLost` or `Shutdown`.
    pub fn apply(&self, command: Vec<u8>, timeout: Duration) -> ApplyFuture {
        if self.state() == State::Shutdown {
            return Pending::failed(Error::Shutdown);
        }

        let (reply, rx) = bounded(1);
        let cmd = Command::Apply { command, reply };
        match self.inner.commands.send_timeout(cmd, timeout) {
            Ok(()) => Pending::new(rx),
            Err(SendTimeoutError::Timeout(_)) => {
                Pending::failed(Error::Timeout("enqueuing command".into()))
            }
            Err(SendTimeoutError::Disconnected(_)) => Pending::failed(Error::Shutdown),
        }
    }

    /// Take a snapshot now, regardless of the threshold. Returns the index
    /// the snapshot covers.
    pub fn snapshot(&self) -> Result<u64> {
        let (reply, rx) = bounded(1);
        self.inner
            .commands
            .send(Command::Snapshot { reply })
            .map_err(|_| Error::Shutdown)?;
        Pending::new(rx).wait_timeout(QUERY_TIMEOUT)
    }

    /// Current membership.
    pub fn configuration(&self) -> Result<Configuration> {
        let (reply, rx) = bounded(1);
        self.inner
            .commands
            .send(Command::Configuration { reply })
            .map_err(|_| Error::Shutdown)?;
        rx.recv_timeout(QUERY_TIMEOUT).map_err(|e| match e {
            crossbeam_channel::RecvTimeoutError::Timeout => {
                Error::Timeout("configuration".into())
            }
            crossbeam_channel::RecvTimeoutError::Disconnected => Error::Shutdown,
        })
    }

    /// Stop the engine. Only the first call does anything; later calls
    /// resolve immediately.
    pub fn shutdown(&self) -> ShutdownFuture {
        let driver = self.inner.driver.lock().unwrap().take();
        if driver.is_some() {
            let _ = self.inner.commands.send(Command::Shutdown);
        }
        ShutdownFuture::new(self.inner.id, driver)
    }
}
