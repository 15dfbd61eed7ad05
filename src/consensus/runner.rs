//! Driver thread for one consensus engine.
//!
//! The driver owns the `RawNode`, the state machine and the write side of the
//! node's stores. Everything else talks to it through channels: peers through
//! the transport inbox, the local handle through the command channel. After
//! every wake-up it ticks the clock if due, runs the snapshot policy,
//! processes the `Ready` and publishes what observers need through atomics.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{select, Receiver, Sender};
use raft::eraftpb::{Entry, EntryType, Message, MessageType, Snapshot};
use raft::{RawNode, SnapshotStatus, StateRole};
use tracing::{debug, error, info, trace, warn};

use super::config::Config;
use super::storage::NodeStorage;
use super::{Configuration, State};
use crate::error::{Error, Result};
use crate::fsm::Fsm;
use crate::network::Transport;
use crate::storage::{LogStore, SnapshotStore, StableStore};

/// Context attached to entries proposed through `Raft::apply`, telling them
/// apart from the empty entry a new leader appends.
const COMMAND_CONTEXT: &[u8] = b"cmd";

/// Requests from the local handle.
pub(crate) enum Command {
    /// Propose a command. Answered with its index once applied.
    Apply {
        command: Vec<u8>,
        reply: Sender<Result<u64>>,
    },
    /// Take a snapshot now. Answered with the snapshot index.
    Snapshot { reply: Sender<Result<u64>> },
    /// Report the current membership.
    Configuration { reply: Sender<Configuration> },
    /// Stop the driver.
    Shutdown,
}

/// Observation state, written by the driver and read by anyone.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    state: AtomicU8,
    term: AtomicU64,
    leader: AtomicU64,
    applied: AtomicU64,
    last_index: AtomicU64,
}

impl Shared {
    pub(crate) fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn term(&self) -> u64 {
        self.term.load(Ordering::Acquire)
    }

    pub(crate) fn leader(&self) -> u64 {
        self.leader.load(Ordering::Acquire)
    }

    pub(crate) fn applied(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }

    pub(crate) fn last_index(&self) -> u64 {
        self.last_index.load(Ordering::Acquire)
    }

    pub(crate) fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Publishes `Shutdown` when the driver exits, including by panic.
struct ExitGuard(Arc<Shared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.set_state(State::Shutdown);
    }
}

/// A proposal waiting for its entry to be applied.
struct Proposal {
    term: u64,
    reply: Sender<Result<u64>>,
}

pub(crate) struct Stores {
    pub logs: LogStore,
    pub stable: StableStore,
    pub snapshots: SnapshotStore,
}

pub(crate) struct NodeRunner {
    config: Config,
    raw: RawNode<NodeStorage>,
    fsm: Box<dyn Fsm>,
    stores: Stores,
    transport: Transport,
    /// Raft id -> transport address of every peer.
    peer_addrs: HashMap<u64, String>,
    shared: Arc<Shared>,
    commands: Receiver<Command>,
    /// Outstanding proposals keyed by log index.
    pending: BTreeMap<u64, Proposal>,
    applied: u64,
    last_snapshot_index: u64,
    last_snapshot_check: Instant,
    next_tick: Instant,
    role: StateRole,
}

impl NodeRunner {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        config: Config,
        fsm: Box<dyn Fsm>,
        stores: Stores,
        transport: Transport,
        peer_addrs: HashMap<u64, String>,
        shared: Arc<Shared>,
        commands: Receiver<Command>,
    ) -> Result<Self> {
        let applied = stores
            .snapshots
            .latest()
            .map(|s| s.get_metadata().index)
            .unwrap_or(0);
        let raft_config = config.to_raft(id, applied)?;
        let storage = NodeStorage::new(
            stores.logs.clone(),
            stores.stable.clone(),
            stores.snapshots.clone(),
        );
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let raw = RawNode::new(&raft_config, storage, &logger)?;

        let now = Instant::now();
        let runner = NodeRunner {
            next_tick: now + config.tick_interval,
            config,
            raw,
            fsm,
            stores,
            transport,
            peer_addrs,
            shared,
            commands,
            pending: BTreeMap::new(),
            applied,
            last_snapshot_index: applied,
            last_snapshot_check: now,
            role: StateRole::Follower,
        };
        runner.publish();
        Ok(runner)
    }

    /// Run until shut down or a fatal error.
    pub(crate) fn run(mut self) -> Result<()> {
        let _exit = ExitGuard(self.shared.clone());
        info!(voters = ?self.stores.stable.conf_state().voters, "node started");
        let inbox = self.transport.inbox();
        let commands = self.commands.clone();

        let result = loop {
            let timeout = self.next_tick.saturating_duration_since(Instant::now());
            let mut stop = false;
            select! {
                recv(inbox) -> msg => {
                    if let Ok(msg) = msg {
                        self.step(msg);
                    }
                }
                recv(commands) -> cmd => {
                    match cmd {
                        Ok(Command::Shutdown) | Err(_) => stop = true,
                        Ok(cmd) => self.handle_command(cmd),
                    }
                }
                default(timeout) => {}
            }
            if stop {
                break Ok(());
            }

            // Drain whatever else arrived so one Ready covers it all.
            while let Ok(msg) = inbox.try_recv() {
                self.step(msg);
            }

            if Instant::now() >= self.next_tick {
                self.raw.tick();
                self.next_tick += self.config.tick_interval;
                let now = Instant::now();
                if self.next_tick < now {
                    self.next_tick = now + self.config.tick_interval;
                }
            }

            if let Err(e) = self.maybe_snapshot() {
                warn!(error = %e, "scheduled snapshot failed");
            }

            if let Err(e) = self.on_ready() {
                error!(error = %e, "driver stopped");
                break Err(e);
            }
            self.observe_role();
            self.publish();
        };

        self.fail_pending(|| Error::Shutdown);
        while let Ok(cmd) = self.commands.try_recv() {
            reject(cmd, Error::Shutdown);
        }
        info!(applied = self.applied, "node stopped");
        result
    }

    fn step(&mut self, msg: Message) {
        trace!(from = msg.from, kind = ?msg.get_msg_type(), "recv");
        if let Err(e) = self.raw.step(msg) {
            debug!(error = %e, "dropping message");
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Apply { command, reply } => self.propose(command, reply),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.take_snapshot());
            }
            Command::Configuration { reply } => {
                let conf = self.stores.stable.conf_state();
                let _ = reply.send(Configuration {
                    voters: conf.voters.clone(),
                    learners: conf.learners.clone(),
                });
            }
            Command::Shutdown => {}
        }
    }

    fn propose(&mut self, command: Vec<u8>, reply: Sender<Result<u64>>) {
        if self.raw.raft.state != StateRole::Leader {
            let leader = match self.raw.raft.leader_id {
                raft::INVALID_ID => None,
                id => Some(id),
            };
            let _ = reply.send(Err(Error::NotLeader { leader }));
            return;
        }

        match self.raw.propose(COMMAND_CONTEXT.to_vec(), command) {
            Ok(()) => {
                let index = self.raw.raft.raft_log.last_index();
                let term = self.raw.raft.term;
                trace!(index, term, "proposed");
                self.pending.insert(index, Proposal { term, reply });
            }
            Err(e) => {
                let _ = reply.send(Err(e.into()));
            }
        }
    }

    // ===== READY =====

    fn on_ready(&mut self) -> Result<()> {
        if !self.raw.has_ready() {
            return Ok(());
        }
        let mut ready = self.raw.ready();

        self.send(ready.take_messages());

        if !ready.snapshot().is_empty() {
            let snapshot = ready.snapshot().clone();
            self.restore(&snapshot)?;
        }

        self.apply_committed(ready.take_committed_entries());

        if !ready.entries().is_empty() {
            self.stores.logs.append(ready.entries())?;
        }
        if let Some(hs) = ready.hs() {
            self.stores.stable.set_hard_state(hs.clone());
        }

        self.send(ready.take_persisted_messages());

        let mut light = self.raw.advance(ready);
        if let Some(commit) = light.commit_index() {
            self.stores.stable.set_commit(commit);
        }
        self.send(light.take_messages());
        self.apply_committed(light.take_committed_entries());
        self.raw.advance_apply();
        Ok(())
    }

    fn send(&mut self, msgs: Vec<Message>) {
        for msg in msgs {
            let to = msg.to;
            let is_snapshot = msg.get_msg_type() == MessageType::MsgSnapshot;
            let addr = match self.peer_addrs.get(&to) {
                Some(addr) => addr,
                None => {
                    warn!(to, "no address for peer");
                    continue;
                }
            };

            match self.transport.send(addr, msg) {
                Ok(()) => {
                    if is_snapshot {
                        debug!(to, "snapshot sent");
                        self.raw.report_snapshot(to, SnapshotStatus::Finish);
                    }
                }
                Err(e) => {
                    trace!(to, error = %e, "send failed");
                    self.raw.report_unreachable(to);
                    if is_snapshot {
                        self.raw.report_snapshot(to, SnapshotStatus::Failure);
                    }
                }
            }
        }
    }

    fn apply_committed(&mut self, entries: Vec<Entry>) {
        for entry in entries {
            if entry.index <= self.applied {
                continue;
            }
            if entry.get_entry_type() == EntryType::EntryNormal
                && entry.get_context() == COMMAND_CONTEXT
            {
                self.fsm.apply(entry.index, entry.get_data());
            }
            self.applied = entry.index;

            if let Some(proposal) = self.pending.remove(&entry.index) {
                let result = if proposal.term == entry.term {
                    Ok(entry.index)
                } else {
                    Err(Error::LeadershipLost)
                };
                let _ = proposal.reply.send(result);
            }
        }
    }

    fn restore(&mut self, snapshot: &Snapshot) -> Result<()> {
        let meta = snapshot.get_metadata();
        let (index, term) = (meta.index, meta.term);
        info!(index, term, "restoring snapshot");

        self.fsm.restore(snapshot.get_data())?;
        self.stores.logs.reset(index, term);
        self.stores
            .stable
            .restore(index, term, meta.get_conf_state().clone());
        self.stores.snapshots.insert(snapshot.clone());

        self.applied = index;
        self.last_snapshot_index = index;
        Ok(())
    }

    // ===== SNAPSHOTS =====

    fn maybe_snapshot(&mut self) -> Result<()> {
        if self.last_snapshot_check.elapsed() < self.config.snapshot_interval {
            return Ok(());
        }
        self.last_snapshot_check = Instant::now();

        if self.applied - self.last_snapshot_index < self.config.snapshot_threshold {
            return Ok(());
        }
        self.take_snapshot().map(|_| ())
    }

    /// Snapshot the state machine at the applied index and compact the log
    /// behind it, keeping `trailing_logs` entries.
    fn take_snapshot(&mut self) -> Result<u64> {
        let index = self.applied;
        if index == 0 || index <= self.last_snapshot_index {
            return Err(Error::NothingNewToSnapshot);
        }

        let term = self.stores.logs.term(index)?;
        let data = self.fsm.snapshot()?;
        let conf_state = self.stores.stable.conf_state();
        self.stores.snapshots.create(index, term, conf_state, data);
        self.last_snapshot_index = index;

        let compact_to = index.saturating_sub(self.config.trailing_logs) + 1;
        self.stores.logs.compact(compact_to)?;
        info!(
            index,
            term,
            first_index = self.stores.logs.first_index(),
            "snapshot taken"
        );
        Ok(index)
    }

    // ===== OBSERVATION =====

    fn observe_role(&mut self) {
        let role = self.raw.raft.state;
        if role == self.role {
            return;
        }
        info!(term = self.raw.raft.term, from = ?self.role, to = ?role, "role changed");
        if self.role == StateRole::Leader {
            self.fail_pending(|| Error::LeadershipLost);
        }
        self.role = role;
    }

    fn fail_pending(&mut self, err: impl Fn() -> Error) {
        for (_, proposal) in std::mem::take(&mut self.pending) {
            let _ = proposal.reply.send(Err(err()));
        }
    }

    fn publish(&self) {
        let state = match self.raw.raft.state {
            StateRole::Leader => State::Leader,
            StateRole::Candidate | StateRole::PreCandidate => State::Candidate,
            StateRole::Follower => State::Follower,
        };
        self.shared.set_state(state);
        self.shared.term.store(self.raw.raft.term, Ordering::Release);
        self.shared
            .leader
            .store(self.raw.raft.leader_id, Ordering::Release);
        self.shared.applied.store(self.applied, Ordering::Release);
        self.shared
            .last_index
            .store(self.raw.raft.raft_log.last_index(), Ordering::Release);
    }
}

/// Answer a command that will never be processed.
pub(crate) fn reject(cmd: Command, err: Error) {
    match cmd {
        Command::Apply { reply, .. } | Command::Snapshot { reply } => {
            let _ = reply.send(Err(err));
        }
        Command::Configuration { .. } | Command::Shutdown => {}
    }
}
