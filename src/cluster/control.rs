//! Control facility: bounded waits and partitions over a running cluster.
//!
//! Every wait is a polling loop on the calling thread: probe, check the
//! deadline, sleep for the poll interval. A wait that runs out of time
//! panics with the node, the predicate and the last value observed, failing
//! the test at the caller's location.

use std::fmt::Write as _;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::knob::Knob;
use super::Cluster;
use crate::consensus::{Raft, ShutdownFuture, State};
use crate::error::Error;
use crate::fsm::FsmCounters;

/// Default sleep between two probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Handle for observing and perturbing a cluster built by [`cluster`].
///
/// Closing (explicitly or on drop) shuts every engine down and then runs the
/// knobs' cleanup.
///
/// [`cluster`]: super::cluster
pub struct Control {
    /// Started engines and their node indexes, ascending by index.
    rafts: Vec<(usize, Raft)>,
    counters: Vec<Arc<FsmCounters>>,
    cluster: Cluster,
    knobs: Vec<Box<dyn Knob>>,
    poll_interval: Duration,
    closed: bool,
}

impl Control {
    pub(crate) fn new(
        rafts: Vec<Raft>,
        counters: Vec<(usize, Arc<FsmCounters>)>,
        cluster: Cluster,
        knobs: Vec<Box<dyn Knob>>,
    ) -> Control {
        let (indexes, counters): (Vec<usize>, Vec<Arc<FsmCounters>>) =
            counters.into_iter().unzip();
        Control {
            rafts: indexes.into_iter().zip(rafts).collect(),
            counters,
            cluster,
            knobs,
            poll_interval: DEFAULT_POLL_INTERVAL,
            closed: false,
        }
    }

    /// Use `interval` between probes instead of the default.
    pub fn with_poll_interval(mut self, interval: Duration) -> Control {
        self.poll_interval = interval;
        self
    }

    /// The cluster the engines were started from.
    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    // ===== LOOKUP =====

    /// Engine of node `index`.
    #[track_caller]
    pub fn raft(&self, index: usize) -> &Raft {
        match self.rafts.iter().find(|(i, _)| *i == index) {
            Some((_, raft)) => raft,
            None => panic!("node {} is not running", index),
        }
    }

    /// Node index of `raft`.
    #[track_caller]
    pub fn index_of(&self, raft: &Raft) -> usize {
        self.position(raft).0
    }

    /// Counters of the state machine driven by `raft`.
    #[track_caller]
    pub fn fsm_counters(&self, raft: &Raft) -> &FsmCounters {
        let position = self.position(raft).1;
        &self.counters[position]
    }

    /// First running node, in index order, not in `exclude`.
    ///
    /// # Panics
    ///
    /// Panics if every running node is excluded.
    #[track_caller]
    pub fn other(&self, exclude: &[&Raft]) -> Raft {
        match self
            .rafts
            .iter()
            .find(|(_, raft)| !exclude.iter().any(|e| *e == raft))
        {
            Some((_, raft)) => raft.clone(),
            None => panic!(
                "no other node: every one of the {} running nodes is excluded",
                self.rafts.len()
            ),
        }
    }

    // ===== WAITS =====

    /// Wait until some node is leader and return it. If several nodes
    /// believe they lead, the one with the highest term wins.
    #[track_caller]
    pub fn leadership_acquired(&self, timeout: Duration) -> Raft {
        let result = poll(
            self.poll_interval,
            timeout,
            "cluster",
            "a leader",
            || {
                let leader = self
                    .rafts
                    .iter()
                    .filter(|(_, r)| r.state() == State::Leader)
                    .max_by(|(ia, a), (ib, b)| a.term().cmp(&b.term()).then(ib.cmp(ia)))
                    .map(|(_, r)| r.clone());
                (leader, self.describe_roles())
            },
        );
        let leader = fatal(result);
        info!(node = self.index_of(&leader), term = leader.term(), "leadership acquired");
        leader
    }

    /// Wait until `raft` is no longer leader.
    #[track_caller]
    pub fn leadership_lost(&self, raft: &Raft, timeout: Duration) {
        let index = self.index_of(raft);
        fatal(poll(
            self.poll_interval,
            timeout,
            &format!("node {}", index),
            "leadership to be lost",
            || {
                let state = raft.state();
                ((state != State::Leader).then_some(()), state.to_string())
            },
        ));
    }

    /// Wait until `raft` has applied at least `index`.
    #[track_caller]
    pub fn wait_index(&self, raft: &Raft, index: u64, timeout: Duration) {
        let node = self.index_of(raft);
        fatal(poll(
            self.poll_interval,
            timeout,
            &format!("node {}", node),
            &format!("applied index >= {}", index),
            || {
                let applied = raft.applied_index();
                ((applied >= index).then_some(()), format!("applied index {}", applied))
            },
        ));
    }

    /// Wait until `raft`'s state machine has taken at least `n` snapshots.
    #[track_caller]
    pub fn wait_snapshot(&self, raft: &Raft, n: u64, timeout: Duration) {
        let counters = self.fsm_counters(raft);
        self.wait_counter(raft, "snapshots", n, timeout, || counters.snapshots());
    }

    /// Wait until `raft`'s state machine has restored at least `n` snapshots.
    #[track_caller]
    pub fn wait_restore(&self, raft: &Raft, n: u64, timeout: Duration) {
        let counters = self.fsm_counters(raft);
        self.wait_counter(raft, "restores", n, timeout, || counters.restores());
    }

    #[track_caller]
    fn wait_counter(
        &self,
        raft: &Raft,
        what: &str,
        n: u64,
        timeout: Duration,
        read: impl Fn() -> u64,
    ) {
        let node = self.index_of(raft);
        fatal(poll(
            self.poll_interval,
            timeout,
            &format!("node {}", node),
            &format!("{} >= {}", what, n),
            || {
                let count = read();
                ((count >= n).then_some(()), format!("{} {}", what, count))
            },
        ));
    }

    // ===== PARTITIONS =====

    /// Cut `raft` off from every other node.
    #[track_caller]
    pub fn disconnect(&self, raft: &Raft) {
        let index = self.index_of(raft);
        self.cluster.network().isolate(index);
        info!(node = index, "disconnected");
    }

    /// Restore every link of `raft`.
    #[track_caller]
    pub fn reconnect(&self, raft: &Raft) {
        let index = self.index_of(raft);
        self.cluster.network().heal(index);
        info!(node = index, "reconnected");
    }

    // ===== SHUTDOWN =====

    /// Shut every engine down, then run the knobs' cleanup.
    ///
    /// # Panics
    ///
    /// Panics listing every node that failed to shut down cleanly. Cleanup
    /// still runs first.
    #[track_caller]
    pub fn close(mut self) {
        let failures = self.shutdown_and_cleanup();
        if !failures.is_empty() {
            panic!("failed to shut down cluster:\n{}", failures);
        }
    }

    /// Returns a description of every failure, empty if none.
    fn shutdown_and_cleanup(&mut self) -> String {
        self.closed = true;
        let rafts: Vec<Raft> = self.rafts.iter().map(|(_, r)| r.clone()).collect();
        let mut report = String::new();
        for (position, err) in shutdown_all(&rafts) {
            let _ = writeln!(report, "node {}: {}", self.rafts[position].0, err);
        }

        for knob in self.knobs.iter_mut() {
            knob.cleanup(&mut self.cluster);
        }
        let (sent, dropped) = self.cluster.network().stats();
        debug!(sent, dropped, "cluster closed");
        report
    }

    #[track_caller]
    fn position(&self, raft: &Raft) -> (usize, usize) {
        match self.rafts.iter().position(|(_, r)| r == raft) {
            Some(position) => (self.rafts[position].0, position),
            None => panic!("raft {} does not belong to this cluster", raft.id()),
        }
    }

    fn describe_roles(&self) -> String {
        self.rafts
            .iter()
            .map(|(i, r)| format!("node {} {} in term {}", i, r.state(), r.term()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Drop for Control {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let failures = self.shutdown_and_cleanup();
        if failures.is_empty() {
            return;
        }
        if thread::panicking() {
            warn!(%failures, "shutdown failures while unwinding");
        } else {
            panic!("failed to shut down cluster:\n{}", failures);
        }
    }
}

/// Wait until `raft` knows a leader, and return the leader's id.
#[track_caller]
pub fn wait_leader(raft: &Raft, timeout: Duration) -> u64 {
    fatal(poll(
        DEFAULT_POLL_INTERVAL,
        timeout,
        &format!("raft {}", raft.id()),
        "a known leader",
        || {
            let leader = raft.leader();
            (leader, format!("{} with leader {:?}", raft.state(), leader))
        },
    ))
}

/// Shut down every engine in `rafts`.
///
/// # Panics
///
/// Panics listing every engine that failed, after all have been stopped.
#[track_caller]
pub fn shutdown<'a>(rafts: impl IntoIterator<Item = &'a Raft>) {
    let rafts: Vec<Raft> = rafts.into_iter().cloned().collect();
    let failures = shutdown_all(&rafts);
    if !failures.is_empty() {
        let report: Vec<String> = failures
            .iter()
            .map(|(position, err)| format!("raft {}: {}", rafts[*position].id(), err))
            .collect();
        panic!("failed to shut down raft nodes: {}", report.join("; "));
    }
}

/// Start every shutdown before waiting on any, and collect the failures by
/// position in `rafts`.
pub(crate) fn shutdown_all(rafts: &[Raft]) -> Vec<(usize, Error)> {
    let futures: Vec<ShutdownFuture> = rafts.iter().map(|r| r.shutdown()).collect();
    futures
        .into_iter()
        .enumerate()
        .filter_map(|(position, future)| future.wait().err().map(|err| (position, err)))
        .collect()
}

/// Probe until it yields a value or `timeout` passes. The probe returns the
/// value, if ready, and a description of what it saw.
fn poll<T>(
    interval: Duration,
    timeout: Duration,
    subject: &str,
    predicate: &str,
    mut probe: impl FnMut() -> (Option<T>, String),
) -> Result<T, Error> {
    let deadline = Instant::now() + timeout;
    loop {
        let (value, observed) = probe();
        if let Some(value) = value {
            return Ok(value);
        }
        if Instant::now() >= deadline {
            return Err(Error::WaitTimeout {
                subject: subject.to_string(),
                predicate: predicate.to_string(),
                timeout,
                observed,
            });
        }
        thread::sleep(interval);
    }
}

#[track_caller]
fn fatal<T>(result: Result<T, Error>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("{}", err),
    }
}
