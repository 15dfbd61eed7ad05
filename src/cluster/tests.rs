//! Cluster scenarios.
//!
//! Every test builds a real in-process cluster with test timing (10ms ticks,
//! 50ms election timeout), so waits are bounded in seconds, not minutes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;

use super::*;
use crate::consensus::{Raft, State};
use crate::error::Error;
use crate::fsm::fsms;
use crate::logging;

const TIMEOUT: Duration = Duration::from_secs(2);

// ===== ELECTION =====

#[test]
fn test_single_leader_emerges() {
    logging::init();

    for n in [1, 3, 5] {
        let (rafts, control) = cluster(fsms(n), vec![]);
        assert_eq!(rafts.len(), n);

        let leader = control.leadership_acquired(TIMEOUT);
        for raft in &rafts {
            assert_eq!(wait_leader(raft, TIMEOUT), leader.id(), "cluster of {}", n);
        }

        let leaders = rafts
            .iter()
            .filter(|r| r.state() == State::Leader && r.term() == leader.term())
            .count();
        assert_eq!(leaders, 1, "cluster of {}", n);
        control.close();
    }
}

#[test]
fn test_servers_starts_only_selected_nodes() {
    logging::init();

    let (rafts, control) = cluster(fsms(3), vec![servers([0])]);
    assert_eq!(rafts.len(), 3);
    assert_eq!(rafts.running(), 1);
    assert!(rafts.get(1).is_none());

    wait_leader(&rafts[0], TIMEOUT);
    assert_eq!(rafts[0].state(), State::Leader);
    let configuration = rafts[0].configuration().unwrap();
    assert_eq!(configuration.voters, vec![1]);
    assert_eq!(control.index_of(&rafts[0]), 0);
    control.close();
}

#[test]
fn test_servers_subset_forms_quorum() {
    logging::init();

    let (rafts, control) = cluster(fsms(5), vec![servers([1, 3, 4])]);
    assert_eq!(rafts.running(), 3);
    assert_eq!(control.index_of(&rafts[3]), 3);
    assert_eq!(rafts.iter().map(|r| r.id()).collect::<Vec<_>>(), vec![2, 4, 5]);

    control.leadership_acquired(TIMEOUT);
    assert_eq!(rafts[1].configuration().unwrap().voters, vec![2, 4, 5]);
    control.close();
}

#[test]
#[should_panic(expected = "node 0 is not running")]
fn test_discarded_slot_cannot_be_indexed() {
    let (rafts, _control) = cluster(fsms(3), vec![servers([2])]);
    let _ = &rafts[0];
}

#[test]
fn test_isolated_leader_steps_down_and_catches_up() {
    logging::init();

    let (rafts, control) = cluster(fsms(3), vec![]);
    let old = control.leadership_acquired(TIMEOUT);
    let first = old.apply(b"before".to_vec(), TIMEOUT).wait().unwrap();
    for raft in &rafts {
        control.wait_index(raft, first, TIMEOUT);
    }

    control.disconnect(&old);
    control.leadership_lost(&old, TIMEOUT);
    let new = control.leadership_acquired(TIMEOUT);
    assert_ne!(new, old);
    assert!(new.term() > old.term());

    let second = new.apply(b"after".to_vec(), TIMEOUT).wait().unwrap();
    assert!(second > first);
    assert!(old.applied_index() < second);

    control.reconnect(&old);
    control.wait_index(&old, second, TIMEOUT);
    assert_eq!(wait_leader(&old, TIMEOUT), new.id());
    assert_eq!(control.fsm_counters(&old).applied(), 2);
    control.close();
}

// ===== REPLICATION =====

#[test]
fn test_wait_index_follows_applies() {
    logging::init();

    let machines = fsms(3);
    let (rafts, control) = cluster(machines.clone(), vec![]);
    let leader = control.leadership_acquired(TIMEOUT);

    let mut last = 0;
    for i in 0..3u8 {
        last = leader.apply(vec![i], TIMEOUT).wait().unwrap();
    }
    assert_eq!(last, 4);

    for raft in &rafts {
        control.wait_index(raft, last, TIMEOUT);
        assert!(raft.applied_index() >= last);
        assert_eq!(control.fsm_counters(raft).applied(), 3);
    }
    for machine in &machines {
        assert_eq!(machine.commands(), vec![vec![0], vec![1], vec![2]]);
    }
    control.close();
}

#[test]
fn test_apply_on_follower_is_rejected() {
    logging::init();

    let (_rafts, control) = cluster(fsms(3), vec![]);
    let leader = control.leadership_acquired(TIMEOUT);
    let follower = control.other(&[&leader]);
    wait_leader(&follower, TIMEOUT);

    match follower.apply(b"x".to_vec(), TIMEOUT).wait() {
        Err(Error::NotLeader { leader: Some(id) }) => assert_eq!(id, leader.id()),
        other => panic!("expected NotLeader, got {:?}", other),
    }
    control.close();
}

#[test]
fn test_drop_rate_still_converges() {
    logging::init();

    let (rafts, control) = cluster(fsms(3), vec![drop_rate(0.05)]);
    let index = retry_apply(&control, b"x");
    for raft in &rafts {
        control.wait_index(raft, index, Duration::from_secs(5));
    }
    control.close();
}

// ===== PARTITIONS AND SNAPSHOTS =====

/// Lower the snapshot threshold so that a handful of applies triggers one.
fn eager_snapshots() -> Box<dyn Knob> {
    config(|_, c| {
        c.snapshot_interval = Duration::from_millis(50);
        c.snapshot_threshold = 4;
        c.trailing_logs = 1;
    })
}

#[test]
fn test_disconnected_follower_stalls() {
    logging::init();

    let (_rafts, control) = cluster(fsms(3), vec![eager_snapshots()]);
    let leader = control.leadership_acquired(TIMEOUT);
    let index = leader.apply(vec![], TIMEOUT).wait().unwrap();

    let lagging = control.other(&[&leader]);
    control.wait_index(&lagging, index, TIMEOUT);
    control.disconnect(&lagging);
    let follower = control.other(&[&leader, &lagging]);

    let mut last = index;
    for _ in 0..5 {
        last = leader.apply(vec![], TIMEOUT).wait().unwrap();
    }
    control.wait_index(&follower, last, TIMEOUT);
    control.wait_snapshot(&leader, 1, TIMEOUT);
    control.wait_snapshot(&follower, 1, TIMEOUT);

    assert_eq!(lagging.applied_index(), index);
    assert_eq!(control.fsm_counters(&lagging).snapshots(), 0);
    control.close();
}

#[test]
fn test_partition_snapshot_restore() {
    logging::init();

    let (rafts, control) = cluster(fsms(3), vec![eager_snapshots()]);
    let raft1 = control.leadership_acquired(TIMEOUT);

    // The leader's no-op sits at index 1, so the first command lands at 2.
    raft1.apply(vec![], TIMEOUT).wait().unwrap();
    for raft in &rafts {
        control.wait_index(raft, 2, TIMEOUT);
    }

    let raft2 = control.other(&[&raft1]);
    control.disconnect(&raft2);
    let raft3 = control.other(&[&raft1, &raft2]);

    for _ in 0..5 {
        raft1.apply(vec![], TIMEOUT).wait().unwrap();
    }
    control.wait_index(&raft1, 7, TIMEOUT);
    control.wait_index(&raft3, 7, TIMEOUT);
    control.wait_snapshot(&raft1, 1, TIMEOUT);
    control.wait_snapshot(&raft3, 1, TIMEOUT);
    assert!(raft2.applied_index() < 7);

    control.reconnect(&raft2);
    control.wait_restore(&raft2, 1, TIMEOUT);

    // Leadership may move once while the cluster settles.
    let mut leader = raft1;
    let mut applied = 0;
    let mut attempts = 0;
    while applied < 5 {
        attempts += 1;
        assert!(attempts <= 10, "too many failed applies");
        match leader.apply(vec![], TIMEOUT).wait() {
            Ok(_) => applied += 1,
            Err(Error::NotLeader { .. }) | Err(Error::LeadershipLost) => {
                control.leadership_lost(&leader, TIMEOUT);
                leader = control.leadership_acquired(TIMEOUT);
            }
            Err(err) => panic!("apply failed: {}", err),
        }
    }

    control.wait_index(&raft2, 12, TIMEOUT);
    assert!(raft2.applied_index() >= 12);
    control.close();
}

#[test]
fn test_user_snapshot_compacts_and_ships() {
    logging::init();

    let machines = fsms(3);
    let (_rafts, control) = cluster(
        machines.clone(),
        vec![config(|_, c| c.trailing_logs = 0)],
    );
    let leader = control.leadership_acquired(TIMEOUT);
    let lagging = control.other(&[&leader]);
    control.wait_index(&lagging, 1, TIMEOUT);
    control.disconnect(&lagging);

    let mut last = 0;
    for i in 0..3u8 {
        last = leader.apply(vec![i], TIMEOUT).wait().unwrap();
    }
    assert_eq!(leader.snapshot().unwrap(), last);

    control.reconnect(&lagging);
    control.wait_restore(&lagging, 1, TIMEOUT);
    control.wait_index(&lagging, last, TIMEOUT);

    let index = control.index_of(&lagging);
    assert_eq!(machines[index].commands(), vec![vec![0], vec![1], vec![2]]);
    control.close();
}

// ===== CONTROL =====

#[test]
fn test_other_is_deterministic() {
    logging::init();

    let (rafts, control) = cluster(fsms(3), vec![]);
    assert_eq!(control.other(&[]), rafts[0]);
    assert_eq!(control.other(&[&rafts[0]]), control.other(&[&rafts[0]]));
    assert_eq!(control.other(&[&rafts[0]]), rafts[1]);
    assert_eq!(control.other(&[&rafts[0], &rafts[1]]), rafts[2]);
    control.close();
}

#[test]
#[should_panic(expected = "every one of the 2 running nodes is excluded")]
fn test_other_with_everything_excluded() {
    let (rafts, control) = cluster(fsms(2), vec![]);
    control.other(&[&rafts[0], &rafts[1]]);
}

#[test]
#[should_panic(expected = "node 0: timed out after 50ms waiting for applied index >= 100 (last observed: applied index")]
fn test_wait_index_timeout_reports_observation() {
    let (rafts, control) = cluster(fsms(1), vec![]);
    control.wait_index(&rafts[0], 100, Duration::from_millis(50));
}

#[test]
#[should_panic(expected = "cluster: timed out after 50ms waiting for a leader (last observed: node 0 Follower")]
fn test_leadership_acquired_timeout() {
    let (_rafts, control) = cluster(
        fsms(3),
        vec![config(|_, c| c.election_timeout = Duration::from_secs(10))],
    );
    control.leadership_acquired(Duration::from_millis(50));
}

#[test]
#[should_panic(expected = "node 0: timed out after 50ms waiting for leadership to be lost (last observed: Leader)")]
fn test_leadership_lost_timeout() {
    let (rafts, control) = cluster(fsms(1), vec![]);
    let leader = control.leadership_acquired(TIMEOUT);
    assert_eq!(leader, rafts[0]);
    control.leadership_lost(&leader, Duration::from_millis(50));
}

#[test]
#[should_panic(expected = "node 0: timed out after 20ms waiting for snapshots >= 1 (last observed: snapshots 0)")]
fn test_wait_snapshot_timeout() {
    let (rafts, control) = cluster(fsms(1), vec![]);
    control.wait_snapshot(&rafts[0], 1, Duration::from_millis(20));
}

#[test]
#[should_panic(expected = "waiting for restores >= 1 (last observed: restores 0)")]
fn test_wait_restore_timeout() {
    let (rafts, control) = cluster(fsms(1), vec![]);
    control.wait_restore(&rafts[0], 1, Duration::from_millis(20));
}

#[test]
#[should_panic(expected = "a cluster needs at least one state machine")]
fn test_empty_cluster() {
    cluster(fsms(0), vec![]);
}

#[test]
#[should_panic(expected = "failed to start raft node 0")]
fn test_bad_config_is_fatal() {
    cluster(
        fsms(2),
        vec![config(|_, c| c.tick_interval = Duration::ZERO)],
    );
}

#[test]
fn test_free_shutdown() {
    let (rafts, control) = cluster(fsms(2), vec![]);
    shutdown(&rafts);
    assert!(rafts.iter().all(|r| r.state() == State::Shutdown));
    // Closing after an explicit shutdown is fine.
    control.close();
}

/// Records the order in which knobs are initialized and cleaned up, and the
/// drop rate in force at each point.
struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Knob for Recorder {
    fn init(&mut self, cluster: &mut Cluster) {
        self.log.lock().unwrap().push(format!(
            "init {} (drop {})",
            self.name,
            cluster.network().drop_rate()
        ));
    }

    fn cleanup(&mut self, cluster: &mut Cluster) {
        self.log.lock().unwrap().push(format!(
            "cleanup {} (drop {})",
            self.name,
            cluster.network().drop_rate()
        ));
    }
}

#[test]
fn test_knobs_run_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let knobs: Vec<Box<dyn Knob>> = vec![
        Box::new(Recorder {
            name: "a",
            log: log.clone(),
        }),
        drop_rate(0.5),
        Box::new(Recorder {
            name: "b",
            log: log.clone(),
        }),
    ];

    let (_rafts, control) = cluster(fsms(1), knobs);
    control.close();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "init a (drop 0)",
            "init b (drop 0.5)",
            "cleanup a (drop 0.5)",
            "cleanup b (drop 0)",
        ]
    );
}

#[test]
fn test_drop_closes_cluster() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let rafts = {
        let (rafts, _control) = cluster(
            fsms(1),
            vec![Box::new(Recorder {
                name: "a",
                log: log.clone(),
            }) as Box<dyn Knob>],
        );
        rafts
    };

    assert_eq!(rafts[0].state(), State::Shutdown);
    assert_eq!(log.lock().unwrap().len(), 2);
}

/// Apply `command` on whoever leads, retrying through leadership changes.
/// Returns the index it was applied at.
fn retry_apply(control: &Control, command: &[u8]) -> u64 {
    for _ in 0..10 {
        let leader: Raft = control.leadership_acquired(Duration::from_secs(5));
        match leader.apply(command.to_vec(), TIMEOUT).wait_timeout(TIMEOUT) {
            Ok(index) => return index,
            Err(err) => tracing::warn!(error = %err, "apply failed, retrying"),
        }
    }
    panic!("command never applied");
}
