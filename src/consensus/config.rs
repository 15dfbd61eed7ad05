//! Engine configuration.
//!
//! Timing is expressed as wall-clock durations and converted to raft-rs
//! logical ticks when the engine starts. Every timeout must be a whole,
//! positive number of ticks.

use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration of one consensus engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Length of one logical clock tick.
    pub tick_interval: Duration,
    /// How often a leader heartbeats its followers.
    pub heartbeat_interval: Duration,
    /// Minimum time without leader contact before a follower campaigns.
    /// raft-rs randomizes the actual timeout in `[election, 2 * election)`.
    pub election_timeout: Duration,
    /// How often the snapshot policy is evaluated.
    pub snapshot_interval: Duration,
    /// Applied entries since the last snapshot needed to take a new one.
    pub snapshot_threshold: u64,
    /// Entries kept in the log behind a snapshot, so slightly lagging
    /// followers can catch up without a snapshot transfer.
    pub trailing_logs: u64,
    /// Maximum bytes of entries per append message.
    pub max_size_per_msg: u64,
    /// Maximum in-flight append messages per follower.
    pub max_inflight_msgs: usize,
    /// Run a pre-vote round before campaigning, so partitioned nodes do not
    /// inflate the term.
    pub pre_vote: bool,
    /// Leaders step down when they stop hearing from a quorum.
    pub check_quorum: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tick_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_millis(200),
            election_timeout: Duration::from_secs(1),
            snapshot_interval: Duration::from_secs(120),
            snapshot_threshold: 8192,
            trailing_logs: 10240,
            max_size_per_msg: 1024 * 1024,
            max_inflight_msgs: 256,
            pre_vote: true,
            check_quorum: true,
        }
    }
}

impl Config {
    /// Check the configuration for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(Error::Config("tick_interval must be positive".into()));
        }
        if self.heartbeat_interval < self.tick_interval {
            return Err(Error::Config(format!(
                "heartbeat_interval {:?} shorter than tick_interval {:?}",
                self.heartbeat_interval, self.tick_interval
            )));
        }
        if self.election_timeout <= self.heartbeat_interval {
            return Err(Error::Config(format!(
                "election_timeout {:?} must exceed heartbeat_interval {:?}",
                self.election_timeout, self.heartbeat_interval
            )));
        }
        if self.snapshot_interval.is_zero() {
            return Err(Error::Config("snapshot_interval must be positive".into()));
        }
        if self.snapshot_threshold == 0 {
            return Err(Error::Config("snapshot_threshold must be positive".into()));
        }
        if self.max_inflight_msgs == 0 {
            return Err(Error::Config("max_inflight_msgs must be positive".into()));
        }
        if self.election_ticks() <= self.heartbeat_ticks() {
            return Err(Error::Config(format!(
                "election timeout rounds to {} ticks, heartbeat to {}",
                self.election_ticks(),
                self.heartbeat_ticks()
            )));
        }
        Ok(())
    }

    /// Heartbeat interval in ticks.
    pub fn heartbeat_ticks(&self) -> usize {
        ticks(self.heartbeat_interval, self.tick_interval)
    }

    /// Election timeout in ticks.
    pub fn election_ticks(&self) -> usize {
        ticks(self.election_timeout, self.tick_interval)
    }

    /// Build the raft-rs configuration for node `id`, whose state machine has
    /// already applied everything up to `applied`.
    pub(crate) fn to_raft(&self, id: u64, applied: u64) -> Result<raft::Config> {
        self.validate()?;
        let config = raft::Config {
            id,
            election_tick: self.election_ticks(),
            heartbeat_tick: self.heartbeat_ticks(),
            applied,
            max_size_per_msg: self.max_size_per_msg,
            max_inflight_msgs: self.max_inflight_msgs,
            check_quorum: self.check_quorum,
            pre_vote: self.pre_vote,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }
}

fn ticks(timeout: Duration, tick: Duration) -> usize {
    if tick.is_zero() {
        return 0;
    }
    (timeout.as_nanos() / tick.as_nanos()) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.election_ticks(), 10);
        assert_eq!(config.heartbeat_ticks(), 2);
    }

    #[test]
    fn test_to_raft_converts_ticks() {
        let config = Config {
            tick_interval: Duration::from_millis(10),
            heartbeat_interval: Duration::from_millis(20),
            election_timeout: Duration::from_millis(50),
            ..Config::default()
        };
        let raft = config.to_raft(3, 7).unwrap();
        assert_eq!(raft.id, 3);
        assert_eq!(raft.applied, 7);
        assert_eq!(raft.heartbeat_tick, 2);
        assert_eq!(raft.election_tick, 5);
        assert!(raft.pre_vote);
        assert!(raft.check_quorum);
    }

    #[test]
    fn test_rejects_inverted_timeouts() {
        let config = Config {
            election_timeout: Duration::from_millis(200),
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must exceed"), "{}", err);
    }

    #[test]
    fn test_rejects_sub_tick_heartbeat() {
        let config = Config {
            heartbeat_interval: Duration::from_millis(50),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_tick() {
        let config = Config {
            tick_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert!(config.to_raft(1, 0).is_err());
    }
}
