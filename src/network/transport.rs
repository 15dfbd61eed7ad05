//! In-memory transport endpoint.
//!
//! Each endpoint owns an inbox and a registry of the peers it can reach,
//! keyed by address. Registering a peer stores a sender into that peer's
//! inbox; removing it makes every send to that address fail as if the link
//! were down. The registry is read by the node's driver thread on every send
//! and mutated by the test thread through the fabric, so it sits behind a
//! read-write lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crossbeam_channel::{unbounded, Receiver, Sender};
use raft::eraftpb::Message;
use rand::Rng;

use crate::error::{Error, Result};

/// Fault settings shared by every endpoint of a fabric.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of silently dropping a deliverable message (0.0 - 1.0).
    pub drop_rate: f64,
}

struct TransportInner {
    id: u64,
    addr: String,
    inbox_tx: Sender<Message>,
    inbox_rx: Receiver<Message>,
    peers: RwLock<HashMap<String, Sender<Message>>>,
    faults: Arc<RwLock<FaultConfig>>,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

/// A node's endpoint on the in-memory network. Cheap to clone.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.inner.id)
            .field("addr", &self.inner.addr)
            .field("peers", &self.connected())
            .finish()
    }
}

impl Transport {
    /// Create a standalone endpoint with no fault injection.
    pub fn new(id: u64, addr: impl Into<String>) -> Self {
        Self::with_faults(id, addr, Arc::new(RwLock::new(FaultConfig::default())))
    }

    pub(crate) fn with_faults(
        id: u64,
        addr: impl Into<String>,
        faults: Arc<RwLock<FaultConfig>>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = unbounded();
        Transport {
            inner: Arc::new(TransportInner {
                id,
                addr: addr.into(),
                inbox_tx,
                inbox_rx,
                peers: RwLock::new(HashMap::new()),
                faults,
                messages_sent: AtomicU64::new(0),
                messages_dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Raft id of the node bound to this endpoint.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn local_addr(&self) -> &str {
        &self.inner.addr
    }

    /// Register `peer` as reachable from this endpoint. Re-registering the
    /// same peer overwrites the previous entry.
    pub fn connect(&self, peer: &Transport) {
        self.inner
            .peers
            .write()
            .unwrap()
            .insert(peer.inner.addr.clone(), peer.inner.inbox_tx.clone());
    }

    /// Forget the peer at `addr`.
    pub fn disconnect(&self, addr: &str) {
        self.inner.peers.write().unwrap().remove(addr);
    }

    pub fn is_connected(&self, addr: &str) -> bool {
        self.inner.peers.read().unwrap().contains_key(addr)
    }

    /// Addresses of every registered peer, sorted.
    pub fn connected(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.inner.peers.read().unwrap().keys().cloned().collect();
        addrs.sort();
        addrs
    }

    /// Deliver `msg` to the peer at `to`.
    ///
    /// Fails with `Unreachable` if the peer is not registered or its inbox is
    /// gone. A message lost to the configured drop rate is not an error: the
    /// sender cannot tell it apart from a delivered one.
    pub fn send(&self, to: &str, msg: Message) -> Result<()> {
        let tx = match self.inner.peers.read().unwrap().get(to) {
            Some(tx) => tx.clone(),
            None => {
                self.inner.messages_dropped.fetch_add(1, Ordering::SeqCst);
                return Err(Error::Unreachable { to: to.to_string() });
            }
        };

        {
            let faults = self.inner.faults.read().unwrap();
            if faults.drop_rate > 0.0 && rand::thread_rng().gen::<f64>() < faults.drop_rate {
                self.inner.messages_dropped.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
        }

        if tx.send(msg).is_err() {
            self.inner.messages_dropped.fetch_add(1, Ordering::SeqCst);
            return Err(Error::Unreachable { to: to.to_string() });
        }
        self.inner.messages_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Receiving side of this endpoint's inbox.
    pub(crate) fn inbox(&self) -> Receiver<Message> {
        self.inner.inbox_rx.clone()
    }

    pub fn messages_sent(&self) -> u64 {
        self.inner.messages_sent.load(Ordering::SeqCst)
    }

    pub fn messages_dropped(&self) -> u64 {
        self.inner.messages_dropped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from: u64, to: u64) -> Message {
        let mut msg = Message::default();
        msg.from = from;
        msg.to = to;
        msg
    }

    #[test]
    fn test_send_requires_registration() {
        let a = Transport::new(1, "0");
        let b = Transport::new(2, "1");

        assert!(matches!(a.send("1", msg(1, 2)), Err(Error::Unreachable { .. })));
        assert_eq!(a.messages_dropped(), 1);

        a.connect(&b);
        a.send("1", msg(1, 2)).unwrap();
        let received = b.inbox().try_recv().unwrap();
        assert_eq!(received.from, 1);
        assert_eq!(a.messages_sent(), 1);

        // Registration is one-directional.
        assert!(b.send("0", msg(2, 1)).is_err());
    }

    #[test]
    fn test_disconnect_is_immediate() {
        let a = Transport::new(1, "0");
        let b = Transport::new(2, "1");
        a.connect(&b);
        a.connect(&b);
        assert_eq!(a.connected(), vec!["1".to_string()]);

        a.disconnect("1");
        assert!(!a.is_connected("1"));
        assert!(a.send("1", msg(1, 2)).is_err());
        assert!(b.inbox().try_recv().is_err());
    }

    #[test]
    fn test_full_drop_rate_loses_everything() {
        let faults = Arc::new(RwLock::new(FaultConfig { drop_rate: 1.0 }));
        let a = Transport::with_faults(1, "0", faults.clone());
        let b = Transport::with_faults(2, "1", faults.clone());
        a.connect(&b);

        for _ in 0..10 {
            a.send("1", msg(1, 2)).unwrap();
        }
        assert!(b.inbox().try_recv().is_err());
        assert_eq!(a.messages_dropped(), 10);

        faults.write().unwrap().drop_rate = 0.0;
        a.send("1", msg(1, 2)).unwrap();
        assert!(b.inbox().try_recv().is_ok());
    }
}
