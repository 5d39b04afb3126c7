//! Transaction correlation: matches outbound requests to inbound replies by
//! `(peer address, xid)`.
//!
//! Every entry ends exactly once, either resolved by a reply or expired by its
//! timer. Both paths remove the entry under the same lock, so whichever gets
//! there first wins and the other finds nothing to do.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

use crate::ofp::{MsgType, Xid};

type Key = (String, Xid);

/// How a correlation entry ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Matched { rtt: Duration },
    Mismatched { expected: MsgType, received: MsgType, rtt: Duration },
    Timeout,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Matched { .. })
    }
}

#[derive(Debug)]
struct Pending {
    expected: MsgType,
    sent_at: Instant,
    generation: u64,
    completion: oneshot::Sender<Outcome>,
}

/// Receiving end of one correlation entry.
#[derive(Debug)]
pub struct Waiter {
    rx: oneshot::Receiver<Outcome>,
}

impl Waiter {
    /// Wait for the entry to end. An entry displaced by a newer registration
    /// under the same key reports `Timeout`.
    pub async fn wait(self) -> Outcome {
        self.rx.await.unwrap_or(Outcome::Timeout)
    }
}

#[derive(Debug, Default)]
pub struct Transactions {
    pending: Mutex<HashMap<Key, Pending>>,
    generation: AtomicU64,
}

impl Transactions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an entry expecting `expected` from `peer` within `timeout`.
    ///
    /// Call before writing the request so a fast reply always finds it. One
    /// entry per key: a second registration replaces the first.
    pub fn register(self: &Arc<Self>, peer: &str, xid: Xid, expected: MsgType, timeout: Duration) -> Waiter {
        let (tx, rx) = oneshot::channel();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let key: Key = (peer.to_string(), xid);

        let replaced = self.pending.lock().insert(
            key.clone(),
            Pending {
                expected,
                sent_at: Instant::now(),
                generation,
                completion: tx,
            },
        );
        if replaced.is_some() {
            debug!("xid {} for {} re-registered, previous waiter dropped", xid, peer);
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(this) = weak.upgrade() {
                this.expire(&key, generation);
            }
        });

        Waiter { rx }
    }

    fn expire(&self, key: &Key, generation: u64) {
        let expired = {
            let mut pending = self.pending.lock();
            match pending.get(key) {
                Some(p) if p.generation == generation => pending.remove(key),
                _ => None,
            }
        };
        if let Some(p) = expired {
            debug!("xid {} for {} timed out waiting for {}", key.1, key.0, p.expected);
            let _ = p.completion.send(Outcome::Timeout);
        }
    }

    /// Settle the entry for `(peer, xid)` with a frame of type `received`.
    ///
    /// Entries registered after `received_at` are left alone. Returns the
    /// measured round trip when an entry was settled.
    pub fn resolve(&self, peer: &str, xid: Xid, received: MsgType, received_at: Instant) -> Option<Duration> {
        let key: Key = (peer.to_string(), xid);
        let p = {
            let mut pending = self.pending.lock();
            match pending.get(&key) {
                Some(p) if p.sent_at <= received_at => pending.remove(&key),
                _ => None,
            }
        }?;

        let rtt = received_at.saturating_duration_since(p.sent_at);
        let outcome = if p.expected == received {
            Outcome::Matched { rtt }
        } else {
            Outcome::Mismatched {
                expected: p.expected,
                received,
                rtt,
            }
        };
        debug!("xid {} for {} resolved: {:?}", xid, peer, outcome);
        let _ = p.completion.send(outcome);
        Some(rtt)
    }

    /// Drop an entry without completing it; its waiter sees `Timeout`.
    pub fn cancel(&self, peer: &str, xid: Xid) -> bool {
        self.pending.lock().remove(&(peer.to_string(), xid)).is_some()
    }

    pub fn contains(&self, peer: &str, xid: Xid) -> bool {
        self.pending.lock().contains_key(&(peer.to_string(), xid))
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
