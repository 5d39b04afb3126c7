//! Switch registry.
//!
//! Two concurrent indexes over the same `SwitchConn` records:
//! - by peer address, populated on accept;
//! - by dpid, populated once the handshake completes.
//!
//! Mutations are crate-private and only the Dispatcher calls them. Readers
//! (the bridge, tests) use the lookups, which never block on a writer for
//! longer than a shard lock and return `None` for anything not yet indexed.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::controller::switch::{HandshakeStatus, SwitchConn};
use crate::network::ConnectionHandle;

#[derive(Debug, Default)]
pub struct SwitchRegistry {
    by_addr: DashMap<String, Arc<SwitchConn>>,
    by_dpid: DashMap<u64, Arc<SwitchConn>>,
}

impl SwitchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an Incomplete record for a freshly accepted connection.
    ///
    /// A record already present under the same address belongs to a dead
    /// socket whose close event has not been processed yet; it is replaced and
    /// closed.
    pub(crate) fn register(&self, address: String, conn: ConnectionHandle) -> Arc<SwitchConn> {
        let sw = Arc::new(SwitchConn::new(address.clone(), conn));
        if let Some(stale) = self.by_addr.insert(address.clone(), sw.clone()) {
            warn!("replacing stale record for {}", address);
            self.unindex_dpid(&stale);
            stale.close();
        }
        debug!("registered switch {}", address);
        sw
    }

    pub fn lookup_by_address(&self, address: &str) -> Option<Arc<SwitchConn>> {
        self.by_addr.get(address).map(|e| e.value().clone())
    }

    pub fn lookup_by_dpid(&self, dpid: u64) -> Option<Arc<SwitchConn>> {
        self.by_dpid.get(&dpid).map(|e| e.value().clone())
    }

    /// Record the dpid and index the switch under it. A second switch
    /// reporting the same dpid takes over the index entry.
    pub(crate) fn complete_handshake(&self, sw: &Arc<SwitchConn>, dpid: u64) {
        if sw.status() == HandshakeStatus::Complete && sw.dpid() != dpid {
            self.unindex_dpid(sw);
        }
        sw.complete(dpid);
        if let Some(prev) = self.by_dpid.insert(dpid, sw.clone()) {
            if !Arc::ptr_eq(&prev, sw) {
                warn!(
                    "dpid {:#018x} moved from {} to {}",
                    dpid,
                    prev.address(),
                    sw.address()
                );
            }
        }
        info!("handshake complete: {} is dpid {:#018x}", sw.address(), dpid);
    }

    /// De-index a switch under both keys and close its socket. Safe to call
    /// more than once; only the first call closes.
    pub(crate) fn remove(&self, sw: &Arc<SwitchConn>) -> bool {
        self.by_addr
            .remove_if(sw.address(), |_, cur| Arc::ptr_eq(cur, sw));
        self.unindex_dpid(sw);
        let closed = sw.close();
        if closed {
            info!("switch {} removed", sw.address());
        }
        closed
    }

    /// Remove whatever is registered under `address`.
    pub(crate) fn remove_address(&self, address: &str) -> Option<Arc<SwitchConn>> {
        let sw = self.lookup_by_address(address)?;
        self.remove(&sw);
        Some(sw)
    }

    fn unindex_dpid(&self, sw: &Arc<SwitchConn>) {
        if sw.status() == HandshakeStatus::Complete {
            self.by_dpid
                .remove_if(&sw.dpid(), |_, cur| Arc::ptr_eq(cur, sw));
        }
    }

    /// Dpids of every handshake-complete switch, ascending.
    pub fn dpids(&self) -> Vec<u64> {
        let mut out: Vec<u64> = self.by_dpid.iter().map(|e| *e.key()).collect();
        out.sort_unstable();
        out
    }

    /// Number of connected switches, complete or not.
    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }

    /// Close and forget every switch.
    pub(crate) fn clear(&self) {
        let all: Vec<Arc<SwitchConn>> = self.by_addr.iter().map(|e| e.value().clone()).collect();
        for sw in all {
            self.remove(&sw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn handle(addr: &str) -> (ConnectionHandle, CancellationToken, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        (ConnectionHandle::new(addr.to_string(), tx, token.clone()), token, rx)
    }

    #[test]
    fn handshake_moves_switch_into_dpid_index() {
        let reg = SwitchRegistry::new();
        let (h, _t, _rx) = handle("10.0.0.1:1");
        let sw = reg.register("10.0.0.1:1".into(), h);

        assert_eq!(sw.status(), HandshakeStatus::Incomplete);
        assert!(reg.lookup_by_address("10.0.0.1:1").is_some());
        assert!(reg.lookup_by_dpid(42).is_none());
        assert!(reg.dpids().is_empty());

        reg.complete_handshake(&sw, 42);
        let found = reg.lookup_by_dpid(42).unwrap();
        assert!(Arc::ptr_eq(&found, &sw));
        assert_eq!(reg.dpids(), vec![42]);
    }

    #[test]
    fn remove_deindexes_and_closes_once() {
        let reg = SwitchRegistry::new();
        let (h, token, _rx) = handle("10.0.0.2:1");
        let sw = reg.register("10.0.0.2:1".into(), h);
        reg.complete_handshake(&sw, 7);

        assert!(reg.remove(&sw));
        assert!(token.is_cancelled());
        assert!(reg.lookup_by_address("10.0.0.2:1").is_none());
        assert!(reg.lookup_by_dpid(7).is_none());
        assert!(reg.is_empty());

        assert!(!reg.remove(&sw));
        assert!(reg.remove_address("10.0.0.2:1").is_none());
    }

    #[test]
    fn removing_old_holder_keeps_dpid_taken_over_by_new_switch() {
        let reg = SwitchRegistry::new();
        let (h1, _t1, _r1) = handle("a:1");
        let (h2, _t2, _r2) = handle("b:1");
        let first = reg.register("a:1".into(), h1);
        let second = reg.register("b:1".into(), h2);

        reg.complete_handshake(&first, 9);
        reg.complete_handshake(&second, 9);
        reg.remove(&first);

        let holder = reg.lookup_by_dpid(9).unwrap();
        assert!(Arc::ptr_eq(&holder, &second));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn re_register_same_address_closes_stale_record() {
        let reg = SwitchRegistry::new();
        let (h1, t1, _r1) = handle("a:1");
        let (h2, t2, _r2) = handle("a:1");
        let old = reg.register("a:1".into(), h1);
        reg.complete_handshake(&old, 3);

        let new = reg.register("a:1".into(), h2);
        assert!(t1.is_cancelled());
        assert!(!t2.is_cancelled());
        assert!(reg.lookup_by_dpid(3).is_none());
        assert!(Arc::ptr_eq(&reg.lookup_by_address("a:1").unwrap(), &new));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_handshakes_index_every_switch() {
        let reg = Arc::new(SwitchRegistry::new());
        let mut tasks = Vec::new();
        for i in 0..64u64 {
            let reg = reg.clone();
            tasks.push(tokio::spawn(async move {
                let addr = format!("10.1.0.{}:6653", i);
                let (tx, _rx) = mpsc::channel(1);
                let h = ConnectionHandle::new(addr.clone(), tx, CancellationToken::new());
                let sw = reg.register(addr, h);
                reg.complete_handshake(&sw, 1000 + i);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(reg.len(), 64);
        assert_eq!(reg.dpids(), (1000..1064).collect::<Vec<u64>>());
        for i in 0..64u64 {
            let sw = reg.lookup_by_dpid(1000 + i).unwrap();
            assert_eq!(sw.address(), format!("10.1.0.{}:6653", i));
        }
    }
}
