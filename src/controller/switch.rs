use bytes::Bytes;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::network::{ConnectionError, ConnectionHandle};
use crate::ofp::{Version, Xid, OFP_XID_WRAP};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandshakeStatus {
    Incomplete,
    Complete,
}

impl fmt::Display for HandshakeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeStatus::Incomplete => f.write_str("Incomplete"),
            HandshakeStatus::Complete => f.write_str("Complete"),
        }
    }
}

/// Switch metadata tracked by the registry.
#[derive(Clone, Debug)]
pub struct Switch {
    /// Zero until the handshake completes.
    pub dpid: u64,
    /// Version negotiated by the switch's first Hello.
    pub version: Option<Version>,
    pub last_seen: Instant,
    /// Smallest request/reply round trip measured so far.
    pub lowest_latency: Option<Duration>,
    pub status: HandshakeStatus,
}

impl Switch {
    fn new() -> Self {
        Self {
            dpid: 0,
            version: None,
            last_seen: Instant::now(),
            lowest_latency: None,
            status: HandshakeStatus::Incomplete,
        }
    }
}

/// A connected switch: its metadata plus the live connection.
///
/// Metadata setters are crate-private; only the Dispatcher calls them.
#[derive(Debug)]
pub struct SwitchConn {
    address: String,
    conn: ConnectionHandle,
    state: RwLock<Switch>,
    next_xid: AtomicU32,
}

impl SwitchConn {
    pub(crate) fn new(address: String, conn: ConnectionHandle) -> Self {
        Self {
            address,
            conn,
            state: RwLock::new(Switch::new()),
            next_xid: AtomicU32::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.conn
    }

    pub fn snapshot(&self) -> Switch {
        self.state.read().clone()
    }

    pub fn dpid(&self) -> u64 {
        self.state.read().dpid
    }

    pub fn status(&self) -> HandshakeStatus {
        self.state.read().status
    }

    pub fn lowest_latency(&self) -> Option<Duration> {
        self.state.read().lowest_latency
    }

    /// Next locally assigned xid, wrapping at `OFP_XID_WRAP`.
    ///
    /// A wrapped xid can collide with a request that is still pending; callers
    /// holding long-lived entries should supply their own xids.
    pub fn next_xid(&self) -> Xid {
        let prev = self
            .next_xid
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |x| Some((x + 1) % OFP_XID_WRAP));
        // the closure never returns None
        prev.unwrap_or_else(|x| x)
    }

    /// Returns `xid` unless it is zero, in which case a fresh one is assigned.
    pub fn assign_xid(&self, xid: Xid) -> Xid {
        if xid == 0 {
            self.next_xid()
        } else {
            xid
        }
    }

    pub async fn send(&self, frame: Bytes) -> Result<(), ConnectionError> {
        self.conn.send(frame).await
    }

    pub fn try_send(&self, frame: Bytes) -> Result<(), ConnectionError> {
        self.conn.try_send(frame)
    }

    pub(crate) fn mark_seen(&self, at: Instant) {
        self.state.write().last_seen = at;
    }

    pub(crate) fn set_version(&self, version: Version) {
        self.state.write().version.get_or_insert(version);
    }

    /// Keep the minimum; a larger sample never replaces a smaller one.
    pub(crate) fn record_latency(&self, rtt: Duration) {
        let mut st = self.state.write();
        match st.lowest_latency {
            Some(l) if l <= rtt => {}
            _ => st.lowest_latency = Some(rtt),
        }
    }

    pub(crate) fn complete(&self, dpid: u64) {
        let mut st = self.state.write();
        st.dpid = dpid;
        st.status = HandshakeStatus::Complete;
    }

    pub(crate) fn close(&self) -> bool {
        self.conn.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    /// A switch whose outbound frames land in the returned receiver.
    fn detached(address: &str) -> (SwitchConn, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(64);
        let handle = ConnectionHandle::new(address.to_string(), tx, CancellationToken::new());
        (SwitchConn::new(address.to_string(), handle), rx)
    }

    #[test]
    fn xids_start_at_zero_and_wrap() {
        let (sw, _rx) = detached("a:1");
        assert_eq!(sw.next_xid(), 0);
        assert_eq!(sw.next_xid(), 1);
        assert_eq!(sw.assign_xid(77), 77);
        assert_eq!(sw.assign_xid(0), 2);

        sw.next_xid.store(OFP_XID_WRAP - 1, Ordering::Release);
        assert_eq!(sw.next_xid(), OFP_XID_WRAP - 1);
        assert_eq!(sw.next_xid(), 0);
    }

    #[test]
    fn latency_never_increases() {
        let (sw, _rx) = detached("a:1");
        assert_eq!(sw.lowest_latency(), None);
        sw.record_latency(Duration::from_millis(20));
        sw.record_latency(Duration::from_millis(50));
        assert_eq!(sw.lowest_latency(), Some(Duration::from_millis(20)));
        sw.record_latency(Duration::from_millis(5));
        assert_eq!(sw.lowest_latency(), Some(Duration::from_millis(5)));
    }

    #[test]
    fn completion_sets_dpid_and_status() {
        let (sw, _rx) = detached("a:1");
        assert_eq!(sw.status(), HandshakeStatus::Incomplete);
        assert_eq!(sw.dpid(), 0);
        sw.complete(0xfeed);
        let snap = sw.snapshot();
        assert_eq!(snap.dpid, 0xfeed);
        assert_eq!(snap.status, HandshakeStatus::Complete);
    }
}
