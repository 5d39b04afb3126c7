use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::controller::registry::SwitchRegistry;
use crate::controller::switch::{HandshakeStatus, SwitchConn};
use crate::controller::transactions::{Transactions, Waiter};
use crate::network::{Inbound, InboundReceiver};
use crate::ofp::{
    EchoReply, ErrorMsg, FeaturesReply, FeaturesRequest, Header, Hello, MsgType, OfpMessage, Version,
    Xid,
};

/// Single consumer of the inbound queue.
///
/// Owns every registry mutation: connections appear, complete their handshake
/// and disappear only through events handled here, in queue order.
pub struct Dispatcher {
    registry: Arc<SwitchRegistry>,
    transactions: Arc<Transactions>,
    inbound: InboundReceiver,
    handshake_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SwitchRegistry>,
        transactions: Arc<Transactions>,
        inbound: InboundReceiver,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            transactions,
            inbound,
            handshake_timeout,
        }
    }

    /// Drain the inbound queue until shutdown or until every producer is gone.
    /// On exit all remaining switches are closed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("dispatcher started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("dispatcher observed shutdown");
                        break;
                    }
                }
                ev = self.inbound.recv() => match ev {
                    Some(ev) => self.handle(ev),
                    None => {
                        debug!("inbound queue closed");
                        break;
                    }
                }
            }
        }
        self.registry.clear();
        info!("dispatcher stopped");
    }

    pub fn handle(&self, ev: Inbound) {
        match ev {
            Inbound::Connected { peer, conn } => {
                self.registry.register(peer, conn);
            }
            Inbound::Closed { peer } => self.on_closed(&peer),
            Inbound::Frame {
                peer,
                data,
                received_at,
            } => self.on_frame(&peer, &data, received_at),
        }
    }

    fn on_closed(&self, peer: &str) {
        // A newer connection may already own this address; only a record whose
        // socket is gone belongs to this event.
        match self.registry.lookup_by_address(peer) {
            Some(sw) if sw.connection().is_closed() => {
                self.registry.remove(&sw);
            }
            Some(_) => debug!("close of {} superseded by a newer connection", peer),
            None => debug!("close for unknown peer {}", peer),
        }
    }

    fn on_frame(&self, peer: &str, data: &[u8], received_at: Instant) {
        let header = match Header::decode(data) {
            Ok(h) => h,
            Err(e) => {
                warn!("dropping frame from {}: {}", peer, e);
                return;
            }
        };
        let Some(sw) = self.registry.lookup_by_address(peer) else {
            return;
        };
        let Some(version) = Version::from_wire(header.version) else {
            debug!("frame from {} with unknown version {:#04x}", peer, header.version);
            return;
        };

        let typ = header.msg_type();
        match typ {
            MsgType::Hello => {
                // A Hello we cannot parse negotiates nothing; the switch is
                // left waiting and no handshake traffic is sent.
                if let Err(e) = Hello::decode(data) {
                    warn!("dropping hello from {}: {}", peer, e);
                    return;
                }
                if sw.status() == HandshakeStatus::Incomplete {
                    sw.set_version(version);
                    let _ = self.start_handshake(&sw, version);
                }
            }
            MsgType::EchoRequest => {
                let reply = EchoReply::new(version, header.xid).encode();
                if let Err(e) = sw.try_send(Bytes::from(reply)) {
                    warn!("echo reply to {} not sent: {}", peer, e);
                }
            }
            MsgType::FeaturesReply => match FeaturesReply::decode(data) {
                Ok(reply) => self.registry.complete_handshake(&sw, reply.dpid),
                Err(e) => warn!("bad features reply from {}: {}", peer, e),
            },
            MsgType::Error => match ErrorMsg::decode(data) {
                Ok(err) => warn!(
                    "switch {} reported error type={} code={} (xid {})",
                    peer, err.err_type, err.code, header.xid
                ),
                Err(e) => warn!("undecodable error message from {}: {}", peer, e),
            },
            other => debug!("{} from {} has no handler", other, peer),
        }

        if let Some(rtt) = self.transactions.resolve(peer, header.xid, typ, received_at) {
            sw.record_latency(rtt);
        }
        sw.mark_seen(received_at);
    }

    /// Send Hello then FeaturesRequest. Returns the waiter of the
    /// FeaturesRequest when it was queued.
    pub(crate) fn start_handshake(&self, sw: &SwitchConn, version: Version) -> Option<Waiter> {
        info!("starting OpenFlow {} handshake with {}", version, sw.address());
        let xid = sw.next_xid();
        let _ = self.send_tracked(sw, xid, MsgType::Hello, Hello::new(version, xid).encode());
        let xid = sw.next_xid();
        self.send_tracked(sw, xid, MsgType::FeaturesRequest, FeaturesRequest::new(version, xid).encode())
    }

    /// Register the correlation entry, then queue the frame. The dispatcher
    /// itself never awaits the entry; it only feeds latency measurement.
    fn send_tracked(&self, sw: &SwitchConn, xid: Xid, typ: MsgType, frame: Vec<u8>) -> Option<Waiter> {
        let waiter = self
            .transactions
            .register(sw.address(), xid, typ.expected_reply(), self.handshake_timeout);
        if let Err(e) = sw.try_send(Bytes::from(frame)) {
            warn!("{} to {} not sent: {}", typ, sw.address(), e);
            self.transactions.cancel(sw.address(), xid);
            return None;
        }
        Some(waiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::transactions::Outcome;
    use crate::network::ConnectionHandle;
    use crate::ofp::{v13, v15};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    const PEER: &str = "192.168.0.10:51000";

    struct Fixture {
        dispatcher: Dispatcher,
        registry: Arc<SwitchRegistry>,
        transactions: Arc<Transactions>,
        out: mpsc::Receiver<Bytes>,
        token: CancellationToken,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SwitchRegistry::new());
        let transactions = Transactions::new();
        let (_in_tx, in_rx) = mpsc::channel(8);
        let dispatcher = Dispatcher::new(
            registry.clone(),
            transactions.clone(),
            in_rx,
            Duration::from_secs(30),
        );

        let (out_tx, out) = mpsc::channel(8);
        let token = CancellationToken::new();
        let conn = ConnectionHandle::new(PEER.into(), out_tx, token.clone());
        dispatcher.handle(Inbound::Connected {
            peer: PEER.into(),
            conn,
        });
        Fixture {
            dispatcher,
            registry,
            transactions,
            out,
            token,
        }
    }

    fn frame(bytes: Vec<u8>) -> Inbound {
        Inbound::Frame {
            peer: PEER.into(),
            data: Bytes::from(bytes),
            received_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn hello_starts_handshake_with_tracked_requests() {
        let mut f = fixture();
        f.dispatcher.handle(frame(v13::hello(0).encode()));

        let hello = Header::decode(&f.out.try_recv().unwrap()).unwrap();
        assert_eq!(hello.msg_type(), MsgType::Hello);
        assert_eq!((hello.version, hello.length, hello.xid), (0x04, 16, 0));

        let req = Header::decode(&f.out.try_recv().unwrap()).unwrap();
        assert_eq!(req.msg_type(), MsgType::FeaturesRequest);
        assert_eq!((req.length, req.xid), (8, 1));

        assert!(f.transactions.contains(PEER, 0));
        assert!(f.transactions.contains(PEER, 1));
        assert!(f.out.try_recv().is_err());
    }

    #[tokio::test]
    async fn features_reply_completes_handshake() {
        let mut f = fixture();
        f.dispatcher.handle(frame(v13::hello(0).encode()));
        while f.out.try_recv().is_ok() {}

        f.dispatcher.handle(frame(v13::features_reply(1, 0x1122).encode()));

        let sw = f.registry.lookup_by_dpid(0x1122).unwrap();
        assert_eq!(sw.status(), HandshakeStatus::Complete);
        assert_eq!(sw.snapshot().version, Some(Version::V13));
        assert!(sw.lowest_latency().is_some());
        assert!(!f.transactions.contains(PEER, 1));
        assert_eq!(f.registry.dpids(), vec![0x1122]);
    }

    #[tokio::test]
    async fn features_request_waiter_sees_matching_reply() {
        let mut f = fixture();
        let sw = f.registry.lookup_by_address(PEER).unwrap();
        let waiter = f.dispatcher.start_handshake(&sw, Version::V13).unwrap();
        while f.out.try_recv().is_ok() {}

        f.dispatcher
            .handle(frame(v13::features_reply(1, 0x0102030405060708).encode()));

        assert!(matches!(waiter.wait().await, Outcome::Matched { .. }));
        assert_eq!(sw.dpid(), 0x0102030405060708);
    }

    #[tokio::test]
    async fn hello_with_malformed_element_is_dropped() {
        let mut f = fixture();
        let mut bytes = v13::hello(0).encode();
        // unknown element type
        bytes[8..10].copy_from_slice(&[0, 7]);
        f.dispatcher.handle(frame(bytes));

        assert!(f.out.try_recv().is_err());
        assert!(f.transactions.is_empty());
        let sw = f.registry.lookup_by_address(PEER).unwrap();
        assert_eq!(sw.status(), HandshakeStatus::Incomplete);
        assert_eq!(sw.snapshot().version, None);
    }

    #[tokio::test]
    async fn hello_after_completion_is_ignored() {
        let mut f = fixture();
        f.dispatcher.handle(frame(v15::hello(0).encode()));
        f.dispatcher.handle(frame(v15::features_reply(1, 5).encode()));
        while f.out.try_recv().is_ok() {}

        f.dispatcher.handle(frame(v15::hello(3).encode()));
        assert!(f.out.try_recv().is_err());
    }

    #[tokio::test]
    async fn echo_request_is_answered_with_same_xid() {
        let mut f = fixture();
        f.dispatcher.handle(frame(v15::echo_request(77).encode()));

        let reply = Header::decode(&f.out.try_recv().unwrap()).unwrap();
        assert_eq!(reply.msg_type(), MsgType::EchoReply);
        assert_eq!((reply.version, reply.xid), (0x06, 77));
        assert!(f.transactions.is_empty());
    }

    #[tokio::test]
    async fn truncated_features_reply_leaves_switch_incomplete() {
        let f = fixture();
        let mut bytes = v13::features_reply(1, 9).encode();
        bytes.truncate(20);
        f.dispatcher.handle(frame(bytes));

        let sw = f.registry.lookup_by_address(PEER).unwrap();
        assert_eq!(sw.status(), HandshakeStatus::Incomplete);
        assert!(f.registry.dpids().is_empty());
    }

    #[tokio::test]
    async fn frames_from_unknown_peers_are_dropped() {
        let mut f = fixture();
        f.dispatcher.handle(Inbound::Frame {
            peer: "1.2.3.4:1".into(),
            data: Bytes::from(v13::hello(0).encode()),
            received_at: Instant::now(),
        });
        assert!(f.out.try_recv().is_err());
        assert!(f.transactions.is_empty());
    }

    #[tokio::test]
    async fn close_removes_switch() {
        let f = fixture();
        f.dispatcher.handle(frame(v13::hello(0).encode()));
        f.dispatcher.handle(frame(v13::features_reply(1, 3).encode()));

        // the reader cancels its token before reporting the close
        f.token.cancel();
        f.dispatcher.handle(Inbound::Closed { peer: PEER.into() });

        assert!(f.registry.is_empty());
        assert!(f.registry.lookup_by_dpid(3).is_none());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_and_closes_switches() {
        let registry = Arc::new(SwitchRegistry::new());
        let (in_tx, in_rx) = mpsc::channel(8);
        let dispatcher = Dispatcher::new(
            registry.clone(),
            Transactions::new(),
            in_rx,
            Duration::from_secs(1),
        );
        let (sd_tx, sd_rx) = watch::channel(false);
        let task = tokio::spawn(dispatcher.run(sd_rx));

        let (out_tx, _out) = mpsc::channel(8);
        let token = CancellationToken::new();
        in_tx
            .send(Inbound::Connected {
                peer: PEER.into(),
                conn: ConnectionHandle::new(PEER.into(), out_tx, token.clone()),
            })
            .await
            .unwrap();

        while registry.is_empty() {
            tokio::task::yield_now().await;
        }
        sd_tx.send(true).unwrap();
        task.await.unwrap();

        assert!(registry.is_empty());
        assert!(token.is_cancelled());
    }
}
