//! Control-plane bridge: serves `list_switches` and `write_dpid` deliveries
//! from an `RpcTransport` against the live switch registry.

use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::controller::{Outcome, SwitchConn, SwitchRegistry, Transactions};
use crate::network::ConnectionError;
use crate::ofp::{CodecError, Header};
use crate::rpc::message::{
    ListSwitchesResult, RpcResponse, WriteDpidRequest, LIST_SWITCHES, METHODS, WRITE_DPID,
};
use crate::rpc::transport::{Delivery, Reply, RpcTransport, TransportError};

/// Per-request failures. `Display` is the error string put on the wire.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("NotFound")]
    NotFound,
    #[error("Timeout")]
    Timeout,
    #[error("MalformedPayload: {0}")]
    MalformedPayload(#[from] CodecError),
    #[error("BadRequest: {0}")]
    BadRequest(String),
    #[error("WriteFailed")]
    WriteFailed(#[source] ConnectionError),
    #[error("UnknownMethod: {0}")]
    UnknownMethod(String),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Clone, Copy, Debug)]
pub struct BridgeOptions {
    /// Wait used before any latency has been measured.
    pub default_timeout: Duration,
    /// Floor for the latency-derived wait.
    pub min_timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(2),
            min_timeout: Duration::from_millis(50),
        }
    }
}

pub struct ControlBridge {
    registry: Arc<SwitchRegistry>,
    transactions: Arc<Transactions>,
    transport: Arc<dyn RpcTransport>,
    opts: BridgeOptions,
}

impl ControlBridge {
    pub fn new(
        registry: Arc<SwitchRegistry>,
        transactions: Arc<Transactions>,
        transport: Arc<dyn RpcTransport>,
        opts: BridgeOptions,
    ) -> Self {
        Self {
            registry,
            transactions,
            transport,
            opts,
        }
    }

    pub fn list_switches(&self) -> ListSwitchesResult {
        ListSwitchesResult {
            dpids: self.registry.dpids(),
        }
    }

    /// Twice the lowest observed round trip, never below the floor.
    pub fn reply_timeout(&self, sw: &SwitchConn) -> Duration {
        sw.lowest_latency()
            .map(|l| l * 2)
            .unwrap_or(self.opts.default_timeout)
            .max(self.opts.min_timeout)
    }

    /// Write `payload` verbatim to the switch owning `dpid` and wait for the
    /// reply matching the payload's own xid and type.
    pub async fn write_dpid(&self, req: WriteDpidRequest) -> Result<(), BridgeError> {
        let sw = self.registry.lookup_by_dpid(req.dpid).ok_or(BridgeError::NotFound)?;
        let header = Header::decode(&req.payload)?;
        let expected = header.msg_type().expected_reply();
        let timeout = self.reply_timeout(&sw);
        debug!(
            "write_dpid {:#x}: {} xid {} ({} bytes), waiting {:?} for {}",
            req.dpid,
            header.msg_type(),
            header.xid,
            req.payload.len(),
            timeout,
            expected
        );

        let waiter = self
            .transactions
            .register(sw.address(), header.xid, expected, timeout);
        if let Err(e) = sw.send(Bytes::from(req.payload)).await {
            self.transactions.cancel(sw.address(), header.xid);
            return Err(BridgeError::WriteFailed(e));
        }

        match waiter.wait().await {
            Outcome::Matched { .. } => Ok(()),
            Outcome::Mismatched { expected, received, .. } => {
                warn!(
                    "dpid {:#x} answered xid {} with {} instead of {}",
                    req.dpid, header.xid, received, expected
                );
                Err(BridgeError::Timeout)
            }
            Outcome::Timeout => Err(BridgeError::Timeout),
        }
    }

    /// Serve one delivery. Every delivery gets a response, including
    /// malformed ones.
    pub async fn handle(&self, delivery: &Delivery) -> RpcResponse {
        let res = match delivery.method.as_str() {
            LIST_SWITCHES => Ok(json!(self.list_switches())),
            WRITE_DPID => match serde_json::from_slice::<WriteDpidRequest>(&delivery.body) {
                Ok(req) => self.write_dpid(req).await.map(|_| json!("")),
                Err(e) => Err(BridgeError::BadRequest(e.to_string())),
            },
            other => Err(BridgeError::UnknownMethod(other.to_string())),
        };
        match res {
            Ok(v) => RpcResponse::ok(v),
            Err(e) => {
                debug!("{} ({}) failed: {:?}", delivery.method, delivery.correlation_id, e);
                RpcResponse::err(e.to_string())
            }
        }
    }

    /// Subscribe to every method and spawn one consumer per subscription.
    ///
    /// Any subscribe failure is returned before a consumer starts.
    pub async fn start(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>, BridgeError> {
        let mut subs = Vec::with_capacity(METHODS.len());
        for method in METHODS {
            info!("registering RPC method {}", method);
            let rx = self.transport.subscribe(method).await.map_err(|e| {
                error!("RPC method {} failed to register: {}", method, e);
                BridgeError::Transport(e)
            })?;
            subs.push((method, rx));
        }

        Ok(subs
            .into_iter()
            .map(|(method, rx)| tokio::spawn(self.clone().consume(method, rx, shutdown.clone())))
            .collect())
    }

    async fn consume(
        self: Arc<Self>,
        method: &'static str,
        mut rx: mpsc::Receiver<Delivery>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                delivery = rx.recv() => {
                    let Some(delivery) = delivery else { break };
                    let bridge = self.clone();
                    tokio::spawn(async move { bridge.respond(delivery).await });
                }
            }
        }
        debug!("consumer for {} stopped", method);
    }

    async fn respond(&self, delivery: Delivery) {
        let resp = self.handle(&delivery).await;
        let body = match serde_json::to_vec(&resp) {
            Ok(b) => Bytes::from(b),
            Err(e) => {
                error!("failed to encode response: {}", e);
                return;
            }
        };
        if let Err(e) = self.transport.publish(Reply::to(&delivery, body)).await {
            error!("RPC method {} failed to publish a reply: {}", delivery.method, e);
        }
    }
}
