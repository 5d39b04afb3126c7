//! Request/response channel between external operators and the bridge.
//!
//! Modelled on a broker RPC queue: the bridge subscribes to a method name and
//! receives deliveries; each delivery carries a `reply_to` route and a
//! `correlation_id` that the bridge copies onto its reply unchanged.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

pub const SUBSCRIPTION_CAP: usize = 256;

#[derive(Debug, Clone)]
pub struct Delivery {
    pub method: String,
    pub correlation_id: String,
    pub reply_to: String,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub correlation_id: String,
    pub reply_to: String,
    pub body: Bytes,
}

impl Reply {
    pub fn to(delivery: &Delivery, body: Bytes) -> Self {
        Self {
            correlation_id: delivery.correlation_id.clone(),
            reply_to: delivery.reply_to.clone(),
            body,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("method {0} already has a subscriber")]
    AlreadySubscribed(String),
    #[error("no subscriber for method {0}")]
    UnknownMethod(String),
    #[error("transport closed")]
    Closed,
}

#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Start receiving deliveries for `method`.
    async fn subscribe(&self, method: &str) -> Result<mpsc::Receiver<Delivery>, TransportError>;

    /// Route a reply back to whoever sent the delivery.
    async fn publish(&self, reply: Reply) -> Result<(), TransportError>;
}

/// Subscriber table plus callers parked on their reply, keyed by `reply_to`.
///
/// Shared by the in-process and HTTP transports.
#[derive(Debug, Default)]
pub(crate) struct Routes {
    subscribers: DashMap<String, mpsc::Sender<Delivery>>,
    waiting: DashMap<String, oneshot::Sender<Reply>>,
    seq: AtomicU64,
}

impl Routes {
    pub(crate) fn subscribe(&self, method: &str) -> Result<mpsc::Receiver<Delivery>, TransportError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAP);
        match self.subscribers.entry(method.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut e) => {
                // a subscriber whose receiver is gone may be replaced
                if !e.get().is_closed() {
                    return Err(TransportError::AlreadySubscribed(method.to_string()));
                }
                e.insert(tx);
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(tx);
            }
        }
        Ok(rx)
    }

    /// Deliver a request and wait for the matching reply.
    pub(crate) async fn call(
        &self,
        method: &str,
        correlation_id: String,
        body: Bytes,
    ) -> Result<Reply, TransportError> {
        let sub = self
            .subscribers
            .get(method)
            .map(|s| s.value().clone())
            .ok_or_else(|| TransportError::UnknownMethod(method.to_string()))?;

        let reply_to = format!("reply.{}", self.seq.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.waiting.insert(reply_to.clone(), tx);

        let delivery = Delivery {
            method: method.to_string(),
            correlation_id,
            reply_to: reply_to.clone(),
            body,
        };
        if sub.send(delivery).await.is_err() {
            self.waiting.remove(&reply_to);
            return Err(TransportError::Closed);
        }
        rx.await.map_err(|_| TransportError::Closed)
    }

    pub(crate) fn publish(&self, reply: Reply) {
        match self.waiting.remove(&reply.reply_to) {
            Some((_, tx)) => {
                let _ = tx.send(reply);
            }
            None => debug!("no caller waiting on {}", reply.reply_to),
        }
    }

    pub(crate) fn next_correlation_id(&self) -> String {
        format!("corr-{}", self.seq.fetch_add(1, Ordering::Relaxed))
    }
}

/// In-process transport over tokio channels. Used by embedders and tests.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    routes: Routes,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a request body to `method` and wait for the reply.
    pub async fn call(&self, method: &str, body: impl Into<Bytes>) -> Result<Reply, TransportError> {
        let correlation_id = self.routes.next_correlation_id();
        self.routes.call(method, correlation_id, body.into()).await
    }

    /// Like `call`, with a caller-chosen correlation id.
    pub async fn call_with_id(
        &self,
        method: &str,
        correlation_id: &str,
        body: impl Into<Bytes>,
    ) -> Result<Reply, TransportError> {
        self.routes
            .call(method, correlation_id.to_string(), body.into())
            .await
    }
}

#[async_trait]
impl RpcTransport for ChannelTransport {
    async fn subscribe(&self, method: &str) -> Result<mpsc::Receiver<Delivery>, TransportError> {
        self.routes.subscribe(method)
    }

    async fn publish(&self, reply: Reply) -> Result<(), TransportError> {
        self.routes.publish(reply);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_round_trips_through_subscriber() {
        let t = std::sync::Arc::new(ChannelTransport::new());
        let mut rx = t.subscribe("echo").await.unwrap();

        let server = t.clone();
        tokio::spawn(async move {
            while let Some(d) = rx.recv().await {
                let body = d.body.clone();
                server.publish(Reply::to(&d, body)).await.unwrap();
            }
        });

        let reply = t.call_with_id("echo", "abc", "ping").await.unwrap();
        assert_eq!(reply.correlation_id, "abc");
        assert_eq!(reply.body, Bytes::from_static(b"ping"));
    }

    #[tokio::test]
    async fn double_subscribe_is_rejected() {
        let t = ChannelTransport::new();
        let _rx = t.subscribe("m").await.unwrap();
        assert!(matches!(
            t.subscribe("m").await,
            Err(TransportError::AlreadySubscribed(_))
        ));
    }

    #[tokio::test]
    async fn unknown_method_fails_fast() {
        let t = ChannelTransport::new();
        assert!(matches!(
            t.call("nope", "x").await,
            Err(TransportError::UnknownMethod(_))
        ));
    }
}
