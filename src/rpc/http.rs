use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::rpc::message::RpcResponse;
use crate::rpc::transport::{Delivery, Reply, Routes, RpcTransport, TransportError};

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// JSON over HTTP: `POST /rpc/{method}` with the request body, answered
/// synchronously with the bridge's reply. `GET /health` reports liveness.
#[derive(Debug, Default)]
pub struct HttpTransport {
    routes: Routes,
}

impl HttpTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/rpc/:method", post(rpc_endpoint))
            .with_state(self.clone())
    }

    /// Serve until shutdown is signalled.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("RPC endpoint on http://{}", addr);
        }
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            })
            .await
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn subscribe(&self, method: &str) -> Result<mpsc::Receiver<Delivery>, TransportError> {
        self.routes.subscribe(method)
    }

    async fn publish(&self, reply: Reply) -> Result<(), TransportError> {
        self.routes.publish(reply);
        Ok(())
    }
}

async fn rpc_endpoint(
    State(transport): State<Arc<HttpTransport>>,
    Path(method): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| transport.routes.next_correlation_id());
    debug!("rpc {} ({})", method, correlation_id);

    match transport.routes.call(&method, correlation_id, body).await {
        Ok(reply) => {
            let mut resp = (StatusCode::OK, reply.body).into_response();
            resp.headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            if let Ok(v) = HeaderValue::from_str(&reply.correlation_id) {
                resp.headers_mut().insert(CORRELATION_HEADER, v);
            }
            resp
        }
        Err(TransportError::UnknownMethod(m)) => (
            StatusCode::NOT_FOUND,
            Json(RpcResponse::err(format!("UnknownMethod: {}", m))),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(RpcResponse::err(e.to_string())),
        )
            .into_response(),
    }
}
