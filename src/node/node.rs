//! Controller orchestration: wire up the switch listener, the Dispatcher and
//! the control-plane bridge.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::controller::{Dispatcher, SwitchRegistry, Transactions};
use crate::network::server::{bind, ConnectionServer};
use crate::node::config::ControllerConfig;
use crate::node::service_handle::ServiceHandle;
use crate::rpc::{ControlBridge, HttpTransport, RpcTransport};
use crate::utils::ControllerError;

/// Main controller object
pub struct Controller {
    cfg: ControllerConfig,
    transport: Option<Arc<dyn RpcTransport>>,
}

impl Controller {
    pub fn new(cfg: ControllerConfig) -> Self {
        Self { cfg, transport: None }
    }

    /// Serve the bridge over `transport` instead of the built-in HTTP endpoint.
    pub fn with_transport(mut self, transport: Arc<dyn RpcTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Bind, register RPC methods, then start accepting switches.
    ///
    /// Bind failures and RPC registration failures abort startup.
    pub async fn start(self) -> Result<RunningController> {
        self.cfg.validate()?;
        let (mut svc, shutdown_rx) = ServiceHandle::new();

        let addr = self.cfg.bind_addr();
        let listener = bind(&addr)
            .await
            .map_err(|source| ControllerError::Bind { addr: addr.clone(), source })?;

        let (inbound_tx, inbound_rx) = mpsc::channel(self.cfg.inbound_capacity);
        let registry = Arc::new(SwitchRegistry::new());
        let transactions = Transactions::new();

        // -----------------------
        // Dispatcher
        // -----------------------
        let dispatcher = Dispatcher::new(
            registry.clone(),
            transactions.clone(),
            inbound_rx,
            self.cfg.default_timeout(),
        );
        {
            let shutdown_rx = shutdown_rx.clone();
            svc.spawn("dispatcher", async move {
                dispatcher.run(shutdown_rx).await;
                Ok(())
            });
        }

        // -----------------------
        // Control-plane bridge
        // -----------------------
        let mut rpc_addr = None;
        let mut bridge = None;
        if self.cfg.rpc_enabled {
            let transport: Arc<dyn RpcTransport> = match self.transport {
                Some(t) => t,
                None => {
                    let http = HttpTransport::new();
                    let rpc_listener = bind(&self.cfg.rpc_addr).await.map_err(|source| {
                        ControllerError::Bind {
                            addr: self.cfg.rpc_addr.clone(),
                            source,
                        }
                    })?;
                    rpc_addr = Some(rpc_listener.local_addr()?);
                    let shutdown_rx = shutdown_rx.clone();
                    let serving = http.clone();
                    svc.spawn("rpc http", async move {
                        serving.serve(rpc_listener, shutdown_rx).await?;
                        Ok(())
                    });
                    http as Arc<dyn RpcTransport>
                }
            };

            let b = Arc::new(ControlBridge::new(
                registry.clone(),
                transactions.clone(),
                transport,
                self.cfg.bridge_options(),
            ));
            let consumers = b
                .start(shutdown_rx.clone())
                .await
                .map_err(ControllerError::from)?;
            for h in consumers {
                svc.spawn("rpc consumer", async move {
                    h.await?;
                    Ok(())
                });
            }
            bridge = Some(b);
        }

        // -----------------------
        // Switch listener
        // -----------------------
        let server = ConnectionServer::new(listener, inbound_tx, self.cfg.connection_options());
        let local_addr = server.local_addr()?;
        {
            let shutdown_rx = shutdown_rx.clone();
            svc.spawn("openflow listener", async move {
                server.serve(shutdown_rx).await;
                Ok(())
            });
        }

        info!(
            "controller started, OpenFlow: {} versions {:?}, RPC: {}",
            local_addr,
            self.cfg.versions,
            if self.cfg.rpc_enabled { "enabled" } else { "disabled" }
        );

        Ok(RunningController {
            local_addr,
            rpc_addr,
            registry,
            bridge,
            svc,
        })
    }
}

/// Handle on a started controller.
pub struct RunningController {
    local_addr: SocketAddr,
    rpc_addr: Option<SocketAddr>,
    registry: Arc<SwitchRegistry>,
    bridge: Option<Arc<ControlBridge>>,
    svc: ServiceHandle,
}

impl RunningController {
    /// Address switches connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address of the built-in HTTP endpoint, when it is running.
    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        self.rpc_addr
    }

    pub fn registry(&self) -> &Arc<SwitchRegistry> {
        &self.registry
    }

    pub fn bridge(&self) -> Option<&Arc<ControlBridge>> {
        self.bridge.as_ref()
    }

    pub async fn shutdown(self) -> Result<()> {
        info!("shutting down controller");
        self.svc.shutdown().await
    }
}
