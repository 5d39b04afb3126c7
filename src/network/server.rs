use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::network::connection::{Connection, ConnectionOptions, InboundSender};

/// Start listening TCP on address and return the listener.
pub async fn bind(addr: &str) -> io::Result<TcpListener> {
    let l = TcpListener::bind(addr).await?;
    Ok(l)
}

/// Accept loop for switch connections.
///
/// Every accepted socket gets its own read and write task; the server itself
/// only ever waits on `accept`.
pub struct ConnectionServer {
    listener: TcpListener,
    inbound: InboundSender,
    opts: ConnectionOptions,
}

impl ConnectionServer {
    pub fn new(listener: TcpListener, inbound: InboundSender, opts: ConnectionOptions) -> Self {
        Self {
            listener,
            inbound,
            opts,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until shutdown is signalled. Accept errors are transient.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = self.local_addr() {
            info!("OpenFlow listener on {} (versions {:?}, framing {})", addr, self.opts.versions, self.opts.framing);
        }
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("OpenFlow listener observed shutdown");
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            info!("switch {} connected", peer_addr);
                            let inbound = self.inbound.clone();
                            let opts = self.opts.clone();
                            tokio::spawn(async move {
                                if let Err(e) = Connection::spawn(stream, inbound, &opts).await {
                                    warn!("connection setup failed for {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            warn!("accept failed: {:?}", e);
                            sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }
        debug!("accept loop finished");
    }
}
