use bytes::Bytes;
use futures::StreamExt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::network::codec::{Framing, OfpFrameCodec};
use crate::ofp::{Header, Version, OFP_HEADER_SIZE, OFP_MAX_HANDSHAKE_SIZE};

/// Outbound channel capacity per connection
pub const OUT_CAP: usize = 1024;

/// Everything the Dispatcher consumes, in the order connections produced it.
///
/// Lifecycle events share the queue with frames so that the Dispatcher stays
/// the only writer of the switch registry.
#[derive(Debug)]
pub enum Inbound {
    Connected { peer: String, conn: ConnectionHandle },
    Frame { peer: String, data: Bytes, received_at: Instant },
    Closed { peer: String },
}

pub type InboundSender = mpsc::Sender<Inbound>;
pub type InboundReceiver = mpsc::Receiver<Inbound>;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("bad packet size {0}")]
    BadPacketSize(usize),
    #[error("peer disconnected")]
    Disconnected,
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("dispatcher is no longer consuming frames")]
    DispatcherGone,
    #[error("connection closed")]
    Closed,
    #[error("outbound queue full")]
    QueueFull,
    #[error("framing error: {0}")]
    Framing(String),
}

#[derive(Debug)]
struct HandleInner {
    peer: String,
    outbound: mpsc::Sender<Bytes>,
    token: CancellationToken,
    closed: AtomicBool,
}

/// Write side of a live switch connection. Cheap to clone.
///
/// Writes go through a bounded queue drained by the connection's write task,
/// so callers never touch the socket directly.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl ConnectionHandle {
    pub fn new(peer: String, outbound: mpsc::Sender<Bytes>, token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                peer,
                outbound,
                token,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    /// Queue a frame, waiting for capacity.
    pub async fn send(&self, frame: Bytes) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.inner
            .outbound
            .send(frame)
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, frame: Bytes) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.inner.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ConnectionError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    /// Stop both connection tasks, which closes the socket. Returns `true` only
    /// for the call that actually closed it.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.token.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) || self.inner.token.is_cancelled()
    }
}

/// Per-connection settings handed down by the server.
#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    pub versions: Vec<Version>,
    pub framing: Framing,
    pub outbound_capacity: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            versions: Version::ALL.to_vec(),
            framing: Framing::default(),
            outbound_capacity: OUT_CAP,
        }
    }
}

pub struct Connection;

impl Connection {
    /// Announce the connection to the Dispatcher and spawn its read/write tasks.
    pub async fn spawn(
        stream: TcpStream,
        inbound: InboundSender,
        opts: &ConnectionOptions,
    ) -> Result<ConnectionHandle, ConnectionError> {
        let peer = stream.peer_addr()?.to_string();
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {}: {}", peer, e);
        }
        let (reader, writer) = stream.into_split();

        let (out_tx, out_rx) = mpsc::channel::<Bytes>(opts.outbound_capacity.max(1));
        let token = CancellationToken::new();
        let handle = ConnectionHandle::new(peer.clone(), out_tx, token.clone());

        inbound
            .send(Inbound::Connected {
                peer: peer.clone(),
                conn: handle.clone(),
            })
            .await
            .map_err(|_| ConnectionError::DispatcherGone)?;

        tokio::spawn(write_loop(writer, out_rx, token.clone(), peer.clone()));

        let reader_ctx = FrameReader::new(peer, inbound, opts.versions.clone(), opts.framing, token);
        tokio::spawn(async move {
            let _ = reader_ctx.run(reader).await;
        });

        Ok(handle)
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<Bytes>,
    token: CancellationToken,
    peer: String,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("writer shutting down for {}", peer);
                break;
            }
            maybe = out_rx.recv() => {
                match maybe {
                    Some(frame) => {
                        if let Err(e) = writer.write_all(&frame).await {
                            warn!("write to {} failed: {}", peer, e);
                            token.cancel();
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}

/// Read side of a connection: turns socket reads into `Inbound::Frame`s.
pub struct FrameReader {
    peer: String,
    inbound: InboundSender,
    versions: Vec<Version>,
    framing: Framing,
    token: CancellationToken,
}

impl FrameReader {
    pub fn new(
        peer: String,
        inbound: InboundSender,
        versions: Vec<Version>,
        framing: Framing,
        token: CancellationToken,
    ) -> Self {
        Self {
            peer,
            inbound,
            versions,
            framing,
            token,
        }
    }

    /// Read until the peer goes away, a fatal framing error occurs, or the
    /// connection is closed locally. Always ends by queueing `Inbound::Closed`.
    pub async fn run<R>(self, reader: R) -> Result<(), ConnectionError>
    where
        R: AsyncRead + Unpin,
    {
        let result = match self.framing {
            Framing::SingleRead => self.read_single(reader).await,
            Framing::Stream => self.read_stream(reader).await,
        };

        match &result {
            Ok(()) => info!("connection {} closed locally", self.peer),
            Err(ConnectionError::Disconnected) => info!("switch {} disconnected", self.peer),
            Err(e) => warn!("connection {} terminated: {}", self.peer, e),
        }

        self.token.cancel();
        let _ = self
            .inbound
            .send(Inbound::Closed {
                peer: self.peer.clone(),
            })
            .await;
        result
    }

    async fn read_single<R>(&self, mut reader: R) -> Result<(), ConnectionError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; OFP_MAX_HANDSHAKE_SIZE];
        loop {
            let n = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(()),
                read = reader.read(&mut buf) => read?,
            };
            if n == 0 {
                return Err(ConnectionError::Disconnected);
            }
            if n < OFP_HEADER_SIZE {
                return Err(ConnectionError::BadPacketSize(n));
            }
            self.forward(Bytes::copy_from_slice(&buf[..n])).await?;
        }
    }

    async fn read_stream<R>(&self, reader: R) -> Result<(), ConnectionError>
    where
        R: AsyncRead + Unpin,
    {
        let mut frames = FramedRead::new(reader, OfpFrameCodec::new());
        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(()),
                next = frames.next() => next,
            };
            match next {
                Some(Ok(frame)) => self.forward(frame).await?,
                Some(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                    return Err(ConnectionError::Framing(e.to_string()));
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(ConnectionError::Disconnected),
            }
        }
    }

    /// Drop frames with an unconfigured version; queue everything else.
    async fn forward(&self, frame: Bytes) -> Result<(), ConnectionError> {
        let received_at = Instant::now();
        let header = match Header::decode(&frame) {
            Ok(h) => h,
            Err(e) => {
                warn!("undecodable header from {}: {}", self.peer, e);
                return Ok(());
            }
        };

        match Version::from_wire(header.version) {
            Some(v) if self.versions.contains(&v) => {}
            _ => {
                warn!(
                    "unsupported version {:#04x} from {}, dropping frame",
                    header.version, self.peer
                );
                return Ok(());
            }
        }

        debug!(
            peer = %self.peer,
            xid = header.xid,
            typ = %header.msg_type(),
            frame = %hex::encode(&frame),
            "frame received"
        );

        self.inbound
            .send(Inbound::Frame {
                peer: self.peer.clone(),
                data: frame,
                received_at,
            })
            .await
            .map_err(|_| ConnectionError::DispatcherGone)
    }
}
