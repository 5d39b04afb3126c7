//! Network module - switch-facing TCP listener, per-connection read/write
//! tasks and OpenFlow framing.

pub mod codec;
pub mod connection;
pub mod server;

pub use codec::{Framing, OfpFrameCodec};
pub use connection::{
    Connection, ConnectionError, ConnectionHandle, ConnectionOptions, FrameReader, Inbound,
    InboundReceiver, InboundSender,
};
pub use server::ConnectionServer;
