//! RPC module
//!
//! - `transport`: the request/response channel abstraction plus an in-process
//!   implementation
//! - `http`: the same channel over axum (`POST /rpc/{method}`, `GET /health`)
//! - `bridge`: `list_switches` / `write_dpid` served against the registry
//!
//! To integrate another broker: implement `RpcTransport` and hand it to
//! `ControlBridge::new()`.

pub mod bridge;
pub mod http;
pub mod message;
pub mod transport;

pub use bridge::{BridgeError, BridgeOptions, ControlBridge};
pub use http::HttpTransport;
pub use message::{ListSwitchesResult, RpcResponse, WriteDpidRequest};
pub use transport::{ChannelTransport, Delivery, Reply, RpcTransport, TransportError};
