//! ofcontrol: an asynchronous OpenFlow 1.3/1.5 controller.
//!
//! Switches connect over TCP and are taken through the Hello / Features
//! handshake; external operators list them and write raw protocol messages to
//! them through the control-plane bridge in [`rpc`].

pub mod controller;
pub mod network;
pub mod node;
pub mod ofp;
pub mod rpc;
pub mod utils;

pub use node::{Controller, ControllerConfig, RunningController};
