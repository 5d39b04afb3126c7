use thiserror::Error;

use crate::network::ConnectionError;
use crate::ofp::CodecError;
use crate::rpc::BridgeError;

/// Top-level error for the controller
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias
pub type Result<T> = std::result::Result<T, ControllerError>;
