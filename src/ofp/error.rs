use thiserror::Error;

/// Errors raised while decoding OpenFlow bytes.
///
/// Both variants are recoverable: the caller drops the offending frame and
/// keeps the connection open.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("short buffer: {message} needs {needed} bytes, got {got}")]
    ShortBuffer {
        message: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("malformed field '{field}' of {message}: {reason}")]
    MalformedField {
        message: &'static str,
        field: &'static str,
        reason: String,
    },
}

impl CodecError {
    pub(crate) fn short(message: &'static str, needed: usize, got: usize) -> Self {
        CodecError::ShortBuffer { message, needed, got }
    }

    pub(crate) fn malformed(message: &'static str, field: &'static str, reason: impl Into<String>) -> Self {
        CodecError::MalformedField {
            message,
            field,
            reason: reason.into(),
        }
    }
}
