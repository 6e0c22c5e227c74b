//! Error types for the scanlink-connect crate

use scanlink_core_interface::ScannerError;
use scanlink_proto::CodecError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Invalid service address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Connection to {address} failed: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Service '{service}' rejected the session: {reason}")]
    HandshakeFailed { service: String, reason: String },

    #[error("Connection closed by the scanner service")]
    ConnectionClosed,

    #[error("Session is closed")]
    SessionClosed,

    #[error("{request} timed out after {after:?}")]
    Timeout {
        request: &'static str,
        after: Duration,
    },

    #[error("Frame error: {0}")]
    Codec(#[from] CodecError),

    #[error("Unexpected '{got}' response to {request}")]
    UnexpectedResponse {
        request: &'static str,
        got: &'static str,
    },

    #[error(transparent)]
    Remote(ScannerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConnectError> for ScannerError {
    fn from(err: ConnectError) -> Self {
        match err {
            ConnectError::Remote(e) => e,
            ConnectError::Timeout { after, .. } => ScannerError::Timeout(after),
            ConnectError::Codec(CodecError::Payload(e)) => ScannerError::Protocol(e.to_string()),
            e @ ConnectError::UnexpectedResponse { .. } => ScannerError::Protocol(e.to_string()),
            other => ScannerError::Connection(other.to_string()),
        }
    }
}
