//! Station errors
//!
//! Call-level failures travel to clients as `ScannerError` responses. These
//! errors cover the station itself: binding, accepting, and broken transports.

use scanlink_proto::CodecError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StationError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Codec(#[from] CodecError),

    #[error("Handshake rejected: {0}")]
    Handshake(String),
}

pub type Result<T> = std::result::Result<T, StationError>;
