/*!
 * Error types for Scanlink
 */

use scanlink_connect::ConnectError;
use scanlink_core_interface::{CaptureHandle, ScannerError};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScanlinkError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Error, Debug)]
pub enum ScanlinkError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not open a session with the scanner service
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// A scanner call failed outside of per-item retrieval
    #[error(transparent)]
    Scanner(#[from] ScannerError),

    /// The prepare stream did not exhaust in time
    #[error("Batch of {batch} captures not prepared within {after:?}")]
    BarrierTimeout { batch: usize, after: Duration },

    /// One batch item failed and the workflow stopped there
    #[error(
        "Capture {index}{} failed: {source}",
        .handle.map(|h| format!(" (handle {})", h)).unwrap_or_default()
    )]
    Item {
        index: usize,
        handle: Option<CaptureHandle>,
        #[source]
        source: ScannerError,
    },

    /// Some batch items failed; the rest were retrieved
    #[error("{failed} of {total} captures failed")]
    Partial { failed: usize, total: usize },

    /// Writing an output file failed
    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ScanlinkError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ScanlinkError::Partial { .. } => EXIT_PARTIAL,
            _ => EXIT_FATAL,
        }
    }

    /// Check if the workflow cannot continue after this error
    pub fn is_fatal(&self) -> bool {
        match self {
            ScanlinkError::Partial { .. } => false,
            ScanlinkError::Scanner(e) | ScanlinkError::Item { source: e, .. } => e.is_fatal(),
            _ => true,
        }
    }
}
