//! Error taxonomy shared by every `ScannerSession` implementation

use crate::CaptureHandle;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScannerError>;

/// Error codes reported by the scanner when a capture or reconstruction fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScannerErrorCode {
    OutOfMemory,
    ArgumentInvalid,
    OperationInvalid,
    FormatUnsupported,
    ScannerNotConnected,
    ScannerNotLicensed,
    ScannerLocked,
    ScannerInitializationFailed,
    FrameCorrupted,
    FrameReconstructionFailed,
    FrameRegistrationFailed,
    OperationUnsupported,
    OperationDenied,
    OperationFailed,
    OperationAborted,
    AllFramesAreFilteredOut,
    Unexplained,
}

impl ScannerErrorCode {
    /// Human readable description of the code
    pub fn message(&self) -> &'static str {
        match self {
            ScannerErrorCode::OutOfMemory => {
                "Not enough storage is available to process the operation"
            }
            ScannerErrorCode::ArgumentInvalid => "Provided argument is invalid",
            ScannerErrorCode::OperationInvalid => "Requested operation is invalid",
            ScannerErrorCode::FormatUnsupported => "Data format is unsupported or invalid",
            ScannerErrorCode::ScannerNotConnected => "Requested scanner is not connected",
            ScannerErrorCode::ScannerNotLicensed => "Requested scanner is not licensed",
            ScannerErrorCode::ScannerLocked => {
                "Requested scanner is already used by someone else"
            }
            ScannerErrorCode::ScannerInitializationFailed => "Scanner initialization failed",
            ScannerErrorCode::FrameCorrupted => "Frame is corrupted",
            ScannerErrorCode::FrameReconstructionFailed => "Frame reconstruction failed",
            ScannerErrorCode::FrameRegistrationFailed => "Frame registration failed",
            ScannerErrorCode::OperationUnsupported => {
                "Requested operation is unsupported. Check versions"
            }
            ScannerErrorCode::OperationDenied => {
                "Requested operation is denied. Check your license(s)"
            }
            ScannerErrorCode::OperationFailed => "Requested operation has failed",
            ScannerErrorCode::OperationAborted => {
                "Requested operation was canceled from client's side"
            }
            ScannerErrorCode::AllFramesAreFilteredOut => {
                "Unable to start algorithm because input data turned out to be invalid. Please rescan the object."
            }
            ScannerErrorCode::Unexplained => "Unexplained error",
        }
    }

    /// Short sub-error name, stable across versions
    pub fn as_str(&self) -> &'static str {
        match self {
            ScannerErrorCode::OutOfMemory => "OutOfMemory",
            ScannerErrorCode::ArgumentInvalid => "ArgumentInvalid",
            ScannerErrorCode::OperationInvalid => "OperationInvalid",
            ScannerErrorCode::FormatUnsupported => "FormatUnsupported",
            ScannerErrorCode::ScannerNotConnected => "ScannerNotConnected",
            ScannerErrorCode::ScannerNotLicensed => "ScannerNotLicensed",
            ScannerErrorCode::ScannerLocked => "ScannerLocked",
            ScannerErrorCode::ScannerInitializationFailed => "ScannerInitializationFailed",
            ScannerErrorCode::FrameCorrupted => "FrameCorrupted",
            ScannerErrorCode::FrameReconstructionFailed => "FrameReconstructionFailed",
            ScannerErrorCode::FrameRegistrationFailed => "FrameRegistrationFailed",
            ScannerErrorCode::OperationUnsupported => "OperationUnsupported",
            ScannerErrorCode::OperationDenied => "OperationDenied",
            ScannerErrorCode::OperationFailed => "OperationFailed",
            ScannerErrorCode::OperationAborted => "OperationAborted",
            ScannerErrorCode::AllFramesAreFilteredOut => "AllFramesAreFilteredOut",
            ScannerErrorCode::Unexplained => "Unexplained",
        }
    }
}

impl std::fmt::Display for ScannerErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.as_str(), self.message())
    }
}

/// Coarse classification used by callers to decide how far an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Service unreachable or session lost; aborts the whole workflow
    Connection,

    /// Handle used out of order or unknown to the session; aborts the call
    Precondition,

    /// The remote capture itself failed; local to one handle
    Capture,
}

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScannerError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown capture handle {0}")]
    UnknownHandle(CaptureHandle),

    #[error("Capture handle {0} has not been prepared")]
    NotPrepared(CaptureHandle),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Operation was aborted")]
    Aborted,

    #[error("Scanner error: {code}: {message}")]
    Scanner {
        code: ScannerErrorCode,
        message: String,
    },
}

impl ScannerError {
    /// Build a scanner error from a code and a caller supplied context message
    pub fn scanner(code: ScannerErrorCode, context: impl AsRef<str>) -> Self {
        ScannerError::Scanner {
            code,
            message: context.as_ref().to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ScannerError::Connection(_) | ScannerError::Timeout(_) | ScannerError::Protocol(_) => {
                ErrorClass::Connection
            }
            ScannerError::UnknownHandle(_)
            | ScannerError::NotPrepared(_)
            | ScannerError::InvalidOperation(_)
            | ScannerError::Aborted => ErrorClass::Precondition,
            ScannerError::Scanner { .. } => ErrorClass::Capture,
        }
    }

    /// Check if this error invalidates the whole session
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Connection
    }
}
