/*!
 * Scanlink - client for remote 3D scanner services
 *
 * Drives a scanner service over a session and runs its capture workflows:
 * - Single captures returned as a mesh or as binary STL
 * - Deferred multi-captures: issue N captures, wait for the batch to be
 *   prepared, then retrieve each one
 * - TOML configuration, structured logging, and exit codes for scripting
 */

pub mod capture;
pub mod config;
pub mod deferred;
pub mod error;
pub mod logging;
pub mod progress;

// Re-export commonly used types
pub use capture::{capture_mesh, capture_stl_to_file, MeshSummary};
pub use config::{ErrorMode, LogLevel, ScanConfig};
pub use deferred::{
    multi_capture, multi_capture_stl, BatchItem, BatchReport, DeferredBatch, ItemFailure, Phase,
    PreparedBatch,
};
pub use error::{Result, ScanlinkError};
pub use progress::BatchProgress;

pub use scanlink_connect::{ConnectOptions, RemoteScanner, ServiceAddress};
pub use scanlink_core_interface::{
    CaptureHandle, CaptureResult, Mesh, PrepareMode, PrepareStatus, ScannerError, ScannerSession,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Open a session with the service named in `config`
pub async fn connect(config: &ScanConfig) -> Result<RemoteScanner> {
    let address = config.service_address()?;
    let scanner = RemoteScanner::connect(&address, config.connect_options()).await?;
    Ok(scanner)
}
