//! Scanlink Connect: client-side connectivity to remote scanner services
//!
//! This crate provides `RemoteScanner`, the `ScannerSession` implementation
//! that drives a scanner service over a framed TCP connection.
//!
//! # Example
//!
//! ```rust,no_run
//! use scanlink_connect::{ConnectOptions, RemoteScanner, ServiceAddress};
//! use scanlink_core_interface::{PrepareMode, PrepareStreamExt, ScannerSession};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let address: ServiceAddress = "scan+tcp://localhost:64238?service=scanner".parse()?;
//!     let scanner = RemoteScanner::connect(&address, ConnectOptions::default()).await?;
//!
//!     let handle = scanner.capture_deferred(false).await?;
//!     let mut prepare = scanner
//!         .deferred_capture_prepare(vec![handle], PrepareMode::Stl)
//!         .await?;
//!     prepare.drain().await?;
//!
//!     let stl = scanner.get_deferred_capture_stl(handle).await?;
//!     std::fs::write("captured_mesh.stl", stl)?;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod error;
pub mod options;
pub mod remote;

pub use address::ServiceAddress;
pub use error::ConnectError;
pub use options::ConnectOptions;
pub use remote::{RemotePrepareStream, RemoteScanner};
