//! Scanlink Station: a scanner service speaking the Scanlink wire protocol.
//!
//! The station hosts sessions for remote clients. Frames come from a
//! [`FrameSource`]; the bundled [`SyntheticScanner`] generates deterministic
//! sphere meshes so the full deferred capture workflow can run without
//! hardware. The same [`StationSession`] that backs a TCP connection can be
//! used in process as a `ScannerSession`.
//!
//! # Example
//!
//! ```rust,no_run
//! use scanlink_station::{serve, ScannerService, StationConfig, SyntheticConfig};
//! use tokio::net::TcpListener;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let service = ScannerService::synthetic(SyntheticConfig::default(), StationConfig::default());
//! let listener = TcpListener::bind("127.0.0.1:64238").await?;
//! serve(listener, service).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod frame;
pub mod prepare;
pub mod server;
pub mod service;
pub mod stl;

pub use error::StationError;
pub use frame::{Frame, FrameSource, SyntheticConfig, SyntheticScanner};
pub use prepare::LocalPrepareStream;
pub use server::{serve, spawn_local};
pub use service::{ScannerService, StationConfig, StationSession};
