//! Scanlink Core Interface: Scanner Session Abstraction
//!
//! This crate defines the `ScannerSession` trait, the narrow call interface every
//! scanner client workflow consumes. It is implemented by:
//!
//! - **RemoteScanner** (`scanlink-connect`): a TCP session against a remote scanner service
//! - **StationSession** (`scanlink-station`): an in-process simulated scanner
//!
//! # Deferred captures
//!
//! Batched capture follows a three-phase protocol, *issue → barrier → collect*:
//!
//! 1. `capture_deferred` is called N times, each returning an opaque [`CaptureHandle`]
//! 2. `deferred_capture_prepare` submits all handles at once and returns a
//!    [`PrepareStream`], which is drained until it reports exhaustion
//! 3. each handle is retrieved individually with `get_deferred_capture` or
//!    `get_deferred_capture_stl`
//!
//! # Example
//!
//! ```rust,no_run
//! use scanlink_core_interface::{PrepareMode, PrepareStreamExt, ScannerSession};
//!
//! async fn three_meshes<S: ScannerSession>(session: &S) -> anyhow::Result<()> {
//!     let mut handles = Vec::new();
//!     for _ in 0..3 {
//!         handles.push(session.capture_deferred(false).await?);
//!     }
//!
//!     let mut stream = session
//!         .deferred_capture_prepare(handles.clone(), PrepareMode::Mesh)
//!         .await?;
//!     stream.drain().await?;
//!
//!     for handle in handles {
//!         let mesh = session.get_deferred_capture(handle).await?;
//!         println!("{} triangles", mesh.triangles.len());
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod error;
pub mod mesh;

pub use error::{ErrorClass, Result, ScannerError, ScannerErrorCode};
pub use mesh::{
    ColorRgb, CompressedImage, ImageEncoding, ImageInfo, Mesh, MeshError, MeshTexture,
    MeshTriangle, Point3, Vector2, Vector3,
};

/// Opaque, server-issued token referencing one pending or completed capture.
///
/// Handles are scoped to the session that issued them and carry no meaning
/// elsewhere. Clients never interpret the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaptureHandle(u64);

impl CaptureHandle {
    /// Wrap a raw value. Only services issuing handles should need this.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which representation a batch is prepared for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrepareMode {
    /// Structured mesh, retrieved with `get_deferred_capture`
    #[default]
    Mesh,
    /// Binary STL bytes, retrieved with `get_deferred_capture_stl`
    Stl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Running,
    Complete,
}

/// One notification from a [`PrepareStream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareStatus {
    pub action_status: ActionStatus,
    pub completed_count: u32,
    pub failed_count: u32,
}

impl PrepareStatus {
    pub fn running(completed_count: u32, failed_count: u32) -> Self {
        Self {
            action_status: ActionStatus::Running,
            completed_count,
            failed_count,
        }
    }

    pub fn complete(completed_count: u32, failed_count: u32) -> Self {
        Self {
            action_status: ActionStatus::Complete,
            completed_count,
            failed_count,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.action_status == ActionStatus::Complete
    }

    /// Items processed so far, successful or not
    pub fn processed(&self) -> u32 {
        self.completed_count + self.failed_count
    }
}

impl fmt::Display for PrepareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.action_status {
            ActionStatus::Running => "running",
            ActionStatus::Complete => "complete",
        };
        write!(
            f,
            "{} (completed={}, failed={})",
            status, self.completed_count, self.failed_count
        )
    }
}

/// A fully materialized capture result
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureResult {
    Mesh(Mesh),
    /// Mesh encoded in an interchange format (binary STL)
    Encoded(Vec<u8>),
}

impl CaptureResult {
    pub fn mode(&self) -> PrepareMode {
        match self {
            CaptureResult::Mesh(_) => PrepareMode::Mesh,
            CaptureResult::Encoded(_) => PrepareMode::Stl,
        }
    }
}

/// Pull-based notification stream returned by `deferred_capture_prepare`.
///
/// `next` yields `Ok(Some(status))` for each notification, `Ok(None)` once the
/// batch has finished preparing, and `Err` on failure. Exhaustion is the
/// barrier: no handle of the batch may be retrieved before it.
#[async_trait]
pub trait PrepareStream: Send {
    /// Pull the next notification
    async fn next(&mut self) -> Result<Option<PrepareStatus>>;

    /// Stop scheduling further work. A stream closed before its first `next`
    /// is exhausted immediately.
    async fn close(&mut self) -> Result<()>;

    /// Cancel the batch. Later `next` calls fail with [`ScannerError::Aborted`].
    async fn abort(&mut self) -> Result<()>;
}

#[async_trait]
pub trait PrepareStreamExt: PrepareStream {
    /// Pull notifications until exhaustion, returning the last one seen.
    ///
    /// A stream that yields nothing before exhausting returns `Ok(None)`.
    async fn drain(&mut self) -> Result<Option<PrepareStatus>> {
        let mut last = None;
        while let Some(status) = self.next().await? {
            last = Some(status);
        }
        Ok(last)
    }
}

impl<T: PrepareStream + ?Sized> PrepareStreamExt for T {}

/// The call interface of a remote scanner.
///
/// All calls of one workflow must go through the same session: handles are
/// session-scoped tokens.
#[async_trait]
pub trait ScannerSession: Send + Sync + 'static {
    /// Capture a single frame and return it reconstructed as a mesh
    async fn capture(&self, with_texture: bool) -> Result<Mesh>;

    /// Capture a single frame and return it encoded as binary STL
    async fn capture_stl(&self) -> Result<Vec<u8>>;

    /// Capture a frame now and defer reconstruction. Returns the handle
    /// that identifies the capture in later calls.
    async fn capture_deferred(&self, with_texture: bool) -> Result<CaptureHandle>;

    /// Submit a batch of handles for preparation in the given mode.
    ///
    /// # Errors
    ///
    /// Returns `ScannerError::UnknownHandle` if any handle was not issued by
    /// this session or has already been retrieved.
    async fn deferred_capture_prepare(
        &self,
        handles: Vec<CaptureHandle>,
        mode: PrepareMode,
    ) -> Result<Box<dyn PrepareStream>>;

    /// Retrieve a prepared capture as a mesh. The handle is consumed.
    async fn get_deferred_capture(&self, handle: CaptureHandle) -> Result<Mesh>;

    /// Retrieve a prepared capture as binary STL bytes. The handle is consumed.
    async fn get_deferred_capture_stl(&self, handle: CaptureHandle) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait ScannerSessionExt: ScannerSession {
    /// Retrieve a prepared capture in the representation matching `mode`
    async fn retrieve(&self, handle: CaptureHandle, mode: PrepareMode) -> Result<CaptureResult> {
        match mode {
            PrepareMode::Mesh => self
                .get_deferred_capture(handle)
                .await
                .map(CaptureResult::Mesh),
            PrepareMode::Stl => self
                .get_deferred_capture_stl(handle)
                .await
                .map(CaptureResult::Encoded),
        }
    }
}

impl<T: ScannerSession + ?Sized> ScannerSessionExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedStream {
        items: VecDeque<Result<Option<PrepareStatus>>>,
    }

    #[async_trait]
    impl PrepareStream for ScriptedStream {
        async fn next(&mut self) -> Result<Option<PrepareStatus>> {
            self.items.pop_front().unwrap_or(Ok(None))
        }

        async fn close(&mut self) -> Result<()> {
            self.items.clear();
            Ok(())
        }

        async fn abort(&mut self) -> Result<()> {
            self.items = VecDeque::from(vec![Err(ScannerError::Aborted)]);
            Ok(())
        }
    }

    #[test]
    fn test_handle_display_and_raw() {
        let handle = CaptureHandle::from_raw(42);
        assert_eq!(handle.as_raw(), 42);
        assert_eq!(handle.to_string(), "#42");
    }

    #[test]
    fn test_prepare_status_constructors() {
        let running = PrepareStatus::running(2, 1);
        assert!(!running.is_complete());
        assert_eq!(running.processed(), 3);

        let done = PrepareStatus::complete(5, 0);
        assert!(done.is_complete());
        assert_eq!(done.to_string(), "complete (completed=5, failed=0)");
    }

    #[tokio::test]
    async fn test_drain_returns_last_status() {
        let mut stream = ScriptedStream {
            items: VecDeque::from(vec![
                Ok(Some(PrepareStatus::running(0, 0))),
                Ok(Some(PrepareStatus::complete(2, 0))),
            ]),
        };

        let last = stream.drain().await.unwrap();
        assert_eq!(last, Some(PrepareStatus::complete(2, 0)));
    }

    #[tokio::test]
    async fn test_drain_of_empty_stream() {
        let mut stream = ScriptedStream {
            items: VecDeque::new(),
        };
        assert_eq!(stream.drain().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_drain_propagates_errors() {
        let mut stream = ScriptedStream {
            items: VecDeque::new(),
        };
        stream.abort().await.unwrap();
        assert_eq!(stream.drain().await, Err(ScannerError::Aborted));
    }

    #[test]
    fn test_capture_result_mode() {
        assert_eq!(
            CaptureResult::Mesh(Mesh::default()).mode(),
            PrepareMode::Mesh
        );
        assert_eq!(CaptureResult::Encoded(vec![1]).mode(), PrepareMode::Stl);
    }
}
