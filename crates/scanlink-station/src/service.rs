//! Scanner service and its per-connection sessions
//!
//! [`ScannerService`] is shared by every connection. Each connection opens a
//! [`StationSession`] that owns the deferred captures issued through it;
//! dropping the session discards them. Handles are numbered service-wide, so
//! a handle never resolves in a session other than the one that issued it.

use async_trait::async_trait;
use scanlink_core_interface::{
    CaptureHandle, Mesh, PrepareMode, PrepareStream, Result, ScannerError, ScannerErrorCode,
    ScannerSession,
};
use scanlink_proto::{DEFAULT_MAX_FRAME_LENGTH, DEFAULT_SERVICE};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::frame::{Frame, FrameSource, SyntheticConfig, SyntheticScanner};
use crate::prepare::{LocalPrepareStream, PrepareJob};
use crate::stl;

#[derive(Debug, Clone)]
pub struct StationConfig {
    /// Service name clients must ask for in their hello
    pub service_name: String,

    /// Preparation pool size
    pub workers: usize,

    /// Upper bound on how long one prepare `next` blocks
    pub heartbeat: Duration,

    /// Largest frame accepted or sent, in bytes
    pub max_frame_length: usize,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE.to_string(),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            heartbeat: Duration::from_secs(5),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

/// A deferred capture held by a session until retrieved
pub(crate) struct DeferredCapture {
    pub(crate) frame: Frame,
    pub(crate) mesh: Option<Mesh>,
    pub(crate) stl: Option<Vec<u8>>,
    /// Preparation failure and the mode it was prepared for
    pub(crate) failure: Option<(PrepareMode, ScannerError)>,
    /// Member of a batch that has not finished preparing
    pub(crate) preparing: bool,
}

impl DeferredCapture {
    fn new(frame: Frame) -> Self {
        Self {
            frame,
            mesh: None,
            stl: None,
            failure: None,
            preparing: false,
        }
    }

    pub(crate) fn is_ready(&self, mode: PrepareMode) -> bool {
        match mode {
            PrepareMode::Mesh => self.mesh.is_some(),
            PrepareMode::Stl => self.stl.is_some(),
        }
    }

    fn failed_in(&self, mode: PrepareMode) -> bool {
        matches!(self.failure, Some((failed, _)) if failed == mode)
    }

    /// The failure recorded for `mode`, or `NotPrepared`
    fn into_failure(self, handle: CaptureHandle, mode: PrepareMode) -> ScannerError {
        match self.failure {
            Some((failed, error)) if failed == mode => error,
            _ => ScannerError::NotPrepared(handle),
        }
    }
}

#[derive(Default)]
pub(crate) struct CaptureStore {
    pub(crate) captures: HashMap<CaptureHandle, DeferredCapture>,
}

pub(crate) type SharedStore = Arc<Mutex<CaptureStore>>;

/// Lock a session store. A worker that panicked mid-update leaves at worst one
/// capture unprepared, so poisoning is ignored.
pub(crate) fn lock(store: &Mutex<CaptureStore>) -> MutexGuard<'_, CaptureStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ServiceInner {
    source: Arc<dyn FrameSource>,
    config: StationConfig,
    next_handle: AtomicU64,
}

/// Shared scanner service. Cheap to clone.
#[derive(Clone)]
pub struct ScannerService {
    inner: Arc<ServiceInner>,
}

impl ScannerService {
    pub fn new(source: impl FrameSource, config: StationConfig) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                source: Arc::new(source),
                config,
                next_handle: AtomicU64::new(1),
            }),
        }
    }

    /// Service backed by a [`SyntheticScanner`]
    pub fn synthetic(scanner: SyntheticConfig, config: StationConfig) -> Self {
        Self::new(SyntheticScanner::new(scanner), config)
    }

    pub fn config(&self) -> &StationConfig {
        &self.inner.config
    }

    pub fn open_session(&self) -> StationSession {
        let id = Uuid::new_v4().to_string();
        debug!("Opened session {}", id);
        StationSession {
            id,
            service: Arc::clone(&self.inner),
            store: Arc::new(Mutex::new(CaptureStore::default())),
        }
    }
}

/// One client session. Implements the scanner call interface in process.
pub struct StationSession {
    id: String,
    service: Arc<ServiceInner>,
    store: SharedStore,
}

impl StationSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of deferred captures issued and not yet retrieved
    pub fn outstanding(&self) -> usize {
        lock(&self.store).captures.len()
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn FrameSource) -> Result<T> + Send + 'static,
    {
        let source = Arc::clone(&self.service.source);
        tokio::task::spawn_blocking(move || f(source.as_ref()))
            .await
            .map_err(|e| {
                ScannerError::scanner(
                    ScannerErrorCode::OperationFailed,
                    format!("capture task failed: {}", e),
                )
            })?
    }

    /// Remove a capture once it can be retrieved in `mode`
    fn take(&self, handle: CaptureHandle, mode: PrepareMode) -> Result<DeferredCapture> {
        let mut store = lock(&self.store);
        let capture = store
            .captures
            .get(&handle)
            .ok_or(ScannerError::UnknownHandle(handle))?;

        let retrievable = capture.is_ready(mode) || capture.failed_in(mode);
        if capture.preparing || !retrievable {
            return Err(ScannerError::NotPrepared(handle));
        }

        let capture = store
            .captures
            .remove(&handle)
            .ok_or(ScannerError::UnknownHandle(handle))?;
        debug!(
            "Retrieved deferred capture {} ({} outstanding)",
            handle,
            store.captures.len()
        );
        Ok(capture)
    }
}

#[async_trait]
impl ScannerSession for StationSession {
    async fn capture(&self, with_texture: bool) -> Result<Mesh> {
        let mesh = self
            .blocking(move |source| {
                let frame = source.capture_frame(with_texture)?;
                source.reconstruct(&frame)
            })
            .await?;
        info!(
            "Captured mesh with {} vertices and {} triangles",
            mesh.vertices.len(),
            mesh.triangles.len()
        );
        Ok(mesh)
    }

    async fn capture_stl(&self) -> Result<Vec<u8>> {
        let bytes = self
            .blocking(|source| {
                let frame = source.capture_frame(false)?;
                source.reconstruct(&frame).map(|mesh| stl::encode_binary(&mesh))
            })
            .await?;
        info!("Captured STL mesh ({} bytes)", bytes.len());
        Ok(bytes)
    }

    async fn capture_deferred(&self, with_texture: bool) -> Result<CaptureHandle> {
        let frame = self
            .blocking(move |source| source.capture_frame(with_texture))
            .await?;

        let handle =
            CaptureHandle::from_raw(self.service.next_handle.fetch_add(1, Ordering::Relaxed));
        lock(&self.store)
            .captures
            .insert(handle, DeferredCapture::new(frame));

        info!("Captured deferred frame {}", handle);
        Ok(handle)
    }

    async fn deferred_capture_prepare(
        &self,
        handles: Vec<CaptureHandle>,
        mode: PrepareMode,
    ) -> Result<Box<dyn PrepareStream>> {
        {
            let mut store = lock(&self.store);
            let mut seen = HashSet::with_capacity(handles.len());
            for handle in &handles {
                if !seen.insert(*handle) {
                    return Err(ScannerError::InvalidOperation(format!(
                        "capture {} listed more than once",
                        handle
                    )));
                }
                match store.captures.get(handle) {
                    None => return Err(ScannerError::UnknownHandle(*handle)),
                    Some(capture) if capture.preparing => {
                        return Err(ScannerError::InvalidOperation(format!(
                            "capture {} is already being prepared",
                            handle
                        )))
                    }
                    Some(_) => {}
                }
            }

            for handle in &handles {
                if let Some(capture) = store.captures.get_mut(handle) {
                    capture.preparing = true;
                }
            }
        }

        debug!("Queued {} deferred captures for {:?}", handles.len(), mode);

        let config = &self.service.config;
        let job = PrepareJob::new(
            Arc::clone(&self.store),
            Arc::clone(&self.service.source),
            handles,
            mode,
        );
        Ok(Box::new(LocalPrepareStream::new(
            job,
            config.workers,
            config.heartbeat,
        )))
    }

    async fn get_deferred_capture(&self, handle: CaptureHandle) -> Result<Mesh> {
        let mut capture = self.take(handle, PrepareMode::Mesh)?;
        match capture.mesh.take() {
            Some(mesh) => Ok(mesh),
            None => Err(capture.into_failure(handle, PrepareMode::Mesh)),
        }
    }

    async fn get_deferred_capture_stl(&self, handle: CaptureHandle) -> Result<Vec<u8>> {
        let mut capture = self.take(handle, PrepareMode::Stl)?;
        match capture.stl.take() {
            Some(bytes) => Ok(bytes),
            None => Err(capture.into_failure(handle, PrepareMode::Stl)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanlink_core_interface::{ActionStatus, PrepareStreamExt};

    fn service(fail_every: u64, heartbeat: Duration) -> ScannerService {
        ScannerService::synthetic(
            SyntheticConfig {
                rings: 2,
                segments: 3,
                fail_every,
                ..Default::default()
            },
            StationConfig {
                workers: 2,
                heartbeat,
                ..Default::default()
            },
        )
    }

    async fn capture_n(session: &StationSession, n: usize) -> Vec<CaptureHandle> {
        let mut handles = Vec::new();
        for _ in 0..n {
            handles.push(session.capture_deferred(false).await.unwrap());
        }
        handles
    }

    #[tokio::test]
    async fn test_handles_are_unique_across_sessions() {
        let service = service(0, Duration::from_millis(50));
        let a = service.open_session();
        let b = service.open_session();

        let ha = a.capture_deferred(false).await.unwrap();
        let hb = b.capture_deferred(false).await.unwrap();
        assert_ne!(ha, hb);
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_prepare_then_retrieve_meshes() {
        let service = service(0, Duration::from_millis(50));
        let session = service.open_session();
        let handles = capture_n(&session, 3).await;

        let mut stream = session
            .deferred_capture_prepare(handles.clone(), PrepareMode::Mesh)
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.action_status, ActionStatus::Running);

        let last = stream.drain().await.unwrap().unwrap();
        assert!(last.is_complete());
        assert_eq!(last.completed_count, 3);
        assert_eq!(last.failed_count, 0);
        assert!(stream.next().await.unwrap().is_none());

        for handle in handles {
            let mesh = session.get_deferred_capture(handle).await.unwrap();
            assert!(!mesh.is_empty());
        }
        assert_eq!(session.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_retrieve_before_prepare_is_rejected() {
        let service = service(0, Duration::from_millis(50));
        let session = service.open_session();
        let handle = session.capture_deferred(false).await.unwrap();

        let err = session.get_deferred_capture_stl(handle).await.unwrap_err();
        assert_eq!(err, ScannerError::NotPrepared(handle));

        // still retrievable after a proper prepare
        let mut stream = session
            .deferred_capture_prepare(vec![handle], PrepareMode::Stl)
            .await
            .unwrap();
        stream.drain().await.unwrap();
        let stl = session.get_deferred_capture_stl(handle).await.unwrap();
        assert!(stl::triangle_count(&stl).unwrap() > 0);
    }

    #[tokio::test]
    async fn test_retrieve_in_wrong_mode_is_not_prepared() {
        let service = service(0, Duration::from_millis(50));
        let session = service.open_session();
        let handle = session.capture_deferred(false).await.unwrap();

        let mut stream = session
            .deferred_capture_prepare(vec![handle], PrepareMode::Stl)
            .await
            .unwrap();
        stream.drain().await.unwrap();

        let err = session.get_deferred_capture(handle).await.unwrap_err();
        assert_eq!(err, ScannerError::NotPrepared(handle));
    }

    #[tokio::test]
    async fn test_handle_is_consumed_by_retrieval() {
        let service = service(0, Duration::from_millis(50));
        let session = service.open_session();
        let handle = session.capture_deferred(false).await.unwrap();

        let mut stream = session
            .deferred_capture_prepare(vec![handle], PrepareMode::Mesh)
            .await
            .unwrap();
        stream.drain().await.unwrap();

        session.get_deferred_capture(handle).await.unwrap();
        let err = session.get_deferred_capture(handle).await.unwrap_err();
        assert_eq!(err, ScannerError::UnknownHandle(handle));
    }

    #[tokio::test]
    async fn test_foreign_handle_is_unknown() {
        let service = service(0, Duration::from_millis(50));
        let first = service.open_session();
        let handle = first.capture_deferred(false).await.unwrap();
        drop(first);

        let second = service.open_session();
        let err = match second
            .deferred_capture_prepare(vec![handle], PrepareMode::Mesh)
            .await
        {
            Ok(_) => panic!("prepare of a foreign handle succeeded"),
            Err(e) => e,
        };
        assert_eq!(err, ScannerError::UnknownHandle(handle));
    }

    #[tokio::test]
    async fn test_handle_cannot_join_two_running_batches() {
        let service = service(0, Duration::from_millis(50));
        let session = service.open_session();
        let handle = session.capture_deferred(false).await.unwrap();

        let _stream = session
            .deferred_capture_prepare(vec![handle], PrepareMode::Mesh)
            .await
            .unwrap();
        let second = session
            .deferred_capture_prepare(vec![handle], PrepareMode::Stl)
            .await;
        assert!(matches!(second, Err(ScannerError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_duplicate_handles_in_batch_are_rejected() {
        let service = service(0, Duration::from_millis(50));
        let session = service.open_session();
        let handle = session.capture_deferred(false).await.unwrap();

        let result = session
            .deferred_capture_prepare(vec![handle, handle], PrepareMode::Mesh)
            .await;
        assert!(matches!(result, Err(ScannerError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_failed_items_are_counted_and_reported_at_retrieval() {
        let service = service(2, Duration::from_millis(50));
        let session = service.open_session();
        let handles = capture_n(&session, 4).await;

        let mut stream = session
            .deferred_capture_prepare(handles.clone(), PrepareMode::Stl)
            .await
            .unwrap();
        let last = stream.drain().await.unwrap().unwrap();
        assert_eq!(last.completed_count, 2);
        assert_eq!(last.failed_count, 2);

        // frames 1 and 3 fail reconstruction
        assert!(session.get_deferred_capture_stl(handles[0]).await.is_ok());
        let err = session
            .get_deferred_capture_stl(handles[1])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScannerError::Scanner {
                code: ScannerErrorCode::FrameReconstructionFailed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failure_surfaces_only_in_its_prepared_mode() {
        let service = service(1, Duration::from_millis(50));
        let session = service.open_session();
        let handles = capture_n(&session, 1).await;

        let mut stream = session
            .deferred_capture_prepare(handles.clone(), PrepareMode::Stl)
            .await
            .unwrap();
        let last = stream.drain().await.unwrap().unwrap();
        assert_eq!(last.failed_count, 1);

        let err = session.get_deferred_capture(handles[0]).await.unwrap_err();
        assert_eq!(err, ScannerError::NotPrepared(handles[0]));
        assert_eq!(session.outstanding(), 1);

        let err = session
            .get_deferred_capture_stl(handles[0])
            .await
            .unwrap_err();
        assert!(matches!(err, ScannerError::Scanner { .. }));
        assert_eq!(session.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_already_prepared_items_are_skipped() {
        let service = service(0, Duration::from_millis(50));
        let session = service.open_session();
        let handles = capture_n(&session, 2).await;

        let mut stream = session
            .deferred_capture_prepare(vec![handles[0]], PrepareMode::Mesh)
            .await
            .unwrap();
        stream.drain().await.unwrap();

        let mut stream = session
            .deferred_capture_prepare(handles.clone(), PrepareMode::Mesh)
            .await
            .unwrap();
        let last = stream.drain().await.unwrap().unwrap();
        assert_eq!(last.completed_count, 2);
    }

    #[tokio::test]
    async fn test_close_before_start_exhausts_stream() {
        let service = service(0, Duration::from_millis(50));
        let session = service.open_session();
        let handle = session.capture_deferred(false).await.unwrap();

        let mut stream = session
            .deferred_capture_prepare(vec![handle], PrepareMode::Mesh)
            .await
            .unwrap();
        stream.close().await.unwrap();
        assert!(stream.next().await.unwrap().is_none());

        // released, so a new batch may claim it
        let mut again = session
            .deferred_capture_prepare(vec![handle], PrepareMode::Mesh)
            .await
            .unwrap();
        again.drain().await.unwrap();
        session.get_deferred_capture(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_abort_fails_later_next() {
        let service = service(0, Duration::from_millis(50));
        let session = service.open_session();
        let handle = session.capture_deferred(false).await.unwrap();

        let mut stream = session
            .deferred_capture_prepare(vec![handle], PrepareMode::Mesh)
            .await
            .unwrap();
        stream.next().await.unwrap();
        stream.abort().await.unwrap();
        assert_eq!(stream.next().await.unwrap_err(), ScannerError::Aborted);
    }

    #[tokio::test]
    async fn test_slow_batch_reports_heartbeats() {
        let service = ScannerService::synthetic(
            SyntheticConfig {
                rings: 2,
                segments: 3,
                reconstruct_delay: Duration::from_millis(150),
                ..Default::default()
            },
            StationConfig {
                workers: 1,
                heartbeat: Duration::from_millis(20),
                ..Default::default()
            },
        );
        let session = service.open_session();
        let handles = capture_n(&session, 2).await;

        let mut stream = session
            .deferred_capture_prepare(handles, PrepareMode::Mesh)
            .await
            .unwrap();

        let mut statuses = Vec::new();
        while let Some(status) = stream.next().await.unwrap() {
            statuses.push(status);
        }

        assert!(statuses.len() > 2);
        let (last, running) = statuses.split_last().unwrap();
        assert!(last.is_complete());
        assert_eq!(last.completed_count, 2);
        assert!(running.iter().all(|s| !s.is_complete()));
    }

    #[tokio::test]
    async fn test_empty_batch_completes() {
        let service = service(0, Duration::from_millis(50));
        let session = service.open_session();

        let mut stream = session
            .deferred_capture_prepare(Vec::new(), PrepareMode::Stl)
            .await
            .unwrap();
        let last = stream.drain().await.unwrap().unwrap();
        assert!(last.is_complete());
        assert_eq!(last.processed(), 0);
    }
}
