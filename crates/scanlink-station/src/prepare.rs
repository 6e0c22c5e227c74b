//! Batch preparation: worker pool and the local prepare stream
//!
//! A prepare job owns the list of handles of one batch. The first `next` on
//! its stream starts a dedicated thread that feeds the handles through a
//! channel into a rayon pool. Every later `next` waits up to one heartbeat
//! for the pool to drain, reporting `running` on timeout and `complete` once
//! all handles are processed. After `complete` the stream is exhausted.

use async_trait::async_trait;
use rayon::iter::{ParallelBridge, ParallelIterator};
use rayon::ThreadPoolBuilder;
use scanlink_core_interface::{
    CaptureHandle, Mesh, PrepareMode, PrepareStatus, PrepareStream, Result, ScannerError,
    ScannerErrorCode,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::frame::FrameSource;
use crate::service::{lock, SharedStore};
use crate::stl;

pub(crate) struct PrepareJob {
    store: SharedStore,
    source: Arc<dyn FrameSource>,
    handles: Vec<CaptureHandle>,
    mode: PrepareMode,
    completed: AtomicU32,
    failed: AtomicU32,
    cancelled: AtomicBool,
    finished: watch::Sender<bool>,
}

impl PrepareJob {
    pub(crate) fn new(
        store: SharedStore,
        source: Arc<dyn FrameSource>,
        handles: Vec<CaptureHandle>,
        mode: PrepareMode,
    ) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            store,
            source,
            handles,
            mode,
            completed: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            finished,
        }
    }

    fn status(&self, complete: bool) -> PrepareStatus {
        let completed = self.completed.load(Ordering::Acquire);
        let failed = self.failed.load(Ordering::Acquire);
        if complete {
            PrepareStatus::complete(completed, failed)
        } else {
            PrepareStatus::running(completed, failed)
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Process every handle on a pool of `workers` threads, then signal completion
    fn run(&self, workers: usize) {
        let (tx, rx) = crossbeam_channel::unbounded();
        for handle in &self.handles {
            // receiver is alive until the pool drains it
            let _ = tx.send(*handle);
        }
        drop(tx);

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("scanlink-prepare-{}", i))
            .build();

        match pool {
            Ok(pool) => pool.install(|| {
                rx.into_iter()
                    .par_bridge()
                    .for_each(|handle| self.process(handle));
            }),
            Err(e) => {
                error!("Failed to start preparation pool: {}", e);
                for handle in rx {
                    self.record(
                        handle,
                        Err(ScannerError::scanner(
                            ScannerErrorCode::OperationFailed,
                            format!("preparation pool unavailable: {}", e),
                        )),
                    );
                }
            }
        }

        self.finished.send_replace(true);
    }

    fn process(&self, handle: CaptureHandle) {
        if self.cancelled.load(Ordering::Acquire) {
            self.release(handle);
            return;
        }

        let frame = match lock(&self.store).captures.get_mut(&handle) {
            Some(capture) if capture.is_ready(self.mode) => {
                capture.preparing = false;
                None
            }
            Some(capture) => Some(capture.frame.clone()),
            // session torn down while the batch was running
            None => return,
        };

        let Some(frame) = frame else {
            debug!("Deferred capture {} already prepared as {:?}", handle, self.mode);
            self.completed.fetch_add(1, Ordering::AcqRel);
            return;
        };

        let outcome = self.source.reconstruct(&frame);
        self.record(handle, outcome);
    }

    fn record(&self, handle: CaptureHandle, outcome: Result<Mesh>) {
        let mut store = lock(&self.store);
        let Some(capture) = store.captures.get_mut(&handle) else {
            return;
        };
        capture.preparing = false;

        match outcome {
            Ok(mesh) => {
                match self.mode {
                    PrepareMode::Mesh => capture.mesh = Some(mesh),
                    PrepareMode::Stl => capture.stl = Some(stl::encode_binary(&mesh)),
                }
                capture.failure = None;
                drop(store);
                self.completed.fetch_add(1, Ordering::AcqRel);
                info!("Completed preparing deferred capture {}", handle);
            }
            Err(e) => {
                error!("Error preparing deferred capture {}: {}", handle, e);
                capture.failure = Some((self.mode, e));
                drop(store);
                self.failed.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    fn release(&self, handle: CaptureHandle) {
        if let Some(capture) = lock(&self.store).captures.get_mut(&handle) {
            capture.preparing = false;
        }
    }

    fn release_all(&self) {
        let mut store = lock(&self.store);
        for handle in &self.handles {
            if let Some(capture) = store.captures.get_mut(handle) {
                capture.preparing = false;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Pending,
    Running,
    Finished,
    Aborted,
}

/// In-process prepare stream with generator semantics
pub struct LocalPrepareStream {
    job: Arc<PrepareJob>,
    finished: watch::Receiver<bool>,
    workers: usize,
    heartbeat: Duration,
    state: StreamState,
}

impl LocalPrepareStream {
    pub(crate) fn new(job: PrepareJob, workers: usize, heartbeat: Duration) -> Self {
        let finished = job.finished.subscribe();
        Self {
            job: Arc::new(job),
            finished,
            workers: workers.max(1),
            heartbeat,
            state: StreamState::Pending,
        }
    }

    fn start(&mut self) -> Result<()> {
        let job = Arc::clone(&self.job);
        let workers = self.workers;

        std::thread::Builder::new()
            .name("scanlink-prepare".to_string())
            .spawn(move || job.run(workers))
            .map_err(|e| {
                self.job.release_all();
                ScannerError::scanner(
                    ScannerErrorCode::OperationFailed,
                    format!("failed to start preparation: {}", e),
                )
            })?;

        info!(
            "Started preparing {} deferred captures as {:?} on {} workers",
            self.job.handles.len(),
            self.job.mode,
            self.workers
        );
        self.state = StreamState::Running;
        Ok(())
    }

    async fn wait_finished(&mut self) -> bool {
        if *self.finished.borrow() {
            return true;
        }

        let finished = &mut self.finished;
        let wait = async move { finished.wait_for(|done| *done).await.map(|_| ()) };
        matches!(tokio::time::timeout(self.heartbeat, wait).await, Ok(Ok(())))
    }
}

#[async_trait]
impl PrepareStream for LocalPrepareStream {
    async fn next(&mut self) -> Result<Option<PrepareStatus>> {
        match self.state {
            StreamState::Aborted => Err(ScannerError::Aborted),
            StreamState::Finished => Ok(None),
            StreamState::Pending => {
                self.start()?;
                Ok(Some(self.job.status(false)))
            }
            StreamState::Running => {
                if self.wait_finished().await {
                    self.state = StreamState::Finished;
                    let status = self.job.status(true);
                    info!("Completed prepare batch: {}", status);
                    Ok(Some(status))
                } else {
                    Ok(Some(self.job.status(false)))
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.state {
            StreamState::Pending => {
                self.job.release_all();
                self.state = StreamState::Finished;
            }
            StreamState::Running => self.job.cancel(),
            StreamState::Finished | StreamState::Aborted => {}
        }
        Ok(())
    }

    async fn abort(&mut self) -> Result<()> {
        match self.state {
            StreamState::Pending => self.job.release_all(),
            StreamState::Running => self.job.cancel(),
            StreamState::Finished | StreamState::Aborted => {}
        }
        info!("Aborted prepare batch of {} captures", self.job.handles.len());
        self.state = StreamState::Aborted;
        Ok(())
    }
}

impl Drop for LocalPrepareStream {
    fn drop(&mut self) {
        match self.state {
            StreamState::Pending => self.job.release_all(),
            StreamState::Running => self.job.cancel(),
            StreamState::Finished | StreamState::Aborted => {}
        }
    }
}
