/*!
 * Deferred multi-capture workflow
 *
 * Captures are batched in three phases: issue, barrier, collect.
 *
 * 1. [`DeferredBatch::begin_capture`] issues captures one after another,
 *    collecting their handles.
 * 2. [`DeferredBatch::prepare`] submits every handle at once and drains the
 *    notification stream. Exhaustion of the stream is the barrier.
 * 3. [`PreparedBatch::retrieve_next`] fetches each capture exactly once, in
 *    the representation chosen at prepare time.
 *
 * Only a [`PreparedBatch`] can retrieve, so no capture can be fetched before
 * its batch is prepared.
 */

use scanlink_core_interface::{
    CaptureHandle, CaptureResult, Mesh, PrepareMode, PrepareStatus, ScannerError,
    ScannerSession, ScannerSessionExt,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::capture::{write_file, MeshSummary};
use crate::config::{ErrorMode, ScanConfig};
use crate::error::{Result, ScanlinkError};
use crate::progress::BatchProgress;

/// A capture in a batch, numbered from 1 in issue order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchItem {
    pub index: usize,
    pub handle: CaptureHandle,
}

/// Where in the workflow an item failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Capture,
    Retrieve,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub index: usize,
    pub handle: Option<CaptureHandle>,
    pub phase: Phase,
    pub error: ScannerError,
}

/// Outcome of a batch workflow
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Captures requested
    pub requested: usize,

    /// Captures retrieved successfully
    pub retrieved: usize,

    pub failures: Vec<ItemFailure>,

    /// Final prepare notification, if the stream yielded any
    pub prepare_status: Option<PrepareStatus>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn a report with failures into [`ScanlinkError::Partial`]
    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(ScanlinkError::Partial {
                failed: self.failures.len(),
                total: self.requested,
            })
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Issue
// ═══════════════════════════════════════════════════════════════════════

/// Captures issued on one session and not yet prepared
pub struct DeferredBatch<'s, S: ScannerSession + ?Sized> {
    session: &'s S,
    items: Vec<BatchItem>,
    next_index: usize,
}

impl<'s, S: ScannerSession + ?Sized> DeferredBatch<'s, S> {
    pub fn new(session: &'s S) -> Self {
        Self {
            session,
            items: Vec::new(),
            next_index: 1,
        }
    }

    /// Index the next `begin_capture` is assigned, whether or not it succeeds
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Issue one deferred capture and add its handle to the batch
    pub async fn begin_capture(
        &mut self,
        with_texture: bool,
    ) -> std::result::Result<CaptureHandle, ScannerError> {
        let index = self.next_index;
        self.next_index += 1;

        let handle = self.session.capture_deferred(with_texture).await?;
        debug!("Capture {} issued as handle {}", index, handle);
        self.items.push(BatchItem { index, handle });
        Ok(handle)
    }

    /// Submit the batch for preparation and wait for the barrier.
    ///
    /// The notification stream is drained until exhausted; `on_status` sees
    /// every notification. With a `barrier_timeout` the stream is aborted and
    /// [`ScanlinkError::BarrierTimeout`] returned once the limit passes. The
    /// limit is checked between notifications, each of which the service
    /// bounds by its heartbeat.
    pub async fn prepare<F>(
        self,
        mode: PrepareMode,
        barrier_timeout: Option<Duration>,
        mut on_status: F,
    ) -> Result<PreparedBatch<'s, S>>
    where
        F: FnMut(&PrepareStatus),
    {
        let batch = self.items.len();
        let handles = self.items.iter().map(|item| item.handle).collect();
        info!("Preparing {} deferred captures as {:?}", batch, mode);

        let mut stream = self.session.deferred_capture_prepare(handles, mode).await?;
        let started = Instant::now();
        let mut last = None;

        loop {
            if let Some(after) = barrier_timeout {
                if started.elapsed() >= after {
                    if let Err(e) = stream.abort().await {
                        warn!("Failed to abort prepare stream: {}", e);
                    }
                    return Err(ScanlinkError::BarrierTimeout { batch, after });
                }
            }

            match stream.next().await? {
                Some(status) => {
                    debug!("Prepare notification: {}", status);
                    on_status(&status);
                    last = Some(status);
                }
                None => break,
            }
        }

        match &last {
            Some(status) if status.failed_count > 0 => warn!(
                "Batch prepared with {} of {} captures failed",
                status.failed_count, batch
            ),
            Some(status) => info!("Batch prepared: {}", status),
            None => info!("Batch prepared"),
        }

        Ok(PreparedBatch {
            session: self.session,
            items: self.items,
            mode,
            status: last,
            cursor: 0,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Collect
// ═══════════════════════════════════════════════════════════════════════

/// A batch past its barrier. Each capture can be retrieved once.
pub struct PreparedBatch<'s, S: ScannerSession + ?Sized> {
    session: &'s S,
    items: Vec<BatchItem>,
    mode: PrepareMode,
    status: Option<PrepareStatus>,
    cursor: usize,
}

impl<'s, S: ScannerSession + ?Sized> PreparedBatch<'s, S> {
    pub fn mode(&self) -> PrepareMode {
        self.mode
    }

    /// Last notification of the drained stream
    pub fn status(&self) -> Option<&PrepareStatus> {
        self.status.as_ref()
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    /// Captures not yet retrieved
    pub fn remaining(&self) -> usize {
        self.items.len() - self.cursor
    }

    /// Retrieve the next capture in issue order, `None` once all were retrieved
    pub async fn retrieve_next(
        &mut self,
    ) -> Option<(BatchItem, std::result::Result<CaptureResult, ScannerError>)> {
        let item = *self.items.get(self.cursor)?;
        self.cursor += 1;

        let result = self.session.retrieve(item.handle, self.mode).await;
        if let Err(ref e) = result {
            debug!("Retrieving capture {} failed: {}", item.index, e);
        }
        Some((item, result))
    }
}

/// Record a per-item failure, or stop the workflow on it
fn item_failed(
    report: &mut BatchReport,
    error_mode: ErrorMode,
    index: usize,
    handle: Option<CaptureHandle>,
    phase: Phase,
    error: ScannerError,
) -> Result<()> {
    if error.is_fatal() || error_mode == ErrorMode::Abort {
        return Err(ScanlinkError::Item {
            index,
            handle,
            source: error,
        });
    }

    warn!("Capture {} failed during {:?}: {}", index, phase, error);
    report.failures.push(ItemFailure {
        index,
        handle,
        phase,
        error,
    });
    Ok(())
}

async fn issue_and_prepare<'s, S>(
    session: &'s S,
    config: &ScanConfig,
    count: usize,
    with_texture: bool,
    mode: PrepareMode,
    progress: &BatchProgress,
    report: &mut BatchReport,
) -> Result<PreparedBatch<'s, S>>
where
    S: ScannerSession + ?Sized,
{
    report.requested = count;

    progress.phase("capturing");
    let mut batch = DeferredBatch::new(session);
    for _ in 0..count {
        let index = batch.next_index();
        if let Err(e) = batch.begin_capture(with_texture).await {
            item_failed(report, config.error_mode, index, None, Phase::Capture, e)?;
        }
        progress.inc();
    }
    info!("Issued {} of {} deferred captures", batch.len(), count);

    progress.phase("preparing");
    let prepared = batch
        .prepare(mode, config.prepare_timeout(), |status| {
            progress.prepare_status(status)
        })
        .await?;
    report.prepare_status = prepared.status().copied();

    progress.phase("retrieving");
    Ok(prepared)
}

/// Capture `count` meshes through the deferred workflow.
///
/// Returns the retrieved meshes with their 1-based indices. Per-item failures
/// are collected in `report` unless `config.error_mode` is `Abort`. The report
/// is filled as the run goes, so it stays accurate when the run stops early.
pub async fn multi_capture<S>(
    session: &S,
    config: &ScanConfig,
    count: usize,
    progress: &BatchProgress,
    report: &mut BatchReport,
) -> Result<Vec<(usize, Mesh)>>
where
    S: ScannerSession + ?Sized,
{
    let mut prepared = issue_and_prepare(
        session,
        config,
        count,
        config.with_texture,
        PrepareMode::Mesh,
        progress,
        report,
    )
    .await?;

    let mut meshes = Vec::with_capacity(prepared.remaining());
    while let Some((item, result)) = prepared.retrieve_next().await {
        match result {
            Ok(CaptureResult::Mesh(mesh)) => {
                debug!("Capture {}: {}", item.index, MeshSummary::of(&mesh));
                meshes.push((item.index, mesh));
                report.retrieved += 1;
            }
            Ok(CaptureResult::Encoded(_)) => {
                let error = ScannerError::Protocol("expected a mesh, got encoded bytes".into());
                item_failed(
                    report,
                    config.error_mode,
                    item.index,
                    Some(item.handle),
                    Phase::Retrieve,
                    error,
                )?;
            }
            Err(e) => item_failed(
                report,
                config.error_mode,
                item.index,
                Some(item.handle),
                Phase::Retrieve,
                e,
            )?,
        }
        progress.inc();
    }

    progress.finish(format!("{} meshes", report.retrieved));
    Ok(meshes)
}

/// Capture `count` meshes as STL and write each to `config.stl_path(index)`.
///
/// Files already written stay in place when the workflow stops early, and
/// `report` holds the failures seen up to that point.
pub async fn multi_capture_stl<S>(
    session: &S,
    config: &ScanConfig,
    count: usize,
    progress: &BatchProgress,
    report: &mut BatchReport,
) -> Result<Vec<PathBuf>>
where
    S: ScannerSession + ?Sized,
{
    let mut prepared = issue_and_prepare(
        session,
        config,
        count,
        false,
        PrepareMode::Stl,
        progress,
        report,
    )
    .await?;

    let mut written = Vec::with_capacity(prepared.remaining());
    while let Some((item, result)) = prepared.retrieve_next().await {
        match result {
            Ok(CaptureResult::Encoded(bytes)) => {
                let path = config.stl_path(item.index);
                write_file(&path, &bytes).await?;
                debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
                written.push(path);
                report.retrieved += 1;
            }
            Ok(CaptureResult::Mesh(_)) => {
                let error = ScannerError::Protocol("expected encoded bytes, got a mesh".into());
                item_failed(
                    report,
                    config.error_mode,
                    item.index,
                    Some(item.handle),
                    Phase::Retrieve,
                    error,
                )?;
            }
            Err(e) => item_failed(
                report,
                config.error_mode,
                item.index,
                Some(item.handle),
                Phase::Retrieve,
                e,
            )?,
        }
        progress.inc();
    }

    info!(
        "Wrote {} STL files to {}",
        written.len(),
        config.output_dir.display()
    );
    progress.finish(format!("{} files", written.len()));
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanlink_core_interface::ScannerErrorCode;

    #[test]
    fn test_report_without_failures_is_ok() {
        let report = BatchReport {
            requested: 3,
            retrieved: 3,
            ..Default::default()
        };
        assert!(report.clone().into_result().is_ok());
    }

    #[test]
    fn test_report_with_failures_is_partial() {
        let report = BatchReport {
            requested: 4,
            retrieved: 3,
            failures: vec![ItemFailure {
                index: 2,
                handle: Some(CaptureHandle::from_raw(8)),
                phase: Phase::Retrieve,
                error: ScannerError::scanner(ScannerErrorCode::FrameCorrupted, "frame"),
            }],
            prepare_status: None,
        };
        match report.into_result() {
            Err(ScanlinkError::Partial { failed, total }) => {
                assert_eq!(failed, 1);
                assert_eq!(total, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_item_failure_policy() {
        let mut report = BatchReport::default();
        let capture_error = ScannerError::scanner(ScannerErrorCode::OperationFailed, "x");

        item_failed(
            &mut report,
            ErrorMode::Continue,
            1,
            None,
            Phase::Capture,
            capture_error.clone(),
        )
        .unwrap();
        assert_eq!(report.failures.len(), 1);

        let err = item_failed(
            &mut report,
            ErrorMode::Abort,
            2,
            None,
            Phase::Capture,
            capture_error,
        )
        .unwrap_err();
        assert!(matches!(err, ScanlinkError::Item { index: 2, .. }));

        // connection loss stops the workflow even when continuing on errors
        let err = item_failed(
            &mut report,
            ErrorMode::Continue,
            3,
            None,
            Phase::Retrieve,
            ScannerError::Connection("reset".into()),
        )
        .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(report.failures.len(), 1);
    }
}
