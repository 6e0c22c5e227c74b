//! Wire protocol for Scanlink scanner sessions.
//!
//! A session is one TCP connection carrying length-delimited frames, each
//! frame holding one bincode-encoded [`Request`] (client to service) or
//! [`Response`] (service to client). Every request gets exactly one response,
//! in order. The first request on a connection must be [`Request::Hello`].

pub mod codec;

pub use codec::{ClientCodec, CodecError, ScanCodec, ServerCodec};

use scanlink_core_interface::{CaptureHandle, Mesh, PrepareMode, PrepareStatus, ScannerError};
use serde::{Deserialize, Serialize};

/// Default TCP port of a scanner service
pub const DEFAULT_PORT: u16 = 64238;

/// Default service name registered by a scanner service
pub const DEFAULT_SERVICE: &str = "scanner";

/// Default upper bound on a single frame (meshes with textures are large)
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 100_000_000;

pub const PROTOCOL_VERSION: u32 = 1;

/// Identifier of a prepare stream, scoped to its session
pub type StreamId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Hello {
        service: String,
        protocol_version: u32,
        client_version: String,
    },
    Capture {
        with_texture: bool,
    },
    CaptureStl,
    CaptureDeferred {
        with_texture: bool,
    },
    DeferredCapturePrepare {
        handles: Vec<CaptureHandle>,
        mode: PrepareMode,
    },
    PrepareNext {
        stream: StreamId,
    },
    PrepareClose {
        stream: StreamId,
    },
    PrepareAbort {
        stream: StreamId,
    },
    /// Drop a stream the client no longer reads. Unknown streams are ignored.
    PrepareRelease {
        stream: StreamId,
    },
    GetDeferredCapture {
        handle: CaptureHandle,
    },
    GetDeferredCaptureStl {
        handle: CaptureHandle,
    },
}

impl Request {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "hello",
            Request::Capture { .. } => "capture",
            Request::CaptureStl => "capture_stl",
            Request::CaptureDeferred { .. } => "capture_deferred",
            Request::DeferredCapturePrepare { .. } => "deferred_capture_prepare",
            Request::PrepareNext { .. } => "prepare_next",
            Request::PrepareClose { .. } => "prepare_close",
            Request::PrepareAbort { .. } => "prepare_abort",
            Request::PrepareRelease { .. } => "prepare_release",
            Request::GetDeferredCapture { .. } => "get_deferred_capture",
            Request::GetDeferredCaptureStl { .. } => "get_deferred_capture_stl",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Hello {
        session_id: String,
        server_version: String,
    },
    Mesh(Mesh),
    Bytes(Vec<u8>),
    Handle(CaptureHandle),
    PrepareStarted {
        stream: StreamId,
    },
    /// `None` signals that the prepare stream is exhausted
    PrepareStatus(Option<PrepareStatus>),
    Done,
    Error(ScannerError),
}

impl Response {
    pub fn name(&self) -> &'static str {
        match self {
            Response::Hello { .. } => "hello",
            Response::Mesh(_) => "mesh",
            Response::Bytes(_) => "bytes",
            Response::Handle(_) => "handle",
            Response::PrepareStarted { .. } => "prepare_started",
            Response::PrepareStatus(_) => "prepare_status",
            Response::Done => "done",
            Response::Error(_) => "error",
        }
    }
}

impl From<scanlink_core_interface::Result<Response>> for Response {
    fn from(result: scanlink_core_interface::Result<Response>) -> Self {
        result.unwrap_or_else(Response::Error)
    }
}
