//! TCP front end: accepts connections and dispatches framed requests
//!
//! Each connection carries exactly one session. The first frame must be a
//! hello naming this service; after that requests are answered one at a time
//! and in order. When the connection ends the session and every capture it
//! still holds are dropped.

use futures::{SinkExt, StreamExt};
use scanlink_core_interface::{PrepareStream, ScannerError, ScannerErrorCode, ScannerSession};
use scanlink_proto::{CodecError, Request, Response, ServerCodec, StreamId, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::error::{Result, StationError};
use crate::service::{ScannerService, StationSession};

type Connection = Framed<TcpStream, ServerCodec>;

/// Accept connections forever, serving each on its own task
pub async fn serve(listener: TcpListener, service: ScannerService) -> Result<()> {
    let local = listener.local_addr()?;
    info!(
        "Scanner service '{}' listening on {}",
        service.config().service_name,
        local
    );

    loop {
        let (stream, peer) = listener.accept().await?;
        let service = service.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, service).await {
                warn!("Connection from {} ended with error: {}", peer, e);
            }
        });
    }
}

/// Bind an ephemeral loopback port and serve on a background task
pub async fn spawn_local(service: ScannerService) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
    let address = "127.0.0.1:0";
    let listener = TcpListener::bind(address)
        .await
        .map_err(|source| StationError::Bind {
            address: address.to_string(),
            source,
        })?;
    let local = listener.local_addr()?;
    Ok((local, tokio::spawn(serve(listener, service))))
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    service: ScannerService,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut conn = Framed::new(stream, ServerCodec::new(service.config().max_frame_length));

    let Some(session) = handshake(&mut conn, &service).await? else {
        debug!("Connection from {} closed before hello", peer);
        return Ok(());
    };
    info!("Session {} opened for {}", session.id(), peer);

    let mut dispatcher = Dispatcher::new(session);
    while let Some(frame) = conn.next().await {
        let request = frame?;
        let name = request.name();
        let response = dispatcher.dispatch(request).await;
        reply(&mut conn, name, response).await?;
    }

    info!(
        "Session {} closed by {}, discarding {} captures",
        dispatcher.session.id(),
        peer,
        dispatcher.session.outstanding()
    );
    Ok(())
}

/// Send a response, answering with an error instead when it does not fit in a frame
async fn reply(conn: &mut Connection, request: &str, response: Response) -> Result<()> {
    match conn.send(response).await {
        Err(CodecError::FrameTooLarge { length, max }) => {
            warn!(
                "Response to {} is {} bytes, over the {} byte frame limit",
                request, length, max
            );
            let error = ScannerError::scanner(
                ScannerErrorCode::OperationFailed,
                format!("response of {} bytes exceeds the {} byte frame limit", length, max),
            );
            conn.send(Response::Error(error)).await?;
            Ok(())
        }
        other => other.map_err(StationError::from),
    }
}

async fn handshake(
    conn: &mut Connection,
    service: &ScannerService,
) -> Result<Option<StationSession>> {
    let Some(frame) = conn.next().await else {
        return Ok(None);
    };

    let reason = match frame? {
        Request::Hello {
            service: name,
            protocol_version,
            client_version,
        } => {
            if name != service.config().service_name {
                format!("no service named '{}'", name)
            } else if protocol_version != PROTOCOL_VERSION {
                format!(
                    "protocol version {} not supported (expected {})",
                    protocol_version, PROTOCOL_VERSION
                )
            } else {
                let session = service.open_session();
                debug!("Client v{} joined session {}", client_version, session.id());
                conn.send(Response::Hello {
                    session_id: session.id().to_string(),
                    server_version: env!("CARGO_PKG_VERSION").to_string(),
                })
                .await?;
                return Ok(Some(session));
            }
        }
        other => format!("expected hello, got {}", other.name()),
    };

    conn.send(Response::Error(ScannerError::InvalidOperation(
        reason.clone(),
    )))
    .await?;
    Err(StationError::Handshake(reason))
}

/// Per-connection request router. Owns the session and its open prepare streams.
struct Dispatcher {
    session: StationSession,
    streams: HashMap<StreamId, Box<dyn PrepareStream>>,
    next_stream: StreamId,
}

impl Dispatcher {
    fn new(session: StationSession) -> Self {
        Self {
            session,
            streams: HashMap::new(),
            next_stream: 1,
        }
    }

    fn stream(&mut self, id: StreamId) -> std::result::Result<&mut Box<dyn PrepareStream>, ScannerError> {
        self.streams
            .get_mut(&id)
            .ok_or_else(|| ScannerError::InvalidOperation(format!("unknown prepare stream {}", id)))
    }

    async fn dispatch(&mut self, request: Request) -> Response {
        debug!("Session {} <- {}", self.session.id(), request.name());

        match request {
            Request::Hello { .. } => Response::Error(ScannerError::InvalidOperation(
                "session already established".to_string(),
            )),
            Request::Capture { with_texture } => {
                self.session.capture(with_texture).await.map(Response::Mesh).into()
            }
            Request::CaptureStl => self.session.capture_stl().await.map(Response::Bytes).into(),
            Request::CaptureDeferred { with_texture } => self
                .session
                .capture_deferred(with_texture)
                .await
                .map(Response::Handle)
                .into(),
            Request::DeferredCapturePrepare { handles, mode } => {
                match self.session.deferred_capture_prepare(handles, mode).await {
                    Ok(stream) => {
                        let id = self.next_stream;
                        self.next_stream = self.next_stream.wrapping_add(1);
                        self.streams.insert(id, stream);
                        Response::PrepareStarted { stream: id }
                    }
                    Err(e) => Response::Error(e),
                }
            }
            Request::PrepareNext { stream } => {
                let outcome = match self.stream(stream) {
                    Ok(s) => s.next().await,
                    Err(e) => Err(e),
                };
                // exhausted and aborted streams are finished with
                if matches!(outcome, Ok(None) | Err(ScannerError::Aborted)) {
                    self.streams.remove(&stream);
                }
                outcome.map(Response::PrepareStatus).into()
            }
            Request::PrepareClose { stream } => match self.stream(stream) {
                Ok(s) => s.close().await.map(|_| Response::Done).into(),
                Err(e) => Response::Error(e),
            },
            Request::PrepareAbort { stream } => {
                let outcome = match self.stream(stream) {
                    Ok(s) => s.abort().await,
                    Err(e) => Err(e),
                };
                if outcome.is_ok() {
                    self.streams.remove(&stream);
                }
                outcome.map(|_| Response::Done).into()
            }
            Request::PrepareRelease { stream } => {
                if self.streams.remove(&stream).is_some() {
                    debug!("Released prepare stream {}", stream);
                }
                Response::Done
            }
            Request::GetDeferredCapture { handle } => self
                .session
                .get_deferred_capture(handle)
                .await
                .map(Response::Mesh)
                .into(),
            Request::GetDeferredCaptureStl { handle } => self
                .session
                .get_deferred_capture_stl(handle)
                .await
                .map(Response::Bytes)
                .into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SyntheticConfig;
    use crate::service::StationConfig;
    use scanlink_core_interface::{CaptureHandle, PrepareMode};
    use std::time::Duration;

    fn dispatcher() -> Dispatcher {
        let service = ScannerService::synthetic(
            SyntheticConfig {
                rings: 2,
                segments: 3,
                reconstruct_delay: Duration::from_millis(20),
                ..Default::default()
            },
            StationConfig {
                workers: 1,
                heartbeat: Duration::from_millis(5),
                ..Default::default()
            },
        );
        Dispatcher::new(service.open_session())
    }

    async fn begin(dispatcher: &mut Dispatcher) -> CaptureHandle {
        match dispatcher
            .dispatch(Request::CaptureDeferred {
                with_texture: false,
            })
            .await
        {
            Response::Handle(handle) => handle,
            other => panic!("unexpected {:?}", other),
        }
    }

    async fn prepare(dispatcher: &mut Dispatcher, handles: Vec<CaptureHandle>) -> StreamId {
        match dispatcher
            .dispatch(Request::DeferredCapturePrepare {
                handles,
                mode: PrepareMode::Mesh,
            })
            .await
        {
            Response::PrepareStarted { stream } => stream,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_aborted_streams_leave_the_table() {
        let mut dispatcher = dispatcher();

        for _ in 0..3 {
            let handle = begin(&mut dispatcher).await;
            let stream = prepare(&mut dispatcher, vec![handle]).await;
            let status = dispatcher.dispatch(Request::PrepareNext { stream }).await;
            assert!(matches!(status, Response::PrepareStatus(Some(_))));

            let reply = dispatcher.dispatch(Request::PrepareAbort { stream }).await;
            assert_eq!(reply, Response::Done);
        }

        assert!(dispatcher.streams.is_empty());
    }

    #[tokio::test]
    async fn test_released_stream_frees_its_handles() {
        let mut dispatcher = dispatcher();
        let handle = begin(&mut dispatcher).await;

        let stream = prepare(&mut dispatcher, vec![handle]).await;
        let reply = dispatcher.dispatch(Request::PrepareRelease { stream }).await;
        assert_eq!(reply, Response::Done);
        assert!(dispatcher.streams.is_empty());

        // the handle is no longer held by a running batch
        let stream = prepare(&mut dispatcher, vec![handle]).await;
        assert_eq!(dispatcher.streams.len(), 1);

        let reply = dispatcher.dispatch(Request::PrepareNext { stream: stream + 100 }).await;
        assert!(matches!(
            reply,
            Response::Error(ScannerError::InvalidOperation(_))
        ));

        // releasing twice is harmless
        dispatcher.dispatch(Request::PrepareRelease { stream }).await;
        let reply = dispatcher.dispatch(Request::PrepareRelease { stream }).await;
        assert_eq!(reply, Response::Done);
        assert!(dispatcher.streams.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_stream_leaves_the_table() {
        let mut dispatcher = dispatcher();
        let handle = begin(&mut dispatcher).await;
        let stream = prepare(&mut dispatcher, vec![handle]).await;

        loop {
            match dispatcher.dispatch(Request::PrepareNext { stream }).await {
                Response::PrepareStatus(Some(_)) => continue,
                Response::PrepareStatus(None) => break,
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(dispatcher.streams.is_empty());
    }
}
