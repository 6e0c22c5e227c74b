//! RemoteScanner: ScannerSession implementation that talks to a scanner service over TCP

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use scanlink_core_interface::{
    CaptureHandle, Mesh, PrepareMode, PrepareStatus, PrepareStream, Result, ScannerError,
    ScannerSession,
};
use scanlink_proto::{ClientCodec, Request, Response, StreamId, PROTOCOL_VERSION};
use std::sync::{Arc, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::address::ServiceAddress;
use crate::error::ConnectError;
use crate::options::ConnectOptions;

type Connection = Framed<TcpStream, ClientCodec>;

/// A session with a remote scanner service.
///
/// The session owns one TCP connection. Calls are strictly request/response
/// and are serialized on that connection, so the struct is cheap to clone and
/// safe to share. Once the connection fails or times out the session is torn
/// down and every later call returns a connection error; handles issued by it
/// become meaningless.
///
/// # Example
///
/// ```rust,no_run
/// use scanlink_connect::{ConnectOptions, RemoteScanner};
/// use scanlink_core_interface::ScannerSession;
///
/// # async fn example() -> anyhow::Result<()> {
/// let scanner = RemoteScanner::connect_uri(
///     "scan+tcp://localhost:64238?service=scanner",
///     ConnectOptions::default(),
/// )
/// .await?;
///
/// let mesh = scanner.capture(true).await?;
/// println!("{} vertices", mesh.vertices.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RemoteScanner {
    conn: Arc<Mutex<Option<Connection>>>,
    /// Prepare streams dropped before they were exhausted; released on the next call
    abandoned: Arc<std::sync::Mutex<Vec<StreamId>>>,
    address: ServiceAddress,
    session_id: String,
    server_version: String,
    options: ConnectOptions,
}

impl RemoteScanner {
    /// Connect to a scanner service and open a session
    pub async fn connect(
        address: &ServiceAddress,
        options: ConnectOptions,
    ) -> std::result::Result<Self, ConnectError> {
        let target = address.authority();
        debug!("Connecting to scanner service at {}", target);

        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| ConnectError::Timeout {
                request: "connect",
                after: options.connect_timeout,
            })?
            .map_err(|e| ConnectError::ConnectionFailed {
                address: target.clone(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;

        let mut conn = Framed::new(stream, ClientCodec::new(options.max_message_size));

        let hello = Request::Hello {
            service: address.service().to_string(),
            protocol_version: PROTOCOL_VERSION,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        };

        let reply = tokio::time::timeout(options.request_timeout, async {
            conn.send(hello).await?;
            conn.next()
                .await
                .transpose()?
                .ok_or(ConnectError::ConnectionClosed)
        })
        .await
        .map_err(|_| ConnectError::Timeout {
            request: "hello",
            after: options.request_timeout,
        })??;

        let (session_id, server_version) = match reply {
            Response::Hello {
                session_id,
                server_version,
            } => (session_id, server_version),
            Response::Error(e) => {
                return Err(ConnectError::HandshakeFailed {
                    service: address.service().to_string(),
                    reason: e.to_string(),
                })
            }
            other => {
                return Err(ConnectError::UnexpectedResponse {
                    request: "hello",
                    got: other.name(),
                })
            }
        };

        info!(
            "Opened scanner session {} with {} (service v{})",
            session_id, address, server_version
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            abandoned: Arc::new(std::sync::Mutex::new(Vec::new())),
            address: address.clone(),
            session_id,
            server_version,
            options,
        })
    }

    /// Parse `uri` and connect
    pub async fn connect_uri(
        uri: &str,
        options: ConnectOptions,
    ) -> std::result::Result<Self, ConnectError> {
        let address = ServiceAddress::parse(uri)?;
        Self::connect(&address, options).await
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn address(&self) -> &ServiceAddress {
        &self.address
    }

    /// Check whether the underlying connection is still usable
    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Tear the session down. The service releases every handle it issued.
    pub async fn close(&self) {
        if let Some(mut conn) = self.conn.lock().await.take() {
            if let Err(e) = conn.close().await {
                debug!("Error closing scanner connection: {}", e);
            }
            info!("Closed scanner session {}", self.session_id);
        }
    }

    /// Send one request and wait for its response.
    ///
    /// Transport failures and timeouts drop the connection: a late response
    /// would otherwise be paired with the next request.
    async fn call(&self, request: Request) -> std::result::Result<Response, ConnectError> {
        let name = request.name();
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(ConnectError::SessionClosed)?;
        let abandoned = std::mem::take(
            &mut *self
                .abandoned
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let exchange = async {
            for stream in abandoned {
                conn.send(Request::PrepareRelease { stream }).await?;
                conn.next()
                    .await
                    .transpose()?
                    .ok_or(ConnectError::ConnectionClosed)?;
                debug!("Released abandoned prepare stream {}", stream);
            }

            conn.send(request).await?;
            conn.next()
                .await
                .transpose()?
                .ok_or(ConnectError::ConnectionClosed)
        };

        let outcome = tokio::time::timeout(self.options.request_timeout, exchange).await;
        match outcome {
            Ok(Ok(Response::Error(e))) => Err(ConnectError::Remote(e)),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                warn!("Scanner session {} lost during {}: {}", self.session_id, name, e);
                *guard = None;
                Err(e)
            }
            Err(_) => {
                warn!(
                    "Scanner session {} timed out during {}",
                    self.session_id, name
                );
                *guard = None;
                Err(ConnectError::Timeout {
                    request: name,
                    after: self.options.request_timeout,
                })
            }
        }
    }
}

fn unexpected(request: &'static str, got: &Response) -> ScannerError {
    ConnectError::UnexpectedResponse {
        request,
        got: got.name(),
    }
    .into()
}

#[async_trait]
impl ScannerSession for RemoteScanner {
    async fn capture(&self, with_texture: bool) -> Result<Mesh> {
        match self.call(Request::Capture { with_texture }).await? {
            Response::Mesh(mesh) => Ok(mesh),
            other => Err(unexpected("capture", &other)),
        }
    }

    async fn capture_stl(&self) -> Result<Vec<u8>> {
        match self.call(Request::CaptureStl).await? {
            Response::Bytes(bytes) => Ok(bytes),
            other => Err(unexpected("capture_stl", &other)),
        }
    }

    async fn capture_deferred(&self, with_texture: bool) -> Result<CaptureHandle> {
        match self.call(Request::CaptureDeferred { with_texture }).await? {
            Response::Handle(handle) => {
                debug!("Deferred capture issued handle {}", handle);
                Ok(handle)
            }
            other => Err(unexpected("capture_deferred", &other)),
        }
    }

    async fn deferred_capture_prepare(
        &self,
        handles: Vec<CaptureHandle>,
        mode: PrepareMode,
    ) -> Result<Box<dyn PrepareStream>> {
        let count = handles.len();
        match self
            .call(Request::DeferredCapturePrepare { handles, mode })
            .await?
        {
            Response::PrepareStarted { stream } => {
                debug!(
                    "Prepare stream {} opened for {} handles ({:?})",
                    stream, count, mode
                );
                Ok(Box::new(RemotePrepareStream {
                    scanner: self.clone(),
                    stream,
                    state: RemoteStreamState::Open,
                }))
            }
            other => Err(unexpected("deferred_capture_prepare", &other)),
        }
    }

    async fn get_deferred_capture(&self, handle: CaptureHandle) -> Result<Mesh> {
        match self.call(Request::GetDeferredCapture { handle }).await? {
            Response::Mesh(mesh) => Ok(mesh),
            other => Err(unexpected("get_deferred_capture", &other)),
        }
    }

    async fn get_deferred_capture_stl(&self, handle: CaptureHandle) -> Result<Vec<u8>> {
        match self.call(Request::GetDeferredCaptureStl { handle }).await? {
            Response::Bytes(bytes) => Ok(bytes),
            other => Err(unexpected("get_deferred_capture_stl", &other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteStreamState {
    Open,
    Exhausted,
    Aborted,
}

/// Client side of a remote prepare stream. Each `next` is one round trip.
///
/// Dropping a stream that is still open asks the service to release it
/// along with the next call on the session.
pub struct RemotePrepareStream {
    scanner: RemoteScanner,
    stream: StreamId,
    state: RemoteStreamState,
}

impl RemotePrepareStream {
    async fn control(&self, request: Request) -> Result<()> {
        let name = request.name();
        match self.scanner.call(request).await? {
            Response::Done => Ok(()),
            other => Err(unexpected(name, &other)),
        }
    }
}

#[async_trait]
impl PrepareStream for RemotePrepareStream {
    async fn next(&mut self) -> Result<Option<PrepareStatus>> {
        match self.state {
            RemoteStreamState::Exhausted => return Ok(None),
            RemoteStreamState::Aborted => return Err(ScannerError::Aborted),
            RemoteStreamState::Open => {}
        }

        match self
            .scanner
            .call(Request::PrepareNext {
                stream: self.stream,
            })
            .await?
        {
            Response::PrepareStatus(Some(status)) => Ok(Some(status)),
            Response::PrepareStatus(None) => {
                self.state = RemoteStreamState::Exhausted;
                Ok(None)
            }
            other => Err(unexpected("prepare_next", &other)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.state != RemoteStreamState::Open {
            return Ok(());
        }
        self.control(Request::PrepareClose {
            stream: self.stream,
        })
        .await
    }

    async fn abort(&mut self) -> Result<()> {
        if self.state == RemoteStreamState::Open {
            self.control(Request::PrepareAbort {
                stream: self.stream,
            })
            .await?;
        }
        // the service drops aborted streams
        self.state = RemoteStreamState::Aborted;
        Ok(())
    }
}

impl Drop for RemotePrepareStream {
    fn drop(&mut self) {
        if self.state == RemoteStreamState::Open {
            self.scanner
                .abandoned
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(self.stream);
        }
    }
}
