//! Wire-level tests against a running station

use futures::{SinkExt, StreamExt};
use scanlink_core_interface::{CaptureHandle, PrepareMode, ScannerError, ScannerErrorCode};
use scanlink_proto::{ClientCodec, Request, Response, PROTOCOL_VERSION};
use scanlink_station::{spawn_local, stl, ScannerService, StationConfig, SyntheticConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

type Conn = Framed<TcpStream, ClientCodec>;

async fn start_station() -> SocketAddr {
    start_station_with(StationConfig {
        workers: 2,
        heartbeat: Duration::from_millis(50),
        ..Default::default()
    })
    .await
}

async fn start_station_with(config: StationConfig) -> SocketAddr {
    let service = ScannerService::synthetic(
        SyntheticConfig {
            rings: 3,
            segments: 4,
            ..Default::default()
        },
        config,
    );
    let (addr, _task) = spawn_local(service).await.unwrap();
    addr
}

async fn call(conn: &mut Conn, request: Request) -> Response {
    conn.send(request).await.unwrap();
    conn.next().await.unwrap().unwrap()
}

async fn open(addr: SocketAddr, service: &str) -> (Conn, Response) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut conn = Framed::new(stream, ClientCodec::default());
    let reply = call(
        &mut conn,
        Request::Hello {
            service: service.to_string(),
            protocol_version: PROTOCOL_VERSION,
            client_version: "test".to_string(),
        },
    )
    .await;
    (conn, reply)
}

#[tokio::test]
async fn test_hello_for_wrong_service_is_rejected() {
    let addr = start_station().await;
    let (_conn, reply) = open(addr, "not-a-scanner").await;
    assert!(matches!(
        reply,
        Response::Error(ScannerError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn test_deferred_workflow_over_the_wire() {
    let addr = start_station().await;
    let (mut conn, reply) = open(addr, "scanner").await;
    assert!(matches!(reply, Response::Hello { .. }));

    let mut handles = Vec::new();
    for _ in 0..3 {
        match call(&mut conn, Request::CaptureDeferred { with_texture: false }).await {
            Response::Handle(h) => handles.push(h),
            other => panic!("unexpected {:?}", other),
        }
    }

    let stream = match call(
        &mut conn,
        Request::DeferredCapturePrepare {
            handles: handles.clone(),
            mode: PrepareMode::Stl,
        },
    )
    .await
    {
        Response::PrepareStarted { stream } => stream,
        other => panic!("unexpected {:?}", other),
    };

    let mut last = None;
    loop {
        match call(&mut conn, Request::PrepareNext { stream }).await {
            Response::PrepareStatus(Some(status)) => last = Some(status),
            Response::PrepareStatus(None) => break,
            other => panic!("unexpected {:?}", other),
        }
    }
    let last = last.unwrap();
    assert!(last.is_complete());
    assert_eq!(last.completed_count, 3);

    for handle in handles {
        match call(&mut conn, Request::GetDeferredCaptureStl { handle }).await {
            Response::Bytes(bytes) => assert_eq!(stl::triangle_count(&bytes), Some(2 * 3 * 4)),
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_handles_do_not_survive_their_connection() {
    let addr = start_station().await;

    let (mut first, _) = open(addr, "scanner").await;
    let handle = match call(&mut first, Request::CaptureDeferred { with_texture: false }).await {
        Response::Handle(h) => h,
        other => panic!("unexpected {:?}", other),
    };
    drop(first);

    let (mut second, _) = open(addr, "scanner").await;
    let reply = call(
        &mut second,
        Request::DeferredCapturePrepare {
            handles: vec![handle],
            mode: PrepareMode::Mesh,
        },
    )
    .await;
    assert_eq!(reply, Response::Error(ScannerError::UnknownHandle(handle)));
}

#[tokio::test]
async fn test_unknown_stream_and_handle_errors() {
    let addr = start_station().await;
    let (mut conn, _) = open(addr, "scanner").await;

    let reply = call(&mut conn, Request::PrepareNext { stream: 42 }).await;
    assert!(matches!(
        reply,
        Response::Error(ScannerError::InvalidOperation(_))
    ));

    let handle = CaptureHandle::from_raw(9_999);
    let reply = call(&mut conn, Request::GetDeferredCapture { handle }).await;
    assert_eq!(reply, Response::Error(ScannerError::UnknownHandle(handle)));

    // the session survives call-level errors
    let reply = call(&mut conn, Request::Capture { with_texture: true }).await;
    match reply {
        Response::Mesh(mesh) => assert_eq!(mesh.textures.len(), 1),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_oversized_response_fails_only_its_call() {
    // a textured mesh carries a 64x32 RGB image, well over this limit
    let addr = start_station_with(StationConfig {
        workers: 1,
        heartbeat: Duration::from_millis(50),
        max_frame_length: 4096,
        ..Default::default()
    })
    .await;
    let (mut conn, _) = open(addr, "scanner").await;

    let handle = match call(&mut conn, Request::CaptureDeferred { with_texture: false }).await {
        Response::Handle(h) => h,
        other => panic!("unexpected {:?}", other),
    };

    let reply = call(&mut conn, Request::Capture { with_texture: true }).await;
    assert!(matches!(
        reply,
        Response::Error(ScannerError::Scanner {
            code: ScannerErrorCode::OperationFailed,
            ..
        })
    ));

    // the session and its outstanding handle are still there
    let stream = match call(
        &mut conn,
        Request::DeferredCapturePrepare {
            handles: vec![handle],
            mode: PrepareMode::Stl,
        },
    )
    .await
    {
        Response::PrepareStarted { stream } => stream,
        other => panic!("unexpected {:?}", other),
    };
    loop {
        match call(&mut conn, Request::PrepareNext { stream }).await {
            Response::PrepareStatus(Some(_)) => continue,
            Response::PrepareStatus(None) => break,
            other => panic!("unexpected {:?}", other),
        }
    }

    match call(&mut conn, Request::GetDeferredCaptureStl { handle }).await {
        Response::Bytes(bytes) => assert_eq!(stl::triangle_count(&bytes), Some(2 * 3 * 4)),
        other => panic!("unexpected {:?}", other),
    }
}
