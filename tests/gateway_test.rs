//! Gateway clients against local WebSocket servers.

use btprint_gateway::gateway::{
    DuplexClient, EventBusClient, GatewayClient, GatewayError, GatewayEvent, SessionPhase,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(5);

type ServerSocket = WebSocketStream<TcpStream>;

async fn next_event(rx: &mut mpsc::Receiver<GatewayEvent>) -> GatewayEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for gateway event")
        .expect("event channel closed")
}

async fn expect_phase(rx: &mut mpsc::Receiver<GatewayEvent>, phase: SessionPhase) {
    assert_eq!(next_event(rx).await, GatewayEvent::PhaseChanged(phase));
}

/// Accept one WebSocket connection, reporting the request URI.
async fn accept(listener: &TcpListener) -> (ServerSocket, String) {
    let (stream, _) = listener.accept().await.unwrap();
    let (uri_tx, uri_rx) = oneshot::channel();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let _ = uri_tx.send(request.uri().to_string());
        Ok(response)
    };
    let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();
    (ws, uri_rx.await.unwrap())
}

async fn listen() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Next text frame from the client; `None` once the client closes.
async fn recv_text(ws: &mut ServerSocket) -> Option<String> {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next()).await.ok()??;
        match msg {
            Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// Wait for the client's close frame.
async fn recv_close(ws: &mut ServerSocket) -> Option<CloseFrame> {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next()).await.ok()??;
        match msg {
            Ok(Message::Close(frame)) => return frame,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

async fn send_text(ws: &mut ServerSocket, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn duplex_delivers_frames_and_closes_gracefully() {
    let (listener, addr) = listen().await;
    let (close_tx, close_rx) = oneshot::channel();
    let server = tokio::spawn(async move {
        let (mut ws, uri) = accept(&listener).await;
        send_text(&mut ws, "Order #1\nNasi goreng x2").await;
        let frame = recv_close(&mut ws).await;
        let _ = close_tx.send(frame);
        uri
    });

    let (tx, mut rx) = mpsc::channel(16);
    let client = DuplexClient::new(tx);
    client.connect(&format!("ws://{}/", addr), "42").await.unwrap();

    expect_phase(&mut rx, SessionPhase::Connecting).await;
    expect_phase(&mut rx, SessionPhase::Ready).await;
    assert_eq!(
        next_event(&mut rx).await,
        GatewayEvent::PayloadReceived("Order #1\nNasi goreng x2".into())
    );

    client.disconnect().await;
    expect_phase(&mut rx, SessionPhase::Closed("User disconnected".into())).await;
    assert_eq!(client.phase(), SessionPhase::Closed("User disconnected".into()));

    let frame = close_rx.await.unwrap().expect("close frame");
    assert_eq!(frame.code, CloseCode::Normal);
    assert_eq!(frame.reason.as_str(), "User disconnected");
    assert_eq!(server.await.unwrap(), "/?id=42");

    // Disconnecting again is a no-op.
    client.disconnect().await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn duplex_reports_server_close() {
    let (listener, addr) = listen().await;
    let server = tokio::spawn(async move {
        let (mut ws, uri) = accept(&listener).await;
        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "maintenance".to_string().into(),
        }))
        .await
        .unwrap();
        uri
    });

    let (tx, mut rx) = mpsc::channel(16);
    let client = DuplexClient::new(tx);
    client
        .connect(&format!("ws://{}/print?shop=3", addr), "7")
        .await
        .unwrap();

    expect_phase(&mut rx, SessionPhase::Connecting).await;
    expect_phase(&mut rx, SessionPhase::Ready).await;
    expect_phase(&mut rx, SessionPhase::Closed("maintenance".into())).await;
    assert_eq!(server.await.unwrap(), "/print?shop=3&id=7");
}

#[tokio::test]
async fn duplex_connect_failure() {
    let (listener, addr) = listen().await;
    drop(listener);

    let (tx, mut rx) = mpsc::channel(16);
    let client = DuplexClient::new(tx);
    client.connect(&format!("ws://{}/", addr), "42").await.unwrap();

    expect_phase(&mut rx, SessionPhase::Connecting).await;
    match next_event(&mut rx).await {
        GatewayEvent::PhaseChanged(SessionPhase::Failed(reason)) => assert!(!reason.is_empty()),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn blank_fields_are_rejected_before_dialing() {
    let (tx, mut rx) = mpsc::channel(16);
    let client = EventBusClient::new(tx);

    assert_eq!(client.connect(" ", "42").await, Err(GatewayError::MissingAddress));
    assert_eq!(
        client.connect("ws://127.0.0.1:9/", "").await,
        Err(GatewayError::MissingCredential)
    );
    assert!(rx.try_recv().is_err());
    assert_eq!(client.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn new_connect_tears_down_previous_session() {
    let (first, first_addr) = listen().await;
    let (second, second_addr) = listen().await;

    let first_server = tokio::spawn(async move {
        let (mut ws, _) = accept(&first).await;
        recv_close(&mut ws).await.map(|f| f.code)
    });
    let second_server = tokio::spawn(async move {
        let (mut ws, _) = accept(&second).await;
        send_text(&mut ws, "from second").await;
        let _ = recv_close(&mut ws).await;
    });

    let (tx, mut rx) = mpsc::channel(16);
    let client = DuplexClient::new(tx);

    client.connect(&format!("ws://{}/", first_addr), "1").await.unwrap();
    expect_phase(&mut rx, SessionPhase::Connecting).await;
    expect_phase(&mut rx, SessionPhase::Ready).await;

    client.connect(&format!("ws://{}/", second_addr), "2").await.unwrap();
    // The old session finishes before the new one starts.
    expect_phase(&mut rx, SessionPhase::Closed("User disconnected".into())).await;
    expect_phase(&mut rx, SessionPhase::Connecting).await;
    expect_phase(&mut rx, SessionPhase::Ready).await;
    assert_eq!(
        next_event(&mut rx).await,
        GatewayEvent::PayloadReceived("from second".into())
    );

    assert_eq!(first_server.await.unwrap(), Some(CloseCode::Normal));

    client.disconnect().await;
    second_server.await.unwrap();
}

/// Engine.IO + Socket.IO namespace handshake, up to the identify event.
async fn socketio_handshake(ws: &mut ServerSocket) -> String {
    send_text(
        ws,
        r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
    )
    .await;
    assert_eq!(recv_text(ws).await.as_deref(), Some("40"));
    send_text(ws, r#"40{"sid":"n1"}"#).await;
    recv_text(ws).await.expect("identify event")
}

#[tokio::test]
async fn event_bus_identifies_then_delivers() {
    let (listener, addr) = listen().await;
    let server = tokio::spawn(async move {
        let (mut ws, uri) = accept(&listener).await;
        let identify = socketio_handshake(&mut ws).await;

        // Jobs before authorization must not reach the printer.
        send_text(&mut ws, r#"42["print_message",{"message":"too early"}]"#).await;

        send_text(&mut ws, "2").await;
        let pong = recv_text(&mut ws).await;

        send_text(&mut ws, r#"42["printer_connected",{"status":true}]"#).await;
        send_text(&mut ws, r#"42["print_message",{"message":""}]"#).await;
        send_text(&mut ws, r#"42["print_message",{"message":"Receipt"}]"#).await;
        send_text(&mut ws, r#"42["print_message",{"msg":1}]"#).await;

        let _ = recv_close(&mut ws).await;
        (uri, identify, pong)
    });

    let (tx, mut rx) = mpsc::channel(16);
    let client = EventBusClient::new(tx);
    client.connect(&format!("http://{}", addr), "42").await.unwrap();

    expect_phase(&mut rx, SessionPhase::Connecting).await;
    expect_phase(&mut rx, SessionPhase::Identifying).await;
    expect_phase(&mut rx, SessionPhase::Ready).await;
    assert_eq!(
        next_event(&mut rx).await,
        GatewayEvent::PayloadReceived("Receipt".into())
    );
    match next_event(&mut rx).await {
        GatewayEvent::Notice(text) => assert!(text.starts_with("Processing error")),
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(client.phase(), SessionPhase::Ready);

    client.disconnect().await;
    expect_phase(&mut rx, SessionPhase::Closed("User disconnected".into())).await;

    let (uri, identify, pong) = server.await.unwrap();
    assert_eq!(uri, "/socket.io/?EIO=4&transport=websocket");
    assert_eq!(identify, r#"42["identify_printer",{"code":"42"}]"#);
    assert_eq!(pong.as_deref(), Some("3"));
}

#[tokio::test]
async fn event_bus_rejection_closes_transport() {
    let (listener, addr) = listen().await;
    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        socketio_handshake(&mut ws).await;
        send_text(&mut ws, r#"42["printer_connected",{"status":false,"error":"bad code"}]"#).await;
        recv_text(&mut ws).await
    });

    let (tx, mut rx) = mpsc::channel(16);
    let client = EventBusClient::new(tx);
    client.connect(&format!("ws://{}/", addr), "41").await.unwrap();

    expect_phase(&mut rx, SessionPhase::Connecting).await;
    expect_phase(&mut rx, SessionPhase::Identifying).await;
    expect_phase(&mut rx, SessionPhase::Failed("bad code".into())).await;

    // The client tears the session down itself.
    assert_eq!(server.await.unwrap().as_deref(), Some("41"));
    assert_eq!(client.phase(), SessionPhase::Failed("bad code".into()));
}

#[tokio::test]
async fn event_bus_connect_error_fails_session() {
    let (listener, addr) = listen().await;
    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        send_text(&mut ws, r#"0{"sid":"s1","pingInterval":25000,"pingTimeout":20000}"#).await;
        assert_eq!(recv_text(&mut ws).await.as_deref(), Some("40"));
        send_text(&mut ws, r#"44{"message":"nope"}"#).await;
        recv_text(&mut ws).await
    });

    let (tx, mut rx) = mpsc::channel(16);
    let client = EventBusClient::new(tx);
    client.connect(&format!("ws://{}/", addr), "42").await.unwrap();

    expect_phase(&mut rx, SessionPhase::Connecting).await;
    expect_phase(&mut rx, SessionPhase::Failed("nope".into())).await;

    assert_eq!(server.await.unwrap().as_deref(), Some("41"));
    assert_eq!(client.phase(), SessionPhase::Failed("nope".into()));
}

#[tokio::test]
async fn event_bus_server_disconnect_closes_session() {
    let (listener, addr) = listen().await;
    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        socketio_handshake(&mut ws).await;
        send_text(&mut ws, r#"42["printer_connected",{"status":true}]"#).await;
        send_text(&mut ws, "41").await;
        // Nothing more is sent; the client just drops the socket.
        recv_text(&mut ws).await
    });

    let (tx, mut rx) = mpsc::channel(16);
    let client = EventBusClient::new(tx);
    client.connect(&format!("ws://{}/", addr), "42").await.unwrap();

    expect_phase(&mut rx, SessionPhase::Connecting).await;
    expect_phase(&mut rx, SessionPhase::Identifying).await;
    expect_phase(&mut rx, SessionPhase::Ready).await;
    expect_phase(&mut rx, SessionPhase::Closed("Server disconnected".into())).await;

    assert_eq!(server.await.unwrap(), None);
}

#[tokio::test]
async fn event_bus_silent_server_times_out() {
    let (listener, addr) = listen().await;
    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener).await;
        send_text(&mut ws, r#"0{"sid":"s1","pingInterval":200,"pingTimeout":200}"#).await;
        assert_eq!(recv_text(&mut ws).await.as_deref(), Some("40"));
        send_text(&mut ws, r#"40{"sid":"n1"}"#).await;
        let _ = recv_text(&mut ws).await;
        send_text(&mut ws, r#"42["printer_connected",{"status":true}]"#).await;
        // Stay silent: no pings.
        recv_text(&mut ws).await
    });

    let (tx, mut rx) = mpsc::channel(16);
    let client = EventBusClient::new(tx);
    client.connect(&format!("ws://{}/", addr), "42").await.unwrap();

    expect_phase(&mut rx, SessionPhase::Connecting).await;
    expect_phase(&mut rx, SessionPhase::Identifying).await;
    expect_phase(&mut rx, SessionPhase::Ready).await;
    expect_phase(&mut rx, SessionPhase::Failed("ping timeout".into())).await;

    assert_eq!(server.await.unwrap(), None);
}
