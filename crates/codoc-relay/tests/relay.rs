use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use codoc_relay::{AppState, MISSING_DOC_ID, router};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_relay(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, doc_id: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/relay/{doc_id}"))
        .await
        .unwrap();
    ws
}

/// The upgrade response can reach the client before the server side has
/// joined the room.
async fn wait_for_connections(state: &AppState, n: usize) {
    for _ in 0..200 {
        if state.rooms.connection_count() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {n} connections, have {}", state.rooms.connection_count());
}

async fn next_data(ws: &mut Client) -> Message {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        if msg.is_binary() || msg.is_text() || msg.is_close() {
            return msg;
        }
    }
}

#[tokio::test]
async fn forwards_frames_between_room_members_only() {
    let state = AppState::new();
    let addr = spawn_relay(state.clone()).await;

    let mut alice = connect(addr, "notes").await;
    let mut bob = connect(addr, "notes").await;
    let mut carol = connect(addr, "elsewhere").await;
    wait_for_connections(&state, 3).await;
    assert_eq!(state.rooms.room_count(), 2);

    alice
        .send(Message::Binary(vec![0u8, 1, 2, 3].into()))
        .await
        .unwrap();
    assert_eq!(next_data(&mut bob).await, Message::Binary(vec![0u8, 1, 2, 3].into()));

    bob.send(Message::Text("hello".into())).await.unwrap();
    assert_eq!(next_data(&mut alice).await, Message::Text("hello".into()));

    // Nothing leaks into the other room.
    let leaked = tokio::time::timeout(Duration::from_millis(100), carol.next()).await;
    assert!(leaked.is_err());

    alice.close(None).await.unwrap();
    wait_for_connections(&state, 2).await;
    bob.close(None).await.unwrap();
    wait_for_connections(&state, 1).await;
    assert_eq!(state.rooms.room_count(), 1);
}

#[tokio::test]
async fn missing_doc_id_is_closed_with_4000() {
    let addr = spawn_relay(AppState::new()).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/relay/")).await.unwrap();
    match next_data(&mut ws).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), MISSING_DOC_ID),
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn health_reports_rooms_and_connections() {
    let state = AppState::new();
    let (_peer, _rx) = state.rooms.join("doc");

    let response = router(state)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"status": "ok", "rooms": 1, "connections": 1})
    );
}
