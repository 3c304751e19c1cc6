mod common;

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use funix_server::{AppState, Registry, app_router, demo};
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

async fn spawn_app() -> SocketAddr {
    let mut registry = Registry::default();
    demo::register(&mut registry).unwrap();
    let dispatcher = common::builder(registry).build().unwrap();
    let app = app_router(AppState::new(dispatcher));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    addr
}

/// Text frames until the server closes.
async fn frames(addr: SocketAddr, function: &str, request: Value) -> Vec<Value> {
    let (mut socket, _) = connect_async(format!("ws://{addr}/call/{function}")).await.unwrap();
    socket
        .send(WsMessage::Text(request.to_string().into()))
        .await
        .unwrap();

    let mut frames = Vec::new();
    while let Some(message) = socket.next().await {
        match message.unwrap() {
            WsMessage::Text(text) => frames.push(serde_json::from_str(text.as_str()).unwrap()),
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
    frames
}

#[tokio::test]
async fn iterator_results_stream_frame_by_frame() {
    let addr = spawn_app().await;
    let frames = frames(addr, "countdown", json!({"n": 3})).await;
    assert_eq!(frames, vec![json!("3"), json!("2"), json!("1"), json!("liftoff")]);
}

#[tokio::test]
async fn over_http_a_stream_returns_its_last_value() {
    let addr = spawn_app().await;
    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/call/countdown"))
        .json(&json!({"n": 2}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, "liftoff");
}

#[tokio::test]
async fn stream_errors_arrive_as_an_envelope_frame() {
    let addr = spawn_app().await;
    let frames = frames(addr, "countdown", json!({"n": -1})).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["error_type"], "function");
}

#[tokio::test]
async fn non_streaming_functions_answer_once_over_websocket() {
    let addr = spawn_app().await;
    let frames = frames(addr, "vector_add", json!({"a": [1], "b": [2]})).await;
    assert_eq!(frames, vec![json!({"result": [3]})]);
}
