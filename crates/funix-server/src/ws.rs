//! Streaming calls over WebSocket.
//!
//! The client sends one JSON request frame. The server answers with one
//! frame per yielded value (or a single error envelope) and then closes.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum_extra::extract::cookie::CookieJar;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::dispatch::StreamSink;
use crate::error::{DispatchError, MarshalError};
use crate::http::{AppState, ClientAddr, session};
use crate::limiter::Subject;

pub async fn call_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(function): Path<String>,
    ClientAddr(address): ClientAddr,
    jar: CookieJar,
) -> impl IntoResponse {
    let (jar, session) = session(jar);
    let caller = Subject::new(address, session);
    (jar, ws.on_upgrade(move |socket| handle_socket(socket, state, function, caller)))
}

struct WsSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl StreamSink for WsSink {
    async fn send(&mut self, frame: Value) -> bool {
        self.0.send(Message::Text(frame.to_string().into())).await.is_ok()
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, function: String, caller: Subject) {
    info!(%function, "websocket connected");
    let (sender, mut receiver) = socket.split();
    let mut sink = WsSink(sender);

    let request = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                break serde_json::from_str::<Value>(text.as_str())
                    .map_err(|_| DispatchError::from(MarshalError::NotAnObject));
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!(%function, "websocket closed before a request");
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(%function, error = %e, "websocket receive failed");
                return;
            }
        }
    };

    let outcome = match request {
        Ok(request) => state.dispatcher.stream(&function, request, &caller, &mut sink).await,
        Err(e) => Err(e),
    };
    match outcome {
        Ok(sent) => debug!(%function, sent, "stream finished"),
        Err(e) => {
            error!(%function, error = %e, kind = ?e.kind(), "stream failed");
            sink.send(e.envelope().to_value()).await;
        }
    }
    let _ = sink.0.send(Message::Close(None)).await;
}
