//! HTTP surface: function listing, schemas, calls, secret checks and files.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, FromRequestParts, Path, State},
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use crate::dispatch::Dispatcher;
use crate::error::{DispatchError, MarshalError};
use crate::limiter::Subject;
use crate::session::{SESSION_COOKIE, SessionStore};
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// Take the caller address from `x-forwarded-for`. Only safe behind a
    /// proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            trust_forwarded_for: false,
        }
    }

    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/list", get(list))
        .route("/param/{function}", get(param))
        .route("/call/{function}", post(call).get(ws::call_ws))
        .route("/verify_secret/{function}", post(verify_secret))
        .route("/file/{key}", get(file))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Client address: the peer address, or the first `x-forwarded-for` hop
/// when the state trusts it.
pub struct ClientAddr(pub String);

impl FromRequestParts<AppState> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let forwarded = state
            .trust_forwarded_for
            .then(|| parts.headers.get("x-forwarded-for"))
            .flatten()
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let address = forwarded
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Self(address))
    }
}

/// The caller's session id, issuing a cookie when there is none.
pub fn session(jar: CookieJar) -> (CookieJar, String) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let id = cookie.value().to_string();
        return (jar, id);
    }
    let id = SessionStore::new_id();
    let cookie = Cookie::build((SESSION_COOKIE, id.clone())).path("/").http_only(true);
    (jar.add(cookie), id)
}

/// A dispatch failure in its wire form.
pub struct ApiError(pub DispatchError);

impl From<DispatchError> for ApiError {
    fn from(error: DispatchError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DispatchError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            DispatchError::UnknownFunction(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::OK,
        };
        (status, Json(self.0.envelope().to_value())).into_response()
    }
}

pub async fn list(State(state): State<AppState>) -> Json<Value> {
    let dispatcher = &state.dispatcher;
    let registry = dispatcher.registry();
    let list: Vec<Value> = registry
        .iter()
        .map(|f| {
            json!({
                "name": f.schema.name,
                "path": f.schema.path,
                "id": f.schema.id,
                "secret": dispatcher.is_gated(f),
            })
        })
        .collect();
    Json(json!({
        "list": list,
        "default": registry.default_function().map(|f| f.schema.id),
    }))
}

pub async fn param(
    State(state): State<AppState>,
    Path(function): Path<String>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Value>), ApiError> {
    let (jar, session) = session(jar);
    let dispatcher = &state.dispatcher;
    let function = dispatcher.resolve(&function)?;

    let mut document = function.schema.document();
    if let Value::Object(map) = &mut document {
        let style = dispatcher
            .registry()
            .themes()
            .get(Some(&function.schema.theme))
            .map(|theme| theme.style.clone())
            .unwrap_or_default();
        map.insert("style".to_string(), style);
        map.insert("secret".to_string(), Value::Bool(dispatcher.is_gated(function)));
        map.insert("pre_fill".to_string(), Value::Object(dispatcher.pre_fill(function, &session)));
    }
    Ok((jar, Json(document)))
}

/// Empty bodies count as `{}`; anything that is not JSON is rejected.
fn request_body(body: &[u8]) -> Result<Value, DispatchError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|_| MarshalError::NotAnObject.into())
}

pub async fn call(
    State(state): State<AppState>,
    Path(function): Path<String>,
    ClientAddr(address): ClientAddr,
    jar: CookieJar,
    body: Bytes,
) -> (CookieJar, Result<Json<Value>, ApiError>) {
    let (jar, session) = session(jar);
    let caller = Subject::new(address, session);
    let result = match request_body(&body) {
        Ok(request) => state.dispatcher.call(&function, request, &caller).await,
        Err(e) => Err(e),
    };
    let response = result.map(Json).map_err(|e| {
        error!(%function, error = %e, kind = ?e.kind(), "call failed");
        ApiError(e)
    });
    (jar, response)
}

#[derive(Debug, Deserialize)]
pub struct VerifySecret {
    #[serde(default)]
    pub secret: String,
}

pub async fn verify_secret(
    State(state): State<AppState>,
    Path(function): Path<String>,
    Json(body): Json<VerifySecret>,
) -> Result<Json<Value>, ApiError> {
    let success = state.dispatcher.verify_secret(&function, &body.secret)?;
    Ok(Json(json!({ "success": success })))
}

pub async fn file(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.dispatcher.files().get(&key) {
        Some(stored) => ([(header::CONTENT_TYPE, stored.mime)], stored.bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use funix_schema::{FunctionConfig, Signature};
    use tower::ServiceExt;

    use crate::error::FunctionError;
    use crate::function::{CallContext, Kwargs, Output};
    use crate::registry::Registry;

    fn state() -> AppState {
        let mut registry = Registry::default();
        registry
            .register_fn(
                &Signature::new("noop"),
                &FunctionConfig::new(),
                |_: Kwargs, _: &mut CallContext| -> Result<Output, FunctionError> {
                    Ok(Output::json(json!("done")))
                },
            )
            .unwrap();
        AppState::new(Dispatcher::builder(Arc::new(registry)).build().unwrap())
    }

    fn app() -> Router {
        app_router(state())
    }

    #[tokio::test]
    async fn session_cookie_is_issued_once() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/call/noop")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("funix_session="));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"\"done\"");

        let pair = cookie.split(';').next().unwrap().to_string();
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/call/noop")
                    .header(header::COOKIE, pair)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    async fn client_addr(state: &AppState, request: Request<()>) -> String {
        let (mut parts, _) = request.into_parts();
        let ClientAddr(address) = ClientAddr::from_request_parts(&mut parts, state).await.unwrap();
        address
    }

    fn forwarded() -> Request<()> {
        Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(())
            .unwrap()
    }

    #[tokio::test]
    async fn client_addr_uses_the_peer_unless_proxies_are_trusted() {
        let untrusted = state();
        let mut request = forwarded();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 7], 5000))));
        assert_eq!(client_addr(&untrusted, request).await, "192.0.2.7");
        assert_eq!(client_addr(&untrusted, forwarded()).await, "unknown");

        let trusted = state().trust_forwarded_for(true);
        assert_eq!(client_addr(&trusted, forwarded()).await, "203.0.113.9");
        let bare = Request::builder().body(()).unwrap();
        assert_eq!(client_addr(&trusted, bare).await, "unknown");
    }

    #[test]
    fn blank_bodies_are_empty_requests() {
        assert_eq!(request_body(b"").unwrap(), Value::Null);
        assert_eq!(request_body(b"{\"a\":1}").unwrap(), json!({"a": 1}));
        assert!(request_body(b"not json").is_err());
    }
}
