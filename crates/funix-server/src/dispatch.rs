//! Call orchestration.
//!
//! Every call runs `rate limit → secret → marshal → fan-out → invoke →
//! render`. Each stage returns a [`DispatchError`] tagged by stage; the
//! transport adapters turn it into the wire envelope.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use funix_schema::{RateLimit, Selector};
use secrecy::{ExposeSecret, Secret};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{BuildError, DispatchError, FunctionError, MarshalError};
use crate::fetch::{Fetch, UploadFetcher};
use crate::files::FileStore;
use crate::function::{CallContext, ItemStream, Kwargs, Output, ReturnValue};
use crate::limiter::{Clock, Limiter, Subject, SystemClock, wait_secs};
use crate::marshal::{SECRET_FIELD, fan_out, marshal};
use crate::registry::{RegisteredFunction, Registry};
use crate::render::Renderer;
use crate::session::{SessionHandle, SessionStore};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives rendered frames of a streaming call, one at a time.
#[async_trait]
pub trait StreamSink: Send {
    /// Returns `false` once the receiver is gone.
    async fn send(&mut self, frame: Value) -> bool;
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    sessions: Arc<SessionStore>,
    files: Arc<FileStore>,
    fetch: Arc<dyn Fetch>,
    renderer: Renderer,
    secret: Option<Secret<String>>,
    global_limiters: Vec<Limiter>,
    limiters: HashMap<Uuid, Vec<Limiter>>,
}

pub struct DispatcherBuilder {
    registry: Arc<Registry>,
    sessions: Option<Arc<SessionStore>>,
    files: Option<Arc<FileStore>>,
    fetch: Option<Arc<dyn Fetch>>,
    clock: Arc<dyn Clock>,
    figure_to_image: bool,
    secret: Option<Secret<String>>,
    global_limits: Vec<RateLimit>,
    fetch_timeout: Duration,
}

impl DispatcherBuilder {
    pub fn sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn files(mut self, files: Arc<FileStore>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn fetch(mut self, fetch: Arc<dyn Fetch>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn figure_to_image(mut self, enabled: bool) -> Self {
        self.figure_to_image = enabled;
        self
    }

    /// Secret for every function that does not define its own.
    pub fn secret(mut self, secret: Option<Secret<String>>) -> Self {
        self.secret = secret;
        self
    }

    /// Limits applied to every function on top of its own.
    pub fn global_limits(mut self, limits: Vec<RateLimit>) -> Self {
        self.global_limits = limits;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Fails on an unusable rate limit period or when the upload client
    /// cannot be created.
    pub fn build(self) -> Result<Dispatcher, BuildError> {
        let files = self.files.unwrap_or_default();
        let fetch: Arc<dyn Fetch> = match self.fetch {
            Some(fetch) => fetch,
            None => Arc::new(UploadFetcher::new(files.clone(), self.fetch_timeout)?),
        };
        let clock = self.clock;
        let global_limiters = self
            .global_limits
            .into_iter()
            .map(|limit| Limiter::new(limit, clock.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let limiters = self
            .registry
            .iter()
            .filter(|f| !f.schema.rate_limit.is_empty())
            .map(|f| -> Result<(Uuid, Vec<Limiter>), BuildError> {
                let limiters = f
                    .schema
                    .rate_limit
                    .iter()
                    .map(|limit| Limiter::new(*limit, clock.clone()))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((f.schema.id, limiters))
            })
            .collect::<Result<HashMap<_, _>, BuildError>>()?;

        Ok(Dispatcher {
            renderer: Renderer::new(files.clone(), self.figure_to_image),
            registry: self.registry,
            sessions: self.sessions.unwrap_or_default(),
            files,
            fetch,
            secret: self.secret,
            global_limiters,
            limiters,
        })
    }
}

impl Dispatcher {
    pub fn builder(registry: Arc<Registry>) -> DispatcherBuilder {
        DispatcherBuilder {
            registry,
            sessions: None,
            files: None,
            fetch: None,
            clock: Arc::new(SystemClock),
            figure_to_image: false,
            secret: None,
            global_limits: Vec::new(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn files(&self) -> &Arc<FileStore> {
        &self.files
    }

    pub fn resolve(&self, key: &str) -> Result<&RegisteredFunction, DispatchError> {
        self.registry
            .lookup(key)
            .ok_or_else(|| DispatchError::UnknownFunction(key.to_string()))
    }

    fn expected_secret<'a>(&'a self, function: &'a RegisteredFunction) -> Option<&'a str> {
        function
            .schema
            .secret
            .as_deref()
            .or_else(|| self.secret.as_ref().map(|s| s.expose_secret().as_str()))
    }

    pub fn is_gated(&self, function: &RegisteredFunction) -> bool {
        self.expected_secret(function).is_some()
    }

    /// Ungated functions accept any secret.
    pub fn secret_matches(&self, function: &RegisteredFunction, supplied: Option<&str>) -> bool {
        match self.expected_secret(function) {
            None => true,
            Some(expected) => supplied.is_some_and(|supplied| digests_match(supplied, expected)),
        }
    }

    fn check_rate(&self, function: Uuid, caller: &Subject) -> Result<(), DispatchError> {
        let own = self.limiters.get(&function).map(Vec::as_slice).unwrap_or_default();
        for limiter in self.global_limiters.iter().chain(own) {
            if let Err(wait) = limiter.check(caller) {
                let wait_secs = wait_secs(wait);
                debug!(%function, address = %caller.address, wait_secs, "rate limited");
                return Err(DispatchError::RateLimited { wait_secs });
            }
        }
        Ok(())
    }

    /// Rate limit, secret check, then marshaling.
    async fn admit(
        &self,
        function: &RegisteredFunction,
        request: Value,
        caller: &Subject,
    ) -> Result<Kwargs, DispatchError> {
        self.check_rate(function.schema.id, caller)?;

        let mut body = match request {
            Value::Object(body) => body,
            Value::Null => Map::new(),
            _ => return Err(MarshalError::NotAnObject.into()),
        };
        let supplied = body.remove(SECRET_FIELD);
        if !self.secret_matches(function, supplied.as_ref().and_then(Value::as_str)) {
            warn!(function = %function.schema.name, "secret check failed");
            return Err(DispatchError::SecretMismatch);
        }

        Ok(marshal(&function.schema, body, self.fetch.as_ref()).await?)
    }

    /// Single-shot call. Cell fan-out responds with `{"result": [...]}`;
    /// a streaming function responds with its last value.
    pub async fn call(
        &self,
        key: &str,
        request: Value,
        caller: &Subject,
    ) -> Result<Value, DispatchError> {
        let function = self.resolve(key)?;
        let kwargs = self.admit(function, request, caller).await?;
        self.execute(function, kwargs, caller).await
    }

    async fn execute(
        &self,
        function: &RegisteredFunction,
        kwargs: Kwargs,
        caller: &Subject,
    ) -> Result<Value, DispatchError> {
        let schema = &function.schema;
        let bundles = match schema.plan.has_cells() {
            true => fan_out(schema, &kwargs)?,
            false => vec![kwargs],
        };
        let session = self.sessions.handle(&caller.session);

        let mut results = Vec::with_capacity(bundles.len());
        for bundle in bundles {
            let (output, ctx) = invoke(function, bundle, session.clone()).await?;
            let value = match output {
                Output::Value(value) => value,
                Output::Stream(items) => drain(items).await?,
            };
            results.push(self.render(function, &ctx, value)?);
        }

        let response = match schema.plan.has_cells() {
            true => json!({ "result": results }),
            false => results.pop().unwrap_or(Value::Null),
        };
        self.sessions.record_result(&caller.session, schema.id, response.clone());
        Ok(response)
    }

    /// Streaming call. Each yielded value is rendered and sent before the
    /// next one is pulled. Returns the number of frames sent.
    pub async fn stream(
        &self,
        key: &str,
        request: Value,
        caller: &Subject,
        sink: &mut dyn StreamSink,
    ) -> Result<usize, DispatchError> {
        let function = self.resolve(key)?;
        let kwargs = self.admit(function, request, caller).await?;

        if !function.schema.streaming {
            let value = self.execute(function, kwargs, caller).await?;
            return Ok(usize::from(sink.send(value).await));
        }

        let session = self.sessions.handle(&caller.session);
        let (output, ctx) = invoke(function, kwargs, session).await?;
        let mut items = match output {
            Output::Value(value) => {
                let frame = self.render(function, &ctx, value)?;
                self.sessions.record_result(&caller.session, function.schema.id, frame.clone());
                return Ok(usize::from(sink.send(frame).await));
            }
            Output::Stream(items) => items,
        };

        let mut sent = 0;
        loop {
            let (rest, next) = pull(items).await?;
            items = rest;
            let value = match next {
                None => break,
                Some(value) => value?,
            };
            let frame = self.render(function, &ctx, value)?;
            self.sessions.record_result(&caller.session, function.schema.id, frame.clone());
            if !sink.send(frame).await {
                debug!(function = %function.schema.name, "stream receiver gone; stopping");
                break;
            }
            sent += 1;
        }
        Ok(sent)
    }

    fn render(
        &self,
        function: &RegisteredFunction,
        ctx: &CallContext,
        value: ReturnValue,
    ) -> Result<Value, DispatchError> {
        let raw = value.raw_json();
        let schema = &function.schema;
        self.renderer
            .render(&self.registry, ctx, value, &schema.returns, schema.figure_to_image)
            .map_err(|error| {
                error!(function = %schema.name, %error, "rendering failed");
                DispatchError::Render { error, raw }
            })
    }

    pub fn verify_secret(&self, key: &str, supplied: &str) -> Result<bool, DispatchError> {
        let function = self.resolve(key)?;
        Ok(self.secret_matches(function, Some(supplied)))
    }

    /// Initial values taken from the session's earlier results.
    pub fn pre_fill(&self, function: &RegisteredFunction, session: &str) -> Map<String, Value> {
        let mut values = Map::new();
        for link in &function.pre_fill {
            let Some(result) = self.sessions.last_result(session, link.source) else {
                continue;
            };
            let selected = match &link.selector {
                Selector::Result => Some(result),
                Selector::Index(i) => result.get(*i).cloned(),
                Selector::Key(key) => result.get(key.as_str()).cloned(),
            };
            if let Some(value) = selected {
                values.insert(link.argument.clone(), value);
            }
        }
        values
    }
}

/// Run the callable on the blocking pool. A panic becomes a function error.
async fn invoke(
    function: &RegisteredFunction,
    args: Kwargs,
    session: SessionHandle,
) -> Result<(Output, CallContext), DispatchError> {
    let callable = Arc::clone(&function.callable);
    let name = function.schema.name.clone();
    let locals = args.to_json();
    debug!(function = %name, "invoking");

    let joined = tokio::task::spawn_blocking(move || {
        let mut ctx = CallContext::new(Some(session)).with_locals(locals);
        let result = callable.call(args, &mut ctx);
        (result, ctx)
    })
    .await;

    match joined {
        Ok((Ok(output), ctx)) => Ok((output, ctx)),
        Ok((Err(error), _)) => {
            error!(function = %name, %error, "function failed");
            Err(error.into())
        }
        Err(join) => Err(join_error(join)),
    }
}

/// Pull one item on the blocking pool, handing the iterator back.
async fn pull(
    mut items: ItemStream,
) -> Result<(ItemStream, Option<Result<ReturnValue, FunctionError>>), DispatchError> {
    tokio::task::spawn_blocking(move || {
        let next = items.next();
        (items, next)
    })
    .await
    .map_err(join_error)
}

/// Exhaust a stream, keeping the last value.
async fn drain(mut items: ItemStream) -> Result<ReturnValue, DispatchError> {
    let mut last = ReturnValue::Json(Value::Null);
    loop {
        let (rest, next) = pull(items).await?;
        items = rest;
        match next {
            None => return Ok(last),
            Some(value) => last = value?,
        }
    }
}

fn join_error(join: tokio::task::JoinError) -> DispatchError {
    if !join.is_panic() {
        return DispatchError::Internal(join.to_string());
    }
    let payload = join.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    FunctionError::Panicked(message).into()
}

/// Equality over SHA-256 digests, without an early exit.
fn digests_match(supplied: &str, expected: &str) -> bool {
    let supplied = Sha256::digest(supplied.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    supplied
        .iter()
        .zip(expected.iter())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use funix_schema::{Annotation, FunctionConfig, Role, Signature};
    use pretty_assertions::assert_eq;

    use crate::error::FailureKind;
    use crate::limiter::ManualClock;

    fn caller() -> Subject {
        Subject::new("127.0.0.1", "session")
    }

    fn vector_add(args: Kwargs, _: &mut CallContext) -> Result<Output, FunctionError> {
        let (a, b, add): (i64, i64, bool) = (args.get("a")?, args.get("b")?, args.get("is_add")?);
        Ok(Output::json(json!(if add { a + b } else { a - b })))
    }

    fn dispatcher(registry: Registry) -> Dispatcher {
        Dispatcher::builder(Arc::new(registry)).build().unwrap()
    }

    #[tokio::test]
    async fn cell_fan_out_collects_results() {
        let mut registry = Registry::default();
        let signature = Signature::new("vector_add")
            .arg("a", Annotation::int())
            .arg("b", Annotation::int())
            .arg("is_add", Annotation::bool());
        registry
            .register_fn(
                &signature,
                &FunctionConfig::new().treat_as(["a", "b"], Role::Cell),
                vector_add,
            )
            .unwrap();
        let dispatcher = dispatcher(registry);

        let out = dispatcher
            .call("vector_add", json!({"a": [1, 2, 3], "b": [4, 5, 6], "is_add": true}), &caller())
            .await
            .unwrap();
        assert_eq!(out, json!({"result": [5, 7, 9]}));

        let err = dispatcher
            .call("vector_add", json!({"a": [1, 2], "b": [4]}), &caller())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Wrapper);
    }

    #[tokio::test]
    async fn secret_gate_runs_before_the_function() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut registry = Registry::default();
        registry
            .register_fn(
                &Signature::new("guarded"),
                &FunctionConfig::new().secret("hunter2"),
                move |_: Kwargs, _: &mut CallContext| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Output::json(json!("ok")))
                },
            )
            .unwrap();
        let dispatcher = dispatcher(registry);

        let err = dispatcher.call("guarded", json!({}), &caller()).await.unwrap_err();
        assert!(matches!(err, DispatchError::SecretMismatch));
        let err = dispatcher
            .call("guarded", json!({"__funix_secret": "wrong"}), &caller())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Wrapper);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let ok = dispatcher
            .call("guarded", json!({"__funix_secret": "hunter2"}), &caller())
            .await
            .unwrap();
        assert_eq!(ok, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn global_secret_and_limits_apply_everywhere() {
        let mut registry = Registry::default();
        registry
            .register_fn(
                &Signature::new("plain"),
                &FunctionConfig::new(),
                |_: Kwargs, _: &mut CallContext| Ok(Output::json(json!(1))),
            )
            .unwrap();
        let clock = Arc::new(ManualClock::new());
        let dispatcher = Dispatcher::builder(Arc::new(registry))
            .secret(Some(Secret::new("global".to_string())))
            .global_limits(vec![RateLimit::per_ip(1, 60.0)])
            .clock(clock.clone())
            .build()
            .unwrap();

        let plain = dispatcher.resolve("plain").unwrap();
        assert!(dispatcher.is_gated(plain));
        assert!(!dispatcher.verify_secret("plain", "nope").unwrap());
        assert!(dispatcher.verify_secret("plain", "global").unwrap());

        let body = json!({"__funix_secret": "global"});
        assert_eq!(dispatcher.call("plain", body.clone(), &caller()).await.unwrap(), 1);
        let limited = dispatcher.call("plain", body.clone(), &caller()).await.unwrap_err();
        assert!(matches!(limited, DispatchError::RateLimited { wait_secs: 60 }));
        clock.advance(Duration::from_secs(60));
        assert!(dispatcher.call("plain", body, &caller()).await.is_ok());
    }

    #[test]
    fn secrets_compare_by_digest() {
        assert!(digests_match("global", "global"));
        assert!(!digests_match("globa", "global"));
        assert!(!digests_match("", "global"));
    }

    #[test]
    fn unusable_rate_limit_periods_fail_the_build() {
        let mut registry = Registry::default();
        registry
            .register_fn(
                &Signature::new("limited"),
                &FunctionConfig::new().rate_limit(RateLimit::per_session(1, f64::NAN)),
                |_: Kwargs, _: &mut CallContext| Ok(Output::json(json!(1))),
            )
            .unwrap();
        let own = Dispatcher::builder(Arc::new(registry)).build();
        assert!(matches!(own, Err(BuildError::InvalidPeriod(_))));

        let global = Dispatcher::builder(Arc::new(Registry::default()))
            .global_limits(vec![RateLimit::per_ip(1, -5.0)])
            .build();
        assert!(matches!(global, Err(BuildError::InvalidPeriod(p)) if p == -5.0));
    }

    #[tokio::test]
    async fn panics_and_errors_are_function_failures() {
        let mut registry = Registry::default();
        registry
            .register_fn(
                &Signature::new("boom"),
                &FunctionConfig::new(),
                |_: Kwargs, _: &mut CallContext| -> Result<Output, FunctionError> {
                    panic!("kaboom")
                },
            )
            .unwrap();
        registry
            .register_fn(
                &Signature::new("fails"),
                &FunctionConfig::new(),
                |_: Kwargs, _: &mut CallContext| Err(FunctionError::msg("nope")),
            )
            .unwrap();
        let dispatcher = dispatcher(registry);

        let err = dispatcher.call("boom", json!({}), &caller()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Function);
        assert!(err.to_string().contains("kaboom"));
        let err = dispatcher.call("fails", json!({}), &caller()).await.unwrap_err();
        assert_eq!(err.envelope().error_body, "nope");
        let err = dispatcher.call("missing", json!({}), &caller()).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownFunction(_)));
    }

    struct Collect(Vec<Value>, usize);

    #[async_trait]
    impl StreamSink for Collect {
        async fn send(&mut self, frame: Value) -> bool {
            self.0.push(frame);
            self.0.len() < self.1
        }
    }

    #[tokio::test]
    async fn streams_send_each_item_and_stop_when_the_receiver_leaves() {
        let mut registry = Registry::default();
        let signature = Signature::new("count")
            .arg("n", Annotation::int())
            .returns(Annotation::iterator(Annotation::int()));
        let pulled = Arc::new(AtomicUsize::new(0));
        let seen = pulled.clone();
        registry
            .register_fn(
                &signature,
                &FunctionConfig::new(),
                move |args: Kwargs, _: &mut CallContext| {
                    let n: i64 = args.get("n")?;
                    let seen = seen.clone();
                    Ok(Output::stream((1..=n).map(move |i| {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok(ReturnValue::Json(json!(i)))
                    })))
                },
            )
            .unwrap();
        let dispatcher = dispatcher(registry);

        let mut sink = Collect(Vec::new(), usize::MAX);
        let sent = dispatcher.stream("count", json!({"n": 3}), &caller(), &mut sink).await.unwrap();
        assert_eq!(sent, 3);
        assert_eq!(sink.0, vec![json!(1), json!(2), json!(3)]);

        pulled.store(0, Ordering::SeqCst);
        let mut early = Collect(Vec::new(), 2);
        dispatcher.stream("count", json!({"n": 10}), &caller(), &mut early).await.unwrap();
        assert_eq!(early.0.len(), 2);
        assert_eq!(pulled.load(Ordering::SeqCst), 2);

        assert_eq!(dispatcher.call("count", json!({"n": 4}), &caller()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn pre_fill_reads_the_sessions_last_result() {
        let mut registry = Registry::default();
        registry
            .register_fn(
                &Signature::new("source"),
                &FunctionConfig::new(),
                |_: Kwargs, _: &mut CallContext| {
                    Ok(Output::json(json!({"name": "ada", "age": 36})))
                },
            )
            .unwrap();
        registry
            .register_fn(
                &Signature::new("target").arg("who", Annotation::str()),
                &FunctionConfig::new().pre_fill("who", "source", Selector::Key("name".into())),
                |_: Kwargs, _: &mut CallContext| Ok(Output::json(json!(null))),
            )
            .unwrap();
        let dispatcher = dispatcher(registry);
        let target = dispatcher.resolve("target").unwrap();

        assert!(dispatcher.pre_fill(target, "session").is_empty());
        dispatcher.call("source", json!({}), &caller()).await.unwrap();
        assert_eq!(dispatcher.pre_fill(target, "session")["who"], "ada");
        assert!(dispatcher.pre_fill(target, "other").is_empty());
    }
}
