//! Serving side of Funix.
//!
//! A [`Registry`] holds every function with its schema. The [`Dispatcher`]
//! turns a JSON request into a call: rate limits and the secret gate first,
//! then [`marshal`](marshal::marshal), optional cell fan-out, the call itself
//! on the blocking pool, and finally rendering. [`http::app_router`]
//! exposes it over HTTP and WebSocket.

pub mod demo;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod files;
pub mod function;
pub mod http;
pub mod limiter;
pub mod marshal;
pub mod registry;
pub mod render;
pub mod session;
pub mod settings;
pub mod ws;

pub use dispatch::{Dispatcher, DispatcherBuilder, StreamSink};
pub use error::{
    BuildError, DispatchError, ErrorEnvelope, FailureKind, FetchError, FunctionError,
    MarshalError, RegistryError, RenderError,
};
pub use fetch::{Fetch, UploadFetcher};
pub use files::{FileStore, StoredFile};
pub use function::{
    ArgValue, Binding, CallContext, CallTarget, Callable, DataFrame, Figure, Kwargs, Output,
    ReturnValue, StaticFigure, Target,
};
pub use http::{AppState, app_router};
pub use limiter::{Clock, Limiter, ManualClock, Subject, SystemClock};
pub use registry::{PreFillLink, RegisteredFunction, Registry};
pub use render::Renderer;
pub use session::{SessionStore, SESSION_COOKIE};
pub use settings::{EngineSettings, Settings, get_configuration};

/// Dispatcher wired from engine settings.
pub fn dispatcher_from_settings(
    registry: Registry,
    engine: &EngineSettings,
) -> Result<Dispatcher, BuildError> {
    Dispatcher::builder(std::sync::Arc::new(registry))
        .figure_to_image(engine.figure_to_image)
        .secret(engine.secret.clone())
        .global_limits(engine.rate_limit.clone())
        .fetch_timeout(engine.fetch_timeout())
        .build()
}
