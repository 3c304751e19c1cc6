//! Call-time error types and the wire envelope they collapse into.

use funix_schema::SchemaError;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to register `{function}`: {error}")]
    Schema {
        function: String,
        #[source]
        error: SchemaError,
    },

    #[error("`{function}` pre-fills `{argument}` from `{from}`, which is not registered")]
    UnknownPreFillSource {
        function: String,
        argument: String,
        from: String,
    },
}

/// Raised by user callables. `Panicked` is produced by the dispatcher.
#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("{0}")]
    Message(String),

    #[error("argument `{name}` {reason}")]
    BadArgument { name: String, reason: String },

    #[error("function panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FunctionError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub fn bad_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no stored file with key `{0}`")]
    NotStored(String),

    #[error("malformed data URI")]
    InvalidDataUri,

    #[error("unsupported upload reference `{0}`")]
    Unsupported(String),
}

/// Failure while assembling a [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("rate limit period `{0}` is not a valid number of seconds")]
    InvalidPeriod(f64),
}

#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("failed to fetch upload for `{argument}`: {error}")]
    Fetch {
        argument: String,
        #[source]
        error: FetchError,
    },

    #[error("cell argument `{0}` is missing")]
    MissingCell(String),

    #[error("cell argument `{0}` must be a list")]
    CellNotList(String),

    #[error("cell argument `{argument}` has {found} values, expected {expected}")]
    CellLengthMismatch {
        argument: String,
        expected: usize,
        found: usize,
    },

    #[error("frame argument `{argument}`: {reason}")]
    BadFrame { argument: String, reason: String },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("figure conversion failed: {0}")]
    Figure(String),

    #[error("dataframe result is malformed: {0}")]
    Frame(String),

    #[error("returned callable is not a registered function")]
    UnknownCallTarget,

    #[error("call binding refers to unknown local `{0}`")]
    MissingLocal(String),

    #[error("expected {expected} outputs, got {found}")]
    Arity { expected: usize, found: usize },

    #[error("failed to encode link arguments: {0}")]
    Encode(#[from] serde_urlencoded::ser::Error),
}

/// Stage that failed, as reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    #[serde(rename = "wrapper")]
    Wrapper,
    #[serde(rename = "function")]
    Function,
    #[serde(rename = "pre-anal")]
    PreAnal,
    #[serde(rename = "safe_checker")]
    SafeChecker,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("function `{0}` is not registered")]
    UnknownFunction(String),

    #[error("Rate limit exceeded. Please try again in {wait_secs} seconds.")]
    RateLimited { wait_secs: u64 },

    #[error("secret is missing or does not match")]
    SecretMismatch,

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    Function(#[from] FunctionError),

    #[error("{error}")]
    Render {
        #[source]
        error: RenderError,
        /// Best-effort JSON form of the value that failed to render.
        raw: Option<Value>,
    },

    #[error("task failed: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DispatchError::RateLimited { .. } => FailureKind::SafeChecker,
            DispatchError::Function(_) => FailureKind::Function,
            DispatchError::Render { .. } => FailureKind::PreAnal,
            DispatchError::UnknownFunction(_)
            | DispatchError::SecretMismatch
            | DispatchError::Marshal(_)
            | DispatchError::Internal(_) => FailureKind::Wrapper,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error_type: self.kind(),
            error_body: self.to_string(),
            raw: match self {
                DispatchError::Render { raw, .. } => raw.clone(),
                _ => None,
            },
        }
    }
}

/// `{"error_type": ..., "error_body": ...}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    pub error_type: FailureKind,
    pub error_body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl ErrorEnvelope {
    pub fn to_value(&self) -> Value {
        serde_json::json!(self)
    }
}
