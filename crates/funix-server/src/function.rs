//! The callable side of a registered function: arguments in, values out.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::FunctionError;
use crate::session::SessionHandle;

/// One marshaled argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Json(Value),
    /// Dereferenced upload content.
    Bytes(Bytes),
    /// A list of dereferenced uploads.
    List(Vec<ArgValue>),
    Frame(DataFrame),
}

impl ArgValue {
    /// JSON view of the value. Binary content is not representable.
    pub fn as_json(&self) -> Option<Value> {
        match self {
            ArgValue::Json(value) => Some(value.clone()),
            ArgValue::Frame(frame) => Some(frame.to_columns()),
            ArgValue::List(items) => items
                .iter()
                .map(ArgValue::as_json)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            ArgValue::Bytes(_) => None,
        }
    }
}

/// Keyword arguments for one invocation, in declared parameter order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Kwargs {
    values: IndexMap<String, ArgValue>,
}

impl Kwargs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ArgValue) {
        self.values.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, ArgValue::Json(value));
        self
    }

    pub fn value(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ArgValue> {
        self.values.shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Deserialize an argument. A missing argument deserializes from `null`,
    /// so `Option<T>` parameters need no special casing.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, FunctionError> {
        let value = match self.values.get(name) {
            None => Value::Null,
            Some(arg) => arg
                .as_json()
                .ok_or_else(|| FunctionError::bad_argument(name, "is binary content"))?,
        };
        serde_json::from_value(value).map_err(|e| FunctionError::bad_argument(name, e.to_string()))
    }

    pub fn bytes(&self, name: &str) -> Result<&Bytes, FunctionError> {
        match self.values.get(name) {
            Some(ArgValue::Bytes(bytes)) => Ok(bytes),
            _ => Err(FunctionError::bad_argument(name, "is not an uploaded file")),
        }
    }

    /// Uploaded files for a list argument. An empty or missing list yields
    /// no files.
    pub fn files(&self, name: &str) -> Result<Vec<&Bytes>, FunctionError> {
        match self.values.get(name) {
            None | Some(ArgValue::Json(Value::Null)) => Ok(Vec::new()),
            Some(ArgValue::Json(Value::Array(items))) if items.is_empty() => Ok(Vec::new()),
            Some(ArgValue::Bytes(bytes)) => Ok(vec![bytes]),
            Some(ArgValue::List(items)) => items
                .iter()
                .map(|item| match item {
                    ArgValue::Bytes(bytes) => Ok(bytes),
                    _ => Err(FunctionError::bad_argument(name, "contains a non-file entry")),
                })
                .collect(),
            _ => Err(FunctionError::bad_argument(name, "is not a list of uploaded files")),
        }
    }

    pub fn frame(&self, name: &str) -> Result<&DataFrame, FunctionError> {
        match self.values.get(name) {
            Some(ArgValue::Frame(frame)) => Ok(frame),
            _ => Err(FunctionError::bad_argument(name, "is not a dataframe")),
        }
    }

    /// JSON view of every argument, skipping binary content.
    pub fn to_json(&self) -> Map<String, Value> {
        self.values
            .iter()
            .filter_map(|(name, value)| value.as_json().map(|v| (name.clone(), v)))
            .collect()
    }
}

/// Column-oriented table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataFrame {
    columns: IndexMap<String, Vec<Value>>,
}

impl DataFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.columns.insert(name.into(), values);
        self
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Build from `{"col": [..], ...}`.
    pub fn from_columns(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let columns = object
            .iter()
            .map(|(name, values)| Some((name.clone(), values.as_array()?.clone())))
            .collect::<Option<IndexMap<_, _>>>()?;
        Some(Self { columns })
    }

    pub fn rows(&self) -> usize {
        self.columns.values().map(Vec::len).max().unwrap_or(0)
    }

    /// Ragged columns cannot be turned into records.
    pub fn is_rectangular(&self) -> bool {
        let rows = self.rows();
        self.columns.values().all(|c| c.len() == rows)
    }

    pub fn to_columns(&self) -> Value {
        Value::Object(
            self.columns
                .iter()
                .map(|(name, values)| (name.clone(), Value::Array(values.clone())))
                .collect(),
        )
    }

    pub fn to_records(&self) -> Vec<Value> {
        (0..self.rows())
            .map(|row| {
                Value::Object(
                    self.columns
                        .iter()
                        .map(|(name, values)| {
                            (name.clone(), values.get(row).cloned().unwrap_or(Value::Null))
                        })
                        .collect(),
                )
            })
            .collect()
    }
}

/// A plotting figure produced by a user function.
pub trait Figure: Send + Sync + fmt::Debug {
    /// Interactive, embeddable representation.
    fn to_embed(&self) -> anyhow::Result<Value>;

    /// Flattened PNG.
    fn to_png(&self) -> anyhow::Result<Bytes>;
}

/// Figure with a precomputed embed spec and, optionally, a raster form.
#[derive(Debug, Clone)]
pub struct StaticFigure {
    pub spec: Value,
    pub png: Option<Bytes>,
}

impl StaticFigure {
    pub fn new(spec: Value) -> Self {
        Self { spec, png: None }
    }

    pub fn with_png(mut self, png: impl Into<Bytes>) -> Self {
        self.png = Some(png.into());
        self
    }
}

impl Figure for StaticFigure {
    fn to_embed(&self) -> anyhow::Result<Value> {
        Ok(self.spec.clone())
    }

    fn to_png(&self) -> anyhow::Result<Bytes> {
        self.png
            .clone()
            .ok_or_else(|| anyhow::anyhow!("figure has no raster form"))
    }
}

/// Which function a returned callable points at.
#[derive(Clone)]
pub enum Target {
    /// The same `Arc` that was registered.
    Function(Arc<dyn Callable>),
    Path(String),
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Function(callable) => {
                write!(f, "Function({:p})", Arc::as_ptr(callable) as *const ())
            }
            Target::Path(path) => f.debug_tuple("Path").field(path).finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Value(Value),
    /// Taken from the caller's locals at render time.
    Local(String),
}

/// A partially applied call to another registered function.
#[derive(Debug, Clone)]
pub struct CallTarget {
    pub target: Target,
    pub bindings: Vec<(String, Binding)>,
}

impl CallTarget {
    pub fn function(callable: &Arc<dyn Callable>) -> Self {
        Self {
            target: Target::Function(Arc::clone(callable)),
            bindings: Vec::new(),
        }
    }

    pub fn path(path: impl Into<String>) -> Self {
        Self {
            target: Target::Path(path.into()),
            bindings: Vec::new(),
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bindings.push((name.into(), Binding::Value(value)));
        self
    }

    pub fn bind_local(mut self, name: impl Into<String>, local: impl Into<String>) -> Self {
        self.bindings.push((name.into(), Binding::Local(local.into())));
        self
    }
}

/// A raw return value, before rendering.
#[derive(Debug, Clone)]
pub enum ReturnValue {
    Json(Value),
    Figure(Arc<dyn Figure>),
    Frame(DataFrame),
    Call(CallTarget),
    Media { bytes: Bytes, mime: String },
    /// Several outputs, rendered positionally.
    Tuple(Vec<ReturnValue>),
}

impl ReturnValue {
    pub fn media(bytes: impl Into<Bytes>, mime: impl Into<String>) -> Self {
        Self::Media {
            bytes: bytes.into(),
            mime: mime.into(),
        }
    }

    pub fn figure(figure: impl Figure + 'static) -> Self {
        Self::Figure(Arc::new(figure))
    }

    /// Best-effort JSON form, used when rendering fails.
    pub fn raw_json(&self) -> Option<Value> {
        match self {
            ReturnValue::Json(value) => Some(value.clone()),
            ReturnValue::Frame(frame) => Some(frame.to_columns()),
            ReturnValue::Figure(figure) => figure.to_embed().ok(),
            ReturnValue::Tuple(items) => Some(Value::Array(
                items.iter().map(|i| i.raw_json().unwrap_or(Value::Null)).collect(),
            )),
            ReturnValue::Call(_) | ReturnValue::Media { .. } => None,
        }
    }
}

impl From<Value> for ReturnValue {
    fn from(value: Value) -> Self {
        ReturnValue::Json(value)
    }
}

pub type ItemStream = Box<dyn Iterator<Item = Result<ReturnValue, FunctionError>> + Send>;

pub enum Output {
    Value(ReturnValue),
    /// Values yielded one at a time; pulled only as fast as they are sent.
    Stream(ItemStream),
}

impl Output {
    pub fn json(value: Value) -> Self {
        Output::Value(ReturnValue::Json(value))
    }

    pub fn stream<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Result<ReturnValue, FunctionError>>,
        I::IntoIter: Send + 'static,
    {
        Output::Stream(Box::new(items.into_iter()))
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Output::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Value> for Output {
    fn from(value: Value) -> Self {
        Output::json(value)
    }
}

impl From<ReturnValue> for Output {
    fn from(value: ReturnValue) -> Self {
        Output::Value(value)
    }
}

/// Execution context of one call: frame locals plus session state.
#[derive(Debug, Default)]
pub struct CallContext {
    locals: Map<String, Value>,
    session: Option<SessionHandle>,
}

impl CallContext {
    pub fn new(session: Option<SessionHandle>) -> Self {
        Self {
            locals: Map::new(),
            session,
        }
    }

    /// Seed locals with the call's own arguments.
    pub fn with_locals(mut self, locals: Map<String, Value>) -> Self {
        self.locals = locals;
        self
    }

    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        self.locals.insert(name.into(), value);
    }

    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals.get(name)
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        let session = self.session.as_ref()?;
        session.lock().globals.get(name).cloned()
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        if let Some(session) = &self.session {
            session.lock().globals.insert(name.into(), value);
        }
    }
}

/// A registered function body.
pub trait Callable: Send + Sync + 'static {
    fn call(&self, args: Kwargs, ctx: &mut CallContext) -> Result<Output, FunctionError>;
}

impl<F> Callable for F
where
    F: Fn(Kwargs, &mut CallContext) -> Result<Output, FunctionError> + Send + Sync + 'static,
{
    fn call(&self, args: Kwargs, ctx: &mut CallContext) -> Result<Output, FunctionError> {
        self(args, ctx)
    }
}

/// Address used to match a returned callable to its registration.
pub fn identity(callable: &Arc<dyn Callable>) -> usize {
    Arc::as_ptr(callable) as *const () as usize
}
