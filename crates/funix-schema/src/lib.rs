//! Schema synthesis for Funix functions.
//!
//! A function is described by its [`Signature`] and a [`FunctionConfig`].
//! [`SchemaBuilder`] resolves every annotation to a [`TypeDescriptor`],
//! synthesizes widgets against a [`Theme`] and returns an immutable
//! [`FunctionSchema`] that the server both serves and marshals against.

pub mod annotation;
pub mod builder;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod resolver;
pub mod schema;
pub mod theme;
pub mod widget;

pub use annotation::{Annotation, Field, Param, Signature};
pub use builder::{SchemaBuilder, function_id};
pub use config::{
    ArgTarget, ArgumentConfig, Destination, FunctionConfig, LayoutItem, LimitSource, PreFill,
    RateLimit, Role, Selector, VisibilityRule,
};
pub use descriptor::{Kind, Tag, TypeDescriptor};
pub use error::{SchemaError, SchemaResult};
pub use resolver::{Recognizer, Resolver};
pub use schema::{ArgumentPlan, ArgumentSpec, FunctionSchema, Property, ReturnDescriptor, UiTree};
pub use theme::{DEFAULT_THEME, Theme, ThemeSet};
pub use widget::{UiNode, Widget, WidgetChoice};
