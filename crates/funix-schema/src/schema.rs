//! The immutable, built-once record of one registered function.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::{Destination, LayoutItem, PreFill, RateLimit, Role};
use crate::descriptor::TypeDescriptor;
use crate::widget::UiNode;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArgumentSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub descriptor: TypeDescriptor,
    pub role: Role,
    /// Effective top-level widget.
    pub widget: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub examples: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<Vec<Value>>,
    pub custom_layout: bool,
}

/// One UI property: the synthesized node plus per-argument metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    #[serde(flatten)]
    pub node: UiNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub examples: Option<Vec<Value>>,
    #[serde(rename = "treat_as")]
    pub role: Role,
    #[serde(rename = "customLayout")]
    pub custom_layout: bool,
}

/// Arguments configured together under one widget, in declared order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetGroup {
    pub widget: String,
    pub members: Vec<String>,
}

/// Properties revealed while every predicate argument holds its constant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conditional {
    #[serde(rename = "if")]
    pub when: Predicate,
    #[serde(rename = "then")]
    pub reveal: Reveal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Predicate {
    pub properties: IndexMap<String, Const>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Const {
    #[serde(rename = "const")]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reveal {
    pub properties: IndexMap<String, Property>,
}

/// JSON-Schema-like tree served to the front end.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UiTree {
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Visible properties, in declared parameter order.
    pub properties: IndexMap<String, Property>,
    #[serde(rename = "allOf", skip_serializing_if = "Vec::is_empty")]
    pub all_of: Vec<Conditional>,
    #[serde(rename = "widget_groups", skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<WidgetGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "types", rename_all = "snake_case")]
pub enum ReturnDescriptor {
    None,
    Single(TypeDescriptor),
    /// Several independently rendered outputs.
    Tuple(Vec<TypeDescriptor>),
}

impl ReturnDescriptor {
    pub fn from_descriptor(descriptor: TypeDescriptor) -> Self {
        match descriptor.members.clone() {
            Some(members) => ReturnDescriptor::Tuple(members),
            None => ReturnDescriptor::Single(descriptor),
        }
    }

    /// Wire-level return type tag(s) for the front end.
    pub fn type_tag(&self) -> Value {
        let tag = |d: &TypeDescriptor| match d.tag.wire_name() {
            Some(name) => Value::from(name),
            None => Value::from(d.type_name.clone()),
        };
        match self {
            ReturnDescriptor::None => Value::Null,
            ReturnDescriptor::Single(d) => tag(d),
            ReturnDescriptor::Tuple(members) => members.iter().map(tag).collect(),
        }
    }
}

/// Call-time shaping of each argument, read by the marshaler.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ArgumentPlan {
    pub config: Vec<String>,
    pub columns: Vec<String>,
    pub cells: Vec<String>,
    /// Frame argument → column names submitted as sibling keys.
    pub frames: IndexMap<String, Vec<String>>,
    /// Arguments whose effective leaf widget is an upload widget.
    pub uploads: Vec<String>,
}

impl ArgumentPlan {
    pub fn has_cells(&self) -> bool {
        !self.cells.is_empty()
    }

    pub fn is_upload(&self, name: &str) -> bool {
        self.uploads.iter().any(|n| n == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSchema {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip)]
    pub arguments: Vec<ArgumentSpec>,
    #[serde(skip)]
    pub returns: ReturnDescriptor,
    #[serde(rename = "schema")]
    pub ui: UiTree,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub input_layout: Vec<Vec<LayoutItem>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output_layout: Vec<Vec<LayoutItem>>,
    pub destination: Destination,
    pub theme: String,
    #[serde(skip)]
    pub plan: ArgumentPlan,
    #[serde(rename = "websocket")]
    pub streaming: bool,
    #[serde(rename = "secret")]
    pub secret_gated: bool,
    #[serde(skip)]
    pub secret: Option<String>,
    #[serde(skip)]
    pub rate_limit: Vec<RateLimit>,
    #[serde(skip)]
    pub pre_fill: Vec<(String, PreFill)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub figure_to_image: Option<bool>,
    pub autorun: bool,
}

impl FunctionSchema {
    pub fn argument(&self, name: &str) -> Option<&ArgumentSpec> {
        self.arguments.iter().find(|a| a.name == name)
    }

    /// The document served by the schema endpoint.
    pub fn document(&self) -> Value {
        let mut doc =
            serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()));
        if let Value::Object(map) = &mut doc {
            map.insert("return_type".to_string(), self.returns.type_tag());
        }
        doc
    }
}
