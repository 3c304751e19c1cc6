//! Abstract type descriptors produced by the resolver.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-Schema base type of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Integer,
    Number,
    String,
    Boolean,
    Array,
    Object,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Integer => "integer",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Boolean => "boolean",
            Kind::Array => "array",
            Kind::Object => "object",
        }
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Kind::Array | Kind::Object)
    }
}

/// Render-side meaning of a type, independent of its JSON shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    #[default]
    Plain,
    Figure,
    Dataframe,
    Callable,
    Image,
    Video,
    Audio,
    File,
    Markdown,
    Html,
    Code,
}

impl Tag {
    pub fn is_media(&self) -> bool {
        matches!(self, Tag::Image | Tag::Video | Tag::Audio | Tag::File)
    }

    /// Name reported to the front end as the return type.
    pub fn wire_name(&self) -> Option<&'static str> {
        match self {
            Tag::Plain => None,
            Tag::Figure => Some("Figure"),
            Tag::Dataframe => Some("Dataframe"),
            Tag::Callable => Some("Callable"),
            Tag::Image => Some("Image"),
            Tag::Video => Some("Video"),
            Tag::Audio => Some("Audio"),
            Tag::File => Some("File"),
            Tag::Markdown => Some("Markdown"),
            Tag::Html => Some("HTML"),
            Tag::Code => Some("Code"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub kind: Kind,
    /// Resolved type name. Theme tables are keyed by it.
    pub type_name: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<Box<TypeDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<IndexMap<String, TypeDescriptor>>,
    /// Positional members of a tuple type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<TypeDescriptor>>,
    #[serde(default)]
    pub tag: Tag,
    /// Widget contributed by a host type, used when nothing else applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<String>,
    /// Set for generators: the function streams values of this descriptor.
    #[serde(default)]
    pub streaming: bool,
}

impl TypeDescriptor {
    pub fn new(kind: Kind, type_name: impl Into<String>) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
            optional: false,
            whitelist: None,
            element: None,
            fields: None,
            members: None,
            tag: Tag::Plain,
            widget: None,
            streaming: false,
        }
    }

    pub fn object() -> Self {
        Self::new(Kind::Object, "object")
    }

    pub fn array(element: Option<TypeDescriptor>) -> Self {
        let mut descriptor = Self::new(Kind::Array, "list");
        descriptor.element = element.map(Box::new);
        descriptor
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = tag;
        self
    }

    pub fn with_widget(mut self, widget: impl Into<String>) -> Self {
        self.widget = Some(widget.into());
        self
    }

    /// Depth of list nesting, `0` for non-containers.
    pub fn depth(&self) -> usize {
        match &self.element {
            Some(element) if self.kind == Kind::Array => 1 + element.depth(),
            _ => 0,
        }
    }
}
