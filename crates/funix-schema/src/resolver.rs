//! Annotation → [`TypeDescriptor`] resolution.
//!
//! Resolution walks a chain of [`Recognizer`]s in priority order. The host
//! type table comes first so registered types shadow the built-ins, and the
//! chain always ends with a catch-all that maps anything left to `object`.
//! Only malformed constructs (such as a union with two real arms) fail.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::annotation::{Annotation, Field};
use crate::descriptor::{Kind, Tag, TypeDescriptor};
use crate::error::{SchemaError, SchemaResult};

/// One step of the resolution chain.
///
/// Returns `None` when the annotation is not this recognizer's concern.
pub trait Recognizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn recognize(
        &self,
        annotation: &Annotation,
        resolver: &Resolver,
    ) -> Option<SchemaResult<TypeDescriptor>>;
}

pub struct Resolver {
    host_types: HashMap<String, TypeDescriptor>,
    chain: Vec<Box<dyn Recognizer>>,
}

impl Default for Resolver {
    fn default() -> Self {
        let mut resolver = Self::bare();
        for (identity, descriptor) in builtin_host_types() {
            resolver.host_types.insert(identity.to_string(), descriptor);
        }
        resolver
    }
}

impl Resolver {
    /// A resolver with the built-in chain but no host types registered.
    pub fn bare() -> Self {
        Self {
            host_types: HashMap::new(),
            chain: vec![
                Box::new(PrimitiveRecognizer),
                Box::new(UnionRecognizer),
                Box::new(LiteralRecognizer),
                Box::new(ListRecognizer),
                Box::new(MappingRecognizer),
                Box::new(RecordRecognizer),
                Box::new(FrameRecognizer),
                Box::new(TupleRecognizer),
                Box::new(IteratorRecognizer),
                Box::new(CallableRecognizer),
            ],
        }
    }

    /// Register a host type keyed by annotation identity.
    ///
    /// Checked before any built-in dispatch, so an identity such as `"int"`
    /// can be overridden.
    pub fn register_host_type(&mut self, identity: impl Into<String>, descriptor: TypeDescriptor) {
        self.host_types.insert(identity.into(), descriptor);
    }

    /// Insert a recognizer ahead of the built-in chain.
    pub fn push_recognizer(&mut self, recognizer: Box<dyn Recognizer>) {
        self.chain.insert(0, recognizer);
    }

    pub fn resolve(&self, annotation: &Annotation) -> SchemaResult<TypeDescriptor> {
        if let Some(identity) = annotation.identity() {
            if let Some(descriptor) = self.host_types.get(identity) {
                return Ok(descriptor.clone());
            }
        }

        for recognizer in &self.chain {
            if let Some(result) = recognizer.recognize(annotation, self) {
                trace!(recognizer = recognizer.name(), "annotation recognized");
                return result;
            }
        }

        debug!(?annotation, "no recognizer matched; falling back to object");
        Ok(opaque(annotation))
    }
}

fn opaque(annotation: &Annotation) -> TypeDescriptor {
    match annotation.identity() {
        Some(name) => TypeDescriptor::new(Kind::Object, name),
        None => TypeDescriptor::object(),
    }
}

fn builtin_host_types() -> Vec<(&'static str, TypeDescriptor)> {
    let media = |name: &str, tag: Tag, widget: &str| {
        TypeDescriptor::new(Kind::String, name)
            .with_tag(tag)
            .with_widget(widget)
    };
    vec![
        (
            "Password",
            TypeDescriptor::new(Kind::String, "Password").with_widget("password"),
        ),
        (
            "Figure",
            TypeDescriptor::new(Kind::Object, "Figure").with_tag(Tag::Figure),
        ),
        (
            "DataFrame",
            TypeDescriptor::new(Kind::Object, "DataFrame").with_tag(Tag::Dataframe),
        ),
        ("Image", media("Image", Tag::Image, "image")),
        ("Video", media("Video", Tag::Video, "video")),
        ("Audio", media("Audio", Tag::Audio, "audio")),
        ("File", media("File", Tag::File, "file")),
        ("bytes", media("bytes", Tag::File, "file")),
        (
            "Markdown",
            TypeDescriptor::new(Kind::String, "Markdown").with_tag(Tag::Markdown),
        ),
        (
            "HTML",
            TypeDescriptor::new(Kind::String, "HTML").with_tag(Tag::Html),
        ),
        (
            "Code",
            TypeDescriptor::new(Kind::String, "Code")
                .with_tag(Tag::Code)
                .with_widget("code"),
        ),
    ]
}

struct PrimitiveRecognizer;

impl Recognizer for PrimitiveRecognizer {
    fn name(&self) -> &'static str {
        "primitive"
    }

    fn recognize(
        &self,
        annotation: &Annotation,
        _: &Resolver,
    ) -> Option<SchemaResult<TypeDescriptor>> {
        let name = annotation.identity()?;
        let kind = primitive_kind(name)?;
        Some(Ok(TypeDescriptor::new(kind, name)))
    }
}

fn primitive_kind(name: &str) -> Option<Kind> {
    match name {
        "int" => Some(Kind::Integer),
        "float" => Some(Kind::Number),
        "str" => Some(Kind::String),
        "bool" => Some(Kind::Boolean),
        "list" => Some(Kind::Array),
        "dict" => Some(Kind::Object),
        _ => None,
    }
}

/// `Optional[X]` and `X | None`.
struct UnionRecognizer;

impl Recognizer for UnionRecognizer {
    fn name(&self) -> &'static str {
        "union"
    }

    fn recognize(
        &self,
        annotation: &Annotation,
        resolver: &Resolver,
    ) -> Option<SchemaResult<TypeDescriptor>> {
        let inner = match annotation {
            Annotation::Optional { inner } => inner.as_ref(),
            Annotation::Union { arms } => {
                let real: Vec<&Annotation> = arms
                    .iter()
                    .filter(|arm| !matches!(arm, Annotation::None))
                    .collect();
                if arms.len() > 2 || real.len() != 1 {
                    return Some(Err(SchemaError::AmbiguousUnion { arms: arms.len() }));
                }
                real[0]
            }
            _ => return None,
        };
        if matches!(inner, Annotation::None) {
            return Some(Err(SchemaError::MalformedAnnotation(
                "Optional[None]".to_string(),
            )));
        }

        Some(resolver.resolve(inner).map(|mut descriptor| {
            descriptor.optional = true;
            descriptor
        }))
    }
}

struct LiteralRecognizer;

impl Recognizer for LiteralRecognizer {
    fn name(&self) -> &'static str {
        "literal"
    }

    fn recognize(
        &self,
        annotation: &Annotation,
        _: &Resolver,
    ) -> Option<SchemaResult<TypeDescriptor>> {
        let Annotation::Literal { values } = annotation else {
            return None;
        };
        let Some(first) = values.first() else {
            return Some(Err(SchemaError::MalformedAnnotation(
                "Literal[] with no values".to_string(),
            )));
        };

        let (kind, type_name) = match first {
            Value::Bool(_) => (Kind::Boolean, "bool"),
            Value::Number(n) if n.is_i64() || n.is_u64() => (Kind::Integer, "int"),
            Value::Number(_) => (Kind::Number, "float"),
            Value::String(_) => (Kind::String, "str"),
            _ => (Kind::Object, "object"),
        };
        let mut descriptor = TypeDescriptor::new(kind, type_name);
        descriptor.whitelist = Some(values.clone());
        Some(Ok(descriptor))
    }
}

struct ListRecognizer;

impl Recognizer for ListRecognizer {
    fn name(&self) -> &'static str {
        "list"
    }

    fn recognize(
        &self,
        annotation: &Annotation,
        resolver: &Resolver,
    ) -> Option<SchemaResult<TypeDescriptor>> {
        let Annotation::List { element } = annotation else {
            return None;
        };
        let element = match element {
            Some(element) => match resolver.resolve(element) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => return Some(Err(e)),
            },
            None => None,
        };
        Some(Ok(TypeDescriptor::array(element)))
    }
}

struct MappingRecognizer;

impl Recognizer for MappingRecognizer {
    fn name(&self) -> &'static str {
        "mapping"
    }

    fn recognize(
        &self,
        annotation: &Annotation,
        _: &Resolver,
    ) -> Option<SchemaResult<TypeDescriptor>> {
        matches!(annotation, Annotation::Mapping { .. })
            .then(|| Ok(TypeDescriptor::new(Kind::Object, "dict")))
    }
}

/// Resolve record fields, mapping anything unsupported to `object`.
fn resolve_fields(fields: &[Field], resolver: &Resolver) -> IndexMap<String, TypeDescriptor> {
    fields
        .iter()
        .map(|field| {
            let descriptor = resolver.resolve(&field.annotation).unwrap_or_else(|e| {
                debug!(field = %field.name, error = %e, "unsupported field type; using object");
                TypeDescriptor::object()
            });
            (field.name.clone(), descriptor)
        })
        .collect()
}

struct RecordRecognizer;

impl Recognizer for RecordRecognizer {
    fn name(&self) -> &'static str {
        "record"
    }

    fn recognize(
        &self,
        annotation: &Annotation,
        resolver: &Resolver,
    ) -> Option<SchemaResult<TypeDescriptor>> {
        let Annotation::Record { name, fields } = annotation else {
            return None;
        };
        let mut descriptor = TypeDescriptor::new(Kind::Object, name.clone());
        descriptor.fields = Some(resolve_fields(fields, resolver));
        Some(Ok(descriptor))
    }
}

struct FrameRecognizer;

impl Recognizer for FrameRecognizer {
    fn name(&self) -> &'static str {
        "frame"
    }

    fn recognize(
        &self,
        annotation: &Annotation,
        resolver: &Resolver,
    ) -> Option<SchemaResult<TypeDescriptor>> {
        let Annotation::Frame { name, columns } = annotation else {
            return None;
        };
        let mut descriptor =
            TypeDescriptor::new(Kind::Object, name.clone()).with_tag(Tag::Dataframe);
        descriptor.fields = Some(resolve_fields(columns, resolver));
        Some(Ok(descriptor))
    }
}

struct TupleRecognizer;

impl Recognizer for TupleRecognizer {
    fn name(&self) -> &'static str {
        "tuple"
    }

    fn recognize(
        &self,
        annotation: &Annotation,
        resolver: &Resolver,
    ) -> Option<SchemaResult<TypeDescriptor>> {
        let Annotation::Tuple { items } = annotation else {
            return None;
        };
        let members = items
            .iter()
            .map(|item| resolver.resolve(item))
            .collect::<SchemaResult<Vec<_>>>();
        Some(members.map(|members| {
            let mut descriptor = TypeDescriptor::new(Kind::Array, "tuple");
            descriptor.members = Some(members);
            descriptor
        }))
    }
}

struct IteratorRecognizer;

impl Recognizer for IteratorRecognizer {
    fn name(&self) -> &'static str {
        "iterator"
    }

    fn recognize(
        &self,
        annotation: &Annotation,
        resolver: &Resolver,
    ) -> Option<SchemaResult<TypeDescriptor>> {
        let Annotation::Iterator { yields } = annotation else {
            return None;
        };
        if matches!(yields.as_ref(), Annotation::Iterator { .. }) {
            return Some(Err(SchemaError::MalformedAnnotation(
                "nested Iterator".to_string(),
            )));
        }
        Some(resolver.resolve(yields).map(|mut descriptor| {
            descriptor.streaming = true;
            descriptor
        }))
    }
}

struct CallableRecognizer;

impl Recognizer for CallableRecognizer {
    fn name(&self) -> &'static str {
        "callable"
    }

    fn recognize(
        &self,
        annotation: &Annotation,
        _: &Resolver,
    ) -> Option<SchemaResult<TypeDescriptor>> {
        matches!(annotation, Annotation::Callable)
            .then(|| Ok(TypeDescriptor::new(Kind::String, "Callable").with_tag(Tag::Callable)))
    }
}
