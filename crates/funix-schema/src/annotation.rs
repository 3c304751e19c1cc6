//! Declared parameter and return annotations.
//!
//! A function's signature is described as data: each parameter carries an
//! [`Annotation`] mirroring what a type hint would have said. `Named` holds
//! the annotation identity (`"int"`, `"Password"`, `"Figure"`, ...) that host
//! type registrations are keyed by.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Annotation {
    /// The parameter carries no annotation.
    Missing,
    /// The `None` type itself. Only meaningful as a union arm.
    None,
    Named {
        name: String,
    },
    Optional {
        inner: Box<Annotation>,
    },
    Union {
        arms: Vec<Annotation>,
    },
    Literal {
        values: Vec<Value>,
    },
    List {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        element: Option<Box<Annotation>>,
    },
    Mapping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Box<Annotation>>,
    },
    Record {
        name: String,
        fields: Vec<Field>,
    },
    /// A tabular record whose fields are columns.
    Frame {
        name: String,
        columns: Vec<Field>,
    },
    Tuple {
        items: Vec<Annotation>,
    },
    /// A generator; the function streams values of the inner type.
    Iterator {
        yields: Box<Annotation>,
    },
    Callable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub annotation: Annotation,
}

impl Field {
    pub fn new(name: impl Into<String>, annotation: Annotation) -> Self {
        Self {
            name: name.into(),
            annotation,
        }
    }
}

impl Annotation {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named { name: name.into() }
    }

    pub fn int() -> Self {
        Self::named("int")
    }

    pub fn float() -> Self {
        Self::named("float")
    }

    pub fn str() -> Self {
        Self::named("str")
    }

    pub fn bool() -> Self {
        Self::named("bool")
    }

    pub fn optional(inner: Annotation) -> Self {
        Self::Optional {
            inner: Box::new(inner),
        }
    }

    pub fn union(arms: impl IntoIterator<Item = Annotation>) -> Self {
        Self::Union {
            arms: arms.into_iter().collect(),
        }
    }

    pub fn literal(values: impl IntoIterator<Item = Value>) -> Self {
        Self::Literal {
            values: values.into_iter().collect(),
        }
    }

    pub fn list_of(element: Annotation) -> Self {
        Self::List {
            element: Some(Box::new(element)),
        }
    }

    pub fn mapping() -> Self {
        Self::Mapping { value: None }
    }

    pub fn record(name: impl Into<String>, fields: impl IntoIterator<Item = Field>) -> Self {
        Self::Record {
            name: name.into(),
            fields: fields.into_iter().collect(),
        }
    }

    pub fn frame(name: impl Into<String>, columns: impl IntoIterator<Item = Field>) -> Self {
        Self::Frame {
            name: name.into(),
            columns: columns.into_iter().collect(),
        }
    }

    pub fn tuple(items: impl IntoIterator<Item = Annotation>) -> Self {
        Self::Tuple {
            items: items.into_iter().collect(),
        }
    }

    pub fn iterator(yields: Annotation) -> Self {
        Self::Iterator {
            yields: Box::new(yields),
        }
    }

    /// Identity used for host-type lookups. Only named annotations have one.
    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::Named { name } => Some(name.as_str()),
            _ => None,
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default = "missing")]
    pub annotation: Annotation,
    /// Language-level default, when the parameter declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn missing() -> Annotation {
    Annotation::Missing
}

impl Param {
    pub fn new(name: impl Into<String>, annotation: Annotation) -> Self {
        Self {
            name: name.into(),
            annotation,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// A function's full signature: ordered parameters plus return annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub params: Vec<Param>,
    #[serde(default = "missing")]
    pub returns: Annotation,
}

impl Signature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: Annotation::Missing,
        }
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn arg(self, name: impl Into<String>, annotation: Annotation) -> Self {
        self.param(Param::new(name, annotation))
    }

    pub fn returns(mut self, annotation: Annotation) -> Self {
        self.returns = annotation;
        self
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }
}
