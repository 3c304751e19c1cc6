//! Build-time (registration) errors.

use thiserror::Error;

use crate::config::Role;

/// Errors that abort registration of a single function.
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    /// A union with more than one non-`None` arm.
    #[error("ambiguous union with {arms} arms; only `X | None` is supported")]
    AmbiguousUnion { arms: usize },

    /// A typing construct that cannot be resolved at all.
    #[error("malformed annotation: {0}")]
    MalformedAnnotation(String),

    #[error("argument `{argument}` sets both a whitelist and examples")]
    WhitelistExampleConflict { argument: String },

    #[error("argument `{argument}` requested as both {first:?} and {second:?}")]
    RoleConflict {
        argument: String,
        first: Role,
        second: Role,
    },

    /// Column and Cell roles cannot be combined in one function.
    #[error("function mixes column arguments ({column}) with cell arguments ({cell})")]
    MixedSheetRoles { column: String, cell: String },

    #[error("streaming functions cannot declare cell arguments ({0})")]
    StreamingCells(String),

    #[error("argument `{argument}` is hidden by more than one conditional rule")]
    DuplicateConditionalTarget { argument: String },

    #[error("{source_name} refers to unknown argument `{argument}`")]
    UnknownArgument {
        argument: String,
        source_name: &'static str,
    },

    #[error("{source_name} for group ({group}) has {found} entries, expected {expected}")]
    GroupLengthMismatch {
        group: String,
        expected: usize,
        found: usize,
        source_name: &'static str,
    },

    #[error("{source_name} for `{argument}` must be a list")]
    NotAList {
        argument: String,
        source_name: &'static str,
    },

    #[error("theme `{0}` is not registered")]
    UnknownTheme(String),
}

impl SchemaError {
    pub fn unknown_argument(argument: impl Into<String>, source_name: &'static str) -> Self {
        Self::UnknownArgument {
            argument: argument.into(),
            source_name,
        }
    }
}

/// Result type for schema building.
pub type SchemaResult<T> = Result<T, SchemaError>;
