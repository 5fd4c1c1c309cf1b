//! Error types for relq.

use thiserror::Error;

/// Boxed error returned by a [`Transport`](crate::engine::Transport).
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The main error type for relq operations.
#[derive(Debug, Error)]
pub enum RelqError {
    /// A column path or link could not be resolved against the schema.
    #[error("Cannot resolve '{path}' on table '{table}': {message}")]
    SchemaResolution {
        table: String,
        path: String,
        message: String,
    },

    /// The table is not part of the schema.
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// A column path string is malformed.
    #[error("Invalid column path '{path}' at position {position}: {message}")]
    InvalidColumnPath {
        path: String,
        position: usize,
        message: String,
    },

    /// A filter operator map holds an unsupported key.
    #[error("Unsupported operator '{operator}' on '{column}'")]
    Operator { column: String, operator: String },

    /// A combinator that needs at least one child got none.
    #[error("Combinator '{combinator}' requires at least one child expression")]
    CombinatorArity { combinator: &'static str },

    /// Structurally invalid filter expression.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Cursor token cannot be decoded or does not belong to this query.
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Page size or offset out of range.
    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),

    /// Failure reported by the transport, passed through untouched.
    #[error(transparent)]
    Transport(TransportError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RelqError {
    /// Create a schema resolution error.
    pub fn resolution(
        table: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::SchemaResolution {
            table: table.into(),
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported operator error.
    pub fn operator(column: impl Into<String>, operator: impl Into<String>) -> Self {
        Self::Operator {
            column: column.into(),
            operator: operator.into(),
        }
    }

    /// Create an invalid filter error.
    pub fn filter(message: impl Into<String>) -> Self {
        Self::InvalidFilter(message.into())
    }

    /// True when the error was raised before reaching the transport.
    pub fn is_compile_error(&self) -> bool {
        !matches!(self, Self::Transport(_))
    }
}

/// Result type alias for relq operations.
pub type RelqResult<T> = Result<T, RelqError>;
