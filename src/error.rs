//! Error types for the generator core.

use std::time::Duration;

use serde::Serialize;
use strum::{Display, IntoStaticStr};
use thiserror::Error;

/// Sub-classification of a failed SQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
pub enum SqlErrorKind {
    #[strum(serialize = "syntax")]
    Syntax,
    #[strum(serialize = "permission")]
    Permission,
    #[strum(serialize = "connection_lost")]
    ConnectionLost,
    #[strum(serialize = "timeout")]
    Timeout,
    #[strum(serialize = "other")]
    Other,
}

/// Main error type for the generator core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Unreachable host, bad credentials, disabled connection, dialect mismatch
    #[error("Connection error: {0}")]
    Connection(String),

    /// Table vanished or could not be described
    #[error("Schema introspection failed for {table}: {message}")]
    SchemaIntrospection { table: String, message: String },

    /// The column set changed underneath a sync; the stored set is untouched
    #[error("Reconciliation conflict for generator {generator_id}: {message}")]
    ReconciliationConflict {
        generator_id: String,
        message: String,
    },

    /// Rendering failed; no files are produced
    #[error("Render failed for generator {generator_id}{}: {message}", column_suffix(.column))]
    TemplateRender {
        generator_id: String,
        column: Option<String>,
        message: String,
    },

    /// Statement failed; `message` is the dialect's original text
    #[error("SQL {kind} error: {message}")]
    SqlExecution { kind: SqlErrorKind, message: String },

    /// Record lookup failed
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Invalid record or argument
    #[error("Validation error: {0}")]
    Validation(String),

    /// Edit or delete refused on a seeded connection
    #[error("Connection '{0}' is a system connection: {1}")]
    ProtectedConnection(String, String),

    /// Introspection or connection test exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Metadata store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error (invalid YAML, bad values)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn introspection(table: impl Into<String>, message: impl ToString) -> Self {
        CoreError::SchemaIntrospection {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn conflict(generator_id: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::ReconciliationConflict {
            generator_id: generator_id.into(),
            message: message.into(),
        }
    }

    /// Create a render error, optionally pinned to one column.
    pub fn render(
        generator_id: impl Into<String>,
        column: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        CoreError::TemplateRender {
            generator_id: generator_id.into(),
            column: column.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn sql(kind: SqlErrorKind, message: impl ToString) -> Self {
        CoreError::SqlExecution {
            kind,
            message: message.to_string(),
        }
    }

    /// Kind of a SQL failure, if this is one.
    pub fn sql_kind(&self) -> Option<SqlErrorKind> {
        match self {
            CoreError::SqlExecution { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

fn column_suffix(column: &Option<String>) -> String {
    column
        .as_ref()
        .map(|c| format!(" (column {c})"))
        .unwrap_or_default()
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
