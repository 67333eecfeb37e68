//! Error types for the migration library.

use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when the document store cannot be reached.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for relational source failures.
pub const EXIT_SOURCE_ERROR: u8 = 3;
/// Exit code for document store failures.
pub const EXIT_TARGET_ERROR: u8 = 4;
/// Exit code for transformation failures.
pub const EXIT_TRANSFORM_ERROR: u8 = 5;
/// Exit code for import failures.
pub const EXIT_IMPORT_ERROR: u8 = 6;
/// Exit code for file system failures.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code for a cancelled run.
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Relational source connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] rusqlite::Error),

    /// Document store driver error
    #[error("Target database error: {0}")]
    Target(#[from] mongodb::error::Error),

    /// Store unreachable or liveness check failed
    #[error("Connection to document store failed: {0}")]
    Connection(String),

    /// Export failed for a specific table
    #[error("Export failed for table {table}: {message}")]
    Export { table: String, message: String },

    /// Transformation failed for a specific table
    #[error("Transform failed for table {table}: {message}")]
    Transform { table: String, message: String },

    /// Input already carries the provenance field
    #[error("Table {table} is already transformed (found provenance field '{field}' without source key)")]
    AlreadyTransformed { table: String, field: String },

    /// A record has no usable source key
    #[error("Record {index} of table {table} has no value for key field '{field}'")]
    MissingKey {
        table: String,
        field: String,
        index: usize,
    },

    /// Import failed for a specific collection
    #[error("Import failed for collection {collection}: {message}")]
    Import { collection: String, message: String },

    /// Store operation failed for a specific collection
    #[error("Store error on collection {collection}: {message}")]
    Store { collection: String, message: String },

    /// Malformed filter or update document
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Mass delete without a constraining filter
    #[error("Refusing unconstrained delete on collection {collection}")]
    UnconstrainedDelete { collection: String },

    /// Collection or table name outside the fixed schema
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create an Export error
    pub fn export(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Export {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Transform error
    pub fn transform(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transform {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an Import error
    pub fn import(collection: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Import {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Create a Store error
    pub fn store(collection: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Store {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Whether this error is the mass-delete guardrail rather than a failure.
    pub fn is_guardrail(&self) -> bool {
        matches!(self, MigrateError::UnconstrainedDelete { .. })
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::Yaml(_)
            | MigrateError::UnknownCollection(_) => EXIT_CONFIG_ERROR,
            MigrateError::Connection(_) => EXIT_CONNECTION_ERROR,
            MigrateError::Source(_) | MigrateError::Export { .. } => EXIT_SOURCE_ERROR,
            MigrateError::Target(_)
            | MigrateError::Store { .. }
            | MigrateError::InvalidQuery(_)
            | MigrateError::UnconstrainedDelete { .. } => EXIT_TARGET_ERROR,
            MigrateError::Transform { .. }
            | MigrateError::AlreadyTransformed { .. }
            | MigrateError::MissingKey { .. } => EXIT_TRANSFORM_ERROR,
            MigrateError::Import { .. } => EXIT_IMPORT_ERROR,
            MigrateError::Io(_) | MigrateError::Json(_) => EXIT_IO_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
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

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
