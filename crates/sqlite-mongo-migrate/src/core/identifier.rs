//! Identifiers on both sides of the migration.
//!
//! - [`quote_sqlite`] quotes table names for the export query. Table names
//!   come from the fixed schema, but they are still validated and quoted
//!   because identifiers cannot be bound as statement parameters.
//! - [`DocumentId`] is the typed `_id` of a migrated document.

use std::fmt;

use bson::oid::ObjectId;
use bson::Bson;

use crate::error::{MigrateError, Result};

/// Maximum identifier length accepted for SQLite names.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers exceeding the maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a SQLite identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
pub fn quote_sqlite(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Primary identifier of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentId {
    /// Integer key carried over from the relational table.
    Int(i64),
    /// Opaque text key (carried over, or a generated token).
    Text(String),
    /// Store-native identifier generated on insert.
    Object(ObjectId),
}

impl DocumentId {
    /// Interpret a BSON value as an identifier.
    ///
    /// Integral doubles are accepted because JSON round trips may widen them.
    pub fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::Int32(v) => Some(DocumentId::Int(i64::from(*v))),
            Bson::Int64(v) => Some(DocumentId::Int(*v)),
            Bson::Double(v) if v.fract() == 0.0 && v.is_finite() => {
                Some(DocumentId::Int(*v as i64))
            }
            Bson::String(s) => Some(DocumentId::Text(s.clone())),
            Bson::ObjectId(oid) => Some(DocumentId::Object(*oid)),
            _ => None,
        }
    }

    /// Integer value, if this is an integer key.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            DocumentId::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<DocumentId> for Bson {
    fn from(id: DocumentId) -> Self {
        match id {
            DocumentId::Int(v) => Bson::Int64(v),
            DocumentId::Text(s) => Bson::String(s),
            DocumentId::Object(oid) => Bson::ObjectId(oid),
        }
    }
}

impl From<i64> for DocumentId {
    fn from(v: i64) -> Self {
        DocumentId::Int(v)
    }
}

impl From<&str> for DocumentId {
    fn from(v: &str) -> Self {
        DocumentId::Text(v.to_string())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Int(v) => write!(f, "{}", v),
            DocumentId::Text(s) => f.write_str(s),
            DocumentId::Object(oid) => write!(f, "{}", oid.to_hex()),
        }
    }
}
