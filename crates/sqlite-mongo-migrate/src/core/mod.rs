//! Core abstractions shared by the pipeline and the collection shim.
//!
//! - [`schema`]: the fixed table/collection catalog and per-table mapping rules
//! - [`identifier`]: SQLite identifier quoting and typed document identifiers
//! - [`value`]: conversions between relational rows, intermediate JSON and BSON
//! - [`temporal`]: the temporal normalizer
//! - [`traits`]: the relational source and document store seams

pub mod identifier;
pub mod schema;
pub mod temporal;
pub mod traits;
pub mod value;

pub use identifier::DocumentId;
pub use schema::{CollectionName, CollectionSpec, ForeignKey, IdStrategy, ID_FIELD};
pub use traits::{DocumentStore, QueryOptions, TableSource, UpdateOutcome};
pub use value::Record;
