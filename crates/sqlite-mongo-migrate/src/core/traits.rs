//! Core traits for the migration pipeline.
//!
//! - [`TableSource`]: reads whole tables from the relational store
//! - [`DocumentStore`]: the document-store operations the importer, the
//!   connection manager and the collection shim are written against
//!
//! Filters and update documents use the MongoDB query language. Stores report
//! every failure as an error; degrading to empty results is the job of the
//! compatibility adapter in [`crate::shim`], not of the store.

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::error::Result;

use super::value::Record;

/// Read complete tables from a relational source.
pub trait TableSource {
    /// Read every row of `table`, columns in declaration order.
    fn read_table(&self, table: &str) -> Result<Vec<Record>>;

    /// Source type identifier (e.g., "sqlite").
    fn source_type(&self) -> &str;
}

/// Options for a filtered scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Sort specification, e.g. `{"_id": -1}`.
    pub sort: Option<Document>,
    /// Maximum number of documents. `None` or zero means no cap; a negative
    /// value caps at its magnitude, as the MongoDB driver does.
    pub limit: Option<i64>,
}

impl QueryOptions {
    /// Options with a sort and a limit.
    pub fn sorted(sort: Document, limit: Option<i64>) -> Self {
        Self {
            sort: Some(sort),
            limit,
        }
    }

    /// Positive cap on the result size, if any.
    pub fn effective_limit(&self) -> Option<i64> {
        self.limit.map(i64::saturating_abs).filter(|l| *l > 0)
    }
}

/// Result of an update operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Documents matching the filter.
    pub matched: u64,
    /// Documents actually changed.
    pub modified: u64,
    /// Identifier of a document created by an upsert.
    pub upserted_id: Option<Bson>,
}

/// Operations on a document store, addressed by collection name.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Administrative liveness check.
    async fn ping(&self) -> Result<()>;

    /// First document matching `filter`.
    async fn find_one(&self, collection: &str, filter: Document) -> Result<Option<Document>>;

    /// All documents matching `filter`, sorted and capped per `options`.
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: QueryOptions,
    ) -> Result<Vec<Document>>;

    /// Insert one document; returns its `_id` (generated if absent).
    async fn insert_one(&self, collection: &str, doc: Document) -> Result<Bson>;

    /// Insert documents in order; returns their `_id`s in input order.
    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<Bson>>;

    /// Apply an operator-style update to the first match.
    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome>;

    /// Apply an operator-style update to every match.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome>;

    /// Delete the first match; returns the number deleted (0 or 1).
    async fn delete_one(&self, collection: &str, filter: Document) -> Result<u64>;

    /// Delete every match; returns the number deleted.
    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64>;

    /// Remove every document of a collection. Only the importer calls this.
    async fn clear(&self, collection: &str) -> Result<u64> {
        self.delete_many(collection, Document::new()).await
    }

    /// Number of documents matching `filter`.
    async fn count_documents(&self, collection: &str, filter: Document) -> Result<u64>;

    /// Store type identifier (e.g., "mongodb", "memory").
    fn store_type(&self) -> &str;

    /// Release the underlying client.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_query_options_default_is_unbounded() {
        let opts = QueryOptions::default();
        assert!(opts.sort.is_none());
        assert!(opts.limit.is_none());
    }

    #[test]
    fn test_sorted_options() {
        let opts = QueryOptions::sorted(doc! {"_id": -1}, Some(1));
        assert_eq!(opts.sort, Some(doc! {"_id": -1}));
        assert_eq!(opts.limit, Some(1));
    }

    #[test]
    fn test_effective_limit() {
        let cap = |limit| QueryOptions { sort: None, limit }.effective_limit();
        assert_eq!(cap(None), None);
        assert_eq!(cap(Some(0)), None);
        assert_eq!(cap(Some(3)), Some(3));
        assert_eq!(cap(Some(-1)), Some(1));
        assert_eq!(cap(Some(i64::MIN)), Some(i64::MAX));
    }
}
