//! Relational-style access to document-store collections.
//!
//! [`ShimmedCollection`] exposes point lookups, filtered scans, inserts,
//! conditional updates, deletes and counts, each returning a [`Result`].
//! [`CompatCollection`] wraps it with the legacy contract: store errors are
//! logged and turned into `None`, `[]`, `false` or `0`.
//!
//! Both apply the same conventions:
//! - a top-level object-id `_id` is returned as its hex string
//! - an update without `$`-operators is treated as `{"$set": update}`
//! - `delete_many` with an empty filter is refused

use std::sync::Arc;

use bson::{Bson, Document};
use tracing::{error, warn};

use crate::core::schema::ID_FIELD;
use crate::core::traits::{DocumentStore, QueryOptions};
use crate::error::{MigrateError, Result};
use crate::target::query::is_operator_update;

/// A collection handle with relational-style verbs.
#[derive(Clone)]
pub struct ShimmedCollection {
    store: Arc<dyn DocumentStore>,
    name: String,
}

impl std::fmt::Debug for ShimmedCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShimmedCollection")
            .field("name", &self.name)
            .field("store_type", &self.store.store_type())
            .finish()
    }
}

/// Replace a top-level object-id `_id` with its hex string.
pub fn coerce_id(mut doc: Document) -> Document {
    let hex = match doc.get(ID_FIELD) {
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        _ => return doc,
    };
    doc.insert(ID_FIELD, hex);
    doc
}

/// Wrap an update without operator keys as a field set.
pub fn wrap_update(update: Document) -> Document {
    if is_operator_update(&update) {
        update
    } else {
        let mut wrapped = Document::new();
        wrapped.insert("$set", update);
        wrapped
    }
}

impl ShimmedCollection {
    pub fn new(store: Arc<dyn DocumentStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Legacy never-fail view of this collection.
    pub fn compat(&self) -> CompatCollection {
        CompatCollection {
            inner: self.clone(),
        }
    }

    /// At most one matching document.
    pub async fn find_one(&self, filter: Document) -> Result<Option<Document>> {
        Ok(self
            .store
            .find_one(&self.name, filter)
            .await?
            .map(coerce_id))
    }

    /// All matching documents, optionally sorted and capped.
    pub async fn find(
        &self,
        filter: Document,
        limit: Option<i64>,
        sort: Option<Document>,
    ) -> Result<Vec<Document>> {
        let options = QueryOptions { sort, limit };
        Ok(self
            .store
            .find(&self.name, filter, options)
            .await?
            .into_iter()
            .map(coerce_id)
            .collect())
    }

    /// Insert one document. An explicitly supplied `_id` is kept as is.
    pub async fn insert_one(&self, doc: Document) -> Result<Bson> {
        self.store.insert_one(&self.name, doc).await
    }

    /// Insert documents in order.
    pub async fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Bson>> {
        self.store.insert_many(&self.name, docs).await
    }

    /// Update the first match. True if a document changed or, with
    /// `upsert`, was created.
    pub async fn update_one(&self, filter: Document, update: Document, upsert: bool) -> Result<bool> {
        let outcome = self
            .store
            .update_one(&self.name, filter, wrap_update(update), upsert)
            .await?;
        Ok(outcome.modified > 0 || (upsert && outcome.upserted_id.is_some()))
    }

    /// Update every match. Returns the modified count.
    pub async fn update_many(&self, filter: Document, update: Document) -> Result<u64> {
        let outcome = self
            .store
            .update_many(&self.name, filter, wrap_update(update))
            .await?;
        Ok(outcome.modified)
    }

    /// Delete the first match. True if a document was deleted.
    pub async fn delete_one(&self, filter: Document) -> Result<bool> {
        Ok(self.store.delete_one(&self.name, filter).await? > 0)
    }

    /// Delete every match. An empty filter is refused.
    pub async fn delete_many(&self, filter: Document) -> Result<u64> {
        if filter.is_empty() {
            return Err(MigrateError::UnconstrainedDelete {
                collection: self.name.clone(),
            });
        }
        self.store.delete_many(&self.name, filter).await
    }

    /// Number of matching documents; `None` counts everything.
    pub async fn count_documents(&self, filter: Option<Document>) -> Result<u64> {
        self.store
            .count_documents(&self.name, filter.unwrap_or_default())
            .await
    }
}

/// Legacy adapter: every verb succeeds, failures degrade to an empty value.
#[derive(Debug, Clone)]
pub struct CompatCollection {
    inner: ShimmedCollection,
}

impl CompatCollection {
    fn degrade<T>(&self, op: &str, result: Result<T>, fallback: T) -> T {
        match result {
            Ok(v) => v,
            Err(e) if e.is_guardrail() => {
                warn!("{} on {}: {}. Aborting.", op, self.inner.name, e);
                fallback
            }
            Err(e) => {
                error!("Error in {} on {}: {}", op, self.inner.name, e);
                fallback
            }
        }
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn find_one(&self, filter: Document) -> Option<Document> {
        let result = self.inner.find_one(filter).await;
        self.degrade("find_one", result, None)
    }

    pub async fn find(
        &self,
        filter: Document,
        limit: Option<i64>,
        sort: Option<Document>,
    ) -> Vec<Document> {
        let result = self.inner.find(filter, limit, sort).await;
        self.degrade("find", result, Vec::new())
    }

    pub async fn insert_one(&self, doc: Document) -> Option<Bson> {
        let result = self.inner.insert_one(doc).await.map(Some);
        self.degrade("insert_one", result, None)
    }

    pub async fn insert_many(&self, docs: Vec<Document>) -> Vec<Bson> {
        let result = self.inner.insert_many(docs).await;
        self.degrade("insert_many", result, Vec::new())
    }

    pub async fn update_one(&self, filter: Document, update: Document, upsert: bool) -> bool {
        let result = self.inner.update_one(filter, update, upsert).await;
        self.degrade("update_one", result, false)
    }

    pub async fn update_many(&self, filter: Document, update: Document) -> u64 {
        let result = self.inner.update_many(filter, update).await;
        self.degrade("update_many", result, 0)
    }

    pub async fn delete_one(&self, filter: Document) -> bool {
        let result = self.inner.delete_one(filter).await;
        self.degrade("delete_one", result, false)
    }

    pub async fn delete_many(&self, filter: Document) -> u64 {
        let result = self.inner.delete_many(filter).await;
        self.degrade("delete_many", result, 0)
    }

    pub async fn count_documents(&self, filter: Option<Document>) -> u64 {
        let result = self.inner.count_documents(filter).await;
        self.degrade("count_documents", result, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MemoryStore;
    use bson::doc;
    use bson::oid::ObjectId;

    async fn users() -> (MemoryStore, ShimmedCollection) {
        let store = MemoryStore::new();
        store
            .insert_many(
                "users",
                vec![
                    doc! {"_id": 5, "name": "A", "sqlite_user_id": 5},
                    doc! {"_id": 9, "name": "B", "sqlite_user_id": 9},
                ],
            )
            .await
            .unwrap();
        let coll = ShimmedCollection::new(Arc::new(store.clone()), "users");
        (store, coll)
    }

    #[test]
    fn test_wrap_update() {
        assert_eq!(wrap_update(doc! {"name": "x"}), doc! {"$set": {"name": "x"}});
        let op = doc! {"$inc": {"n": 1}};
        assert_eq!(wrap_update(op.clone()), op);
    }

    #[test]
    fn test_coerce_id() {
        let oid = ObjectId::new();
        let d = coerce_id(doc! {"_id": oid, "ref": oid});
        assert_eq!(d.get_str("_id").unwrap(), oid.to_hex());
        assert_eq!(d.get_object_id("ref").unwrap(), oid);
        assert_eq!(coerce_id(doc! {"_id": 3}), doc! {"_id": 3});
    }

    #[tokio::test]
    async fn test_implicit_set_equals_explicit_set() {
        let (_, implicit) = users().await;
        let (_, explicit) = users().await;

        assert!(implicit
            .update_one(doc! {"_id": 5}, doc! {"name": "x"}, false)
            .await
            .unwrap());
        assert!(explicit
            .update_one(doc! {"_id": 5}, doc! {"$set": {"name": "x"}}, false)
            .await
            .unwrap());

        let a = implicit.find_one(doc! {"_id": 5}).await.unwrap();
        let b = explicit.find_one(doc! {"_id": 5}).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.unwrap().get_str("name").unwrap(), "x");
    }

    #[tokio::test]
    async fn test_update_one_reports_upsert() {
        let (_, coll) = users().await;
        assert!(!coll
            .update_one(doc! {"_id": 77}, doc! {"name": "new"}, false)
            .await
            .unwrap());
        assert!(coll
            .update_one(doc! {"_id": 77}, doc! {"name": "new"}, true)
            .await
            .unwrap());
        // Same value again: matched but not modified.
        assert!(!coll
            .update_one(doc! {"_id": 77}, doc! {"name": "new"}, true)
            .await
            .unwrap());
        assert_eq!(coll.count_documents(None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_generated_ids_are_strings() {
        let (_, coll) = users().await;
        let id = coll.insert_one(doc! {"name": "C"}).await.unwrap();
        let Bson::ObjectId(oid) = id else {
            panic!("expected generated object id");
        };
        let found = coll.find(doc! {"name": "C"}, None, None).await.unwrap();
        assert_eq!(found[0].get_str("_id").unwrap(), oid.to_hex());
    }

    #[tokio::test]
    async fn test_explicit_integer_id_preserved() {
        let (_, coll) = users().await;
        let id = coll.insert_one(doc! {"_id": 12, "name": "D"}).await.unwrap();
        assert_eq!(id, Bson::Int32(12));
    }

    #[tokio::test]
    async fn test_find_with_sort_and_limit() {
        let (_, coll) = users().await;
        let docs = coll
            .find(doc! {}, Some(1), Some(doc! {"_id": -1}))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_str("name").unwrap(), "B");
    }

    #[tokio::test]
    async fn test_delete_many_refuses_empty_filter() {
        let (store, coll) = users().await;
        let err = coll.delete_many(doc! {}).await.unwrap_err();
        assert!(err.is_guardrail());

        assert_eq!(coll.compat().delete_many(doc! {}).await, 0);
        assert_eq!(store.count_documents("users", doc! {}).await.unwrap(), 2);

        assert_eq!(coll.delete_many(doc! {"name": "A"}).await.unwrap(), 1);
        assert!(coll.delete_one(doc! {"name": "B"}).await.unwrap());
        assert!(!coll.delete_one(doc! {"name": "B"}).await.unwrap());
    }

    #[tokio::test]
    async fn test_compat_degrades_malformed_filter() {
        let (_, coll) = users().await;
        let compat = coll.compat();
        let bad = doc! {"name": {"$nope": 1}};

        assert!(coll.find(bad.clone(), None, None).await.is_err());
        assert_eq!(compat.find_one(bad.clone()).await, None);
        assert!(compat.find(bad.clone(), None, None).await.is_empty());
        assert!(!compat.update_one(bad.clone(), doc! {"x": 1}, false).await);
        assert_eq!(compat.update_many(bad.clone(), doc! {"x": 1}).await, 0);
        assert!(!compat.delete_one(bad.clone()).await);
        assert_eq!(compat.delete_many(bad.clone()).await, 0);
        assert_eq!(compat.count_documents(Some(bad)).await, 0);
    }

    #[tokio::test]
    async fn test_compat_degrades_store_failure() {
        let (store, coll) = users().await;
        let compat = coll.compat();
        store.set_unreachable(true).await;

        assert_eq!(compat.insert_one(doc! {"_id": 1}).await, None);
        assert!(compat.insert_many(vec![doc! {"_id": 2}]).await.is_empty());
        assert_eq!(compat.count_documents(None).await, 0);

        store.set_unreachable(false).await;
        assert_eq!(compat.count_documents(None).await, 2);
        assert_eq!(compat.find_one(doc! {"_id": 5}).await.unwrap().get_str("name").unwrap(), "A");
    }

    #[tokio::test]
    async fn test_update_many_counts_modified() {
        let (_, coll) = users().await;
        let n = coll
            .update_many(doc! {"_id": {"$in": [5, 9]}}, doc! {"active": true})
            .await
            .unwrap();
        assert_eq!(n, 2);
    }
}
