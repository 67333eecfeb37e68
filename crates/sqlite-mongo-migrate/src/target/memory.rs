//! In-process document store.
//!
//! Collections are insertion-ordered vectors of documents behind a tokio
//! `RwLock`. Filters, updates and sorts are evaluated by [`super::query`].
//! Clones share the same data, so a test can keep a handle for inspection
//! while a [`crate::connection::Database`] owns another.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use tokio::sync::RwLock;
use tracing::debug;

use super::query::{values_equal, Filter, Sort, Update};
use crate::core::schema::ID_FIELD;
use crate::core::traits::{DocumentStore, QueryOptions, UpdateOutcome};
use crate::error::{MigrateError, Result};

#[derive(Debug, Default)]
struct Inner {
    collections: HashMap<String, Vec<Document>>,
    unreachable: bool,
    closed: bool,
}

/// Document store held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable server: every operation fails with a
    /// connection error until reset.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.inner.write().await.unreachable = unreachable;
    }

    /// Whether `close` has been called on any clone.
    pub async fn is_closed(&self) -> bool {
        self.inner.read().await.closed
    }

    /// Snapshot of a collection in insertion order.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        let inner = self.inner.read().await;
        inner
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Names of collections holding at least one document.
    pub async fn collection_names(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut names: Vec<String> = inner
            .collections
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

fn check_reachable(inner: &Inner) -> Result<()> {
    if inner.unreachable {
        return Err(MigrateError::Connection(
            "memory store is marked unreachable".into(),
        ));
    }
    Ok(())
}

fn ensure_id(doc: &mut Document) -> Bson {
    match doc.get(ID_FIELD) {
        Some(id) => id.clone(),
        None => {
            let id = Bson::ObjectId(ObjectId::new());
            // `_id` leads the document, as the server stores it.
            let mut with_id = Document::new();
            with_id.insert(ID_FIELD, id.clone());
            with_id.extend(std::mem::take(doc));
            *doc = with_id;
            id
        }
    }
}

fn insert_checked(collection: &str, docs: &mut Vec<Document>, mut doc: Document) -> Result<Bson> {
    let id = ensure_id(&mut doc);
    let duplicate = docs
        .iter()
        .any(|d| d.get(ID_FIELD).map_or(false, |existing| values_equal(existing, &id)));
    if duplicate {
        return Err(MigrateError::store(
            collection,
            format!("duplicate key error: _id {}", id),
        ));
    }
    docs.push(doc);
    Ok(id)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        check_reachable(&*self.inner.read().await)
    }

    async fn find_one(&self, collection: &str, filter: Document) -> Result<Option<Document>> {
        let filter = Filter::parse(&filter)?;
        let inner = self.inner.read().await;
        check_reachable(&inner)?;
        Ok(inner
            .collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)))
            .cloned())
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: QueryOptions,
    ) -> Result<Vec<Document>> {
        let filter = Filter::parse(&filter)?;
        let sort = options.sort.as_ref().map(Sort::parse).transpose()?;

        let inner = self.inner.read().await;
        check_reachable(&inner)?;
        let mut matched: Vec<Document> = inner
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default();
        drop(inner);

        if let Some(sort) = sort {
            matched.sort_by(|a, b| sort.compare(a, b));
        }
        if let Some(limit) = options.effective_limit() {
            matched.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(matched)
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<Bson> {
        let mut inner = self.inner.write().await;
        check_reachable(&inner)?;
        let docs = inner.collections.entry(collection.to_string()).or_default();
        insert_checked(collection, docs, doc)
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<Bson>> {
        if docs.is_empty() {
            return Err(MigrateError::store(collection, "insert_many requires at least one document"));
        }
        let mut inner = self.inner.write().await;
        check_reachable(&inner)?;
        let stored = inner.collections.entry(collection.to_string()).or_default();

        // Ordered insert: documents before the first failure stay inserted.
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            ids.push(insert_checked(collection, stored, doc)?);
        }
        debug!("Inserted {} documents into {}", ids.len(), collection);
        Ok(ids)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        let compiled = Filter::parse(&filter)?;
        let update = Update::parse(&update)?;

        let mut inner = self.inner.write().await;
        check_reachable(&inner)?;
        let docs = inner.collections.entry(collection.to_string()).or_default();

        if let Some(doc) = docs.iter_mut().find(|d| compiled.matches(d)) {
            let mut candidate = doc.clone();
            let changed = update.apply(&mut candidate, false)?;
            *doc = candidate;
            return Ok(UpdateOutcome {
                matched: 1,
                modified: u64::from(changed),
                upserted_id: None,
            });
        }

        if !upsert {
            return Ok(UpdateOutcome::default());
        }

        let mut seeded = Document::new();
        for (path, value) in compiled.equality_fields() {
            if !path.contains('.') {
                seeded.insert(path, value.clone());
            }
        }
        update.apply(&mut seeded, true)?;
        let id = insert_checked(collection, docs, seeded)?;
        Ok(UpdateOutcome {
            matched: 0,
            modified: 0,
            upserted_id: Some(id),
        })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome> {
        let filter = Filter::parse(&filter)?;
        let update = Update::parse(&update)?;

        let mut inner = self.inner.write().await;
        check_reachable(&inner)?;
        let Some(docs) = inner.collections.get_mut(collection) else {
            return Ok(UpdateOutcome::default());
        };

        // Evaluate against copies so a failing document leaves the collection untouched.
        let mut staged = docs.clone();
        let mut outcome = UpdateOutcome::default();
        for doc in staged.iter_mut().filter(|d| filter.matches(d)) {
            outcome.matched += 1;
            if update.apply(doc, false)? {
                outcome.modified += 1;
            }
        }
        *docs = staged;
        Ok(outcome)
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<u64> {
        let filter = Filter::parse(&filter)?;
        let mut inner = self.inner.write().await;
        check_reachable(&inner)?;
        let Some(docs) = inner.collections.get_mut(collection) else {
            return Ok(0);
        };
        match docs.iter().position(|d| filter.matches(d)) {
            Some(pos) => {
                docs.remove(pos);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64> {
        let filter = Filter::parse(&filter)?;
        let mut inner = self.inner.write().await;
        check_reachable(&inner)?;
        let Some(docs) = inner.collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        Ok((before - docs.len()) as u64)
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> Result<u64> {
        let filter = Filter::parse(&filter)?;
        let inner = self.inner.read().await;
        check_reachable(&inner)?;
        Ok(inner
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).count() as u64)
            .unwrap_or(0))
    }

    fn store_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {
        self.inner.write().await.closed = true;
        debug!("Memory store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_many(
                "users",
                vec![
                    doc! {"_id": 5, "name": "A", "age": 30},
                    doc! {"_id": 9, "name": "B", "age": 20},
                    doc! {"_id": 7, "name": "C", "age": 25},
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_find_sort_limit() {
        let store = seeded().await;
        let docs = store
            .find(
                "users",
                doc! {"age": {"$gte": 25}},
                QueryOptions::sorted(doc! {"age": 1}, Some(0)),
            )
            .await
            .unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.get_str("name").unwrap()).collect();
        assert_eq!(names, vec!["C", "A"]);

        let top = store
            .find("users", doc! {}, QueryOptions::sorted(doc! {"_id": -1}, Some(1)))
            .await
            .unwrap();
        assert_eq!(top[0].get_i32("_id").unwrap(), 9);

        let negative = store
            .find("users", doc! {}, QueryOptions::sorted(doc! {"_id": -1}, Some(-1)))
            .await
            .unwrap();
        assert_eq!(negative.len(), 1);
        assert_eq!(negative[0].get_i32("_id").unwrap(), 9);
    }

    #[tokio::test]
    async fn test_insert_generates_object_id_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let id = store.insert_one("groups", doc! {"title": "x"}).await.unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));
        let stored = store.documents("groups").await;
        assert_eq!(stored[0].keys().next().map(String::as_str), Some("_id"));

        store.insert_one("groups", doc! {"_id": 1}).await.unwrap();
        let dup = store.insert_one("groups", doc! {"_id": 1_i64}).await;
        assert!(matches!(dup, Err(MigrateError::Store { .. })));
    }

    #[tokio::test]
    async fn test_insert_many_is_ordered() {
        let store = MemoryStore::new();
        let result = store
            .insert_many("t", vec![doc! {"_id": 1}, doc! {"_id": 2}, doc! {"_id": 1}, doc! {"_id": 3}])
            .await;
        assert!(result.is_err());
        assert_eq!(store.count_documents("t", doc! {}).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_update_one_and_upsert() {
        let store = seeded().await;
        let out = store
            .update_one("users", doc! {"_id": 5}, doc! {"$set": {"name": "Z"}}, false)
            .await
            .unwrap();
        assert_eq!((out.matched, out.modified), (1, 1));

        let none = store
            .update_one("users", doc! {"_id": 99}, doc! {"$set": {"name": "Q"}}, false)
            .await
            .unwrap();
        assert_eq!(none, UpdateOutcome::default());

        let up = store
            .update_one("users", doc! {"_id": 99}, doc! {"$set": {"name": "Q"}}, true)
            .await
            .unwrap();
        assert_eq!(up.upserted_id, Some(Bson::Int32(99)));
        let doc = store.find_one("users", doc! {"_id": 99}).await.unwrap().unwrap();
        assert_eq!(doc.get_str("name").unwrap(), "Q");
    }

    #[tokio::test]
    async fn test_update_many_counts_modified() {
        let store = seeded().await;
        let out = store
            .update_many("users", doc! {"age": {"$lt": 30}}, doc! {"$set": {"age": 25}})
            .await
            .unwrap();
        assert_eq!(out.matched, 2);
        assert_eq!(out.modified, 1);
    }

    #[tokio::test]
    async fn test_non_operator_update_is_rejected() {
        let store = seeded().await;
        let result = store
            .update_one("users", doc! {"_id": 5}, doc! {"name": "x"}, false)
            .await;
        assert!(matches!(result, Err(MigrateError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let store = seeded().await;
        assert_eq!(store.delete_one("users", doc! {"_id": 5}).await.unwrap(), 1);
        assert_eq!(store.delete_one("users", doc! {"_id": 5}).await.unwrap(), 0);
        assert_eq!(store.delete_many("users", doc! {"age": {"$gt": 0}}).await.unwrap(), 2);
        assert_eq!(store.clear("users").await.unwrap(), 0);
        assert!(store.collection_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_filter_fails_on_empty_collection() {
        let store = MemoryStore::new();
        let result = store.find("empty", doc! {"$bogus": 1}, QueryOptions::default()).await;
        assert!(matches!(result, Err(MigrateError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_unreachable() {
        let store = seeded().await;
        store.set_unreachable(true).await;
        assert!(matches!(store.ping().await, Err(MigrateError::Connection(_))));
        assert!(store.count_documents("users", doc! {}).await.is_err());
        store.set_unreachable(false).await;
        assert_eq!(store.count_documents("users", doc! {}).await.unwrap(), 3);
    }
}
