//! Import phase: full-replace load of transformed files into the store.

use std::path::Path;

use bson::Document;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::schema::CollectionName;
use crate::core::temporal::normalize_fields;
use crate::core::traits::DocumentStore;
use crate::core::value::{record_to_document, Record};
use crate::error::{MigrateError, Result};
use crate::source::files;

/// Outcome of importing one collection.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionImport {
    /// Collection name.
    pub collection: String,

    /// Documents inserted.
    pub imported: u64,

    /// Input file was absent.
    pub skipped: bool,

    /// Error message, if the import failed.
    pub error: Option<String>,
}

/// Outcome of an import run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    /// Per-collection outcomes in import order.
    pub collections: Vec<CollectionImport>,
}

impl ImportReport {
    /// Total documents inserted.
    pub fn total_imported(&self) -> u64 {
        self.collections.iter().map(|c| c.imported).sum()
    }

    /// Names of collections that failed.
    pub fn failed_collections(&self) -> Vec<&str> {
        self.collections
            .iter()
            .filter(|c| c.error.is_some())
            .map(|c| c.collection.as_str())
            .collect()
    }
}

/// Replace the contents of `collection` with `records`.
///
/// An empty record set leaves the collection untouched and returns 0.
/// Otherwise the collection is cleared first, then the records are inserted
/// with a single insert (one record) or one ordered batch (several). Store
/// failures are reported as [`MigrateError::Import`]; connectivity failures
/// pass through unchanged.
pub async fn import_collection(
    store: &dyn DocumentStore,
    collection: CollectionName,
    records: Vec<Record>,
) -> Result<u64> {
    let name = collection.as_str();
    if records.is_empty() {
        info!("No data to import for collection {}", name);
        return Ok(0);
    }

    let temporal = collection.spec().temporal_fields;
    let mut docs: Vec<Document> = records
        .into_iter()
        .map(|r| {
            let mut doc = record_to_document(r);
            normalize_fields(&mut doc, temporal);
            doc
        })
        .collect();

    warn!("Clearing all existing documents from collection {}", name);
    let removed = store.clear(name).await.map_err(|e| import_error(name, e))?;
    if removed > 0 {
        info!("Removed {} existing documents from {}", removed, name);
    }

    let inserted = if docs.len() == 1 {
        let doc = docs.remove(0);
        store
            .insert_one(name, doc)
            .await
            .map_err(|e| import_error(name, e))?;
        1
    } else {
        store
            .insert_many(name, docs)
            .await
            .map_err(|e| import_error(name, e))?
            .len() as u64
    };

    info!("Successfully imported {} documents to {}", inserted, name);
    Ok(inserted)
}

fn import_error(collection: &str, err: MigrateError) -> MigrateError {
    match err {
        MigrateError::Connection(_) | MigrateError::Cancelled => err,
        other => MigrateError::import(collection, other.to_string()),
    }
}

/// Import every listed collection from `<dir>/<collection>.json`.
///
/// A missing file is skipped and a failing collection is recorded; neither
/// stops the run. Cancellation is checked before each collection.
pub async fn import_all(
    store: &dyn DocumentStore,
    dir: &Path,
    collections: &[CollectionName],
    cancel: &CancellationToken,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    for collection in collections {
        if cancel.is_cancelled() {
            info!("Import cancelled before {}", collection);
            return Err(MigrateError::Cancelled);
        }

        let path = files::table_file(dir, collection.as_str());
        if !path.is_file() {
            warn!("JSON file not found for {}: {}", collection, path.display());
            report.collections.push(CollectionImport {
                collection: collection.to_string(),
                imported: 0,
                skipped: true,
                error: None,
            });
            continue;
        }

        let result = match files::read_records(&path) {
            Ok(records) => import_collection(store, *collection, records).await,
            Err(e) => Err(e),
        };

        let entry = match result {
            Ok(imported) => CollectionImport {
                collection: collection.to_string(),
                imported,
                skipped: false,
                error: None,
            },
            Err(e) => {
                error!("Error importing {}: {}", collection, e);
                CollectionImport {
                    collection: collection.to_string(),
                    imported: 0,
                    skipped: false,
                    error: Some(e.to_string()),
                }
            }
        };
        report.collections.push(entry);
    }

    info!(
        "Import completed. Total documents imported: {}",
        report.total_imported()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MemoryStore;
    use bson::{doc, Bson};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn records(v: Value) -> Vec<Record> {
        match v {
            Value::Array(items) => items
                .into_iter()
                .map(|i| match i {
                    Value::Object(m) => m,
                    _ => unreachable!(),
                })
                .collect(),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_import_replaces_contents() {
        let store = MemoryStore::new();
        store.insert_one("users", doc! {"_id": 1, "stale": true}).await.unwrap();

        let n = import_collection(
            &store,
            CollectionName::Users,
            records(json!([
                {"_id": 5, "name": "A", "created_at": "2024-01-02T03:04:05Z", "sqlite_user_id": 5},
                {"_id": 9, "name": "B", "created_at": "garbage", "sqlite_user_id": 9},
            ])),
        )
        .await
        .unwrap();

        assert_eq!(n, 2);
        let docs = store.documents("users").await;
        assert_eq!(docs.len(), 2);
        assert!(matches!(docs[0].get("created_at"), Some(Bson::DateTime(_))));
        assert_eq!(docs[1].get_str("created_at").unwrap(), "garbage");
    }

    #[tokio::test]
    async fn test_single_record_import() {
        let store = MemoryStore::new();
        let n = import_collection(&store, CollectionName::Settings, records(json!([{"_id": 1}])))
            .await
            .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn test_empty_import_keeps_existing() {
        let store = MemoryStore::new();
        store.insert_one("groups", doc! {"_id": 1}).await.unwrap();
        let n = import_collection(&store, CollectionName::Groups, Vec::new())
            .await
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(store.count_documents("groups", doc! {}).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_import_error() {
        let store = MemoryStore::new();
        let err = import_collection(
            &store,
            CollectionName::Groups,
            records(json!([{"_id": 1}, {"_id": 1}])),
        )
        .await
        .unwrap_err();

        match &err {
            MigrateError::Import { collection, .. } => assert_eq!(collection, "groups"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.exit_code(), crate::error::EXIT_IMPORT_ERROR);
    }

    #[tokio::test]
    async fn test_import_all_isolates_failures() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("users.json"), r#"[{"_id": 1}, {"_id": 2}]"#).unwrap();
        // Duplicate keys fail the batch insert.
        std::fs::write(dir.path().join("groups.json"), r#"[{"_id": 1}, {"_id": 1}]"#).unwrap();
        std::fs::write(dir.path().join("posts.json"), r#"not json"#).unwrap();

        let store = MemoryStore::new();
        let report = import_all(
            &store,
            dir.path(),
            &[
                CollectionName::Users,
                CollectionName::Groups,
                CollectionName::Posts,
                CollectionName::Messages,
            ],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.total_imported(), 2);
        assert_eq!(report.failed_collections(), vec!["groups", "posts"]);
        assert!(report.collections[3].skipped);
    }

    #[tokio::test]
    async fn test_import_all_cancelled() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = import_all(&MemoryStore::new(), dir.path(), &[CollectionName::Users], &cancel).await;
        assert!(matches!(result, Err(MigrateError::Cancelled)));
    }
}
