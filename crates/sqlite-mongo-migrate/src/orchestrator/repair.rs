//! Repair pass: backfill relational key fields dropped by the transform.
//!
//! Application code that still reads `user_id` or `id` from documents gets
//! the value back from the provenance field, or from `_id` when provenance
//! is missing.

use bson::{doc, Bson};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::core::schema::{CollectionName, ID_FIELD};
use crate::core::traits::{DocumentStore, QueryOptions};
use crate::error::{MigrateError, Result};

/// Outcome of repairing one collection.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionRepair {
    /// Collection name.
    pub collection: String,

    /// Field that was backfilled.
    pub field: String,

    /// Documents missing the field.
    pub candidates: u64,

    /// Documents updated.
    pub updated: u64,

    /// Error message, if the repair failed.
    pub error: Option<String>,
}

/// Outcome of a repair run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairReport {
    /// Per-collection outcomes; collections without a repair rule are omitted.
    pub collections: Vec<CollectionRepair>,
}

impl RepairReport {
    /// Total documents updated.
    pub fn total_updated(&self) -> u64 {
        self.collections.iter().map(|c| c.updated).sum()
    }
}

/// Backfill the repair field of one collection. Returns `(candidates, updated)`.
pub async fn repair_collection(
    store: &dyn DocumentStore,
    collection: CollectionName,
) -> Result<(u64, u64)> {
    let spec = collection.spec();
    let Some(field) = spec.repair_field else {
        return Ok((0, 0));
    };

    let missing = doc! {
        "$or": [
            {field: {"$exists": false}},
            {field: Bson::Null},
        ]
    };
    let docs = store
        .find(spec.name, missing, QueryOptions::default())
        .await?;

    if docs.is_empty() {
        info!("No documents need updating in {}", spec.name);
        return Ok((0, 0));
    }
    info!("Found {} documents to update in {}", docs.len(), spec.name);

    let mut updated = 0;
    for d in &docs {
        let Some(id) = d.get(ID_FIELD) else {
            continue;
        };
        let value = match d.get(spec.provenance_field) {
            Some(Bson::Null) | None => id.clone(),
            Some(v) => v.clone(),
        };
        let outcome = store
            .update_one(
                spec.name,
                doc! {ID_FIELD: id.clone()},
                doc! {"$set": {field: value}},
                false,
            )
            .await?;
        if outcome.modified > 0 {
            updated += 1;
        }
    }

    info!("Successfully updated {} documents in {}", updated, spec.name);
    Ok((docs.len() as u64, updated))
}

/// Repair every listed collection that has a repair rule.
pub async fn repair_all(
    store: &dyn DocumentStore,
    collections: &[CollectionName],
    cancel: &CancellationToken,
) -> Result<RepairReport> {
    let mut report = RepairReport::default();

    for collection in collections {
        let Some(field) = collection.spec().repair_field else {
            continue;
        };
        if cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }

        let entry = match repair_collection(store, *collection).await {
            Ok((candidates, updated)) => CollectionRepair {
                collection: collection.to_string(),
                field: field.to_string(),
                candidates,
                updated,
                error: None,
            },
            Err(e) => {
                error!("Error repairing {}: {}", collection, e);
                CollectionRepair {
                    collection: collection.to_string(),
                    field: field.to_string(),
                    candidates: 0,
                    updated: 0,
                    error: Some(e.to_string()),
                }
            }
        };
        report.collections.push(entry);
    }

    info!("Total documents updated: {}", report.total_updated());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MemoryStore;

    #[tokio::test]
    async fn test_backfills_from_provenance_then_id() {
        let store = MemoryStore::new();
        store
            .insert_many(
                "users",
                vec![
                    doc! {"_id": 5, "sqlite_user_id": 5},
                    doc! {"_id": 9, "user_id": Bson::Null},
                    doc! {"_id": 11, "user_id": 11},
                ],
            )
            .await
            .unwrap();

        let (candidates, updated) = repair_collection(&store, CollectionName::Users).await.unwrap();
        assert_eq!((candidates, updated), (2, 2));

        let docs = store.documents("users").await;
        assert_eq!(docs[0].get_i32("user_id").unwrap(), 5);
        assert_eq!(docs[1].get_i32("user_id").unwrap(), 9);

        // Second run finds nothing to do.
        let again = repair_collection(&store, CollectionName::Users).await.unwrap();
        assert_eq!(again, (0, 0));
    }

    #[tokio::test]
    async fn test_repair_all_skips_collections_without_rule() {
        let store = MemoryStore::new();
        store
            .insert_many("posts", vec![doc! {"_id": 1, "sqlite_id": 1}, doc! {"_id": 2, "sqlite_id": 2}])
            .await
            .unwrap();
        store.insert_one("sessions", doc! {"_id": 1}).await.unwrap();

        let report = repair_all(
            &store,
            &[CollectionName::Sessions, CollectionName::Posts],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.collections.len(), 1);
        assert_eq!(report.collections[0].collection, "posts");
        assert_eq!(report.collections[0].field, "id");
        assert_eq!(report.total_updated(), 2);
    }
}
