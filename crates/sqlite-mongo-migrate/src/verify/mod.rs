//! Post-import verification.
//!
//! - [`verify_counts`] counts documents per collection and compares them with
//!   what the importer reported. Mismatches are reported, never retried.
//! - [`check_references`] resolves every declared foreign key against the
//!   referenced collection's `_id`s. This works because `_id` keeps the
//!   original relational key.

mod types;

pub use types::*;

use std::collections::{HashMap, HashSet};

use bson::{doc, Bson};
use tracing::{info, warn};

use crate::core::identifier::DocumentId;
use crate::core::schema::{CollectionName, ID_FIELD};
use crate::core::traits::{DocumentStore, QueryOptions};
use crate::error::Result;
use crate::target::query::lookup;

/// Count documents in each collection and compare with `expected`.
///
/// A failed count is recorded on that collection; the pass continues.
pub async fn verify_counts(
    store: &dyn DocumentStore,
    collections: &[CollectionName],
    expected: &HashMap<CollectionName, u64>,
) -> VerifyReport {
    info!("Verification - document counts per collection:");
    let mut report = VerifyReport::default();

    for collection in collections {
        let expected = expected.get(collection).copied();
        let entry = match store.count_documents(collection.as_str(), doc! {}).await {
            Ok(actual) => {
                match expected {
                    Some(e) if e != actual => warn!(
                        "{}: expected={} actual={} (MISMATCH)",
                        collection, e, actual
                    ),
                    _ => info!("{}: {} documents", collection, actual),
                }
                CollectionCount {
                    collection: collection.to_string(),
                    expected,
                    actual: Some(actual),
                    error: None,
                }
            }
            Err(e) => {
                warn!("{}: count failed: {}", collection, e);
                CollectionCount {
                    collection: collection.to_string(),
                    expected,
                    actual: None,
                    error: Some(e.to_string()),
                }
            }
        };
        report.collections.push(entry);
    }

    report
}

async fn id_set(store: &dyn DocumentStore, collection: CollectionName) -> Result<HashSet<DocumentId>> {
    let docs = store
        .find(collection.as_str(), doc! {}, QueryOptions::default())
        .await?;
    Ok(docs
        .iter()
        .filter_map(|d| d.get(ID_FIELD))
        .filter_map(DocumentId::from_bson)
        .collect())
}

/// Check the declared foreign keys of `collections`.
///
/// Null and absent values are not references and are skipped. Values that
/// cannot be an identifier at all (e.g. a boolean) count as dangling.
pub async fn check_references(
    store: &dyn DocumentStore,
    collections: &[CollectionName],
) -> Result<ReferenceReport> {
    let mut known: HashMap<CollectionName, HashSet<DocumentId>> = HashMap::new();
    let mut report = ReferenceReport::default();

    for collection in collections {
        let spec = collection.spec();
        if spec.foreign_keys.is_empty() {
            continue;
        }
        let docs = store
            .find(collection.as_str(), doc! {}, QueryOptions::default())
            .await?;

        for fk in spec.foreign_keys {
            if !known.contains_key(&fk.references) {
                let ids = id_set(store, fk.references).await?;
                known.insert(fk.references, ids);
            }
            let targets = &known[&fk.references];

            let mut check = ReferenceCheck {
                collection: collection.to_string(),
                field: fk.field.to_string(),
                references: fk.references.to_string(),
                checked: 0,
                dangling: 0,
                samples: Vec::new(),
            };

            for d in &docs {
                let values: Vec<&Bson> = match lookup(d, fk.field) {
                    None | Some(Bson::Null) => continue,
                    Some(Bson::Array(items)) if fk.is_list => items.iter().collect(),
                    Some(v) => vec![v],
                };
                for value in values {
                    check.checked += 1;
                    let resolved = DocumentId::from_bson(value)
                        .map_or(false, |id| targets.contains(&id));
                    if !resolved {
                        check.dangling += 1;
                        if check.samples.len() < MAX_SAMPLES {
                            check.samples.push(value.clone());
                        }
                    }
                }
            }

            if check.dangling > 0 {
                warn!(
                    "{}.{}: {} of {} references to {} do not resolve",
                    check.collection, check.field, check.dangling, check.checked, check.references
                );
            } else {
                info!(
                    "{}.{}: {} references to {} resolve",
                    check.collection, check.field, check.checked, check.references
                );
            }
            report.checks.push(check);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MemoryStore;

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_many("users", vec![doc! {"_id": 5}, doc! {"_id": 9}])
            .await
            .unwrap();
        store
            .insert_many("groups", vec![doc! {"_id": 3}, doc! {"_id": 7}])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_verify_counts() {
        let store = store().await;
        let expected = HashMap::from([(CollectionName::Users, 2), (CollectionName::Groups, 3)]);
        let report = verify_counts(
            &store,
            &[CollectionName::Users, CollectionName::Groups, CollectionName::Posts],
            &expected,
        )
        .await;

        assert_eq!(report.collections.len(), 3);
        assert_eq!(report.total_documents(), 4);
        let mismatches = report.mismatches();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].collection, "groups");
        assert_eq!(report.collections[2].actual, Some(0));
    }

    #[tokio::test]
    async fn test_verify_counts_records_failures() {
        let store = store().await;
        store.set_unreachable(true).await;
        let report = verify_counts(&store, &[CollectionName::Users], &HashMap::new()).await;
        assert!(report.collections[0].error.is_some());
        assert!(!report.is_consistent());
    }

    #[tokio::test]
    async fn test_references_resolve_through_original_keys() {
        let store = store().await;
        store
            .insert_many(
                "posts",
                vec![
                    doc! {"_id": 1, "group_ids": [3, 7]},
                    doc! {"_id": 2, "group_ids": [7, 8]},
                    doc! {"_id": 4, "group_ids": []},
                ],
            )
            .await
            .unwrap();
        store
            .insert_many(
                "messages",
                vec![
                    doc! {"_id": 1, "user_id": 5_i64, "post_id": 1},
                    doc! {"_id": 2, "user_id": 404, "post_id": Bson::Null},
                ],
            )
            .await
            .unwrap();

        let report = check_references(
            &store,
            &[CollectionName::Users, CollectionName::Posts, CollectionName::Messages],
        )
        .await
        .unwrap();

        // posts.group_ids, messages.user_id, messages.post_id
        assert_eq!(report.checks.len(), 3);
        let groups = &report.checks[0];
        assert_eq!((groups.checked, groups.dangling), (4, 1));
        assert_eq!(groups.samples, vec![Bson::Int32(8)]);

        let users = &report.checks[1];
        assert_eq!((users.checked, users.dangling), (2, 1));

        let posts = &report.checks[2];
        assert_eq!((posts.checked, posts.dangling), (1, 0));
        assert_eq!(report.total_dangling(), 2);
    }
}
