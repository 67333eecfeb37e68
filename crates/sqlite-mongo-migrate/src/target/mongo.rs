//! MongoDB document store.

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::options::{ClientOptions, FindOptions, UpdateOptions};
use mongodb::{Client, Collection, Database};
use tracing::{debug, info};

use crate::config::TargetConfig;
use crate::core::traits::{DocumentStore, QueryOptions, UpdateOutcome};
use crate::error::{MigrateError, Result};

/// Application name reported to the server.
const APP_NAME: &str = "sqlite-mongo-migrate";

/// MongoDB-backed store for one database.
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    /// Build a client for the configured endpoint.
    ///
    /// The driver connects lazily; callers that need fail-fast behaviour
    /// follow this with [`DocumentStore::ping`].
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let uri = config.uri()?;
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| MigrateError::Config(format!("invalid MongoDB URI: {}", e)))?;
        options.app_name = Some(APP_NAME.to_string());

        let client = Client::with_options(options)?;
        let db = client.database(&config.database);

        info!(
            "MongoDB client created for {} (database '{}')",
            config.display_uri(),
            config.database
        );
        Ok(Self { client, db })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }

    /// Database name.
    pub fn database_name(&self) -> &str {
        self.db.name()
    }
}

fn store_err(collection: &str, err: mongodb::error::Error) -> MigrateError {
    MigrateError::store(collection, err.to_string())
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn ping(&self) -> Result<()> {
        self.client
            .database("admin")
            .run_command(doc! {"ping": 1}, None)
            .await
            .map_err(|e| MigrateError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn find_one(&self, collection: &str, filter: Document) -> Result<Option<Document>> {
        self.collection(collection)
            .find_one(filter, None)
            .await
            .map_err(|e| store_err(collection, e))
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: QueryOptions,
    ) -> Result<Vec<Document>> {
        let limit = options.effective_limit();
        let find_options = FindOptions::builder()
            .sort(options.sort)
            .limit(limit)
            .build();
        let cursor = self
            .collection(collection)
            .find(filter, find_options)
            .await
            .map_err(|e| store_err(collection, e))?;
        cursor
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| store_err(collection, e))
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<Bson> {
        let result = self
            .collection(collection)
            .insert_one(doc, None)
            .await
            .map_err(|e| store_err(collection, e))?;
        Ok(result.inserted_id)
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<Bson>> {
        let count = docs.len();
        let result = self
            .collection(collection)
            .insert_many(docs, None)
            .await
            .map_err(|e| store_err(collection, e))?;

        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(i, _)| *i);
        debug!("Inserted {} of {} documents into {}", ids.len(), count, collection);
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        let options = UpdateOptions::builder().upsert(upsert).build();
        let result = self
            .collection(collection)
            .update_one(filter, update, options)
            .await
            .map_err(|e| store_err(collection, e))?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateOutcome> {
        let result = self
            .collection(collection)
            .update_many(filter, update, None)
            .await
            .map_err(|e| store_err(collection, e))?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<u64> {
        let result = self
            .collection(collection)
            .delete_one(filter, None)
            .await
            .map_err(|e| store_err(collection, e))?;
        Ok(result.deleted_count)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64> {
        let result = self
            .collection(collection)
            .delete_many(filter, None)
            .await
            .map_err(|e| store_err(collection, e))?;
        Ok(result.deleted_count)
    }

    async fn count_documents(&self, collection: &str, filter: Document) -> Result<u64> {
        self.collection(collection)
            .count_documents(filter, None)
            .await
            .map_err(|e| store_err(collection, e))
    }

    fn store_type(&self) -> &str {
        "mongodb"
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
        info!("MongoDB connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_requires_uri() {
        let config = TargetConfig {
            uri: None,
            database: "telegram_bot".into(),
        };
        let result = MongoStore::connect(&config).await;
        assert!(matches!(result, Err(MigrateError::Config(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_uri() {
        let config = TargetConfig {
            uri: Some("postgres://nope".into()),
            database: "telegram_bot".into(),
        };
        let result = MongoStore::connect(&config).await;
        assert!(matches!(result, Err(MigrateError::Config(_))));
    }

    #[tokio::test]
    async fn test_client_creation_is_lazy() {
        // No server is contacted until the first operation.
        let config = TargetConfig {
            uri: Some("mongodb://127.0.0.1:1/".into()),
            database: "telegram_bot".into(),
        };
        let store = MongoStore::connect(&config).await.unwrap();
        assert_eq!(store.database_name(), "telegram_bot");
        assert_eq!(store.store_type(), "mongodb");
    }
}
