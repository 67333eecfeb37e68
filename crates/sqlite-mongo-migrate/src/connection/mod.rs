//! Connection management for the document store.
//!
//! A [`Database`] is constructed once, verified with a ping, and then shared
//! (usually behind an `Arc`) by every collection handle. There is no retry
//! and no reconnect: an unreachable store fails construction immediately.
//! [`LazyDatabase`] defers construction to first use.

use std::sync::Arc;
use std::time::Instant;

use bson::oid::ObjectId;
use bson::{doc, Bson};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::core::identifier::DocumentId;
use crate::core::schema::{CollectionName, IdStrategy, ID_FIELD};
use crate::core::traits::{DocumentStore, QueryOptions};
use crate::error::{MigrateError, Result};
use crate::shim::ShimmedCollection;
use crate::target::MongoStore;

/// Result of a liveness check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    /// Store answered the ping.
    pub healthy: bool,

    /// Store type ("mongodb", "memory").
    pub store_type: String,

    /// Database name.
    pub database: String,

    /// Round-trip time of the ping in milliseconds.
    pub latency_ms: u64,

    /// Failure message, if any.
    pub error: Option<String>,
}

/// Process-wide handle on one document-store database.
pub struct Database {
    store: Arc<dyn DocumentStore>,
    name: String,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("store_type", &self.store.store_type())
            .field("name", &self.name)
            .finish()
    }
}

impl Database {
    /// Connect to the configured MongoDB endpoint and verify it with a ping.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let store = MongoStore::connect(config).await?;
        Self::with_store(Arc::new(store), config.database.clone()).await
    }

    /// Wrap an existing store and verify it with a ping.
    pub async fn with_store(store: Arc<dyn DocumentStore>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if let Err(e) = store.ping().await {
            warn!("Failed to connect to {} database {}: {}", store.store_type(), name, e);
            return Err(match e {
                MigrateError::Connection(_) => e,
                other => MigrateError::Connection(other.to_string()),
            });
        }
        info!("Connected to {} database: {}", store.store_type(), name);
        Ok(Self { store, name })
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Underlying store, shared with every collection handle.
    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }

    /// Collection handle with relational-style verbs.
    pub fn collection(&self, name: &str) -> ShimmedCollection {
        ShimmedCollection::new(self.store(), name)
    }

    /// Next identifier for a collection.
    ///
    /// Token-keyed collections get `<prefix>_<unix-seconds>_<object-id>`.
    /// Integer-keyed collections get the current maximum integer `_id` plus
    /// one; an empty collection, a non-integer maximum, a maximum of
    /// `i64::MAX` or a failed query gives 1.
    pub async fn next_identifier(&self, collection: &str) -> DocumentId {
        let strategy = collection
            .parse::<CollectionName>()
            .map(|c| c.spec().id_strategy)
            .unwrap_or(IdStrategy::Sequential);

        match strategy {
            IdStrategy::TimeToken { prefix } => DocumentId::Text(format!(
                "{}_{}_{}",
                prefix,
                Utc::now().timestamp(),
                ObjectId::new().to_hex()
            )),
            IdStrategy::Sequential => {
                let max = self.max_int_id(collection).await;
                match max.checked_add(1) {
                    Some(next) => DocumentId::Int(next),
                    None => {
                        warn!("Maximum _id of {} is {}; no integer successor", collection, max);
                        DocumentId::Int(1)
                    }
                }
            }
        }
    }

    async fn max_int_id(&self, collection: &str) -> i64 {
        let options = QueryOptions::sorted(doc! {ID_FIELD: -1}, Some(1));
        match self.store.find(collection, doc! {}, options).await {
            Ok(docs) => match docs.first().and_then(|d| d.get(ID_FIELD)) {
                Some(Bson::Int32(v)) => i64::from(*v),
                Some(Bson::Int64(v)) => *v,
                _ => 0,
            },
            Err(e) => {
                warn!("Could not read maximum _id of {}: {}", collection, e);
                0
            }
        }
    }

    /// Ping the store and measure latency. Never fails.
    pub async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let result = self.store.ping().await;
        HealthCheckResult {
            healthy: result.is_ok(),
            store_type: self.store.store_type().to_string(),
            database: self.name.clone(),
            latency_ms: start.elapsed().as_millis() as u64,
            error: result.err().map(|e| e.to_string()),
        }
    }

    /// Shut down the client.
    pub async fn close(&self) {
        self.store.close().await;
        info!("{} connection closed", self.store.store_type());
    }
}

/// Connect to the configured endpoint and report liveness. Never fails.
pub async fn health_check(config: &TargetConfig) -> HealthCheckResult {
    let start = Instant::now();
    match Database::connect(config).await {
        Ok(db) => {
            let mut result = db.health_check().await;
            result.latency_ms = start.elapsed().as_millis() as u64;
            db.close().await;
            result
        }
        Err(e) => HealthCheckResult {
            healthy: false,
            store_type: "mongodb".to_string(),
            database: config.database.clone(),
            latency_ms: start.elapsed().as_millis() as u64,
            error: Some(e.to_string()),
        },
    }
}

enum LazySource {
    Config(TargetConfig),
    Store {
        store: Arc<dyn DocumentStore>,
        name: String,
    },
}

/// A [`Database`] constructed on first use and reused afterwards.
///
/// A failed construction is returned to the caller and not cached, so a
/// later call tries again.
pub struct LazyDatabase {
    source: LazySource,
    cell: OnceCell<Arc<Database>>,
}

impl LazyDatabase {
    /// Lazily connect to the configured MongoDB endpoint.
    pub fn new(config: TargetConfig) -> Self {
        Self {
            source: LazySource::Config(config),
            cell: OnceCell::new(),
        }
    }

    /// Lazily wrap an existing store.
    pub fn from_store(store: Arc<dyn DocumentStore>, name: impl Into<String>) -> Self {
        Self {
            source: LazySource::Store {
                store,
                name: name.into(),
            },
            cell: OnceCell::new(),
        }
    }

    /// The shared database, constructing it on first call.
    pub async fn get(&self) -> Result<Arc<Database>> {
        let db = self
            .cell
            .get_or_try_init(|| async {
                debug!("Initializing database connection on first use");
                let db = match &self.source {
                    LazySource::Config(config) => Database::connect(config).await?,
                    LazySource::Store { store, name } => {
                        Database::with_store(Arc::clone(store), name.clone()).await?
                    }
                };
                Ok::<_, MigrateError>(Arc::new(db))
            })
            .await?;
        Ok(Arc::clone(db))
    }

    /// Whether the connection has been constructed.
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// Close the connection if it was ever opened.
    pub async fn close(&self) {
        if let Some(db) = self.cell.get() {
            db.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MemoryStore;

    async fn database(store: &MemoryStore) -> Database {
        Database::with_store(Arc::new(store.clone()), "telegram_bot")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_fails_fast_when_unreachable() {
        let store = MemoryStore::new();
        store.set_unreachable(true).await;
        let result = Database::with_store(Arc::new(store), "telegram_bot").await;
        assert!(matches!(result, Err(MigrateError::Connection(_))));
    }

    #[tokio::test]
    async fn test_next_identifier_empty_collection() {
        let store = MemoryStore::new();
        let db = database(&store).await;
        assert_eq!(db.next_identifier("users").await, DocumentId::Int(1));
    }

    #[tokio::test]
    async fn test_next_identifier_after_max() {
        let store = MemoryStore::new();
        store
            .insert_many("posts", vec![doc! {"_id": 3}, doc! {"_id": 41_i64}, doc! {"_id": 17}])
            .await
            .unwrap();
        let db = database(&store).await;
        assert_eq!(db.next_identifier("posts").await, DocumentId::Int(42));
    }

    #[tokio::test]
    async fn test_next_identifier_non_integer_max() {
        let store = MemoryStore::new();
        store
            .insert_many("groups", vec![doc! {"_id": 5}, doc! {"title": "generated id"}])
            .await
            .unwrap();
        let db = database(&store).await;
        // Object ids sort above numbers, so the maximum is not an integer.
        assert_eq!(db.next_identifier("groups").await, DocumentId::Int(1));
    }

    #[tokio::test]
    async fn test_next_identifier_on_query_failure() {
        let store = MemoryStore::new();
        store.insert_one("users", doc! {"_id": 10}).await.unwrap();
        let db = database(&store).await;
        store.set_unreachable(true).await;
        assert_eq!(db.next_identifier("users").await, DocumentId::Int(1));
    }

    #[tokio::test]
    async fn test_next_identifier_at_integer_limit() {
        let store = MemoryStore::new();
        store
            .insert_many("users", vec![doc! {"_id": 7}, doc! {"_id": i64::MAX}])
            .await
            .unwrap();
        let db = database(&store).await;
        assert_eq!(db.next_identifier("users").await, DocumentId::Int(1));
    }

    #[tokio::test]
    async fn test_next_identifier_token() {
        let store = MemoryStore::new();
        let db = database(&store).await;
        let id = db.next_identifier("active_tasks").await;
        let DocumentId::Text(token) = id else {
            panic!("expected a text token, got {id:?}");
        };
        let parts: Vec<&str> = token.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "task");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 24);
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = MemoryStore::new();
        let db = database(&store).await;
        let ok = db.health_check().await;
        assert!(ok.healthy);
        assert_eq!(ok.store_type, "memory");

        store.set_unreachable(true).await;
        let down = db.health_check().await;
        assert!(!down.healthy);
        assert!(down.error.is_some());
    }

    #[tokio::test]
    async fn test_lazy_database_constructs_once() {
        let store = MemoryStore::new();
        let lazy = LazyDatabase::from_store(Arc::new(store), "telegram_bot");
        assert!(!lazy.is_initialized());

        let first = lazy.get().await.unwrap();
        let second = lazy.get().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(lazy.is_initialized());
    }

    #[tokio::test]
    async fn test_lazy_database_does_not_cache_failure() {
        let store = MemoryStore::new();
        store.set_unreachable(true).await;
        let lazy = LazyDatabase::from_store(Arc::new(store.clone()), "telegram_bot");

        assert!(lazy.get().await.is_err());
        assert!(!lazy.is_initialized());

        store.set_unreachable(false).await;
        assert!(lazy.get().await.is_ok());
    }

    #[tokio::test]
    async fn test_lazy_database_without_uri() {
        let config = TargetConfig {
            uri: None,
            database: "telegram_bot".into(),
        };
        let lazy = LazyDatabase::new(config);
        assert!(matches!(lazy.get().await, Err(MigrateError::Config(_))));
    }
}
