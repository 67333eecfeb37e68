//! # sqlite-mongo-migrate
//!
//! One-time migration of a fixed SQLite schema into MongoDB, plus the
//! relational-style collection layer application code uses afterwards.
//!
//! - **Export** every table to a JSON array file, preserving column order
//! - **Transform** primary keys into `_id` with a `sqlite_<key>` provenance copy
//! - **Import** each collection with a full replace, in dependency order
//! - **Verify** document counts and foreign-key resolution
//! - **Shim** `find_one`/`find`/`update_one`/... with implicit `$set` and
//!   deterministic identifier generation
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqlite_mongo_migrate::{Config, Database, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> sqlite_mongo_migrate::Result<()> {
//!     let config = Config::resolve(None)?;
//!     let db = Database::connect(config.require_store()?).await?;
//!     let result = Orchestrator::new(config)?.run(&db).await?;
//!     println!("Imported {} documents", result.documents_imported);
//!
//!     let users = db.collection("users");
//!     let user = users.find_one(bson::doc! {"_id": 5}).await?;
//!     println!("{:?}", user);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod shim;
pub mod source;
pub mod target;
pub mod transform;
pub mod verify;

// Re-exports for convenient access
pub use crate::core::{CollectionName, DocumentId, DocumentStore};
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig};
pub use connection::{health_check, Database, HealthCheckResult, LazyDatabase};
pub use error::{MigrateError, Result};
pub use orchestrator::{MigrationResult, Orchestrator};
pub use shim::{CompatCollection, ShimmedCollection};
pub use target::{MemoryStore, MongoStore};
