//! Migration orchestrator - phase coordinator.
//!
//! A full run is export, transform, import and verify in that order. Each
//! phase can also be run on its own. Per-collection failures are recorded in
//! the phase reports and never abort the run; connectivity failures and
//! cancellation do.

mod import;
mod repair;

pub use import::{import_all, import_collection, CollectionImport, ImportReport};
pub use repair::{repair_all, repair_collection, CollectionRepair, RepairReport};

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::connection::Database;
use crate::core::schema::CollectionName;
use crate::error::{MigrateError, Result};
use crate::source::{ExportReport, Exporter, SqliteSource};
use crate::transform::{TransformReport, Transformer};
use crate::verify::{self, ReferenceReport, VerifyReport};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    collections: Vec<CollectionName>,
    cancel: CancellationToken,
}

/// Result of a full migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: "completed" or "completed_with_errors".
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Collections processed.
    pub collections_total: usize,

    /// Documents inserted across all collections.
    pub documents_imported: u64,

    /// Collections that failed in any phase.
    pub failed_collections: Vec<String>,

    /// Export phase outcome.
    pub export: ExportReport,

    /// Transform phase outcome.
    pub transform: TransformReport,

    /// Import phase outcome.
    pub import: ImportReport,

    /// Count verification outcome.
    pub verify: VerifyReport,
}

impl Orchestrator {
    /// Create an orchestrator for the collections selected in `config`.
    pub fn new(config: Config) -> Result<Self> {
        let collections = config.selected_collections()?;
        Ok(Self {
            config,
            collections,
            cancel: CancellationToken::new(),
        })
    }

    /// Stop before the next collection once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Effective configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Collections handled by this orchestrator, in import order.
    pub fn collections(&self) -> &[CollectionName] {
        &self.collections
    }

    /// Export phase: SQLite tables to the export directory.
    pub async fn export(&self) -> Result<ExportReport> {
        let path = self.config.source.path.clone();
        let dir = self.config.migration.export_dir.clone();
        let tables = self.collections.clone();
        let cancel = self.cancel.clone();

        tokio::task::spawn_blocking(move || {
            let source = SqliteSource::open(&path)?;
            Exporter::new(&source, dir)
                .with_cancel(cancel)
                .export_all(&tables)
        })
        .await
        .map_err(|e| MigrateError::export("*", e.to_string()))?
    }

    /// Transform phase: export directory to transform directory.
    pub async fn transform(&self) -> Result<TransformReport> {
        let transformer = Transformer::new(
            self.config.migration.export_dir.clone(),
            self.config.migration.transform_dir.clone(),
        )
        .with_cancel(self.cancel.clone());
        let tables = self.collections.clone();

        tokio::task::spawn_blocking(move || transformer.transform_all(&tables))
            .await
            .map_err(|e| MigrateError::transform("*", e.to_string()))?
    }

    /// Import phase: transformed files into the store, full replace.
    pub async fn import(&self, db: &Database) -> Result<ImportReport> {
        let store = db.store();
        import_all(
            store.as_ref(),
            &self.config.migration.transform_dir,
            &self.collections,
            &self.cancel,
        )
        .await
    }

    /// Count documents per collection, comparing with `expected` where known.
    pub async fn verify(
        &self,
        db: &Database,
        expected: &HashMap<CollectionName, u64>,
    ) -> VerifyReport {
        let store = db.store();
        verify::verify_counts(store.as_ref(), &self.collections, expected).await
    }

    /// Check that declared foreign keys resolve.
    pub async fn check_references(&self, db: &Database) -> Result<ReferenceReport> {
        let store = db.store();
        verify::check_references(store.as_ref(), &self.collections).await
    }

    /// Backfill relational key fields on migrated documents.
    pub async fn repair(&self, db: &Database) -> Result<RepairReport> {
        let store = db.store();
        repair_all(store.as_ref(), &self.collections, &self.cancel).await
    }

    /// Run export, transform, import and verify.
    pub async fn run(&self, db: &Database) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run: {}", run_id);
        info!(
            "Target database: {} ({} collections)",
            db.name(),
            self.collections.len()
        );

        info!("Phase 1: Exporting SQLite tables");
        let export = self.export().await?;

        info!("Phase 2: Transforming records");
        let transform = self.transform().await?;

        info!("Phase 3: Importing into document store");
        let import = self.import(db).await?;

        info!("Phase 4: Verifying document counts");
        let expected: HashMap<CollectionName, u64> = self
            .collections
            .iter()
            .zip(import.collections.iter())
            .filter(|(_, c)| c.error.is_none() && !c.skipped)
            .map(|(name, c)| (*name, c.imported))
            .collect();
        let verify = self.verify(db, &expected).await;

        let mut failed: BTreeSet<String> = BTreeSet::new();
        failed.extend(export.failed_tables().into_iter().map(String::from));
        failed.extend(transform.failed_tables().into_iter().map(String::from));
        failed.extend(import.failed_collections().into_iter().map(String::from));
        failed.extend(verify.mismatches().into_iter().map(|c| c.collection.clone()));
        let failed_collections: Vec<String> = failed.into_iter().collect();

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let status = if failed_collections.is_empty() {
            "completed"
        } else {
            warn!(
                "Collections with errors: {}",
                failed_collections.join(", ")
            );
            "completed_with_errors"
        };

        let result = MigrationResult {
            run_id,
            status: status.to_string(),
            duration_seconds: duration,
            started_at,
            completed_at,
            collections_total: self.collections.len(),
            documents_imported: import.total_imported(),
            failed_collections,
            export,
            transform,
            import,
            verify,
        };

        info!(
            "Migration {}: {} collections, {} documents in {:.1}s",
            result.status,
            result.collections_total,
            result.documents_imported,
            result.duration_seconds
        );

        Ok(result)
    }
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
