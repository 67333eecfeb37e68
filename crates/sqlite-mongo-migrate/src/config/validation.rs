//! Configuration validation.

use super::{Config, TargetConfig, DEFAULT_LOCAL_URI};
use crate::core::schema::CollectionName;
use crate::error::{MigrateError, Result};
use tracing::warn;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.source.path.as_os_str().is_empty() {
        return Err(MigrateError::Config("source.path is required".into()));
    }
    if config.target.database.trim().is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.migration.export_dir.as_os_str().is_empty() {
        return Err(MigrateError::Config(
            "migration.export_dir is required".into(),
        ));
    }
    if config.migration.transform_dir.as_os_str().is_empty() {
        return Err(MigrateError::Config(
            "migration.transform_dir is required".into(),
        ));
    }
    if config.migration.export_dir == config.migration.transform_dir {
        return Err(MigrateError::Config(
            "migration.export_dir and migration.transform_dir must differ".into(),
        ));
    }

    for name in &config.migration.collections {
        name.parse::<CollectionName>().map_err(|_| {
            MigrateError::Config(format!(
                "migration.collections contains unknown collection '{}'",
                name
            ))
        })?;
    }

    if let Some(uri) = &config.target.uri {
        if !uri.starts_with("mongodb://") && !uri.starts_with("mongodb+srv://") {
            return Err(MigrateError::Config(
                "target.uri must start with mongodb:// or mongodb+srv://".into(),
            ));
        }
    }

    Ok(())
}

/// Validate that a store endpoint is present before touching the store.
pub fn require_store(target: &TargetConfig) -> Result<()> {
    let uri = target.uri()?;
    if uri == DEFAULT_LOCAL_URI {
        warn!("MONGODB_URI is using the default localhost endpoint");
    }
    Ok(())
}
