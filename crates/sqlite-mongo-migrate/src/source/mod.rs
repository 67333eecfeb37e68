//! SQLite source and the export phase.
//!
//! The source is opened read-only and every table is read in one pass with
//! `SELECT *`, so column order in the intermediate file follows the table
//! declaration. Each table is exported independently; a failing table is
//! recorded in the [`ExportReport`] and the remaining tables still run.

pub mod files;
mod types;

pub use types::*;

use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::core::identifier::quote_sqlite;
use crate::core::schema::CollectionName;
use crate::core::temporal::epoch_seconds_to_iso;
use crate::core::traits::TableSource;
use crate::core::value::Record;
use crate::error::{MigrateError, Result};

/// Read-only handle on a SQLite database file.
pub struct SqliteSource {
    conn: Connection,
    path: PathBuf,
}

impl SqliteSource {
    /// Open the database at `path` read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(MigrateError::Config(format!(
                "SQLite database not found: {}",
                path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!("Opened SQLite database {} (read-only)", path.display());

        Ok(Self { conn, path })
    }

    /// Path of the open database.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every row of a table as records.
    pub fn export_table(&self, table: &str) -> Result<Vec<Record>> {
        let sql = format!("SELECT * FROM {}", quote_sqlite(table)?);
        let mut stmt = self.conn.prepare(&sql)?;
        let columns = collect_columns(&stmt);

        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Record::with_capacity(columns.len());
            for (idx, col) in columns.iter().enumerate() {
                let value = convert_value(row.get_ref(idx)?, col)
                    .map_err(|e| MigrateError::export(table, e))?;
                record.insert(col.name.clone(), value);
            }
            records.push(record);
        }

        debug!("Read {} rows from {}", records.len(), table);
        Ok(records)
    }
}

impl TableSource for SqliteSource {
    fn read_table(&self, table: &str) -> Result<Vec<Record>> {
        self.export_table(table)
    }

    fn source_type(&self) -> &str {
        "sqlite"
    }
}

fn collect_columns(stmt: &rusqlite::Statement<'_>) -> Vec<Column> {
    stmt.columns()
        .into_iter()
        .map(|c| Column {
            name: c.name().to_string(),
            decl_type: c.decl_type().map(String::from),
        })
        .collect()
}

/// Convert one SQLite value to its intermediate JSON form.
///
/// Text that is not valid UTF-8 is rejected rather than replaced.
fn convert_value(value: ValueRef<'_>, column: &Column) -> std::result::Result<Value, String> {
    let value = match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => {
            if column.is_temporal() {
                if let Some(iso) = epoch_seconds_to_iso(i as f64) {
                    return Ok(Value::String(iso));
                }
            }
            Value::from(i)
        }
        ValueRef::Real(f) => {
            if column.is_temporal() {
                if let Some(iso) = epoch_seconds_to_iso(f) {
                    return Ok(Value::String(iso));
                }
            }
            serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::String(text.to_string()),
            Err(e) => return Err(format!("column {}: invalid UTF-8 text: {}", column.name, e)),
        },
        ValueRef::Blob(bytes) => Value::String(hex::encode(bytes)),
    };
    Ok(value)
}

/// Export phase: tables to `<export_dir>/<table>.json`.
pub struct Exporter<'a> {
    source: &'a dyn TableSource,
    export_dir: PathBuf,
    cancel: CancellationToken,
}

impl<'a> Exporter<'a> {
    /// Create an exporter writing into `export_dir`.
    pub fn new(source: &'a dyn TableSource, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            export_dir: export_dir.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop before the next table once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Export one table and write its file. Returns the record count.
    pub fn export_one(&self, table: CollectionName) -> Result<(usize, PathBuf)> {
        let records = self
            .source
            .read_table(table.as_str())
            .map_err(|e| match e {
                MigrateError::Export { .. } => e,
                other => MigrateError::export(table.as_str(), other.to_string()),
            })?;
        let path = files::table_file(&self.export_dir, table.as_str());
        files::write_records(&path, &records)?;
        Ok((records.len(), path))
    }

    /// Export every listed table. Per-table failures are logged and recorded.
    pub fn export_all(&self, tables: &[CollectionName]) -> Result<ExportReport> {
        std::fs::create_dir_all(&self.export_dir)?;
        info!(
            "Exporting {} tables from {} source to {}",
            tables.len(),
            self.source.source_type(),
            self.export_dir.display()
        );

        let mut report = ExportReport::default();
        for table in tables {
            if self.cancel.is_cancelled() {
                info!("Export cancelled before {}", table);
                return Err(MigrateError::Cancelled);
            }
            let entry = match self.export_one(*table) {
                Ok((records, path)) => {
                    info!(
                        "Exported {} records from {} to {}",
                        records,
                        table,
                        path.display()
                    );
                    TableExport {
                        table: table.to_string(),
                        records,
                        path: Some(path),
                        error: None,
                    }
                }
                Err(e) => {
                    error!("Error exporting {}: {}", table, e);
                    TableExport {
                        table: table.to_string(),
                        records: 0,
                        path: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            report.tables.push(entry);
        }

        info!(
            "Export complete: {} records, {} failed tables",
            report.total_records(),
            report.failed_tables().len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn fixture(dir: &Path) -> PathBuf {
        let path = dir.join("bot.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (
                 user_id INTEGER PRIMARY KEY,
                 name TEXT,
                 created_at DATETIME,
                 avatar BLOB,
                 balance REAL
             );
             INSERT INTO users VALUES (5, 'A', '2024-01-02 03:04:05', NULL, 1.5);
             INSERT INTO users VALUES (9, 'B', 0, X'CAFE', NULL);
             CREATE TABLE groups (id INTEGER PRIMARY KEY, title TEXT);",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = SqliteSource::open(dir.path().join("nope.db"));
        assert!(matches!(result, Err(MigrateError::Config(_))));
    }

    #[test]
    fn test_export_table_values() {
        let dir = TempDir::new().unwrap();
        let source = SqliteSource::open(fixture(dir.path())).unwrap();

        let records = source.export_table("users").unwrap();
        assert_eq!(records.len(), 2);

        let keys: Vec<&str> = records[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["user_id", "name", "created_at", "avatar", "balance"]);

        assert_eq!(records[0]["user_id"], json!(5));
        assert_eq!(records[0]["created_at"], json!("2024-01-02 03:04:05"));
        assert_eq!(records[0]["balance"], json!(1.5));
        assert_eq!(records[1]["created_at"], json!("1970-01-01T00:00:00Z"));
        assert_eq!(records[1]["avatar"], json!("cafe"));
        assert_eq!(records[1]["balance"], Value::Null);
    }

    #[test]
    fn test_export_all_isolates_failures() {
        let dir = TempDir::new().unwrap();
        let source = SqliteSource::open(fixture(dir.path())).unwrap();
        let out = dir.path().join("exported");

        let exporter = Exporter::new(&source, &out);
        let report = exporter
            .export_all(&[
                CollectionName::Users,
                CollectionName::Posts,
                CollectionName::Groups,
            ])
            .unwrap();

        assert_eq!(report.tables.len(), 3);
        assert_eq!(report.failed_tables(), vec!["posts"]);
        assert_eq!(report.total_records(), 2);
        assert!(out.join("users.json").is_file());
        assert!(out.join("groups.json").is_file());
        assert!(!out.join("posts.json").exists());

        let groups = files::read_records(&out.join("groups.json")).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn test_export_all_honours_cancel() {
        let dir = TempDir::new().unwrap();
        let source = SqliteSource::open(fixture(dir.path())).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let exporter = Exporter::new(&source, dir.path().join("out")).with_cancel(cancel);
        let result = exporter.export_all(&[CollectionName::Users]);
        assert!(matches!(result, Err(MigrateError::Cancelled)));
    }

    #[test]
    fn test_invalid_utf8_text_fails_table() {
        let dir = TempDir::new().unwrap();
        let path = fixture(dir.path());
        Connection::open(&path)
            .unwrap()
            .execute_batch("INSERT INTO groups VALUES (1, CAST(X'FF' AS TEXT));")
            .unwrap();
        let source = SqliteSource::open(&path).unwrap();

        match source.export_table("groups") {
            Err(MigrateError::Export { table, message }) => {
                assert_eq!(table, "groups");
                assert!(message.contains("title"), "{message}");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let out = dir.path().join("exported");
        let report = Exporter::new(&source, &out)
            .export_all(&[CollectionName::Users, CollectionName::Groups])
            .unwrap();
        assert_eq!(report.failed_tables(), vec!["groups"]);
        assert!(!out.join("groups.json").exists());
    }

    #[test]
    fn test_source_is_read_only() {
        let dir = TempDir::new().unwrap();
        let source = SqliteSource::open(fixture(dir.path())).unwrap();
        let result = source.conn.execute("DELETE FROM users", []);
        assert!(result.is_err());
    }
}
