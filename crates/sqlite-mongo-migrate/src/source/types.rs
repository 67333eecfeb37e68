//! Export metadata types.

use serde::Serialize;
use std::path::PathBuf;

/// Column metadata as declared in the SQLite schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Declared type, if any (SQLite columns may be untyped).
    pub decl_type: Option<String>,
}

impl Column {
    /// Whether the declared type is a date/time affinity name.
    ///
    /// SQLite has no native temporal type; `DATE`, `DATETIME` and `TIMESTAMP`
    /// are conventions, matched case-insensitively.
    pub fn is_temporal(&self) -> bool {
        match &self.decl_type {
            Some(t) => {
                let t = t.to_ascii_uppercase();
                t.starts_with("DATE") || t.starts_with("TIMESTAMP")
            }
            None => false,
        }
    }
}

/// Outcome of exporting one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableExport {
    /// Table name.
    pub table: String,

    /// Number of records written.
    pub records: usize,

    /// File written, if the export succeeded.
    pub path: Option<PathBuf>,

    /// Error message, if the export failed.
    pub error: Option<String>,
}

/// Outcome of an export run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    /// Per-table outcomes in export order.
    pub tables: Vec<TableExport>,
}

impl ExportReport {
    /// Total records written across all tables.
    pub fn total_records(&self) -> usize {
        self.tables.iter().map(|t| t.records).sum()
    }

    /// Names of tables that failed to export.
    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.error.is_some())
            .map(|t| t.table.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(decl: Option<&str>) -> Column {
        Column {
            name: "c".into(),
            decl_type: decl.map(String::from),
        }
    }

    #[test]
    fn test_temporal_decl_types() {
        assert!(col(Some("DATETIME")).is_temporal());
        assert!(col(Some("timestamp")).is_temporal());
        assert!(col(Some("Date")).is_temporal());
        assert!(!col(Some("TEXT")).is_temporal());
        assert!(!col(Some("INTEGER")).is_temporal());
        assert!(!col(None).is_temporal());
    }

    #[test]
    fn test_report_totals() {
        let report = ExportReport {
            tables: vec![
                TableExport {
                    table: "users".into(),
                    records: 3,
                    path: Some("out/users.json".into()),
                    error: None,
                },
                TableExport {
                    table: "posts".into(),
                    records: 0,
                    path: None,
                    error: Some("no such table: posts".into()),
                },
            ],
        };
        assert_eq!(report.total_records(), 3);
        assert_eq!(report.failed_tables(), vec!["posts"]);
    }
}
