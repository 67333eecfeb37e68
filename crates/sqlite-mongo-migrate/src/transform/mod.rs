//! Relational-to-document transformation.
//!
//! Each record's relational key becomes the document `_id` and is copied to
//! the provenance field. Comma-joined key lists become integer arrays and
//! temporal fields pass through the normalizer. Foreign-key values are not
//! rewritten: because `_id` is the original key, references still resolve.

use std::path::{Path, PathBuf};

use bson::{Bson, Document};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::identifier::DocumentId;
use crate::core::schema::{CollectionName, CollectionSpec, ID_FIELD};
use crate::core::temporal::normalize_fields;
use crate::core::value::{document_to_record, record_to_document, Record};
use crate::error::{MigrateError, Result};
use crate::source::files;

/// A record after transformation, with its identifier typed.
#[derive(Debug, Clone, PartialEq)]
pub struct MigratedRecord {
    /// New primary identifier (the original relational key).
    pub id: DocumentId,

    /// Remaining fields in source order, lists parsed and temporals normalized.
    pub fields: Document,

    /// Provenance field name (`sqlite_<key>`).
    pub provenance_field: &'static str,
}

impl MigratedRecord {
    /// Assemble the document: `_id` first, fields, then provenance.
    pub fn into_document(self) -> Document {
        let mut doc = Document::new();
        doc.insert(ID_FIELD, Bson::from(self.id.clone()));
        for (k, v) in self.fields {
            doc.insert(k, v);
        }
        doc.insert(self.provenance_field, Bson::from(self.id));
        doc
    }
}

/// Parse a list-valued foreign key.
///
/// - `"3,7,12"` gives `[3, 7, 12]`; tokens are trimmed and non-numeric
///   tokens dropped
/// - an array keeps its integral elements
/// - a bare integer gives a one-element list
/// - anything else (null, empty string, absent) gives `[]`
pub fn parse_id_list(value: Option<&Bson>) -> Vec<i64> {
    match value {
        Some(Bson::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit()))
            .filter_map(|t| t.parse::<i64>().ok())
            .collect(),
        Some(Bson::Array(items)) => items
            .iter()
            .filter_map(|item| DocumentId::from_bson(item).and_then(|id| id.as_int()))
            .collect(),
        Some(Bson::Int32(v)) => vec![i64::from(*v)],
        Some(Bson::Int64(v)) => vec![*v],
        _ => Vec::new(),
    }
}

/// Transform one record of `collection`. `index` is used in error messages.
pub fn transform_record(
    collection: CollectionName,
    mut doc: Document,
    index: usize,
) -> Result<MigratedRecord> {
    let spec = collection.spec();

    let key = match doc.remove(spec.key_field) {
        Some(Bson::Null) | None => {
            if doc.contains_key(spec.provenance_field) {
                return Err(MigrateError::AlreadyTransformed {
                    table: spec.name.to_string(),
                    field: spec.provenance_field.to_string(),
                });
            }
            return Err(MigrateError::MissingKey {
                table: spec.name.to_string(),
                field: spec.key_field.to_string(),
                index,
            });
        }
        Some(v) => v,
    };

    let id = DocumentId::from_bson(&key).ok_or_else(|| {
        MigrateError::transform(
            spec.name,
            format!(
                "record {}: key field '{}' has unsupported value {}",
                index, spec.key_field, key
            ),
        )
    })?;

    // Provenance is written by into_document; a stale copy must not survive.
    doc.remove(spec.provenance_field);
    doc.remove(ID_FIELD);

    apply_field_rules(spec, &mut doc);

    Ok(MigratedRecord {
        id,
        fields: doc,
        provenance_field: spec.provenance_field,
    })
}

fn apply_field_rules(spec: &CollectionSpec, doc: &mut Document) {
    for field in spec.list_fields {
        let parsed = parse_id_list(doc.get(*field));
        doc.insert(*field, parsed.into_iter().map(Bson::Int64).collect::<Vec<_>>());
    }
    normalize_fields(doc, spec.temporal_fields);
}

/// Transform all records of a table, preserving order.
///
/// The first failing record aborts the table.
pub fn transform(collection: CollectionName, docs: Vec<Document>) -> Result<Vec<MigratedRecord>> {
    docs.into_iter()
        .enumerate()
        .map(|(i, doc)| transform_record(collection, doc, i))
        .collect()
}

/// Transform intermediate records to intermediate records.
pub fn transform_records(collection: CollectionName, records: Vec<Record>) -> Result<Vec<Record>> {
    let docs = records.into_iter().map(record_to_document).collect();
    Ok(transform(collection, docs)?
        .into_iter()
        .map(|r| document_to_record(r.into_document()))
        .collect())
}

/// Outcome of transforming one table file.
#[derive(Debug, Clone, Serialize)]
pub struct TableTransform {
    /// Table name.
    pub table: String,

    /// Records written (0 when skipped or failed).
    pub records: usize,

    /// Input file was absent.
    pub skipped: bool,

    /// Error message, if the table failed.
    pub error: Option<String>,
}

/// Outcome of a transform run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransformReport {
    /// Per-table outcomes.
    pub tables: Vec<TableTransform>,
}

impl TransformReport {
    /// Total records written.
    pub fn total_records(&self) -> usize {
        self.tables.iter().map(|t| t.records).sum()
    }

    /// Names of tables that failed.
    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.error.is_some())
            .map(|t| t.table.as_str())
            .collect()
    }
}

/// File-level transform phase: `<input_dir>/<t>.json` to `<output_dir>/<t>.json`.
pub struct Transformer {
    input_dir: PathBuf,
    output_dir: PathBuf,
    cancel: CancellationToken,
}

impl Transformer {
    /// Create a transformer between two directories.
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop before the next table once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Transform one table file. Returns `None` if the input file is absent.
    pub fn transform_file(&self, table: CollectionName) -> Result<Option<(usize, PathBuf)>> {
        let input = files::table_file(&self.input_dir, table.as_str());
        if !input.is_file() {
            return Ok(None);
        }
        let records = files::read_records(&input)?;
        let transformed = transform_records(table, records)?;
        let output = files::table_file(&self.output_dir, table.as_str());
        files::write_records(&output, &transformed)?;
        Ok(Some((transformed.len(), output)))
    }

    /// Transform every listed table; per-table failures are logged and recorded.
    pub fn transform_all(&self, tables: &[CollectionName]) -> Result<TransformReport> {
        std::fs::create_dir_all(&self.output_dir)?;

        let mut report = TransformReport::default();
        for table in tables {
            if self.cancel.is_cancelled() {
                info!("Transform cancelled before {}", table);
                return Err(MigrateError::Cancelled);
            }
            let entry = match self.transform_file(*table) {
                Ok(Some((records, path))) => {
                    info!("Transformed {} records for {} to {}", records, table, path.display());
                    TableTransform {
                        table: table.to_string(),
                        records,
                        skipped: false,
                        error: None,
                    }
                }
                Ok(None) => {
                    warn!(
                        "Input file not found for {}: {}",
                        table,
                        files::table_file(&self.input_dir, table.as_str()).display()
                    );
                    TableTransform {
                        table: table.to_string(),
                        records: 0,
                        skipped: true,
                        error: None,
                    }
                }
                Err(e) => {
                    error!("Error transforming {}: {}", table, e);
                    TableTransform {
                        table: table.to_string(),
                        records: 0,
                        skipped: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            report.tables.push(entry);
        }

        info!(
            "Transform complete: {} records, {} failed tables",
            report.total_records(),
            report.failed_tables().len()
        );
        Ok(report)
    }

    /// Output directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_list_parsing() {
        assert_eq!(parse_id_list(Some(&Bson::String("3,7,12".into()))), vec![3, 7, 12]);
        assert_eq!(parse_id_list(Some(&Bson::String(" 3, 7 ,x,12,".into()))), vec![3, 7, 12]);
        assert_eq!(parse_id_list(Some(&Bson::String(String::new()))), Vec::<i64>::new());
        assert_eq!(parse_id_list(None), Vec::<i64>::new());
        assert_eq!(parse_id_list(Some(&Bson::Null)), Vec::<i64>::new());
        assert_eq!(parse_id_list(Some(&Bson::Int32(4))), vec![4]);
        assert_eq!(
            parse_id_list(Some(&Bson::Array(vec![Bson::Int32(1), Bson::Int64(2)]))),
            vec![1, 2]
        );
        assert_eq!(parse_id_list(Some(&Bson::String("-1,2".into()))), vec![2]);
    }

    #[test]
    fn test_users_transform() {
        let docs = vec![
            doc! {"user_id": 5, "name": "A", "created_at": "2024-01-02 03:04:05"},
            doc! {"user_id": 9, "name": "B", "created_at": "not a date"},
        ];
        let out = transform(CollectionName::Users, docs).unwrap();
        assert_eq!(out.len(), 2);

        let first = out[0].clone().into_document();
        assert_eq!(first.get("_id"), Some(&Bson::Int64(5)));
        assert_eq!(first.get("sqlite_user_id"), Some(&Bson::Int64(5)));
        assert!(!first.contains_key("user_id"));
        assert!(matches!(first.get("created_at"), Some(Bson::DateTime(_))));
        assert_eq!(first.keys().next().map(String::as_str), Some("_id"));

        let second = out[1].clone().into_document();
        assert_eq!(second.get_str("created_at").unwrap(), "not a date");
        assert_eq!(out[1].id, DocumentId::Int(9));
    }

    #[test]
    fn test_every_table_keeps_count_and_provenance() {
        for collection in CollectionName::IMPORT_ORDER {
            let spec = collection.spec();
            let mut first = Document::new();
            first.insert(spec.key_field, 10);
            first.insert("note", "first");
            let mut second = Document::new();
            second.insert(spec.key_field, "k-11");
            second.insert("note", "second");
            let docs = vec![first, second];
            let out: Vec<Document> = transform(collection, docs)
                .unwrap()
                .into_iter()
                .map(MigratedRecord::into_document)
                .collect();

            assert_eq!(out.len(), 2, "{}", spec.name);
            for d in &out {
                assert_eq!(d.get(spec.provenance_field), d.get("_id"), "{}", spec.name);
                assert!(!d.contains_key(spec.key_field), "{}", spec.name);
            }
            assert_eq!(out[0].get("_id"), Some(&Bson::Int64(10)), "{}", spec.name);
            assert_eq!(out[0].get_str("note").unwrap(), "first");
            assert_eq!(out[1].get_str("_id").unwrap(), "k-11");
        }
    }

    #[test]
    fn test_token_key_used_directly() {
        let docs = vec![doc! {"task_id": "abc123", "group_ids": "1,2"}];
        let out = transform(CollectionName::ActiveTasks, docs).unwrap();
        let d = out[0].clone().into_document();
        assert_eq!(d.get_str("_id").unwrap(), "abc123");
        assert_eq!(d.get_str("sqlite_task_id").unwrap(), "abc123");
        assert_eq!(
            d.get_array("group_ids").unwrap(),
            &vec![Bson::Int64(1), Bson::Int64(2)]
        );
    }

    #[test]
    fn test_absent_list_becomes_empty() {
        let out = transform(CollectionName::Posts, vec![doc! {"id": 1}]).unwrap();
        let d = out[0].clone().into_document();
        assert!(d.get_array("group_ids").unwrap().is_empty());
    }

    #[test]
    fn test_rerun_is_detected() {
        let docs = vec![doc! {"user_id": 5, "name": "A"}];
        let once: Vec<Document> = transform(CollectionName::Users, docs)
            .unwrap()
            .into_iter()
            .map(MigratedRecord::into_document)
            .collect();

        let err = transform(CollectionName::Users, once).unwrap_err();
        assert!(matches!(err, MigrateError::AlreadyTransformed { .. }));
    }

    #[test]
    fn test_missing_key() {
        let err = transform(CollectionName::Groups, vec![doc! {"id": 1}, doc! {"id": Bson::Null}])
            .unwrap_err();
        match err {
            MigrateError::MissingKey { table, index, .. } => {
                assert_eq!(table, "groups");
                assert_eq!(index, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_records_survive_json_hop() {
        let record = match json!({"id": 3, "timestamp": "2024-05-06 07:08:09", "text": "hi"}) {
            serde_json::Value::Object(m) => m,
            _ => unreachable!(),
        };
        let out = transform_records(CollectionName::Messages, vec![record]).unwrap();
        assert_eq!(out[0]["_id"], json!(3));
        assert_eq!(out[0]["sqlite_id"], json!(3));
        assert_eq!(out[0]["timestamp"], json!("2024-05-06T07:08:09Z"));
    }

    #[test]
    fn test_transform_all_files() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("exported");
        let output = dir.path().join("transformed");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::write(input.join("users.json"), r#"[{"user_id": 1}, {"user_id": 2}]"#).unwrap();
        std::fs::write(input.join("groups.json"), r#"[{"title": "no key"}]"#).unwrap();

        let transformer = Transformer::new(&input, &output);
        let report = transformer
            .transform_all(&[CollectionName::Users, CollectionName::Groups, CollectionName::Posts])
            .unwrap();

        assert_eq!(report.total_records(), 2);
        assert_eq!(report.failed_tables(), vec!["groups"]);
        assert!(report.tables[2].skipped);
        assert_eq!(files::read_records(&output.join("users.json")).unwrap().len(), 2);
        assert!(!output.join("groups.json").exists());
    }
}
