//! Value conversions between relational rows, intermediate JSON and BSON.
//!
//! The intermediate files are plain JSON, so temporal values travel as
//! ISO-8601 strings and store-native types (object ids, binaries) are
//! rendered as strings. Integers keep the narrowest BSON width that fits,
//! which matches what the store would have assigned to a driver-inserted
//! value of the same magnitude.

use bson::{Bson, Document};
use serde_json::{Map, Number, Value};

use super::temporal::to_iso_string;

/// One exported row or transformed document in intermediate form.
///
/// Field order is preserved (serde_json is built with `preserve_order`).
pub type Record = Map<String, Value>;

/// Convert an intermediate JSON value to BSON.
pub fn json_to_bson(value: Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(b),
        Value::Number(n) => number_to_bson(&n),
        Value::String(s) => Bson::String(s),
        Value::Array(items) => Bson::Array(items.into_iter().map(json_to_bson).collect()),
        Value::Object(map) => Bson::Document(record_to_document(map)),
    }
}

fn number_to_bson(n: &Number) -> Bson {
    if let Some(i) = n.as_i64() {
        return match i32::try_from(i) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(i),
        };
    }
    // u64 beyond i64::MAX or a genuine float
    Bson::Double(n.as_f64().unwrap_or(f64::NAN))
}

/// Convert a BSON value to its intermediate JSON form.
pub fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(i) => Value::from(i),
        Bson::Int64(i) => Value::from(i),
        Bson::Double(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        Bson::String(s) | Bson::Symbol(s) => Value::String(s),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        Bson::Document(doc) => Value::Object(document_to_record(doc)),
        Bson::DateTime(dt) => Value::String(to_iso_string(dt)),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::Binary(bin) => Value::String(hex::encode(bin.bytes)),
        other => other.into_relaxed_extjson(),
    }
}

/// Convert an intermediate record to a BSON document, preserving field order.
pub fn record_to_document(record: Record) -> Document {
    record
        .into_iter()
        .map(|(k, v)| (k, json_to_bson(v)))
        .collect()
}

/// Convert a BSON document to an intermediate record, preserving field order.
pub fn document_to_record(doc: Document) -> Record {
    doc.into_iter().map(|(k, v)| (k, bson_to_json(v))).collect()
}
