//! Verification result types.

use bson::Bson;
use serde::Serialize;

/// Document count of one collection after import.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionCount {
    /// Collection name.
    pub collection: String,

    /// Count expected from the import, when known.
    pub expected: Option<u64>,

    /// Count reported by the store; `None` if counting failed.
    pub actual: Option<u64>,

    /// Counting error, if any.
    pub error: Option<String>,
}

impl CollectionCount {
    /// Whether the actual count agrees with the expected one.
    ///
    /// Collections without an expectation are considered consistent when
    /// they could be counted.
    pub fn is_consistent(&self) -> bool {
        match (self.expected, self.actual) {
            (Some(e), Some(a)) => e == a,
            (None, Some(_)) => true,
            _ => false,
        }
    }
}

/// Result of a count verification pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    /// Per-collection counts in import order.
    pub collections: Vec<CollectionCount>,
}

impl VerifyReport {
    /// Sum of the actual counts.
    pub fn total_documents(&self) -> u64 {
        self.collections.iter().filter_map(|c| c.actual).sum()
    }

    /// Collections whose count disagrees or could not be read.
    pub fn mismatches(&self) -> Vec<&CollectionCount> {
        self.collections.iter().filter(|c| !c.is_consistent()).collect()
    }

    /// Whether every collection is consistent.
    pub fn is_consistent(&self) -> bool {
        self.mismatches().is_empty()
    }
}

/// Maximum number of unresolved values kept per reference.
pub const MAX_SAMPLES: usize = 5;

/// Outcome of checking one declared foreign key.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceCheck {
    /// Referencing collection.
    pub collection: String,

    /// Referencing field.
    pub field: String,

    /// Referenced collection.
    pub references: String,

    /// Non-null values examined (list elements counted individually).
    pub checked: u64,

    /// Values with no matching `_id` in the referenced collection.
    pub dangling: u64,

    /// First few dangling values.
    #[serde(serialize_with = "serialize_samples")]
    pub samples: Vec<Bson>,
}

fn serialize_samples<S>(samples: &[Bson], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeSeq;
    let mut seq = serializer.serialize_seq(Some(samples.len()))?;
    for s in samples {
        seq.serialize_element(&crate::core::value::bson_to_json(s.clone()))?;
    }
    seq.end()
}

/// Result of a reference check pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReferenceReport {
    /// One entry per declared foreign key of the checked collections.
    pub checks: Vec<ReferenceCheck>,
}

impl ReferenceReport {
    /// Total dangling values.
    pub fn total_dangling(&self) -> u64 {
        self.checks.iter().map(|c| c.dangling).sum()
    }

    /// Whether every reference resolves.
    pub fn is_clean(&self) -> bool {
        self.total_dangling() == 0
    }
}
