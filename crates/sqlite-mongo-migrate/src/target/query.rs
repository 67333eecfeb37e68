//! Filter, update and sort evaluation for the in-process store.
//!
//! Query documents are compiled before any document is visited, so a
//! malformed query fails the same way against an empty collection as against
//! a full one.

use std::cmp::Ordering;

use bson::{Bson, Document};

use crate::core::schema::ID_FIELD;
use crate::error::{MigrateError, Result};

/// A compiled filter document.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every clause must match.
    And(Vec<Filter>),
    /// At least one clause must match.
    Or(Vec<Filter>),
    /// No clause may match.
    Nor(Vec<Filter>),
    /// Conditions on one (possibly dotted) field path.
    Field { path: String, conds: Vec<Cond> },
}

/// A condition on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Eq(Bson),
    Ne(Bson),
    Gt(Bson),
    Gte(Bson),
    Lt(Bson),
    Lte(Bson),
    In(Vec<Bson>),
    Nin(Vec<Bson>),
    Exists(bool),
}

impl Filter {
    /// Compile a filter document.
    pub fn parse(filter: &Document) -> Result<Self> {
        let mut clauses = Vec::with_capacity(filter.len());
        for (key, value) in filter {
            let clause = match key.as_str() {
                "$and" => Filter::And(parse_clause_list(key, value)?),
                "$or" => Filter::Or(parse_clause_list(key, value)?),
                "$nor" => Filter::Nor(parse_clause_list(key, value)?),
                k if k.starts_with('$') => {
                    return Err(MigrateError::InvalidQuery(format!(
                        "unknown top-level operator {}",
                        k
                    )))
                }
                path => Filter::Field {
                    path: path.to_string(),
                    conds: parse_conds(path, value)?,
                },
            };
            clauses.push(clause);
        }
        Ok(Filter::And(clauses))
    }

    /// Evaluate against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::And(clauses) => clauses.iter().all(|c| c.matches(doc)),
            Filter::Or(clauses) => clauses.iter().any(|c| c.matches(doc)),
            Filter::Nor(clauses) => !clauses.iter().any(|c| c.matches(doc)),
            Filter::Field { path, conds } => {
                let value = lookup(doc, path);
                conds.iter().all(|c| c.matches(value))
            }
        }
    }

    /// Top-level equality fields, used to seed an upserted document.
    pub fn equality_fields(&self) -> Vec<(&str, &Bson)> {
        let mut out = Vec::new();
        if let Filter::And(clauses) = self {
            for clause in clauses {
                if let Filter::Field { path, conds } = clause {
                    for cond in conds {
                        if let Cond::Eq(v) = cond {
                            out.push((path.as_str(), v));
                        }
                    }
                }
            }
        }
        out
    }
}

fn parse_clause_list(op: &str, value: &Bson) -> Result<Vec<Filter>> {
    let Bson::Array(items) = value else {
        return Err(MigrateError::InvalidQuery(format!("{} requires an array", op)));
    };
    if items.is_empty() {
        return Err(MigrateError::InvalidQuery(format!(
            "{} requires a non-empty array",
            op
        )));
    }
    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => Filter::parse(d),
            _ => Err(MigrateError::InvalidQuery(format!(
                "{} entries must be documents",
                op
            ))),
        })
        .collect()
}

fn is_operator_doc(doc: &Document) -> bool {
    doc.keys().next().map_or(false, |k| k.starts_with('$'))
}

fn parse_conds(path: &str, value: &Bson) -> Result<Vec<Cond>> {
    let ops = match value {
        Bson::Document(d) if is_operator_doc(d) => d,
        other => return Ok(vec![Cond::Eq(other.clone())]),
    };

    let mut conds = Vec::with_capacity(ops.len());
    for (op, arg) in ops {
        let cond = match op.as_str() {
            "$eq" => Cond::Eq(arg.clone()),
            "$ne" => Cond::Ne(arg.clone()),
            "$gt" => Cond::Gt(arg.clone()),
            "$gte" => Cond::Gte(arg.clone()),
            "$lt" => Cond::Lt(arg.clone()),
            "$lte" => Cond::Lte(arg.clone()),
            "$in" | "$nin" => {
                let Bson::Array(items) = arg else {
                    return Err(MigrateError::InvalidQuery(format!(
                        "{} on '{}' requires an array",
                        op, path
                    )));
                };
                if op == "$in" {
                    Cond::In(items.clone())
                } else {
                    Cond::Nin(items.clone())
                }
            }
            "$exists" => Cond::Exists(truthy(arg)),
            other => {
                return Err(MigrateError::InvalidQuery(format!(
                    "unknown operator {} on '{}'",
                    other, path
                )))
            }
        };
        conds.push(cond);
    }
    Ok(conds)
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(f) => *f != 0.0,
        _ => true,
    }
}

impl Cond {
    fn matches(&self, value: Option<&Bson>) -> bool {
        match self {
            Cond::Eq(target) => eq_matches(value, target),
            Cond::Ne(target) => !eq_matches(value, target),
            Cond::Gt(t) => range_matches(value, t, |o| o == Ordering::Greater),
            Cond::Gte(t) => range_matches(value, t, |o| o != Ordering::Less),
            Cond::Lt(t) => range_matches(value, t, |o| o == Ordering::Less),
            Cond::Lte(t) => range_matches(value, t, |o| o != Ordering::Greater),
            Cond::In(targets) => targets.iter().any(|t| eq_matches(value, t)),
            Cond::Nin(targets) => !targets.iter().any(|t| eq_matches(value, t)),
            Cond::Exists(expected) => value.is_some() == *expected,
        }
    }
}

/// Equality as queries see it: a missing field equals null, and an array
/// field matches if it equals the target or any element does.
fn eq_matches(value: Option<&Bson>, target: &Bson) -> bool {
    match value {
        None => matches!(target, Bson::Null),
        Some(v) => {
            if values_equal(v, target) {
                return true;
            }
            match v {
                Bson::Array(items) => items.iter().any(|item| values_equal(item, target)),
                _ => false,
            }
        }
    }
}

fn range_matches(value: Option<&Bson>, target: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let check = |v: &Bson| type_rank(v) == type_rank(target) && accept(compare_bson(v, target));
    match value {
        None => false,
        Some(Bson::Array(items)) => items.iter().any(check),
        Some(v) => check(v),
    }
}

/// Value equality with numbers compared across widths.
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => compare_numbers(x, y) == Ordering::Equal,
        _ => a == b,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn to_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

fn as_number(value: &Bson) -> Option<Number> {
    match value {
        Bson::Int32(i) => Some(Number::Int(i64::from(*i))),
        Bson::Int64(i) => Some(Number::Int(*i)),
        Bson::Double(f) => Some(Number::Float(*f)),
        _ => None,
    }
}

fn compare_numbers(a: Number, b: Number) -> Ordering {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x.cmp(&y),
        (x, y) => x
            .to_f64()
            .partial_cmp(&y.to_f64())
            .unwrap_or(Ordering::Equal),
    }
}

/// Canonical cross-type ordering rank.
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 255,
        _ => 12,
    }
}

/// Total order over BSON values: type rank first, then value.
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.timestamp_millis().cmp(&y.timestamp_millis()),
        (Bson::Timestamp(x), Bson::Timestamp(y)) => (x.time, x.increment).cmp(&(y.time, y.increment)),
        (Bson::Array(x), Bson::Array(y)) => compare_seq(x.iter(), y.iter()),
        (Bson::Document(x), Bson::Document(y)) => compare_seq(x.values(), y.values()),
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => compare_numbers(x, y),
            _ => Ordering::Equal,
        },
    }
}

fn compare_seq<'a>(
    mut x: impl Iterator<Item = &'a Bson>,
    mut y: impl Iterator<Item = &'a Bson>,
) -> Ordering {
    loop {
        match (x.next(), y.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => {
                let o = compare_bson(a, b);
                if o != Ordering::Equal {
                    return o;
                }
            }
        }
    }
}

/// Resolve a dotted path.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = doc.get(first)?;
    for part in parts {
        current = match current {
            Bson::Document(d) => d.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head, Document::new());
            }
            if let Some(Bson::Document(child)) = doc.get_mut(head) {
                set_path(child, rest, value);
            }
        }
    }
}

fn unset_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(child)) = doc.get_mut(head) {
                unset_path(child, rest);
            }
        }
    }
}

/// A sort specification.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort(Vec<(String, bool)>);

impl Sort {
    /// Compile `{field: 1|-1, ...}`.
    pub fn parse(spec: &Document) -> Result<Self> {
        let mut keys = Vec::with_capacity(spec.len());
        for (field, dir) in spec {
            let ascending = match as_number(dir).map(Number::to_f64) {
                Some(d) if d == 1.0 => true,
                Some(d) if d == -1.0 => false,
                _ => {
                    return Err(MigrateError::InvalidQuery(format!(
                        "sort direction for '{}' must be 1 or -1",
                        field
                    )))
                }
            };
            keys.push((field.clone(), ascending));
        }
        Ok(Sort(keys))
    }

    /// Compare two documents under this sort.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for (field, ascending) in &self.0 {
            let null = Bson::Null;
            let x = lookup(a, field).unwrap_or(&null);
            let y = lookup(b, field).unwrap_or(&null);
            let o = compare_bson(x, y);
            if o != Ordering::Equal {
                return if *ascending { o } else { o.reverse() };
            }
        }
        Ordering::Equal
    }
}

/// A compiled update document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    set: Vec<(String, Bson)>,
    unset: Vec<String>,
    inc: Vec<(String, Bson)>,
    set_on_insert: Vec<(String, Bson)>,
}

impl Update {
    /// Compile an operator-style update.
    pub fn parse(update: &Document) -> Result<Self> {
        if update.is_empty() {
            return Err(MigrateError::InvalidQuery("update document is empty".into()));
        }

        let mut out = Update::default();
        for (op, arg) in update {
            let Bson::Document(fields) = arg else {
                if !op.starts_with('$') {
                    return Err(MigrateError::InvalidQuery(format!(
                        "update field '{}' is not an operator",
                        op
                    )));
                }
                return Err(MigrateError::InvalidQuery(format!(
                    "{} requires a document",
                    op
                )));
            };
            if fields.is_empty() && op == "$set" {
                return Err(MigrateError::InvalidQuery("$set requires at least one field".into()));
            }
            let pairs = || fields.iter().map(|(k, v)| (k.clone(), v.clone()));
            match op.as_str() {
                "$set" => out.set.extend(pairs()),
                "$unset" => out.unset.extend(fields.keys().cloned()),
                "$inc" => {
                    for (k, v) in fields {
                        if as_number(v).is_none() {
                            return Err(MigrateError::InvalidQuery(format!(
                                "$inc on '{}' requires a number",
                                k
                            )));
                        }
                    }
                    out.inc.extend(pairs())
                }
                "$setOnInsert" => out.set_on_insert.extend(pairs()),
                other if other.starts_with('$') => {
                    return Err(MigrateError::InvalidQuery(format!(
                        "unknown update operator {}",
                        other
                    )))
                }
                other => {
                    return Err(MigrateError::InvalidQuery(format!(
                        "update field '{}' is not an operator",
                        other
                    )))
                }
            }
        }

        if out.unset.iter().any(|p| p == ID_FIELD) || out.inc.iter().any(|(p, _)| p == ID_FIELD) {
            return Err(MigrateError::InvalidQuery("_id is immutable".into()));
        }
        Ok(out)
    }

    /// Apply to a document. Returns whether the document changed.
    ///
    /// `$setOnInsert` only applies when `inserting` is true. Changing an
    /// existing `_id` is rejected.
    pub fn apply(&self, doc: &mut Document, inserting: bool) -> Result<bool> {
        let before = doc.clone();

        for (path, value) in &self.set {
            if path == ID_FIELD && !inserting {
                if let Some(current) = doc.get(ID_FIELD) {
                    if !values_equal(current, value) {
                        return Err(MigrateError::InvalidQuery("_id is immutable".into()));
                    }
                }
            }
            set_path(doc, path, value.clone());
        }
        for path in &self.unset {
            unset_path(doc, path);
        }
        for (path, delta) in &self.inc {
            let next = match lookup(doc, path) {
                None => delta.clone(),
                Some(current) => add_numbers(current, delta).ok_or_else(|| {
                    MigrateError::InvalidQuery(format!(
                        "$inc on '{}' requires a numeric field without overflow",
                        path
                    ))
                })?,
            };
            set_path(doc, path, next);
        }
        if inserting {
            for (path, value) in &self.set_on_insert {
                set_path(doc, path, value.clone());
            }
        }

        Ok(*doc != before)
    }
}

fn add_numbers(a: &Bson, b: &Bson) -> Option<Bson> {
    if let (Bson::Int32(x), Bson::Int32(y)) = (a, b) {
        return Some(match x.checked_add(*y) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(i64::from(*x) + i64::from(*y)),
        });
    }
    match (as_number(a)?, as_number(b)?) {
        (Number::Int(x), Number::Int(y)) => x.checked_add(y).map(Bson::Int64),
        (x, y) => Some(Bson::Double(x.to_f64() + y.to_f64())),
    }
}

/// Whether an update document uses operator-style keys.
pub fn is_operator_update(update: &Document) -> bool {
    update.keys().any(|k| k.starts_with('$'))
}
