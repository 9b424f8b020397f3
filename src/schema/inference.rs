//! Column inference from sampled NDJSON records.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::ColumnType;

const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a timestamp string: RFC 3339, or a zone-less `YYYY-MM-DD[ T]HH:MM:SS[.f]`
/// interpreted as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .map(|naive| naive.and_utc())
}

/// Parse a `YYYY-MM-DD` date string.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Infer the type of a single JSON value. `None` for null.
///
/// With `infer_types` off every non-null value is a string.
pub fn infer_value_type(value: &Value, infer_types: bool) -> Option<ColumnType> {
    if value.is_null() {
        return None;
    }
    if !infer_types {
        return Some(ColumnType::String);
    }

    Some(match value {
        Value::Bool(_) => ColumnType::Boolean,
        Value::Number(n) if n.is_i64() || n.is_u64() => ColumnType::Long,
        Value::Number(_) => ColumnType::Double,
        Value::String(s) if parse_date(s).is_some() => ColumnType::Date,
        Value::String(s) if parse_timestamp(s).is_some() => ColumnType::Timestamp,
        Value::String(_) => ColumnType::String,
        Value::Array(_) | Value::Object(_) => ColumnType::Json,
        Value::Null => unreachable!("null handled above"),
    })
}

/// Column observations accumulated over a sample.
#[derive(Debug, Default)]
pub struct ColumnObservations {
    /// `None` while a column has only been seen as null.
    columns: BTreeMap<String, Option<ColumnType>>,
    records: usize,
}

impl ColumnObservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record into the observations.
    pub fn observe(&mut self, record: &Map<String, Value>, infer_types: bool) {
        self.records += 1;
        for (name, value) in record {
            let observed = infer_value_type(value, infer_types);
            let slot = self.columns.entry(name.clone()).or_insert(None);
            *slot = match (*slot, observed) {
                (Some(current), Some(observed)) => Some(current.unify(observed)),
                (current, observed) => current.or(observed),
            };
        }
    }

    /// Number of records observed.
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Observed `(name, type)` pairs in alphabetical order.
    ///
    /// The type is `None` for columns only ever observed as null.
    pub fn resolve(&self) -> Vec<(String, Option<ColumnType>)> {
        self.columns
            .iter()
            .map(|(name, t)| (name.clone(), *t))
            .collect()
    }
}
