//! Conforming source records to a schema version.
//!
//! Every row written to the table carries exactly the columns of its
//! schema version, in schema order. Missing fields become null; values are
//! coerced to the column type or the record is rejected.

use chrono::SecondsFormat;
use indexmap::IndexMap;
use serde_json::{Map, Number, Value};
use std::fmt;

use crate::schema::inference::{parse_date, parse_timestamp};
use crate::schema::{ColumnType, SchemaVersion};

/// A table row: column name to value, in schema order.
pub type Row = IndexMap<String, Value>;

/// A record conformed to a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Conformed {
    pub row: Row,
    /// Fields outside the schema that were dropped.
    pub dropped_fields: usize,
}

/// A value that cannot be represented in its column.
#[derive(Debug, Clone, PartialEq)]
pub struct ConformError {
    pub column: String,
    pub expected: ColumnType,
    pub value: Value,
}

impl fmt::Display for ConformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "column '{}' expects {}, found {}",
            self.column, self.expected, self.value
        )
    }
}

impl std::error::Error for ConformError {}

/// Conform one record to `schema`.
///
/// With a rescued data column, fields outside the schema are kept there as a
/// JSON object string; otherwise they are dropped and counted.
pub fn conform_record(
    fields: &Map<String, Value>,
    schema: &SchemaVersion,
    rescued_column: Option<&str>,
) -> Result<Conformed, ConformError> {
    let rescued_column = rescued_column.filter(|name| schema.contains(name));
    let mut row = Row::with_capacity(schema.len());

    for column in &schema.columns {
        let value = match fields.get(&column.name) {
            Some(value) => conform_value(value, column.column_type).ok_or_else(|| ConformError {
                column: column.name.clone(),
                expected: column.column_type,
                value: value.clone(),
            })?,
            None => Value::Null,
        };
        row.insert(column.name.clone(), value);
    }

    let unknown: Map<String, Value> = fields
        .iter()
        .filter(|(name, _)| !schema.contains(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    let mut dropped_fields = 0;
    if !unknown.is_empty() {
        match rescued_column {
            Some(rescued) if row.get(rescued).is_none_or(Value::is_null) => {
                row.insert(
                    rescued.to_string(),
                    Value::String(Value::Object(unknown).to_string()),
                );
            }
            _ => dropped_fields = unknown.len(),
        }
    }

    Ok(Conformed {
        row,
        dropped_fields,
    })
}

/// Coerce a JSON value to `column_type`. `None` when it cannot be represented.
pub fn conform_value(value: &Value, column_type: ColumnType) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }

    match column_type {
        ColumnType::Json => Some(value.clone()),
        ColumnType::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(Value::Bool(false)),
            _ => None,
        },
        ColumnType::Int => integral(value)
            .and_then(|n| i32::try_from(n).ok())
            .map(Value::from),
        ColumnType::Long => integral(value).map(Value::from),
        ColumnType::Float | ColumnType::Double => {
            let n = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }?;
            Number::from_f64(n).map(Value::Number)
        }
        ColumnType::String => Some(match value {
            Value::String(_) => value.clone(),
            other => Value::String(other.to_string()),
        }),
        ColumnType::Date => {
            let s = value.as_str()?;
            parse_date(s)
                .or_else(|| parse_timestamp(s).map(|ts| ts.date_naive()))
                .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
        }
        ColumnType::Timestamp => {
            let ts = match value {
                Value::String(s) => parse_timestamp(s).or_else(|| {
                    parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)).map(|naive| naive.and_utc())
                }),
                Value::Number(n) => n
                    .as_i64()
                    .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0)),
                _ => None,
            }?;
            Some(Value::String(
                ts.to_rfc3339_opts(SecondsFormat::Micros, true),
            ))
        }
    }
}

fn integral(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
