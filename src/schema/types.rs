//! Column types and versioned schemas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical type of a table column. Every column is nullable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
    Date,
    Timestamp,
    /// Nested objects and arrays, kept as JSON.
    Json,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Int => "int",
            ColumnType::Long => "long",
            ColumnType::Float => "float",
            ColumnType::Double => "double",
            ColumnType::String => "string",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Json => "json",
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Int | ColumnType::Long | ColumnType::Float | ColumnType::Double
        )
    }

    /// Check whether a column recorded as `self` can hold values observed as
    /// `observed` without loss.
    ///
    /// - Long holds Int; Float holds Int; Double holds Int, Long and Float
    /// - Timestamp holds Date
    /// - String holds everything, rendered as text
    pub fn accepts(&self, observed: ColumnType) -> bool {
        use ColumnType::*;

        *self == observed
            || *self == String
            || matches!(
                (self, observed),
                (Long, Int) | (Float, Int) | (Double, Int | Long | Float) | (Timestamp, Date)
            )
    }

    /// The narrowest type holding both observations of a column within one sample.
    pub fn unify(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;

        if self == other {
            return self;
        }
        match (self, other) {
            (Int, Long) | (Long, Int) => Long,
            (a, b) if a.is_numeric() && b.is_numeric() => Double,
            (Date, Timestamp) | (Timestamp, Date) => Timestamp,
            _ => String,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = String;

    /// Parse a type name as written in schema hints. SQL aliases are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "int" | "integer" => Ok(ColumnType::Int),
            "long" | "bigint" => Ok(ColumnType::Long),
            "float" | "real" => Ok(ColumnType::Float),
            "double" => Ok(ColumnType::Double),
            "string" | "varchar" | "text" => Ok(ColumnType::String),
            "date" => Ok(ColumnType::Date),
            "timestamp" => Ok(ColumnType::Timestamp),
            "json" => Ok(ColumnType::Json),
            other => Err(format!("unknown column type '{other}'")),
        }
    }
}

/// A column of a schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Schema version that introduced the column.
    pub added_in: u64,
}

/// An immutable, numbered column set.
///
/// Versions start at 1 and only ever grow: a later version contains every
/// column of the earlier one with the same type, in the same position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub version: u64,
    pub columns: Vec<Column>,
    pub created_at: DateTime<Utc>,
}

impl SchemaVersion {
    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Check that `self` keeps every column of `previous` unchanged.
    ///
    /// Reflexive: a version is a superset of itself.
    pub fn is_superset_of(&self, previous: &SchemaVersion) -> bool {
        if self.version == previous.version {
            return self.columns == previous.columns;
        }
        self.version > previous.version
            && previous.columns.len() <= self.columns.len()
            && previous
                .columns
                .iter()
                .zip(&self.columns)
                .all(|(old, new)| old == new)
    }
}
