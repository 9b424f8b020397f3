//! Additive-only schema evolution.
//!
//! Existing columns are never removed or retyped. New columns are appended
//! after the existing ones and read as null for rows written earlier.

use chrono::Utc;

use crate::error::{IncompatibleSchemaChangeSnafu, SchemaError};

use super::{Column, ColumnType, SchemaHints, SchemaVersion};

/// Outcome of merging observed columns into the active schema.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    /// Observed columns fit the active schema.
    Unchanged,
    /// No schema existed yet; this is version 1.
    Initial(SchemaVersion),
    /// New columns were appended.
    Evolved {
        schema: SchemaVersion,
        added: Vec<String>,
    },
}

impl SchemaChange {
    /// The schema version proposed by this change, if any.
    pub fn proposed(&self) -> Option<&SchemaVersion> {
        match self {
            SchemaChange::Unchanged => None,
            SchemaChange::Initial(schema) | SchemaChange::Evolved { schema, .. } => Some(schema),
        }
    }
}

/// A candidate column. The type is `None` when the sample only held nulls.
pub type Candidate = (String, Option<ColumnType>);

/// Candidate columns for a sample, with hints applied.
///
/// Order: hinted columns in hint order, then remaining observed columns
/// alphabetically, then the rescued data column.
pub fn candidate_columns(
    observed: &[Candidate],
    hints: &SchemaHints,
    rescued_column: Option<&str>,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = hints
        .iter()
        .map(|(name, t)| (name.to_string(), Some(t)))
        .collect();

    let mut rest: Vec<Candidate> = observed
        .iter()
        .filter(|(name, _)| hints.get(name).is_none() && Some(name.as_str()) != rescued_column)
        .cloned()
        .collect();
    rest.sort_by(|a, b| a.0.cmp(&b.0));
    candidates.extend(rest);

    if let Some(rescued) = rescued_column
        && hints.get(rescued).is_none()
    {
        candidates.push((rescued.to_string(), Some(ColumnType::String)));
    }

    candidates
}

/// Merge candidate columns into `current` under the additive-only policy.
///
/// Fails with `IncompatibleSchemaChange` on the first existing column whose
/// recorded type cannot hold the candidate type. Nothing is merged in that
/// case. A null-only candidate never conflicts with an existing column and
/// becomes a string column when new.
pub fn merge_schema(
    current: Option<&SchemaVersion>,
    candidates: &[Candidate],
) -> Result<SchemaChange, SchemaError> {
    let Some(current) = current else {
        if candidates.is_empty() {
            return Ok(SchemaChange::Unchanged);
        }
        let columns = candidates
            .iter()
            .map(|(name, column_type)| Column {
                name: name.clone(),
                column_type: column_type.unwrap_or(ColumnType::String),
                added_in: 1,
            })
            .collect();
        return Ok(SchemaChange::Initial(SchemaVersion {
            version: 1,
            columns,
            created_at: Utc::now(),
        }));
    };

    let next_version = current.version + 1;
    let mut added = Vec::new();

    for (name, candidate) in candidates {
        match (current.column(name), candidate) {
            (Some(recorded), Some(candidate)) => ensure_compatible(recorded, *candidate)?,
            (Some(_), None) => {}
            (None, candidate) => added.push(Column {
                name: name.clone(),
                column_type: candidate.unwrap_or(ColumnType::String),
                added_in: next_version,
            }),
        }
    }

    if added.is_empty() {
        return Ok(SchemaChange::Unchanged);
    }

    let added_names = added.iter().map(|c| c.name.clone()).collect();
    let mut columns = current.columns.clone();
    columns.extend(added);

    Ok(SchemaChange::Evolved {
        schema: SchemaVersion {
            version: next_version,
            columns,
            created_at: Utc::now(),
        },
        added: added_names,
    })
}

fn ensure_compatible(recorded: &Column, candidate: ColumnType) -> Result<(), SchemaError> {
    snafu::ensure!(
        recorded.column_type.accepts(candidate),
        IncompatibleSchemaChangeSnafu {
            column: recorded.name.clone(),
            recorded: recorded.column_type,
            inferred: candidate,
        }
    );
    Ok(())
}
