//! Schema hints: operator-declared column types.

use crate::error::{ConfigError, InvalidSchemaHintSnafu};

use super::ColumnType;

/// Ordered list of `(column, type)` pairs that override inference.
///
/// Parsed from a comma-separated list such as
/// `"CustomerID int, Amount double, TransactionTimestamp timestamp"`.
/// Column names may be wrapped in backticks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaHints {
    columns: Vec<(String, ColumnType)>,
}

impl SchemaHints {
    pub fn parse(hints: &str) -> Result<Self, ConfigError> {
        let mut columns: Vec<(String, ColumnType)> = Vec::new();

        for hint in hints.split(',').map(str::trim).filter(|h| !h.is_empty()) {
            let mut parts = hint.split_whitespace();
            let (Some(name), Some(type_name), None) = (parts.next(), parts.next(), parts.next())
            else {
                return InvalidSchemaHintSnafu {
                    hint,
                    reason: "expected '<column> <type>'",
                }
                .fail();
            };

            let name = name.trim_matches('`');
            let column_type = type_name
                .parse::<ColumnType>()
                .map_err(|reason| InvalidSchemaHintSnafu { hint, reason }.build())?;

            if columns.iter().any(|(existing, _)| existing == name) {
                return InvalidSchemaHintSnafu {
                    hint,
                    reason: "column hinted more than once",
                }
                .fail();
            }
            columns.push((name.to_string(), column_type));
        }

        Ok(Self { columns })
    }

    /// Hinted type for a column, if any.
    pub fn get(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(hinted, _)| hinted == name)
            .map(|(_, column_type)| *column_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ColumnType)> {
        self.columns.iter().map(|(name, t)| (name.as_str(), *t))
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_order() {
        let hints = SchemaHints::parse(
            "CustomerID int, Amount double, TransactionTimestamp timestamp, Product string",
        )
        .unwrap();

        let names: Vec<_> = hints.iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            ["CustomerID", "Amount", "TransactionTimestamp", "Product"]
        );
        assert_eq!(hints.get("CustomerID"), Some(ColumnType::Int));
        assert_eq!(hints.get("Missing"), None);
    }

    #[test]
    fn test_backticks_and_blank_entries() {
        let hints = SchemaHints::parse("`order id` long,, ").unwrap_err();
        assert!(matches!(hints, ConfigError::InvalidSchemaHint { .. }));

        let hints = SchemaHints::parse("`order_id` long, ").unwrap();
        assert_eq!(hints.get("order_id"), Some(ColumnType::Long));
    }

    #[test]
    fn test_rejects_bad_hints() {
        assert!(SchemaHints::parse("Amount").is_err());
        assert!(SchemaHints::parse("Amount money").is_err());
        assert!(SchemaHints::parse("Amount double, Amount long").is_err());
        assert!(SchemaHints::parse("").unwrap().is_empty());
    }
}
