use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TableConfigError;

const MAX_IDENT_LEN: usize = 63;

pub const DEFAULT_ASSIGNMENT_TABLE: &str = "segment_assignment";
pub const DEFAULT_QUEUE_TABLE: &str = "segment_assignment_queue";
pub const DEFAULT_INDEX_TABLE: &str = "segment_assignment_index";

/// SQL identifier validated once at construction.
///
/// Table and column names come from configuration and cannot be bound as parameters, so they are
/// restricted to `[A-Za-z_][A-Za-z0-9_]*` and always emitted double-quoted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SqlIdent(String);

impl SqlIdent {
    pub fn new(raw: impl Into<String>) -> Result<Self, TableConfigError> {
        let raw = raw.into();
        let mut chars = raw.chars();
        let valid_head = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !valid_head || !valid_tail || raw.len() > MAX_IDENT_LEN {
            return Err(TableConfigError::InvalidIdentifier(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier ready for interpolation into SQL text.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl TryFrom<String> for SqlIdent {
    type Error = TableConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SqlIdent> for String {
    fn from(value: SqlIdent) -> Self {
        value.0
    }
}

impl fmt::Display for SqlIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names of the three tables owned by the assignment engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub assignment: SqlIdent,
    pub queue: SqlIdent,
    pub index: SqlIdent,
}

impl TableNames {
    pub fn new(
        assignment: impl Into<String>,
        queue: impl Into<String>,
        index: impl Into<String>,
    ) -> Result<Self, TableConfigError> {
        let names = Self {
            assignment: SqlIdent::new(assignment)?,
            queue: SqlIdent::new(queue)?,
            index: SqlIdent::new(index)?,
        };

        if names.queue == names.assignment || names.index == names.assignment {
            return Err(TableConfigError::DuplicateTable(names.assignment.0));
        }
        if names.index == names.queue {
            return Err(TableConfigError::DuplicateTable(names.queue.0));
        }

        Ok(names)
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            assignment: SqlIdent(DEFAULT_ASSIGNMENT_TABLE.to_string()),
            queue: SqlIdent(DEFAULT_QUEUE_TABLE.to_string()),
            index: SqlIdent(DEFAULT_INDEX_TABLE.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_reject_injection_attempts() {
        assert!(SqlIdent::new("segment_assignment").is_ok());
        assert!(SqlIdent::new("_cmf2").is_ok());
        assert!(SqlIdent::new("").is_err());
        assert!(SqlIdent::new("2fast").is_err());
        assert!(SqlIdent::new("objects; DROP TABLE objects").is_err());
        assert!(SqlIdent::new("a\"b").is_err());
        assert!(SqlIdent::new("x".repeat(64)).is_err());
    }

    #[test]
    fn quoted_wraps_in_double_quotes() {
        let ident = SqlIdent::new("key").expect("valid identifier");
        assert_eq!(ident.quoted(), "\"key\"");
    }

    #[test]
    fn table_names_must_be_distinct() {
        assert!(TableNames::new("a", "b", "c").is_ok());
        assert!(matches!(
            TableNames::new("a", "a", "c"),
            Err(TableConfigError::DuplicateTable(_))
        ));
        assert!(matches!(
            TableNames::new("a", "b", "b"),
            Err(TableConfigError::DuplicateTable(_))
        ));
    }
}
