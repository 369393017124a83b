use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::element::{Element, ElementKind};
use crate::error::TableConfigError;
use crate::tables::SqlIdent;

/// Column convention of one element-source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementTable {
    pub table: SqlIdent,
    pub id_column: SqlIdent,
    pub path_column: SqlIdent,
    pub key_column: SqlIdent,
}

impl ElementTable {
    pub fn new(
        table: &str,
        id_column: &str,
        path_column: &str,
        key_column: &str,
    ) -> Result<Self, TableConfigError> {
        Ok(Self {
            table: SqlIdent::new(table)?,
            id_column: SqlIdent::new(id_column)?,
            path_column: SqlIdent::new(path_column)?,
            key_column: SqlIdent::new(key_column)?,
        })
    }

    fn default_for(kind: ElementKind) -> Self {
        let (table, id, path, key) = match kind {
            ElementKind::Object => ("objects", "o_id", "o_path", "o_key"),
            ElementKind::Document => ("documents", "id", "path", "key"),
            ElementKind::Asset => ("assets", "id", "path", "filename"),
        };
        Self::new(table, id, path, key).expect("built-in element table identifiers are valid")
    }
}

/// Maps element references to their storage discriminator and element-source layout.
pub trait TypeMapper: Send + Sync {
    /// Discriminator kind for a concrete element.
    fn type_of(&self, element: &dyn Element) -> ElementKind {
        element.element_kind()
    }

    /// Element-source table holding `(id, path, key)` for `kind`.
    fn element_table(&self, kind: ElementKind) -> &ElementTable;
}

/// Strategy table resolved once at startup: one [`ElementTable`] per [`ElementKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTypeMapper {
    tables: [ElementTable; 3],
}

impl TableTypeMapper {
    pub fn with_table(mut self, kind: ElementKind, table: ElementTable) -> Self {
        self.tables[kind.index()] = table;
        self
    }

    /// Applies overrides from JSON shaped like `{"object": {"table": ..., ...}}`.
    ///
    /// Kinds not mentioned keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, TableConfigError> {
        let overrides: HashMap<ElementKind, ElementTable> = serde_json::from_str(raw)?;
        Ok(overrides
            .into_iter()
            .fold(Self::default(), |mapper, (kind, table)| {
                mapper.with_table(kind, table)
            }))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TableConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

impl Default for TableTypeMapper {
    fn default() -> Self {
        Self {
            tables: ElementKind::ALL.map(ElementTable::default_for),
        }
    }
}

impl TypeMapper for TableTypeMapper {
    fn element_table(&self, kind: ElementKind) -> &ElementTable {
        &self.tables[kind.index()]
    }
}
