use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Primary key of an element in its element-source table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct ElementId(i64);

impl ElementId {
    pub fn new(value: i64) -> Result<Self, ParseError> {
        if value <= 0 {
            return Err(ParseError::InvalidElementId(value.to_string()));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for ElementId {
    type Error = ParseError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ElementId> for i64 {
    fn from(value: ElementId) -> Self {
        value.0
    }
}

impl FromStr for ElementId {
    type Err = ParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let value = trimmed
            .parse::<i64>()
            .map_err(|_| ParseError::InvalidElementId(raw.to_string()))?;
        Self::new(value)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kinds of hierarchical elements that can carry segment assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Object,
    Document,
    Asset,
}

impl ElementKind {
    pub const ALL: [ElementKind; 3] = [ElementKind::Object, ElementKind::Document, ElementKind::Asset];

    /// Storage discriminator written into the `element_type` column.
    pub fn as_db_str(self) -> &'static str {
        match self {
            ElementKind::Object => "object",
            ElementKind::Document => "document",
            ElementKind::Asset => "asset",
        }
    }

    pub fn from_db_str(value: &str) -> Result<Self, ParseError> {
        match value {
            "object" => Ok(ElementKind::Object),
            "document" => Ok(ElementKind::Document),
            "asset" => Ok(ElementKind::Asset),
            other => Err(ParseError::UnknownElementType(other.to_string())),
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            ElementKind::Object => 0,
            ElementKind::Document => 1,
            ElementKind::Asset => 2,
        }
    }
}

impl FromStr for ElementKind {
    type Err = ParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(raw.trim().to_ascii_lowercase().as_str())
            .map_err(|_| ParseError::UnknownElementType(raw.to_string()))
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Anything that can be addressed as an element of the content tree.
pub trait Element {
    fn element_id(&self) -> ElementId;
    fn element_kind(&self) -> ElementKind;
}

/// Plain `(id, kind)` reference, the key shape used by all three assignment tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef {
    pub id: ElementId,
    pub kind: ElementKind,
}

impl ElementRef {
    pub fn new(id: ElementId, kind: ElementKind) -> Self {
        Self { id, kind }
    }
}

impl Element for ElementRef {
    fn element_id(&self) -> ElementId {
        self.id
    }

    fn element_kind(&self) -> ElementKind {
        self.kind
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Materialized location of an element: parent `path` (with trailing `/`) plus own `key`.
///
/// The root element is stored as path `/` with an empty key, so its full path is `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementPath {
    pub path: String,
    pub key: String,
}

impl ElementPath {
    pub fn new(path: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }

    /// Splits a full path such as `/a/b` into `("/a/", "b")`.
    pub fn from_full_path(full_path: &str) -> Self {
        match full_path.rfind('/') {
            Some(idx) => Self::new(&full_path[..=idx], &full_path[idx + 1..]),
            None => Self::new("/", full_path),
        }
    }

    pub fn full_path(&self) -> String {
        format!("{}{}", self.path, self.key)
    }

    /// Prefix shared by the `path` column of every descendant.
    pub fn descendant_prefix(&self) -> String {
        let full_path = self.full_path();
        if full_path.ends_with('/') {
            full_path
        } else {
            format!("{full_path}/")
        }
    }

    pub fn is_root(&self) -> bool {
        self.key.is_empty() && self.path == "/"
    }

    /// Location of the parent element, `None` at the root.
    pub fn parent(&self) -> Option<ElementPath> {
        if self.is_root() {
            return None;
        }

        let parent_full = self.path.trim_end_matches('/');
        if parent_full.is_empty() {
            Some(ElementPath::new("/", ""))
        } else {
            Some(ElementPath::from_full_path(parent_full))
        }
    }

    /// Walks parents from nearest to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = ElementPath> {
        std::iter::successors(self.parent(), ElementPath::parent)
    }
}
