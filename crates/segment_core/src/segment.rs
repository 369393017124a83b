use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AssignmentError, ParseError};

/// Numeric customer-segment identifier, the only segment form the store persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct SegmentId(i64);

impl SegmentId {
    pub fn new(value: i64) -> Result<Self, ParseError> {
        if value <= 0 {
            return Err(ParseError::InvalidSegmentId(value.to_string()));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for SegmentId {
    type Error = ParseError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SegmentId> for i64 {
    fn from(value: SegmentId) -> Self {
        value.0
    }
}

impl FromStr for SegmentId {
    type Err = ParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw
            .trim()
            .parse::<i64>()
            .map_err(|_| ParseError::InvalidSegmentId(raw.to_string()))?;
        Self::new(value)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Customer segment entity as supplied by the segment source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSegment {
    pub id: SegmentId,
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
}

/// Either a raw segment id or a segment entity; both collapse to the id on write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentRef {
    Id(SegmentId),
    Entity(CustomerSegment),
}

impl SegmentRef {
    pub fn id(&self) -> SegmentId {
        match self {
            SegmentRef::Id(id) => *id,
            SegmentRef::Entity(segment) => segment.id,
        }
    }
}

impl From<SegmentId> for SegmentRef {
    fn from(value: SegmentId) -> Self {
        SegmentRef::Id(value)
    }
}

impl From<CustomerSegment> for SegmentRef {
    fn from(value: CustomerSegment) -> Self {
        SegmentRef::Entity(value)
    }
}

/// Ordered, duplicate-free set of segment ids.
///
/// Persisted as ascending, comma-joined ids (`"1,2,3"`); the empty set is the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSet(BTreeSet<SegmentId>);

impl SegmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, id: SegmentId) -> bool {
        self.0.insert(id)
    }

    pub fn union_with(&mut self, other: &SegmentSet) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn to_db_string(&self) -> String {
        self.0
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parses the persisted representation, tolerating stray whitespace and empty entries.
    pub fn from_db_str(raw: &str) -> Result<Self, AssignmentError> {
        let mut out = SegmentSet::new();
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let id = part
                .parse::<SegmentId>()
                .map_err(|_| AssignmentError::MalformedSegments(raw.to_string()))?;
            out.insert(id);
        }
        Ok(out)
    }
}

impl FromIterator<SegmentId> for SegmentSet {
    fn from_iter<T: IntoIterator<Item = SegmentId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a SegmentRef> for SegmentSet {
    fn from_iter<T: IntoIterator<Item = &'a SegmentRef>>(iter: T) -> Self {
        iter.into_iter().map(SegmentRef::id).collect()
    }
}

impl fmt::Display for SegmentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.to_db_string())
    }
}
