//! Segment assignment and propagation engine.
//!
//! Assignments are written transactionally into a primary table, descendants of the changed
//! element are scheduled in a queue table, and a separately scheduled reindexer drains that queue
//! into a read-optimized index table.

pub mod assigner;
pub mod db;
pub mod element;
pub mod error;
pub mod inheritance;
pub mod logger;
mod queries;
pub mod reindex;
pub mod segment;
pub mod tables;
#[cfg(any(test, feature = "sqlite-tests"))]
pub mod test_support;
pub mod type_mapper;

pub use assigner::{SegmentAssigner, SegmentAssignment};
pub use element::{Element, ElementId, ElementKind, ElementPath, ElementRef};
pub use error::{AssignmentError, ParseError, TableConfigError};
pub use reindex::{BatchReport, DrainReport};
pub use segment::{CustomerSegment, SegmentId, SegmentRef, SegmentSet};
pub use tables::{SqlIdent, TableNames};
pub use type_mapper::{ElementTable, TableTypeMapper, TypeMapper};
