//! Transactional write path for segment assignments.
//!
//! Every public operation is atomic on its own and reports failure exactly once: the error is
//! logged at error level through the injected logger and returned to the caller. There is no
//! retry loop here; re-running a failed call is the caller's decision.
//!
//! Operations are synchronous. Async callers should run them in `tokio::task::spawn_blocking`.

use std::sync::Arc;

use log::{Level, Log};
use serde::Serialize;

use crate::db::AssignmentDb;
use crate::element::{Element, ElementId, ElementKind, ElementRef};
use crate::error::AssignmentError;
use crate::logger::{emit, process_logger, SharedLogger};
use crate::queries;
use crate::segment::{SegmentId, SegmentRef, SegmentSet};
use crate::tables::TableNames;
use crate::type_mapper::TypeMapper;

/// Materialized row from the assignment table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentAssignment {
    pub element: ElementRef,
    pub breaks_inheritance: bool,
    pub segments: SegmentSet,
}

/// Records segment assignments and schedules affected elements for reindexing.
pub struct SegmentAssigner {
    tables: TableNames,
    type_mapper: Arc<dyn TypeMapper>,
    logger: SharedLogger,
}

impl SegmentAssigner {
    pub fn new(tables: TableNames, type_mapper: Arc<dyn TypeMapper>) -> Self {
        Self {
            tables,
            type_mapper,
            logger: process_logger(),
        }
    }

    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    pub fn type_mapper(&self) -> &dyn TypeMapper {
        self.type_mapper.as_ref()
    }

    pub(crate) fn logger(&self) -> &dyn Log {
        self.logger.as_ref()
    }

    /// Assigns segments to a concrete element.
    ///
    /// `segments` may mix raw ids and segment entities; entities are reduced to their id.
    pub fn assign<C>(
        &self,
        conn: &mut C,
        element: &dyn Element,
        breaks_inheritance: bool,
        segments: &[SegmentRef],
    ) -> Result<usize, AssignmentError>
    where
        C: AssignmentDb,
    {
        let segment_ids: Vec<SegmentId> = segments.iter().map(SegmentRef::id).collect();
        self.assign_by_id(
            conn,
            element.element_id(),
            self.type_mapper.type_of(element),
            breaks_inheritance,
            &segment_ids,
        )
    }

    /// Upserts the assignment row, queues the element itself, and queues all of its descendants.
    ///
    /// All three effects share one transaction. Duplicate ids are collapsed and persisted in
    /// ascending order. Returns how many descendant queue rows were newly inserted.
    pub fn assign_by_id<C>(
        &self,
        conn: &mut C,
        element_id: ElementId,
        element_type: ElementKind,
        breaks_inheritance: bool,
        segment_ids: &[SegmentId],
    ) -> Result<usize, AssignmentError>
    where
        C: AssignmentDb,
    {
        let element = ElementRef::new(element_id, element_type);
        let segments: SegmentSet = segment_ids.iter().copied().collect();
        let source = self.type_mapper.element_table(element_type);

        let result = conn.transaction::<_, AssignmentError, _>(|conn| {
            queries::upsert_assignment(conn, &self.tables, element, breaks_inheritance, &segments)?;
            queries::insert_queue_entry(conn, &self.tables, element)?;
            queries::enqueue_descendants(conn, &self.tables, source, element)
        });

        let descendants = self.report("assign", element, result)?;
        emit(
            self.logger(),
            Level::Debug,
            format_args!(
                "assigned segments {segments} to {element} (breaks_inheritance={breaks_inheritance}, queued_descendants={descendants})"
            ),
        );
        Ok(descendants)
    }

    /// Deletes the element's rows from the assignment, queue and index tables and queues its
    /// descendants, all in one transaction.
    ///
    /// Descendants inherited through the removed row, so their index rows need recomputing.
    /// Removing a key that has no rows succeeds.
    pub fn remove_element_by_id<C>(
        &self,
        conn: &mut C,
        element_id: ElementId,
        element_type: ElementKind,
    ) -> Result<(), AssignmentError>
    where
        C: AssignmentDb,
    {
        let element = ElementRef::new(element_id, element_type);
        let source = self.type_mapper.element_table(element_type);
        let result = conn.transaction::<_, AssignmentError, _>(|conn| {
            queries::delete_element_rows(conn, &self.tables, element)?;
            queries::enqueue_descendants(conn, &self.tables, source, element)
        });

        let descendants = self.report("remove", element, result)?;
        emit(
            self.logger(),
            Level::Debug,
            format_args!(
                "removed segment assignment rows for {element} (queued_descendants={descendants})"
            ),
        );
        Ok(())
    }

    /// Queues every descendant of the element (same kind, by path prefix) for reindexing.
    ///
    /// Idempotent in rows: a repeat call inserts nothing and returns 0, though rows already queued
    /// get their generation bumped so an in-flight batch does not drop them.
    pub fn enqueue_children<C>(
        &self,
        conn: &mut C,
        element_id: ElementId,
        element_type: ElementKind,
    ) -> Result<usize, AssignmentError>
    where
        C: AssignmentDb,
    {
        let element = ElementRef::new(element_id, element_type);
        let source = self.type_mapper.element_table(element_type);
        let result = conn.transaction::<_, AssignmentError, _>(|conn| {
            queries::enqueue_descendants(conn, &self.tables, source, element)
        });

        let queued = self.report("enqueue_children", element, result)?;
        emit(
            self.logger(),
            Level::Debug,
            format_args!("queued {queued} descendants of {element}"),
        );
        Ok(queued)
    }

    /// Reads the element's own assignment row.
    pub fn get_assignment<C>(
        &self,
        conn: &mut C,
        element_id: ElementId,
        element_type: ElementKind,
    ) -> Result<Option<SegmentAssignment>, AssignmentError>
    where
        C: AssignmentDb,
    {
        let element = ElementRef::new(element_id, element_type);
        let result = queries::load_assignment(conn, &self.tables, element);
        self.report("get_assignment", element, result)
    }

    /// Reads the effective segments from the index.
    ///
    /// This is the fast path and is eventually consistent: it reflects the last reindex run.
    pub fn indexed_segments<C>(
        &self,
        conn: &mut C,
        element_id: ElementId,
        element_type: ElementKind,
    ) -> Result<Option<SegmentSet>, AssignmentError>
    where
        C: AssignmentDb,
    {
        let element = ElementRef::new(element_id, element_type);
        let result = queries::load_index_segments(conn, &self.tables, element);
        self.report("indexed_segments", element, result)
    }

    /// Number of elements currently waiting for reindex.
    pub fn queue_depth<C>(&self, conn: &mut C) -> Result<i64, AssignmentError>
    where
        C: AssignmentDb,
    {
        let result = queries::count_queue(conn, &self.tables);
        if let Err(err) = &result {
            emit(
                self.logger(),
                Level::Error,
                format_args!("segment queue_depth failed: {err}"),
            );
        }
        result
    }

    fn report<T>(
        &self,
        operation: &str,
        element: ElementRef,
        result: Result<T, AssignmentError>,
    ) -> Result<T, AssignmentError> {
        if let Err(err) = &result {
            emit(
                self.logger(),
                Level::Error,
                format_args!("segment {operation} failed for {element}: {err}"),
            );
        }
        result
    }
}
