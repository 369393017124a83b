//! Queue consumer: drains the propagation queue into the index table.
//!
//! Each batch runs in one transaction. Queue rows are deleted in the same transaction that writes
//! their index rows, so a failed batch leaves the queue untouched for the next run.

use log::Level;
use serde::Serialize;

use crate::assigner::{SegmentAssigner, SegmentAssignment};
use crate::db::AssignmentDb;
use crate::element::{ElementId, ElementKind, ElementRef};
use crate::error::AssignmentError;
use crate::inheritance::resolve_effective_segments;
use crate::logger::emit;
use crate::queries;
use crate::segment::SegmentSet;

/// Outcome of one [`SegmentAssigner::drain_batch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Queue rows read and removed.
    pub claimed: usize,
    /// Index rows written with a non-empty effective set.
    pub indexed: usize,
    /// Index rows removed because the effective set was empty.
    pub cleared: usize,
    /// Queued elements no longer present in their element source.
    pub missing: usize,
    /// Queue rows dropped without reindexing: unrecognized element type or unreadable stored
    /// assignment data.
    pub skipped: usize,
    /// Rows queued again while the batch ran. They stay in the queue for the next batch.
    pub requeued: usize,
}

/// Aggregate of every batch in a [`SegmentAssigner::drain_queue`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub batches: usize,
    pub claimed: usize,
    pub indexed: usize,
    pub cleared: usize,
    pub missing: usize,
    pub skipped: usize,
    pub requeued: usize,
}

impl DrainReport {
    fn absorb(&mut self, batch: BatchReport) {
        self.batches += 1;
        self.claimed += batch.claimed;
        self.indexed += batch.indexed;
        self.cleared += batch.cleared;
        self.missing += batch.missing;
        self.skipped += batch.skipped;
        self.requeued += batch.requeued;
    }
}

enum Reindexed {
    Indexed,
    Cleared,
    Missing,
}

impl SegmentAssigner {
    /// Computes an element's effective segments straight from the assignment table.
    ///
    /// Returns `None` when the element is not present in its element source.
    pub fn effective_segments<C>(
        &self,
        conn: &mut C,
        element_id: ElementId,
        element_type: ElementKind,
    ) -> Result<Option<SegmentSet>, AssignmentError>
    where
        C: AssignmentDb,
    {
        let element = ElementRef::new(element_id, element_type);
        let result = self.resolve_element(conn, element);
        if let Err(err) = &result {
            emit(
                self.logger(),
                Level::Error,
                format_args!("segment effective_segments failed for {element}: {err}"),
            );
        }
        result
    }

    /// Processes up to `batch_size` queue rows, oldest first.
    pub fn drain_batch<C>(&self, conn: &mut C, batch_size: i64) -> Result<BatchReport, AssignmentError>
    where
        C: AssignmentDb,
    {
        if batch_size <= 0 {
            return Err(AssignmentError::InvalidInput(format!(
                "batch size must be positive, got {batch_size}"
            )));
        }

        let result = conn.transaction::<_, AssignmentError, _>(|conn| {
            let rows = queries::load_queue_batch(conn, self.tables(), batch_size)?;
            let mut report = BatchReport::default();

            for row in rows {
                report.claimed += 1;
                let element = match (
                    ElementId::new(row.element_id),
                    ElementKind::from_db_str(&row.element_type),
                ) {
                    (Ok(id), Ok(kind)) => ElementRef::new(id, kind),
                    (Err(err), _) | (_, Err(err)) => {
                        emit(
                            self.logger(),
                            Level::Warn,
                            format_args!(
                                "dropping queue row ({}, {}): {err}",
                                row.element_id, row.element_type
                            ),
                        );
                        report.skipped += 1;
                        queries::delete_queue_row(conn, self.tables(), &row)?;
                        continue;
                    }
                };

                match self.reindex_element(conn, element) {
                    Ok(Reindexed::Indexed) => report.indexed += 1,
                    Ok(Reindexed::Cleared) => report.cleared += 1,
                    Ok(Reindexed::Missing) => report.missing += 1,
                    // Bad stored data for one element must not hold back the rest of the queue.
                    Err(err @ (AssignmentError::MalformedSegments(_) | AssignmentError::Parse(_))) => {
                        emit(
                            self.logger(),
                            Level::Warn,
                            format_args!("skipping {element}, index left unchanged: {err}"),
                        );
                        report.skipped += 1;
                    }
                    Err(err) => return Err(err),
                }
                if queries::delete_queue_row(conn, self.tables(), &row)? == 0 {
                    report.requeued += 1;
                }
            }

            Ok(report)
        });

        match &result {
            Ok(report) if report.claimed > 0 => emit(
                self.logger(),
                Level::Debug,
                format_args!(
                    "reindexed batch: claimed={} indexed={} cleared={} missing={} skipped={} requeued={}",
                    report.claimed,
                    report.indexed,
                    report.cleared,
                    report.missing,
                    report.skipped,
                    report.requeued
                ),
            ),
            Ok(_) => {}
            Err(err) => emit(
                self.logger(),
                Level::Error,
                format_args!("segment drain_batch failed: {err}"),
            ),
        }
        result
    }

    /// Repeats [`drain_batch`](Self::drain_batch) until a batch comes back short or
    /// `max_batches` batches have run.
    pub fn drain_queue<C>(
        &self,
        conn: &mut C,
        batch_size: i64,
        max_batches: Option<usize>,
    ) -> Result<DrainReport, AssignmentError>
    where
        C: AssignmentDb,
    {
        let mut report = DrainReport::default();
        loop {
            if max_batches.is_some_and(|max| report.batches >= max) {
                break;
            }
            let batch = self.drain_batch(conn, batch_size)?;
            report.absorb(batch);
            if (batch.claimed as i64) < batch_size {
                break;
            }
        }
        Ok(report)
    }

    fn reindex_element<C>(&self, conn: &mut C, element: ElementRef) -> Result<Reindexed, AssignmentError>
    where
        C: AssignmentDb,
    {
        let Some(effective) = self.resolve_element(conn, element)? else {
            queries::delete_index_entry(conn, self.tables(), element)?;
            return Ok(Reindexed::Missing);
        };

        if effective.is_empty() {
            queries::delete_index_entry(conn, self.tables(), element)?;
            Ok(Reindexed::Cleared)
        } else {
            queries::upsert_index_entry(conn, self.tables(), element, &effective)?;
            Ok(Reindexed::Indexed)
        }
    }

    fn resolve_element<C>(
        &self,
        conn: &mut C,
        element: ElementRef,
    ) -> Result<Option<SegmentSet>, AssignmentError>
    where
        C: AssignmentDb,
    {
        let tables = self.tables();
        let source = self.type_mapper().element_table(element.kind);

        let Some(location) = queries::load_element_path(conn, source, element.id)? else {
            return Ok(None);
        };
        let own = queries::load_assignment(conn, tables, element)?;

        let ancestors = location.ancestors().map(
            |ancestor| -> Result<Option<SegmentAssignment>, AssignmentError> {
                match queries::find_element_at(conn, source, &ancestor)? {
                    Some(id) => queries::load_assignment(conn, tables, ElementRef::new(id, element.kind)),
                    None => Ok(None),
                }
            },
        );

        resolve_effective_segments(own.as_ref(), ancestors).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use diesel::connection::SimpleConnection;

    use super::*;
    use crate::db::sqlite_test::{count_all, count_rows, seed_element, setup_in_memory_sqlite};
    use crate::segment::SegmentId;
    use crate::tables::TableNames;
    use crate::test_support::CapturingLogger;
    use crate::type_mapper::TableTypeMapper;

    fn assigner_with_logger() -> (SegmentAssigner, Arc<CapturingLogger>) {
        let logger = CapturingLogger::shared();
        let assigner = SegmentAssigner::new(
            TableNames::default(),
            Arc::new(TableTypeMapper::default()),
        )
        .with_logger(logger.clone());
        (assigner, logger)
    }

    fn id(value: i64) -> ElementId {
        ElementId::new(value).expect("valid element id")
    }

    fn segments(values: &[i64]) -> Vec<SegmentId> {
        values
            .iter()
            .map(|v| SegmentId::new(*v).expect("valid segment id"))
            .collect()
    }

    fn indexed(
        assigner: &SegmentAssigner,
        conn: &mut diesel::sqlite::SqliteConnection,
        element_id: i64,
    ) -> Option<String> {
        assigner
            .indexed_segments(conn, id(element_id), ElementKind::Object)
            .expect("index read should succeed")
            .map(|set| set.to_db_string())
    }

    fn seed_chain(conn: &mut diesel::sqlite::SqliteConnection) {
        seed_element(conn, ElementKind::Object, 1, "/a");
        seed_element(conn, ElementKind::Object, 2, "/a/b");
        seed_element(conn, ElementKind::Object, 3, "/a/b/c");
        seed_element(conn, ElementKind::Object, 4, "/a/b/c/d");
    }

    #[test]
    fn drain_indexes_chain_with_inheritance_break() {
        let mut conn = setup_in_memory_sqlite();
        let (assigner, logger) = assigner_with_logger();
        seed_chain(&mut conn);

        assigner
            .assign_by_id(&mut conn, id(1), ElementKind::Object, false, &segments(&[1]))
            .expect("assign a");
        assigner
            .assign_by_id(&mut conn, id(2), ElementKind::Object, false, &segments(&[2]))
            .expect("assign b");
        assigner
            .assign_by_id(&mut conn, id(3), ElementKind::Object, true, &segments(&[3]))
            .expect("assign c");

        let report = assigner
            .drain_queue(&mut conn, 100, None)
            .expect("drain should succeed");
        assert_eq!(report.batches, 1);
        assert_eq!(report.claimed, 4);
        assert_eq!(report.indexed, 4);

        assert_eq!(indexed(&assigner, &mut conn, 1).as_deref(), Some("1"));
        assert_eq!(indexed(&assigner, &mut conn, 2).as_deref(), Some("1,2"));
        assert_eq!(indexed(&assigner, &mut conn, 3).as_deref(), Some("3"));
        assert_eq!(indexed(&assigner, &mut conn, 4).as_deref(), Some("3"));
        assert_eq!(assigner.queue_depth(&mut conn).expect("depth"), 0);
        assert!(logger.errors().is_empty());
    }

    #[test]
    fn effective_segments_reads_without_index() {
        let mut conn = setup_in_memory_sqlite();
        let (assigner, _) = assigner_with_logger();
        seed_chain(&mut conn);

        assigner
            .assign_by_id(&mut conn, id(1), ElementKind::Object, false, &segments(&[5]))
            .expect("assign a");

        let effective = assigner
            .effective_segments(&mut conn, id(4), ElementKind::Object)
            .expect("resolve should succeed")
            .expect("element exists");
        assert_eq!(effective.to_db_string(), "5");
        assert!(assigner
            .effective_segments(&mut conn, id(99), ElementKind::Object)
            .expect("resolve should succeed")
            .is_none());
    }

    #[test]
    fn reassign_and_redrain_refreshes_descendants() {
        let mut conn = setup_in_memory_sqlite();
        let (assigner, _) = assigner_with_logger();
        seed_chain(&mut conn);

        assigner
            .assign_by_id(&mut conn, id(1), ElementKind::Object, false, &segments(&[1]))
            .expect("assign a");
        assigner.drain_queue(&mut conn, 10, None).expect("first drain");
        assert_eq!(indexed(&assigner, &mut conn, 4).as_deref(), Some("1"));

        assigner
            .assign_by_id(&mut conn, id(1), ElementKind::Object, false, &segments(&[8, 9]))
            .expect("reassign a");
        assigner.drain_queue(&mut conn, 10, None).expect("second drain");
        assert_eq!(indexed(&assigner, &mut conn, 4).as_deref(), Some("8,9"));
    }

    #[test]
    fn empty_effective_set_clears_index_row() {
        let mut conn = setup_in_memory_sqlite();
        let (assigner, _) = assigner_with_logger();
        seed_chain(&mut conn);

        assigner
            .assign_by_id(&mut conn, id(2), ElementKind::Object, false, &segments(&[2]))
            .expect("assign b");
        assigner.drain_queue(&mut conn, 10, None).expect("drain");
        assert_eq!(indexed(&assigner, &mut conn, 2).as_deref(), Some("2"));

        assigner
            .assign_by_id(&mut conn, id(2), ElementKind::Object, false, &[])
            .expect("clear b");
        let report = assigner.drain_queue(&mut conn, 10, None).expect("drain");

        assert_eq!(report.cleared, 3);
        assert_eq!(indexed(&assigner, &mut conn, 2), None);
        assert_eq!(count_all(&mut conn, &assigner.tables().index), 0);
    }

    #[test]
    fn missing_element_drops_index_row() {
        let mut conn = setup_in_memory_sqlite();
        let (assigner, _) = assigner_with_logger();

        conn.batch_execute(
            "INSERT INTO segment_assignment_index (element_id, element_type, segments) \
             VALUES (77, 'object', '4'); \
             INSERT INTO segment_assignment_queue (element_id, element_type) VALUES (77, 'object');",
        )
        .expect("seed stale rows");

        let report = assigner.drain_batch(&mut conn, 10).expect("drain");
        assert_eq!(report.claimed, 1);
        assert_eq!(report.missing, 1);

        let tables = assigner.tables().clone();
        assert_eq!(count_rows(&mut conn, &tables.index, 77, ElementKind::Object), 0);
        assert_eq!(count_all(&mut conn, &tables.queue), 0);
    }

    #[test]
    fn unknown_queue_discriminator_is_dropped_with_warning() {
        let mut conn = setup_in_memory_sqlite();
        let (assigner, logger) = assigner_with_logger();

        conn.batch_execute(
            "INSERT INTO segment_assignment_queue (element_id, element_type) VALUES (5, 'page')",
        )
        .expect("seed queue row");

        let report = assigner.drain_batch(&mut conn, 10).expect("drain");
        assert_eq!(report.claimed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(count_all(&mut conn, &assigner.tables().queue), 0);

        let warnings: Vec<_> = logger
            .records()
            .into_iter()
            .filter(|record| record.level == Level::Warn)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("page"));
        assert!(logger.errors().is_empty());
    }

    #[test]
    fn draining_an_empty_queue_is_a_no_op() {
        let mut conn = setup_in_memory_sqlite();
        let (assigner, _) = assigner_with_logger();

        let report = assigner.drain_queue(&mut conn, 10, None).expect("drain");
        assert_eq!(report, DrainReport { batches: 1, ..DrainReport::default() });
    }

    #[test]
    fn max_batches_bounds_the_run() {
        let mut conn = setup_in_memory_sqlite();
        let (assigner, _) = assigner_with_logger();
        seed_chain(&mut conn);

        assigner
            .enqueue_children(&mut conn, id(1), ElementKind::Object)
            .expect("enqueue");
        assert_eq!(assigner.queue_depth(&mut conn).expect("depth"), 3);

        let report = assigner
            .drain_queue(&mut conn, 1, Some(2))
            .expect("drain");
        assert_eq!(report.batches, 2);
        assert_eq!(report.claimed, 2);
        assert_eq!(assigner.queue_depth(&mut conn).expect("depth"), 1);

        let rest = assigner.drain_queue(&mut conn, 1, None).expect("drain rest");
        assert_eq!(rest.claimed, 1);
        assert_eq!(assigner.queue_depth(&mut conn).expect("depth"), 0);
    }

    #[test]
    fn non_positive_batch_size_is_rejected() {
        let mut conn = setup_in_memory_sqlite();
        let (assigner, _) = assigner_with_logger();

        let err = assigner
            .drain_batch(&mut conn, 0)
            .expect_err("zero batch size should be rejected");
        assert!(matches!(err, AssignmentError::InvalidInput(_)));
    }

    #[test]
    fn failed_batch_leaves_queue_intact() {
        let mut conn = setup_in_memory_sqlite();
        let (assigner, logger) = assigner_with_logger();
        seed_chain(&mut conn);

        assigner
            .assign_by_id(&mut conn, id(1), ElementKind::Object, false, &segments(&[1]))
            .expect("assign a");
        conn.batch_execute("DROP TABLE segment_assignment_index")
            .expect("drop index table");

        assigner
            .drain_batch(&mut conn, 10)
            .expect_err("drain should fail without an index table");
        assert_eq!(count_all(&mut conn, &assigner.tables().queue), 4);
        assert_eq!(logger.errors().len(), 1);
    }

    #[test]
    fn row_queued_again_during_batch_survives_the_delete() {
        let mut conn = setup_in_memory_sqlite();
        let (assigner, _) = assigner_with_logger();
        seed_chain(&mut conn);

        assigner
            .assign_by_id(&mut conn, id(1), ElementKind::Object, false, &segments(&[1]))
            .expect("assign a");
        // Stands in for an assign committing between the batch read and its queue delete.
        conn.batch_execute(
            "CREATE TRIGGER requeue_b AFTER INSERT ON segment_assignment_index \
             WHEN NEW.element_id = 2 BEGIN \
                 UPDATE segment_assignment_queue SET generation = generation + 1 \
                 WHERE element_id = NEW.element_id AND element_type = NEW.element_type; \
             END;",
        )
        .expect("create trigger");

        let report = assigner.drain_batch(&mut conn, 10).expect("drain");
        assert_eq!(report.claimed, 4);
        assert_eq!(report.requeued, 1);
        let tables = assigner.tables().clone();
        assert_eq!(count_rows(&mut conn, &tables.queue, 2, ElementKind::Object), 1);
        assert_eq!(count_all(&mut conn, &tables.queue), 1);

        conn.batch_execute("DROP TRIGGER requeue_b").expect("drop trigger");
        let report = assigner.drain_batch(&mut conn, 10).expect("second drain");
        assert_eq!(report.claimed, 1);
        assert_eq!(report.requeued, 0);
        assert_eq!(count_all(&mut conn, &tables.queue), 0);
    }

    #[test]
    fn malformed_segments_row_does_not_block_the_queue() {
        let mut conn = setup_in_memory_sqlite();
        let (assigner, logger) = assigner_with_logger();
        seed_element(&mut conn, ElementKind::Object, 1, "/broken");
        seed_element(&mut conn, ElementKind::Object, 2, "/healthy");

        conn.batch_execute(
            "INSERT INTO segment_assignment (element_id, element_type, breaks_inheritance, segments) \
             VALUES (1, 'object', 0, 'x'); \
             INSERT INTO segment_assignment_queue (element_id, element_type) VALUES (1, 'object');",
        )
        .expect("seed malformed row");
        assigner
            .assign_by_id(&mut conn, id(2), ElementKind::Object, false, &segments(&[5]))
            .expect("assign healthy");

        let report = assigner.drain_queue(&mut conn, 10, None).expect("drain");
        assert_eq!(report.claimed, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.indexed, 1);
        assert_eq!(indexed(&assigner, &mut conn, 2).as_deref(), Some("5"));
        assert_eq!(indexed(&assigner, &mut conn, 1), None);
        assert_eq!(assigner.queue_depth(&mut conn).expect("depth"), 0);

        let warnings: Vec<_> = logger
            .records()
            .into_iter()
            .filter(|record| record.level == Level::Warn)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("object:1"));
        assert!(logger.errors().is_empty());
    }

    #[test]
    fn removing_an_ancestor_reindexes_its_descendants() {
        let mut conn = setup_in_memory_sqlite();
        let (assigner, _) = assigner_with_logger();
        seed_element(&mut conn, ElementKind::Object, 1, "/a");
        seed_element(&mut conn, ElementKind::Object, 2, "/a/b");

        assigner
            .assign_by_id(&mut conn, id(1), ElementKind::Object, false, &segments(&[7]))
            .expect("assign a");
        assigner.drain_queue(&mut conn, 10, None).expect("first drain");
        assert_eq!(indexed(&assigner, &mut conn, 2).as_deref(), Some("7"));

        assigner
            .remove_element_by_id(&mut conn, id(1), ElementKind::Object)
            .expect("remove a");
        assert_eq!(assigner.queue_depth(&mut conn).expect("depth"), 1);

        let report = assigner.drain_queue(&mut conn, 10, None).expect("second drain");
        assert_eq!(report.cleared, 1);
        assert_eq!(indexed(&assigner, &mut conn, 2), None);
    }
}
