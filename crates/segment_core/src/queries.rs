//! Statement builders shared by the assigner and the reindexer.
//!
//! None of these open a transaction; callers decide the transactional boundary.

use crate::assigner::SegmentAssignment;
use crate::db::{AssignmentDb, AssignmentRow, ElementPathRow, QueueRow, Statement};
use crate::element::{ElementId, ElementKind, ElementPath, ElementRef};
use crate::error::AssignmentError;
use crate::segment::SegmentSet;
use crate::tables::TableNames;
use crate::type_mapper::ElementTable;

pub(crate) fn upsert_assignment<C>(
    conn: &mut C,
    tables: &TableNames,
    element: ElementRef,
    breaks_inheritance: bool,
    segments: &SegmentSet,
) -> Result<usize, AssignmentError>
where
    C: AssignmentDb,
{
    let sql = format!(
        "INSERT INTO {} (element_id, element_type, breaks_inheritance, segments) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT (element_id, element_type) DO UPDATE SET \
             breaks_inheritance = excluded.breaks_inheritance, \
             segments = excluded.segments",
        tables.assignment.quoted()
    );

    Ok(conn.execute_statement(
        &Statement::new(sql)
            .bind_big_int(element.id.get())
            .bind_text(element.kind.as_db_str())
            .bind_int(i32::from(breaks_inheritance))
            .bind_text(segments.to_db_string()),
    )?)
}

/// Queues one element. An existing row keeps its place in line and gets its generation bumped,
/// so a consumer holding the older generation will not delete it.
pub(crate) fn insert_queue_entry<C>(
    conn: &mut C,
    tables: &TableNames,
    element: ElementRef,
) -> Result<usize, AssignmentError>
where
    C: AssignmentDb,
{
    let sql = format!(
        "INSERT INTO {queue} (element_id, element_type) VALUES (?, ?) \
         ON CONFLICT (element_id, element_type) DO UPDATE SET \
             generation = {queue}.generation + 1",
        queue = tables.queue.quoted()
    );

    Ok(conn.execute_statement(
        &Statement::new(sql)
            .bind_big_int(element.id.get())
            .bind_text(element.kind.as_db_str()),
    )?)
}

/// Queues every element of the same kind whose path lies under `element`.
///
/// Returns the number of newly inserted queue rows. Descendants already queued are counted out
/// but still get their generation bumped. An element missing from its source table has no
/// descendants to queue.
pub(crate) fn enqueue_descendants<C>(
    conn: &mut C,
    tables: &TableNames,
    source: &ElementTable,
    element: ElementRef,
) -> Result<usize, AssignmentError>
where
    C: AssignmentDb,
{
    let Some(location) = load_element_path(conn, source, element.id)? else {
        return Ok(0);
    };
    let prefix = location.descendant_prefix();

    // substr/length keeps the match exact and case-sensitive on both backends, unlike LIKE.
    let bump = format!(
        "UPDATE {queue} SET generation = generation + 1 \
         WHERE element_type = ? AND element_id IN ( \
             SELECT {id} FROM {table} WHERE substr({path}, 1, length(?)) = ? \
         )",
        queue = tables.queue.quoted(),
        id = source.id_column.quoted(),
        table = source.table.quoted(),
        path = source.path_column.quoted(),
    );
    conn.execute_statement(
        &Statement::new(bump)
            .bind_text(element.kind.as_db_str())
            .bind_text(prefix.clone())
            .bind_text(prefix.clone()),
    )?;

    let sql = format!(
        "INSERT INTO {queue} (element_id, element_type) \
         SELECT {id}, ? FROM {table} \
         WHERE substr({path}, 1, length(?)) = ? \
         ON CONFLICT (element_id, element_type) DO NOTHING",
        queue = tables.queue.quoted(),
        id = source.id_column.quoted(),
        table = source.table.quoted(),
        path = source.path_column.quoted(),
    );

    Ok(conn.execute_statement(
        &Statement::new(sql)
            .bind_text(element.kind.as_db_str())
            .bind_text(prefix.clone())
            .bind_text(prefix),
    )?)
}

pub(crate) fn delete_element_rows<C>(
    conn: &mut C,
    tables: &TableNames,
    element: ElementRef,
) -> Result<(), AssignmentError>
where
    C: AssignmentDb,
{
    for table in [&tables.assignment, &tables.queue, &tables.index] {
        let sql = format!(
            "DELETE FROM {} WHERE element_id = ? AND element_type = ?",
            table.quoted()
        );
        conn.execute_statement(
            &Statement::new(sql)
                .bind_big_int(element.id.get())
                .bind_text(element.kind.as_db_str()),
        )?;
    }
    Ok(())
}

pub(crate) fn load_assignment<C>(
    conn: &mut C,
    tables: &TableNames,
    element: ElementRef,
) -> Result<Option<SegmentAssignment>, AssignmentError>
where
    C: AssignmentDb,
{
    let sql = format!(
        "SELECT element_id, element_type, breaks_inheritance, segments \
         FROM {} WHERE element_id = ? AND element_type = ? LIMIT 1",
        tables.assignment.quoted()
    );

    let mut rows = conn.load_assignments(
        &Statement::new(sql)
            .bind_big_int(element.id.get())
            .bind_text(element.kind.as_db_str()),
    )?;
    rows.pop().map(map_assignment_row).transpose()
}

pub(crate) fn load_index_segments<C>(
    conn: &mut C,
    tables: &TableNames,
    element: ElementRef,
) -> Result<Option<SegmentSet>, AssignmentError>
where
    C: AssignmentDb,
{
    let sql = format!(
        "SELECT element_id, element_type, segments \
         FROM {} WHERE element_id = ? AND element_type = ? LIMIT 1",
        tables.index.quoted()
    );

    let mut rows = conn.load_index_rows(
        &Statement::new(sql)
            .bind_big_int(element.id.get())
            .bind_text(element.kind.as_db_str()),
    )?;
    rows.pop()
        .map(|row| SegmentSet::from_db_str(&row.segments))
        .transpose()
}

pub(crate) fn upsert_index_entry<C>(
    conn: &mut C,
    tables: &TableNames,
    element: ElementRef,
    segments: &SegmentSet,
) -> Result<usize, AssignmentError>
where
    C: AssignmentDb,
{
    let sql = format!(
        "INSERT INTO {} (element_id, element_type, segments) VALUES (?, ?, ?) \
         ON CONFLICT (element_id, element_type) DO UPDATE SET \
             segments = excluded.segments, \
             indexed_at = CURRENT_TIMESTAMP",
        tables.index.quoted()
    );

    Ok(conn.execute_statement(
        &Statement::new(sql)
            .bind_big_int(element.id.get())
            .bind_text(element.kind.as_db_str())
            .bind_text(segments.to_db_string()),
    )?)
}

pub(crate) fn delete_index_entry<C>(
    conn: &mut C,
    tables: &TableNames,
    element: ElementRef,
) -> Result<usize, AssignmentError>
where
    C: AssignmentDb,
{
    let sql = format!(
        "DELETE FROM {} WHERE element_id = ? AND element_type = ?",
        tables.index.quoted()
    );
    Ok(conn.execute_statement(
        &Statement::new(sql)
            .bind_big_int(element.id.get())
            .bind_text(element.kind.as_db_str()),
    )?)
}

/// Oldest queue rows first; ties broken by key so batches are deterministic.
pub(crate) fn load_queue_batch<C>(
    conn: &mut C,
    tables: &TableNames,
    batch_size: i64,
) -> Result<Vec<QueueRow>, AssignmentError>
where
    C: AssignmentDb,
{
    let sql = format!(
        "SELECT element_id, element_type, generation FROM {} \
         ORDER BY enqueued_at ASC, element_type ASC, element_id ASC \
         LIMIT ?",
        tables.queue.quoted()
    );
    Ok(conn.load_queue_rows(&Statement::new(sql).bind_big_int(batch_size))?)
}

/// Deletes a claimed queue row by its raw stored key, which may carry an unknown discriminator.
///
/// Only the generation that was read is deleted. Returns 0 when the row was queued again in the
/// meantime, which leaves it for the next batch.
pub(crate) fn delete_queue_row<C>(
    conn: &mut C,
    tables: &TableNames,
    row: &QueueRow,
) -> Result<usize, AssignmentError>
where
    C: AssignmentDb,
{
    let sql = format!(
        "DELETE FROM {} WHERE element_id = ? AND element_type = ? AND generation = ?",
        tables.queue.quoted()
    );
    Ok(conn.execute_statement(
        &Statement::new(sql)
            .bind_big_int(row.element_id)
            .bind_text(row.element_type.as_str())
            .bind_big_int(row.generation),
    )?)
}

pub(crate) fn count_queue<C>(conn: &mut C, tables: &TableNames) -> Result<i64, AssignmentError>
where
    C: AssignmentDb,
{
    let sql = format!("SELECT COUNT(*) AS count FROM {}", tables.queue.quoted());
    Ok(conn
        .load_counts(&Statement::new(sql))?
        .pop()
        .map(|row| row.count)
        .unwrap_or_default())
}

pub(crate) fn load_element_path<C>(
    conn: &mut C,
    source: &ElementTable,
    element_id: ElementId,
) -> Result<Option<ElementPath>, AssignmentError>
where
    C: AssignmentDb,
{
    let sql = format!(
        "SELECT CAST({id} AS BIGINT) AS element_id, {path} AS element_path, {key} AS element_key \
         FROM {table} WHERE {id} = ? LIMIT 1",
        id = source.id_column.quoted(),
        path = source.path_column.quoted(),
        key = source.key_column.quoted(),
        table = source.table.quoted(),
    );

    let mut rows = conn.load_element_paths(&Statement::new(sql).bind_big_int(element_id.get()))?;
    Ok(rows.pop().and_then(map_element_path_row))
}

/// Resolves the element sitting at `location`, if the element source has one.
pub(crate) fn find_element_at<C>(
    conn: &mut C,
    source: &ElementTable,
    location: &ElementPath,
) -> Result<Option<ElementId>, AssignmentError>
where
    C: AssignmentDb,
{
    let sql = format!(
        "SELECT CAST({id} AS BIGINT) AS element_id, {path} AS element_path, {key} AS element_key \
         FROM {table} WHERE {path} = ? AND {key} = ? \
         ORDER BY {id} ASC LIMIT 1",
        id = source.id_column.quoted(),
        path = source.path_column.quoted(),
        key = source.key_column.quoted(),
        table = source.table.quoted(),
    );

    let mut rows = conn.load_element_paths(
        &Statement::new(sql)
            .bind_text(location.path.clone())
            .bind_text(location.key.clone()),
    )?;
    rows.pop()
        .map(|row| ElementId::new(row.element_id).map_err(AssignmentError::from))
        .transpose()
}

fn map_assignment_row(row: AssignmentRow) -> Result<SegmentAssignment, AssignmentError> {
    Ok(SegmentAssignment {
        element: ElementRef::new(
            ElementId::new(row.element_id)?,
            ElementKind::from_db_str(&row.element_type)?,
        ),
        breaks_inheritance: row.breaks_inheritance != 0,
        segments: SegmentSet::from_db_str(&row.segments)?,
    })
}

/// A row without a path has no place in the tree and is treated as missing.
fn map_element_path_row(row: ElementPathRow) -> Option<ElementPath> {
    let path = row.element_path?;
    Some(ElementPath::new(path, row.element_key.unwrap_or_default()))
}
