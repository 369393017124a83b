use diesel::connection::SimpleConnection;
use diesel::QueryResult;

use crate::tables::TableNames;

/// Builds the DDL for the assignment, queue and index tables.
///
/// The statement set is valid on both Postgres and SQLite. Table names are injected, which is
/// why this is generated instead of living in a static migration directory.
pub fn assignment_tables_ddl(tables: &TableNames) -> String {
    let assignment = tables.assignment.quoted();
    let queue = tables.queue.quoted();
    let index = tables.index.quoted();
    let queue_order_index = format!("\"idx_{}_order\"", tables.queue.as_str());

    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {assignment} (
            element_id BIGINT NOT NULL,
            element_type TEXT NOT NULL,
            breaks_inheritance INTEGER NOT NULL DEFAULT 0
                CHECK (breaks_inheritance IN (0, 1)),
            segments TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (element_id, element_type)
        );

        CREATE TABLE IF NOT EXISTS {queue} (
            element_id BIGINT NOT NULL,
            element_type TEXT NOT NULL,
            enqueued_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            generation BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (element_id, element_type)
        );

        CREATE INDEX IF NOT EXISTS {queue_order_index}
            ON {queue} (enqueued_at, element_type, element_id);

        CREATE TABLE IF NOT EXISTS {index} (
            element_id BIGINT NOT NULL,
            element_type TEXT NOT NULL,
            segments TEXT NOT NULL DEFAULT '',
            indexed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (element_id, element_type)
        );
        "#
    )
}

/// Creates the three engine tables when missing. Safe to run on every start.
pub fn create_assignment_tables<C>(conn: &mut C, tables: &TableNames) -> QueryResult<()>
where
    C: SimpleConnection,
{
    conn.batch_execute(&assignment_tables_ddl(tables))
}
