//! Backend seam for the assignment engine.
//!
//! Operations are written once against [`AssignmentDb`] and run on either Postgres (production)
//! or SQLite (tests, single-node tools). Table and column names are configuration, so statements
//! are assembled from validated identifiers while every value travels as a bound parameter.

pub mod schema;

use std::borrow::Cow;

use diesel::backend::Backend;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::serialize::ToSql;
use diesel::sql_query;
use diesel::sql_types::{BigInt, HasSqlType, Integer, Nullable, Text};
use diesel::sqlite::SqliteConnection;

/// One bound parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindValue {
    BigInt(i64),
    Integer(i32),
    Text(String),
}

/// SQL text written with `?` placeholders plus its ordered bind values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    binds: Vec<BindValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            binds: Vec::new(),
        }
    }

    pub fn bind_big_int(mut self, value: i64) -> Self {
        self.binds.push(BindValue::BigInt(value));
        self
    }

    pub fn bind_int(mut self, value: i32) -> Self {
        self.binds.push(BindValue::Integer(value));
        self
    }

    pub fn bind_text(mut self, value: impl Into<String>) -> Self {
        self.binds.push(BindValue::Text(value.into()));
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn binds(&self) -> &[BindValue] {
        &self.binds
    }
}

#[doc(hidden)]
#[derive(Debug, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg, diesel::sqlite::Sqlite))]
pub struct AssignmentRow {
    #[diesel(sql_type = BigInt)]
    pub element_id: i64,
    #[diesel(sql_type = Text)]
    pub element_type: String,
    #[diesel(sql_type = Integer)]
    pub breaks_inheritance: i32,
    #[diesel(sql_type = Text)]
    pub segments: String,
}

#[doc(hidden)]
#[derive(Debug, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg, diesel::sqlite::Sqlite))]
pub struct ElementKeyRow {
    #[diesel(sql_type = BigInt)]
    pub element_id: i64,
    #[diesel(sql_type = Text)]
    pub element_type: String,
}

#[doc(hidden)]
#[derive(Debug, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg, diesel::sqlite::Sqlite))]
pub struct QueueRow {
    #[diesel(sql_type = BigInt)]
    pub element_id: i64,
    #[diesel(sql_type = Text)]
    pub element_type: String,
    #[diesel(sql_type = BigInt)]
    pub generation: i64,
}

#[doc(hidden)]
#[derive(Debug, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg, diesel::sqlite::Sqlite))]
pub struct ElementPathRow {
    #[diesel(sql_type = BigInt)]
    pub element_id: i64,
    #[diesel(sql_type = Nullable<Text>)]
    pub element_path: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub element_key: Option<String>,
}

#[doc(hidden)]
#[derive(Debug, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg, diesel::sqlite::Sqlite))]
pub struct IndexRow {
    #[diesel(sql_type = BigInt)]
    pub element_id: i64,
    #[diesel(sql_type = Text)]
    pub element_type: String,
    #[diesel(sql_type = Text)]
    pub segments: String,
}

#[doc(hidden)]
#[derive(Debug, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg, diesel::sqlite::Sqlite))]
pub struct CountRow {
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

/// Connection capabilities the assignment engine needs.
///
/// `Connection` is a supertrait so callers get `transaction` (with savepoints when nested).
pub trait AssignmentDb: Connection {
    fn execute_statement(&mut self, statement: &Statement) -> QueryResult<usize>;
    fn load_assignments(&mut self, statement: &Statement) -> QueryResult<Vec<AssignmentRow>>;
    fn load_element_keys(&mut self, statement: &Statement) -> QueryResult<Vec<ElementKeyRow>>;
    fn load_queue_rows(&mut self, statement: &Statement) -> QueryResult<Vec<QueueRow>>;
    fn load_element_paths(&mut self, statement: &Statement)
        -> QueryResult<Vec<ElementPathRow>>;
    fn load_index_rows(&mut self, statement: &Statement) -> QueryResult<Vec<IndexRow>>;
    fn load_counts(&mut self, statement: &Statement) -> QueryResult<Vec<CountRow>>;
}

fn boxed_query<DB>(sql: String, binds: &[BindValue]) -> BoxedSqlQuery<'static, DB, SqlQuery>
where
    DB: Backend + HasSqlType<BigInt> + HasSqlType<Integer> + HasSqlType<Text>,
    i64: ToSql<BigInt, DB>,
    i32: ToSql<Integer, DB>,
    String: ToSql<Text, DB>,
{
    binds
        .iter()
        .fold(sql_query(sql).into_boxed::<DB>(), |query, bind| match bind {
            BindValue::BigInt(value) => query.bind::<BigInt, _>(*value),
            BindValue::Integer(value) => query.bind::<Integer, _>(*value),
            BindValue::Text(value) => query.bind::<Text, _>(value.clone()),
        })
}

/// Rewrites `?` placeholders into Postgres' positional `$n` form.
///
/// Statement text never carries literal `?`: identifiers are validated and values are bound.
pub fn numbered_placeholders(sql: &str) -> Cow<'_, str> {
    if !sql.contains('?') {
        return Cow::Borrowed(sql);
    }

    let mut out = String::with_capacity(sql.len() + 8);
    let mut position = 0usize;
    for ch in sql.chars() {
        if ch == '?' {
            position += 1;
            out.push('$');
            out.push_str(&position.to_string());
        } else {
            out.push(ch);
        }
    }
    Cow::Owned(out)
}

impl AssignmentDb for PgConnection {
    fn execute_statement(&mut self, statement: &Statement) -> QueryResult<usize> {
        let sql = numbered_placeholders(statement.sql()).into_owned();
        boxed_query::<diesel::pg::Pg>(sql, statement.binds()).execute(self)
    }

    fn load_assignments(&mut self, statement: &Statement) -> QueryResult<Vec<AssignmentRow>> {
        let sql = numbered_placeholders(statement.sql()).into_owned();
        boxed_query::<diesel::pg::Pg>(sql, statement.binds()).load::<AssignmentRow>(self)
    }

    fn load_element_keys(&mut self, statement: &Statement) -> QueryResult<Vec<ElementKeyRow>> {
        let sql = numbered_placeholders(statement.sql()).into_owned();
        boxed_query::<diesel::pg::Pg>(sql, statement.binds()).load::<ElementKeyRow>(self)
    }

    fn load_queue_rows(&mut self, statement: &Statement) -> QueryResult<Vec<QueueRow>> {
        let sql = numbered_placeholders(statement.sql()).into_owned();
        boxed_query::<diesel::pg::Pg>(sql, statement.binds()).load::<QueueRow>(self)
    }

    fn load_element_paths(
        &mut self,
        statement: &Statement,
    ) -> QueryResult<Vec<ElementPathRow>> {
        let sql = numbered_placeholders(statement.sql()).into_owned();
        boxed_query::<diesel::pg::Pg>(sql, statement.binds()).load::<ElementPathRow>(self)
    }

    fn load_index_rows(&mut self, statement: &Statement) -> QueryResult<Vec<IndexRow>> {
        let sql = numbered_placeholders(statement.sql()).into_owned();
        boxed_query::<diesel::pg::Pg>(sql, statement.binds()).load::<IndexRow>(self)
    }

    fn load_counts(&mut self, statement: &Statement) -> QueryResult<Vec<CountRow>> {
        let sql = numbered_placeholders(statement.sql()).into_owned();
        boxed_query::<diesel::pg::Pg>(sql, statement.binds()).load::<CountRow>(self)
    }
}

impl AssignmentDb for SqliteConnection {
    fn execute_statement(&mut self, statement: &Statement) -> QueryResult<usize> {
        boxed_query::<diesel::sqlite::Sqlite>(statement.sql().to_string(), statement.binds())
            .execute(self)
    }

    fn load_assignments(&mut self, statement: &Statement) -> QueryResult<Vec<AssignmentRow>> {
        boxed_query::<diesel::sqlite::Sqlite>(statement.sql().to_string(), statement.binds())
            .load::<AssignmentRow>(self)
    }

    fn load_element_keys(&mut self, statement: &Statement) -> QueryResult<Vec<ElementKeyRow>> {
        boxed_query::<diesel::sqlite::Sqlite>(statement.sql().to_string(), statement.binds())
            .load::<ElementKeyRow>(self)
    }

    fn load_queue_rows(&mut self, statement: &Statement) -> QueryResult<Vec<QueueRow>> {
        boxed_query::<diesel::sqlite::Sqlite>(statement.sql().to_string(), statement.binds())
            .load::<QueueRow>(self)
    }

    fn load_element_paths(
        &mut self,
        statement: &Statement,
    ) -> QueryResult<Vec<ElementPathRow>> {
        boxed_query::<diesel::sqlite::Sqlite>(statement.sql().to_string(), statement.binds())
            .load::<ElementPathRow>(self)
    }

    fn load_index_rows(&mut self, statement: &Statement) -> QueryResult<Vec<IndexRow>> {
        boxed_query::<diesel::sqlite::Sqlite>(statement.sql().to_string(), statement.binds())
            .load::<IndexRow>(self)
    }

    fn load_counts(&mut self, statement: &Statement) -> QueryResult<Vec<CountRow>> {
        boxed_query::<diesel::sqlite::Sqlite>(statement.sql().to_string(), statement.binds())
            .load::<CountRow>(self)
    }
}
