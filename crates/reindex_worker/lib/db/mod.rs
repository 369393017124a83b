use diesel::pg::PgConnection;
use diesel::sqlite::SqliteConnection;
use diesel::{Connection, ConnectionError};

const SQLITE_SCHEME: &str = "sqlite://";
const POSTGRES_SCHEMES: [&str; 2] = ["postgres://", "postgresql://"];

/// Where the worker stores assignments, chosen from the shape of `DATABASE_URL`.
///
/// `postgres://` and `postgresql://` URLs go to Postgres. `sqlite://path` and bare paths
/// (including `:memory:`) go to SQLite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Postgres(String),
    Sqlite(String),
}

impl DatabaseTarget {
    pub fn parse(url: &str) -> Self {
        let url = url.trim();
        if POSTGRES_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
            return Self::Postgres(url.to_string());
        }
        Self::Sqlite(url.strip_prefix(SQLITE_SCHEME).unwrap_or(url).to_string())
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Sqlite(_) => "sqlite",
        }
    }

    pub fn establish(&self) -> Result<WorkerConnection, ConnectionError> {
        match self {
            Self::Postgres(url) => PgConnection::establish(url).map(WorkerConnection::Postgres),
            Self::Sqlite(path) => SqliteConnection::establish(path).map(WorkerConnection::Sqlite),
        }
    }
}

/// One open connection to either supported backend.
pub enum WorkerConnection {
    Postgres(PgConnection),
    Sqlite(SqliteConnection),
}

/// Runs `$body` with `$conn` bound to the concrete connection inside a [`WorkerConnection`].
///
/// The body is compiled once per backend, so it can call generic `AssignmentDb` operations.
#[macro_export]
macro_rules! with_connection {
    ($connection:expr, |$conn:ident| $body:expr) => {
        match $connection {
            $crate::db::WorkerConnection::Postgres($conn) => $body,
            $crate::db::WorkerConnection::Sqlite($conn) => $body,
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_urls_are_recognized() {
        assert_eq!(
            DatabaseTarget::parse("postgres://user@localhost/cmf"),
            DatabaseTarget::Postgres("postgres://user@localhost/cmf".to_string())
        );
        assert_eq!(
            DatabaseTarget::parse(" postgresql://localhost/cmf ").backend_name(),
            "postgres"
        );
    }

    #[test]
    fn everything_else_is_a_sqlite_path() {
        assert_eq!(
            DatabaseTarget::parse("sqlite://data/cmf.db"),
            DatabaseTarget::Sqlite("data/cmf.db".to_string())
        );
        assert_eq!(
            DatabaseTarget::parse("cmf.db"),
            DatabaseTarget::Sqlite("cmf.db".to_string())
        );
        assert_eq!(
            DatabaseTarget::parse(":memory:"),
            DatabaseTarget::Sqlite(":memory:".to_string())
        );
    }

    #[test]
    fn in_memory_sqlite_connects() {
        let connection = DatabaseTarget::parse(":memory:")
            .establish()
            .expect("in-memory sqlite should open");
        assert!(matches!(connection, WorkerConnection::Sqlite(_)));
    }
}
