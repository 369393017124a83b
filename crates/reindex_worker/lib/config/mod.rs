use std::env;
use std::path::PathBuf;

use segment_core::tables::{
    DEFAULT_ASSIGNMENT_TABLE, DEFAULT_INDEX_TABLE, DEFAULT_QUEUE_TABLE,
};
use segment_core::{TableConfigError, TableNames, TableTypeMapper};
use thiserror::Error;

use crate::db::DatabaseTarget;

pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const ASSIGNMENT_TABLE_VAR: &str = "SEGMENT_ASSIGNMENT_TABLE";
pub const QUEUE_TABLE_VAR: &str = "SEGMENT_ASSIGNMENT_QUEUE_TABLE";
pub const INDEX_TABLE_VAR: &str = "SEGMENT_ASSIGNMENT_INDEX_TABLE";
pub const ELEMENT_TABLES_PATH_VAR: &str = "ELEMENT_TABLES_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DATABASE_URL is required (env var or --database-url)")]
    MissingDatabaseUrl,
    #[error(transparent)]
    Tables(#[from] TableConfigError),
}

/// Values given on the command line; they win over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub element_tables_path: Option<PathBuf>,
}

/// Resolved worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseTarget,
    pub tables: TableNames,
    pub element_tables_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok(), overrides)
    }

    /// Resolves configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F, overrides: ConfigOverrides) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url = overrides
            .database_url
            .or_else(|| non_empty(DATABASE_URL_VAR))
            .ok_or(ConfigError::MissingDatabaseUrl)?;

        let tables = TableNames::new(
            non_empty(ASSIGNMENT_TABLE_VAR).as_deref().unwrap_or(DEFAULT_ASSIGNMENT_TABLE),
            non_empty(QUEUE_TABLE_VAR).as_deref().unwrap_or(DEFAULT_QUEUE_TABLE),
            non_empty(INDEX_TABLE_VAR).as_deref().unwrap_or(DEFAULT_INDEX_TABLE),
        )?;

        let element_tables_path = overrides
            .element_tables_path
            .or_else(|| non_empty(ELEMENT_TABLES_PATH_VAR).map(PathBuf::from));

        Ok(Self {
            database: DatabaseTarget::parse(&database_url),
            tables,
            element_tables_path,
        })
    }

    /// Builds the element-source mapping, applying the JSON override file when configured.
    pub fn type_mapper(&self) -> Result<TableTypeMapper, TableConfigError> {
        match &self.element_tables_path {
            Some(path) => TableTypeMapper::from_path(path),
            None => Ok(TableTypeMapper::default()),
        }
    }
}
