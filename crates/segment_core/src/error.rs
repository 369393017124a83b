use thiserror::Error;

/// Error type for assignment, propagation and reindex operations.
#[derive(Debug, Error)]
pub enum AssignmentError {
    #[error("database operation failed: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("invalid assignment input: {0}")]
    InvalidInput(String),
    #[error("invalid identifier value: {0}")]
    Parse(#[from] ParseError),
    #[error("malformed segment list in database: {0}")]
    MalformedSegments(String),
}

/// Rejections raised while turning caller-supplied text into typed identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("element id must be a positive integer, got `{0}`")]
    InvalidElementId(String),
    #[error("unknown element type `{0}` (expected object, document or asset)")]
    UnknownElementType(String),
    #[error("segment id must be a positive integer, got `{0}`")]
    InvalidSegmentId(String),
}

/// Errors raised while building table-name and element-table configuration.
#[derive(Debug, Error)]
pub enum TableConfigError {
    #[error("invalid SQL identifier `{0}`: expected [A-Za-z_][A-Za-z0-9_]* up to 63 chars")]
    InvalidIdentifier(String),
    #[error("table names must be distinct, `{0}` is used twice")]
    DuplicateTable(String),
    #[error("failed to read element table config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse element table config: {0}")]
    Json(#[from] serde_json::Error),
}
