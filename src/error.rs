use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::Stage;

/// Convenience result type for statement execution.
pub type QueryResult<T> = Result<T, QueryExecutionError>;

/// Session acquisition failed. Fatal: no pipeline stage runs without a session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A required connection parameter is missing or empty.
    #[error("invalid connection parameters: {message}")]
    InvalidConfig { message: String },

    /// The warehouse endpoint could not be opened.
    #[error("failed to connect to warehouse at '{endpoint}': {source}")]
    Open {
        endpoint: String,
        #[source]
        source: rusqlite::Error,
    },

    /// The session could not be initialised after opening (function registration, metadata tables).
    #[error("failed to initialise session at '{endpoint}': {source}")]
    Init {
        endpoint: String,
        #[source]
        source: rusqlite::Error,
    },
}

/// A statement failed at the infrastructure or syntax level.
///
/// Carries the failing statement text alongside the underlying cause.
#[derive(Debug, Error)]
#[error("query failed: {cause}\nQuery: {statement}")]
pub struct QueryExecutionError {
    pub statement: String,
    #[source]
    pub cause: ExecutionCause,
}

impl QueryExecutionError {
    pub fn new(statement: impl Into<String>, cause: ExecutionCause) -> Self {
        Self {
            statement: statement.into(),
            cause,
        }
    }
}

/// Underlying reason a statement failed.
#[derive(Debug, Error)]
pub enum ExecutionCause {
    /// Error raised by the SQL engine (syntax, missing table/column, constraint...).
    #[error("sql error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O failure while reading a staged file.
    #[error("io error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The COPY statement text could not be understood.
    #[error("invalid COPY statement: {message}")]
    CopySyntax { message: String },

    /// `@name` does not refer to a registered stage.
    #[error("stage '@{name}' does not exist or not authorized")]
    UnknownStage { name: String },

    /// `FORMAT_NAME` does not refer to a registered file format.
    #[error("file format '{name}' does not exist or not authorized")]
    UnknownFileFormat { name: String },

    /// A named file format exists but cannot be applied.
    #[error("file format '{name}' is invalid: {message}")]
    InvalidFileFormat { name: String, message: String },

    /// A row-level ingestion error under `ON_ERROR = 'ABORT_STATEMENT'`.
    #[error("malformed row at line {line} of '{file}': {message}")]
    MalformedRow {
        file: String,
        line: u64,
        message: String,
    },

    /// A count-producing query did not produce a non-negative integer in its first cell.
    #[error("expected a count in the first column of the first row, found {found}")]
    NotACount { found: String },

    /// The statement ran past the configured timeout and was interrupted.
    #[error("statement exceeded timeout of {timeout_ms} ms")]
    Timeout { timeout_ms: u128 },
}

/// A stage failed; the run was terminated at that stage.
#[derive(Debug, Error)]
#[error("stage '{stage}' failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: QueryExecutionError,
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Rules(#[from] RuleSetError),
}

/// The declared quality rule set is inconsistent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleSetError {
    #[error("duplicate quality rule name '{name}'")]
    DuplicateName { name: String },

    #[error("quality rule name must not be empty")]
    EmptyName,
}
