//! Warehouse sessions.
//!
//! A [`Session`] runs one statement at a time and hands back result rows, or `None` when the
//! statement has no result set. A [`Connector`] turns [`WarehouseConfig`] into an open session;
//! it is the seam tests use to fabricate sessions.
//!
//! The bundled backend is [`SqliteConnector`]: an embedded SQL engine extended with the
//! pieces of the warehouse dialect the pipeline issues (`COPY INTO` from named stages,
//! `TRY_TO_DOUBLE`, `TRY_TO_DATE`).

pub mod copy;
pub mod functions;
mod sqlite;

use std::time::{Duration, Instant};

use crate::config::WarehouseConfig;
use crate::error::{ConnectionError, ExecutionCause};
use crate::types::Row;

pub use copy::{
    COPY_RESULT_COLUMNS, CopyOutcome, CopyStatement, LOAD_HISTORY_TABLE, LoadStatus, StageCatalog,
};
pub use sqlite::{SqliteConnector, SqliteSession};

/// An open, authenticated warehouse session.
pub trait Session {
    /// Run a single statement.
    ///
    /// Returns `Ok(None)` when the statement produces no result set (DDL, DML without
    /// projection). Any per-statement handle is released before returning.
    fn query(&mut self, statement: &str) -> Result<Option<Vec<Row>>, ExecutionCause>;

    /// Release the session.
    fn close(self: Box<Self>) -> Result<(), ExecutionCause>;
}

/// Opens sessions from explicit connection parameters.
pub trait Connector {
    fn connect(&self, config: &WarehouseConfig) -> Result<Box<dyn Session>, ConnectionError>;
}

/// Reject configurations with any empty connection parameter.
pub fn validate(config: &WarehouseConfig) -> Result<(), ConnectionError> {
    let required = [
        ("identity", &config.identity),
        ("endpoint", &config.endpoint),
        ("compute_allocation", &config.compute_allocation),
        ("database", &config.database),
        ("schema", &config.schema),
    ];
    let missing: Vec<&str> = required
        .iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| *k)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConnectionError::InvalidConfig {
            message: format!("missing {}", missing.join(", ")),
        })
    }
}

/// Point in time after which a running statement is interrupted.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    start: Instant,
    timeout: Duration,
}

impl Deadline {
    pub(crate) fn after(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    pub(crate) fn expired(&self) -> bool {
        self.start.elapsed() >= self.timeout
    }

    pub(crate) fn check(&self) -> Result<(), ExecutionCause> {
        if self.expired() {
            Err(self.into_cause())
        } else {
            Ok(())
        }
    }

    pub(crate) fn into_cause(self) -> ExecutionCause {
        ExecutionCause::Timeout {
            timeout_ms: self.timeout.as_millis(),
        }
    }
}
