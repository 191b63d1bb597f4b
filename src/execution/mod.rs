//! Query execution against an open warehouse session.
//!
//! Every stage funnels its statements through [`execute`], which attaches the failing statement
//! to any error and logs it. There is no retry and no batching: one call, one statement.

use std::time::Instant;

use tracing::{debug, error};

use crate::error::{ExecutionCause, QueryExecutionError, QueryResult};
use crate::types::{Row, Value};
use crate::warehouse::Session;

/// Run one statement.
///
/// Returns all rows when the statement produces a result set, `None` when it does not.
/// Failures carry the statement text and propagate to the caller unchanged.
pub fn execute(session: &mut dyn Session, statement: &str) -> QueryResult<Option<Vec<Row>>> {
    let start = Instant::now();
    match session.query(statement) {
        Ok(rows) => {
            debug!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                rows = rows.as_ref().map(Vec::len),
                "statement completed"
            );
            Ok(rows)
        }
        Err(cause) => {
            error!("Query failed: {cause}\nQuery: {}", statement.trim());
            Err(QueryExecutionError::new(statement.trim(), cause))
        }
    }
}

/// Run a count-producing statement and return the first scalar of the first row.
///
/// A statement that yields no rows, or a first cell that is not a non-negative integer, is a
/// [`ExecutionCause::NotACount`] failure.
pub fn execute_count(session: &mut dyn Session, statement: &str) -> QueryResult<u64> {
    let rows = execute(session, statement)?;
    let first = rows
        .as_ref()
        .and_then(|rows| rows.first())
        .and_then(|row| row.first());
    match first.and_then(Value::as_count) {
        Some(count) => Ok(count),
        None => {
            let found = match (&rows, first) {
                (None, _) => "no result set".to_string(),
                (Some(_), None) => "no rows".to_string(),
                (Some(_), Some(v)) => v.to_string(),
            };
            error!("Query did not return a count ({found})\nQuery: {}", statement.trim());
            Err(QueryExecutionError::new(
                statement.trim(),
                ExecutionCause::NotACount { found },
            ))
        }
    }
}
