//! Embedded SQLite warehouse backend.

use std::time::Duration;

use rusqlite::{Connection, ErrorCode};

use crate::config::{PipelineConfig, WarehouseConfig};
use crate::error::{ConnectionError, ExecutionCause};
use crate::types::{Row, Value};

use super::copy::{CopyStatement, StageCatalog, execute_copy, load_history_ddl};
use super::{Connector, Deadline, Session, functions, validate};

/// How many VM instructions run between timeout checks.
const PROGRESS_INTERVAL: i32 = 1_000;

/// Opens [`SqliteSession`]s against `WarehouseConfig::endpoint`.
#[derive(Debug, Clone, Default)]
pub struct SqliteConnector {
    catalog: StageCatalog,
}

impl SqliteConnector {
    pub fn new(catalog: StageCatalog) -> Self {
        Self { catalog }
    }

    /// Connector resolving the stages and file formats declared in `config`.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(StageCatalog::from_config(config))
    }
}

impl Connector for SqliteConnector {
    fn connect(&self, config: &WarehouseConfig) -> Result<Box<dyn Session>, ConnectionError> {
        Ok(Box::new(SqliteSession::open(config, self.catalog.clone())?))
    }
}

/// A session over one SQLite connection.
#[derive(Debug)]
pub struct SqliteSession {
    conn: Connection,
    catalog: StageCatalog,
    timeout: Option<Duration>,
}

impl SqliteSession {
    pub fn open(config: &WarehouseConfig, catalog: StageCatalog) -> Result<Self, ConnectionError> {
        validate(config)?;
        let conn = Connection::open(&config.endpoint).map_err(|source| ConnectionError::Open {
            endpoint: config.endpoint.clone(),
            source,
        })?;
        let init = |conn: &Connection| -> rusqlite::Result<()> {
            functions::register(conn)?;
            conn.execute_batch(&load_history_ddl())
        };
        init(&conn).map_err(|source| ConnectionError::Init {
            endpoint: config.endpoint.clone(),
            source,
        })?;
        Ok(Self {
            conn,
            catalog,
            timeout: config.statement_timeout(),
        })
    }

    /// Borrow the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn run_sql(
        &self,
        sql: &str,
        deadline: Option<Deadline>,
    ) -> Result<Option<Vec<Row>>, ExecutionCause> {
        if let Some(d) = deadline {
            self.conn.progress_handler(PROGRESS_INTERVAL, Some(move || d.expired()));
        }
        let result = query_rows(&self.conn, sql);
        if deadline.is_some() {
            self.conn.progress_handler(0, None::<fn() -> bool>);
        }
        result.map_err(|e| match (deadline, &e) {
            (Some(d), rusqlite::Error::SqliteFailure(ffi, _))
                if ffi.code == ErrorCode::OperationInterrupted =>
            {
                d.into_cause()
            }
            _ => ExecutionCause::Sqlite(e),
        })
    }
}

impl Session for SqliteSession {
    fn query(&mut self, statement: &str) -> Result<Option<Vec<Row>>, ExecutionCause> {
        let deadline = self.timeout.map(Deadline::after);
        match CopyStatement::parse(statement)? {
            Some(copy) => {
                let outcome = execute_copy(&mut self.conn, &copy, &self.catalog, deadline)?;
                Ok(Some(vec![outcome.into_row()]))
            }
            None => self.run_sql(statement, deadline),
        }
    }

    fn close(self: Box<Self>) -> Result<(), ExecutionCause> {
        self.conn
            .close()
            .map_err(|(_, e)| ExecutionCause::Sqlite(e))
    }
}

/// Prepare, run and drain one statement. The prepared statement is dropped on every path.
fn query_rows(conn: &Connection, sql: &str) -> rusqlite::Result<Option<Vec<Row>>> {
    let mut stmt = conn.prepare(sql)?;
    let width = stmt.column_count();
    if width == 0 {
        stmt.execute([])?;
        return Ok(None);
    }

    let mut out = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(Value::from(row.get_ref(i)?));
        }
        out.push(values);
    }
    Ok(Some(out))
}
