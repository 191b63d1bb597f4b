#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use finance_etl::config::{PipelineConfig, WarehouseConfig};
use finance_etl::pipeline::{PipelineEvent, PipelineObserver};
use finance_etl::types::{Row, Value};
use finance_etl::warehouse::{Connector, Session, SqliteConnector};
use finance_etl::{ConnectionError, ExecutionCause};

pub const FIXTURES: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// A warehouse file plus a stage directory, both inside a temp dir.
pub struct Workspace {
    pub dir: tempfile::TempDir,
    pub config: PipelineConfig,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let stage = dir.path().join("stage");
        std::fs::create_dir(&stage).unwrap();

        let mut config = PipelineConfig::default().with_stage_location(&stage);
        config.warehouse.endpoint = dir.path().join("warehouse.db").display().to_string();
        Self { dir, config }
    }

    pub fn stage_dir(&self) -> PathBuf {
        self.dir.path().join("stage")
    }

    /// Stage a fixture under the configured staged file name.
    pub fn stage_fixture(&self, fixture: &str) {
        self.stage_text(&std::fs::read_to_string(Path::new(FIXTURES).join(fixture)).unwrap());
    }

    pub fn stage_text(&self, contents: &str) {
        std::fs::write(self.stage_dir().join(&self.config.staged_file), contents).unwrap();
    }

    pub fn connector(&self) -> SqliteConnector {
        SqliteConnector::from_config(&self.config)
    }

    pub fn session(&self) -> Box<dyn Session> {
        self.connector().connect(&self.config.warehouse).unwrap()
    }

    /// Run a count query in a fresh session.
    pub fn count(&self, sql: &str) -> i64 {
        let mut s = self.session();
        let rows = s.query(sql).unwrap().unwrap();
        s.close().unwrap();
        match rows[0][0] {
            Value::Int64(n) => n,
            ref other => panic!("not a count: {other:?}"),
        }
    }

    pub fn rows(&self, sql: &str) -> Vec<Row> {
        let mut s = self.session();
        let rows = s.query(sql).unwrap().unwrap_or_default();
        s.close().unwrap();
        rows
    }
}

/// Collects every event a pipeline emits.
#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl PipelineObserver for RecordingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// A fabricated warehouse that records statements instead of running them.
///
/// Statements containing `fail_on` fail with a missing-table error; every SELECT returns a
/// count of 0.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    pub journal: Arc<Mutex<Vec<String>>>,
    pub fail_on: Option<String>,
    pub refuse_connection: bool,
}

pub const CLOSED: &str = "<closed>";

impl ScriptedConnector {
    pub fn failing_on(pattern: &str) -> Self {
        Self {
            fail_on: Some(pattern.to_string()),
            ..Self::default()
        }
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, config: &WarehouseConfig) -> Result<Box<dyn Session>, ConnectionError> {
        if self.refuse_connection {
            return Err(ConnectionError::InvalidConfig {
                message: format!("identity '{}' rejected", config.identity),
            });
        }
        Ok(Box::new(ScriptedSession {
            journal: Arc::clone(&self.journal),
            fail_on: self.fail_on.clone(),
        }))
    }
}

struct ScriptedSession {
    journal: Arc<Mutex<Vec<String>>>,
    fail_on: Option<String>,
}

impl Session for ScriptedSession {
    fn query(&mut self, statement: &str) -> Result<Option<Vec<Row>>, ExecutionCause> {
        self.journal.lock().unwrap().push(statement.to_string());
        if let Some(pattern) = &self.fail_on {
            if statement.contains(pattern.as_str()) {
                return Err(ExecutionCause::Sqlite(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(1),
                    Some(format!("no such table: {pattern}")),
                )));
            }
        }
        if statement.trim_start().starts_with("SELECT") {
            Ok(Some(vec![vec![Value::Int64(0)]]))
        } else {
            Ok(None)
        }
    }

    fn close(self: Box<Self>) -> Result<(), ExecutionCause> {
        self.journal.lock().unwrap().push(CLOSED.to_string());
        Ok(())
    }
}
