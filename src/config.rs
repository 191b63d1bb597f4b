//! Pipeline configuration.
//!
//! Everything a run needs is carried by an explicit [`PipelineConfig`] value that is handed to
//! session acquisition and to each stage. Every field has a default, so a JSON file only needs
//! to override what differs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Connection parameters for the warehouse session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Identity the session runs as.
    pub identity: String,
    /// Warehouse endpoint: a database path, or `:memory:`.
    pub endpoint: String,
    /// Compute allocation the session is billed against.
    pub compute_allocation: String,
    pub database: String,
    pub schema: String,
    /// Interrupt any single statement running longer than this.
    pub statement_timeout_secs: Option<u64>,
}

impl WarehouseConfig {
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            identity: "etl_user".to_string(),
            endpoint: ":memory:".to_string(),
            compute_allocation: "data_WH".to_string(),
            database: "drt_DATA".to_string(),
            schema: "PUBLIC".to_string(),
            statement_timeout_secs: None,
        }
    }
}

/// A named stage: a directory staged files are read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    pub location: PathBuf,
}

/// Parsing options for a named file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileFormat {
    pub delimiter: char,
    /// Number of leading lines to skip (header rows).
    pub skip_header: usize,
    /// Treat empty fields as NULL.
    pub empty_field_as_null: bool,
}

impl Default for FileFormat {
    fn default() -> Self {
        Self {
            delimiter: ',',
            skip_header: 1,
            empty_field_as_null: true,
        }
    }
}

/// Row-level error tolerance for bulk loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Skip malformed rows, load the rest.
    #[default]
    Continue,
    /// Fail the whole statement on the first malformed row.
    AbortStatement,
    /// Load nothing from a file that has any malformed row, without failing the statement.
    SkipFile,
}

impl OnError {
    /// Keyword used in `COPY INTO ... ON_ERROR = '<keyword>'`.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Continue => "CONTINUE",
            Self::AbortStatement => "ABORT_STATEMENT",
            Self::SkipFile => "SKIP_FILE",
        }
    }

    /// Parse the `ON_ERROR` keyword (case-insensitive).
    pub fn from_keyword(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CONTINUE" => Some(Self::Continue),
            "ABORT_STATEMENT" => Some(Self::AbortStatement),
            "SKIP_FILE" => Some(Self::SkipFile),
            _ => None,
        }
    }
}

/// Raw and clean table names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub raw: String,
    pub clean: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            raw: "raw_financial_data".to_string(),
            clean: "clean_financial_data".to_string(),
        }
    }
}

/// A user-declared quality rule appended after the built-in ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    /// Count-producing query; zero means the rule passes.
    pub query: String,
}

/// Full configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub warehouse: WarehouseConfig,
    pub stages: Vec<StageConfig>,
    pub file_formats: BTreeMap<String, FileFormat>,
    pub tables: TableNames,
    /// Stage the loader reads from.
    pub stage_name: String,
    /// File within the stage.
    pub staged_file: String,
    /// Named file format used by the loader.
    pub file_format: String,
    pub on_error: OnError,
    /// Format the transform parses `transaction_date` with.
    pub date_format: String,
    pub allowed_currencies: Vec<String>,
    pub extra_rules: Vec<RuleConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut file_formats = BTreeMap::new();
        file_formats.insert("csv_format".to_string(), FileFormat::default());
        Self {
            warehouse: WarehouseConfig::default(),
            stages: vec![StageConfig {
                name: "stage".to_string(),
                location: PathBuf::from("stage"),
            }],
            file_formats,
            tables: TableNames::default(),
            stage_name: "stage".to_string(),
            staged_file: "mock_financial_data.csv".to_string(),
            file_format: "csv_format".to_string(),
            on_error: OnError::Continue,
            date_format: "YYYY-MM-DD".to_string(),
            allowed_currencies: vec!["USD".to_string(), "EUR".to_string(), "GBP".to_string()],
            extra_rules: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Load a JSON configuration file. Missing fields fall back to defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Point the loader's stage at `location`, registering the stage if needed.
    pub fn with_stage_location(mut self, location: impl Into<PathBuf>) -> Self {
        let location = location.into();
        match self.stages.iter_mut().find(|s| s.name == self.stage_name) {
            Some(stage) => stage.location = location,
            None => self.stages.push(StageConfig {
                name: self.stage_name.clone(),
                location,
            }),
        }
        self
    }
}
