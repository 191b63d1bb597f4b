//! `finance-etl` moves staged financial transactions into a warehouse and checks their quality.
//!
//! A run has three stages, executed in order inside one warehouse session:
//!
//! 1. **Load**: [`pipeline::StageLoader`] bulk-copies the staged CSV into the raw table. Rows
//!    that cannot be ingested are skipped (configurable via [`config::OnError`]).
//! 2. **Transform**: [`pipeline::Transformer`] inserts every raw row into the clean table,
//!    coercing `transaction_amount` to a float and `transaction_date` to a date. Values that do
//!    not parse become NULL.
//! 3. **Validate**: [`pipeline::run_checks`] evaluates a [`pipeline::RuleSet`] of count queries
//!    and logs pass/fail for each rule.
//!
//! [`pipeline::Pipeline`] sequences the stages and guarantees the session is released.
//!
//! ## Warehouse
//!
//! The bundled backend ([`warehouse::SqliteConnector`]) is an embedded SQL engine extended with
//! `COPY INTO ... FROM @stage/file`, `TRY_TO_DOUBLE` and `TRY_TO_DATE`. Any other backend can be
//! plugged in through the [`warehouse::Connector`] and [`warehouse::Session`] traits.
//!
//! ## Quick example
//!
//! ```rust
//! use finance_etl::config::PipelineConfig;
//! use finance_etl::pipeline::{bootstrap, run_checks, RuleSet};
//! use finance_etl::warehouse::{Connector, SqliteConnector};
//!
//! let config = PipelineConfig::default();
//! let connector = SqliteConnector::from_config(&config);
//! let mut session = connector.connect(&config.warehouse).unwrap();
//! bootstrap(session.as_mut(), &config).unwrap();
//!
//! let rules = RuleSet::from_config(&config).unwrap();
//! let results = run_checks(session.as_mut(), &rules).unwrap();
//! assert_eq!(results.len(), rules.len());
//! assert!(results.iter().all(|r| r.passed));
//! ```
//!
//! ## Modules
//!
//! - [`pipeline`]: orchestration, stage loader, transformer, quality rules
//! - [`execution`]: single-statement execution contract
//! - [`warehouse`]: sessions, connectors, and the embedded backend
//! - [`config`]: run configuration
//! - [`types`]: table schemas and query values
//! - [`error`]: error types

pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod pipeline;
pub mod types;
pub mod warehouse;

pub use error::{
    ConfigError, ConnectionError, ExecutionCause, PipelineError, QueryExecutionError, QueryResult,
    RuleSetError,
};
