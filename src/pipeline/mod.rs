//! Pipeline orchestration: load → transform → validate inside one warehouse session.
//!
//! A run walks a fixed lifecycle:
//!
//! ```text
//! Idle → Connected → RawLoaded → CleanLoaded → Validated → Closed
//! ```
//!
//! Failing to connect is returned to the caller as a [`ConnectionError`]; nothing else runs.
//! Once connected, a failing stage is logged, stops the run, and is reported through
//! [`RunReport::outcome`] rather than returned as an error. The session is released on every
//! path.
//!
//! ## Example
//!
//! ```no_run
//! use finance_etl::config::PipelineConfig;
//! use finance_etl::pipeline::Pipeline;
//! use finance_etl::warehouse::SqliteConnector;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::from_path("etl.json")?;
//! let connector = SqliteConnector::from_config(&config);
//! let report = Pipeline::new(config)?.run(&connector)?;
//! for result in &report.quality {
//!     println!("{result}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod load;
pub mod observability;
pub mod quality;
pub mod transform;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{ConnectionError, PipelineError, QueryResult, RuleSetError};
use crate::execution::execute;
use crate::types::Schema;
use crate::warehouse::{Connector, Session};

pub use load::StageLoader;
pub use observability::{CompositeObserver, NoopObserver, PipelineEvent, PipelineObserver};
pub use quality::{QualityResult, QualityRule, RuleSet, run_checks, run_checks_with};
pub use transform::Transformer;

/// The three stages run inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadRaw,
    Transform,
    QualityChecks,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LoadRaw => "load_raw",
            Self::Transform => "transform",
            Self::QualityChecks => "quality_checks",
        })
    }
}

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    Idle,
    Connected,
    RawLoaded,
    CleanLoaded,
    Validated,
    Closed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a connected run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Succeeded,
    Failed(PipelineError),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            Self::Succeeded => None,
            Self::Failed(e) => Some(e),
        }
    }
}

/// Summary of a connected run.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Last state reached before the session was closed.
    pub reached: RunState,
    /// One result per evaluated rule, in declared order. Empty if validation never ran.
    pub quality: Vec<QualityResult>,
    pub elapsed: Duration,
}

impl RunReport {
    /// Rules that found bad data.
    pub fn failed_rules(&self) -> impl Iterator<Item = &QualityResult> {
        self.quality.iter().filter(|r| !r.passed)
    }
}

/// Sequences the stage loader, transformer and rule engine over one session.
pub struct Pipeline {
    config: PipelineConfig,
    loader: StageLoader,
    transformer: Transformer,
    rules: RuleSet,
    observer: Arc<dyn PipelineObserver>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("loader", &self.loader)
            .field("transformer", &self.transformer)
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl Pipeline {
    /// Build a pipeline from configuration, including any configured extra rules.
    pub fn new(config: PipelineConfig) -> Result<Self, RuleSetError> {
        Ok(Self {
            loader: StageLoader::from_config(&config),
            transformer: Transformer::from_config(&config),
            rules: RuleSet::from_config(&config)?,
            config,
            observer: Arc::new(NoopObserver),
        })
    }

    /// Replace the quality rule set.
    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_loader(mut self, loader: StageLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Attach an observer for run events.
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Run load → transform → validate.
    ///
    /// Returns `Err` only when no session could be acquired. Stage failures are contained and
    /// reported in the returned [`RunReport`].
    pub fn run(&self, connector: &dyn Connector) -> Result<RunReport, ConnectionError> {
        info!("ETL Pipeline started.");
        self.in_session(connector, |this, session, report| {
            this.stage(Stage::LoadRaw, || this.loader.load_raw(session))?;
            this.advance(report, RunState::RawLoaded);

            this.stage(Stage::Transform, || this.transformer.transform_and_load(session))?;
            this.advance(report, RunState::CleanLoaded);

            report.quality = this.stage(Stage::QualityChecks, || {
                run_checks_with(session, &this.rules, this.observer.as_ref())
            })?;
            this.advance(report, RunState::Validated);
            Ok(())
        })
    }

    /// Run only the quality rules against the current clean table.
    pub fn check(&self, connector: &dyn Connector) -> Result<RunReport, ConnectionError> {
        info!("Data quality check started.");
        self.in_session(connector, |this, session, report| {
            report.quality = this.stage(Stage::QualityChecks, || {
                run_checks_with(session, &this.rules, this.observer.as_ref())
            })?;
            this.advance(report, RunState::Validated);
            Ok(())
        })
    }

    /// Acquire a session, run `body`, and release the session whatever `body` returned.
    fn in_session<F>(
        &self,
        connector: &dyn Connector,
        body: F,
    ) -> Result<RunReport, ConnectionError>
    where
        F: FnOnce(&Self, &mut dyn Session, &mut RunReport) -> Result<(), PipelineError>,
    {
        let start = Instant::now();
        let wh = &self.config.warehouse;
        let mut session = match connector.connect(wh) {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to connect to warehouse: {e}");
                return Err(e);
            }
        };
        info!(
            endpoint = %wh.endpoint,
            database = %wh.database,
            schema = %wh.schema,
            compute = %wh.compute_allocation,
            "Connected to warehouse successfully."
        );

        let mut report = RunReport {
            outcome: RunOutcome::Succeeded,
            reached: RunState::Idle,
            quality: Vec::new(),
            elapsed: Duration::ZERO,
        };
        self.advance(&mut report, RunState::Connected);

        let result = body(self, session.as_mut(), &mut report);
        match &result {
            Ok(()) => info!("ETL Pipeline completed successfully."),
            Err(e) => error!("ETL Pipeline failed: {e}"),
        }

        // Dropping the box also frees the connection, so a panic in `body` still releases it.
        self.release(session);
        self.notify(PipelineEvent::Transition {
            from: report.reached,
            to: RunState::Closed,
        });

        if let Err(e) = result {
            report.outcome = RunOutcome::Failed(e);
        }
        report.elapsed = start.elapsed();
        Ok(report)
    }

    fn stage<T>(
        &self,
        stage: Stage,
        f: impl FnOnce() -> QueryResult<T>,
    ) -> Result<T, PipelineError> {
        let start = Instant::now();
        self.notify(PipelineEvent::StageStarted { stage });
        match f() {
            Ok(value) => {
                self.notify(PipelineEvent::StageFinished {
                    stage,
                    elapsed: start.elapsed(),
                });
                Ok(value)
            }
            Err(source) => {
                self.notify(PipelineEvent::StageFailed {
                    stage,
                    message: source.to_string(),
                });
                Err(PipelineError { stage, source })
            }
        }
    }

    fn advance(&self, report: &mut RunReport, to: RunState) {
        self.notify(PipelineEvent::Transition {
            from: report.reached,
            to,
        });
        report.reached = to;
    }

    fn release(&self, session: Box<dyn Session>) {
        let clean = match session.close() {
            Ok(()) => {
                info!("Warehouse session closed.");
                true
            }
            Err(e) => {
                warn!("Warehouse session did not close cleanly: {e}");
                false
            }
        };
        self.notify(PipelineEvent::SessionClosed { clean });
    }

    fn notify(&self, event: PipelineEvent) {
        self.observer.on_event(&event);
    }
}

/// Create the raw and clean tables if they do not exist yet.
pub fn bootstrap(session: &mut dyn Session, config: &PipelineConfig) -> QueryResult<()> {
    execute(session, &Schema::raw_financial().create_table_sql(&config.tables.raw))?;
    execute(
        session,
        &Schema::clean_financial().create_table_sql(&config.tables.clean),
    )?;
    info!(
        raw = %config.tables.raw,
        clean = %config.tables.clean,
        "Warehouse tables ready."
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_ordered_along_the_lifecycle() {
        assert!(RunState::Idle < RunState::Connected);
        assert!(RunState::RawLoaded < RunState::CleanLoaded);
        assert!(RunState::Validated < RunState::Closed);
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::LoadRaw.to_string(), "load_raw");
        assert_eq!(Stage::QualityChecks.to_string(), "quality_checks");
    }

    #[test]
    fn pipeline_rejects_duplicate_configured_rules() {
        let mut config = PipelineConfig::default();
        config.extra_rules.push(crate::config::RuleConfig {
            name: "NULL transaction_id".into(),
            query: "SELECT 0".into(),
        });
        assert!(Pipeline::new(config).is_err());
    }
}
