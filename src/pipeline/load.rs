//! Stage loader: bulk-copies the staged file into the raw table.

use tracing::info;

use crate::config::{OnError, PipelineConfig};
use crate::error::QueryResult;
use crate::execution::execute;
use crate::warehouse::{CopyStatement, Session};

/// Issues the single `COPY INTO` statement that ingests the staged file.
///
/// Row-level problems in the staged file are governed by [`OnError`]; with the default
/// [`OnError::Continue`] malformed rows are skipped and only the warehouse's load history shows
/// them. The load fails only for statement-level problems such as a missing stage or table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLoader {
    statement: CopyStatement,
}

impl StageLoader {
    pub fn new(
        raw_table: impl Into<String>,
        stage: impl Into<String>,
        file: impl Into<String>,
        file_format: Option<String>,
        on_error: OnError,
    ) -> Self {
        Self {
            statement: CopyStatement {
                table: raw_table.into(),
                stage: stage.into(),
                file: file.into(),
                file_format,
                on_error,
                force: false,
            },
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            &config.tables.raw,
            &config.stage_name,
            &config.staged_file,
            Some(config.file_format.clone()),
            config.on_error,
        )
    }

    /// Switch the row-level error policy.
    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.statement.on_error = on_error;
        self
    }

    pub fn on_error(&self) -> OnError {
        self.statement.on_error
    }

    /// The bulk-ingest statement text.
    pub fn statement(&self) -> String {
        format!("{};", self.statement)
    }

    /// Load the staged file into the raw table.
    pub fn load_raw(&self, session: &mut dyn Session) -> QueryResult<()> {
        info!("Starting raw data load...");
        execute(session, &self.statement())?;
        info!("Raw data loaded successfully.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_statement_matches_the_configured_stage() {
        let loader = StageLoader::from_config(&PipelineConfig::default());
        assert_eq!(
            loader.statement(),
            "COPY INTO raw_financial_data\n\
             FROM @stage/mock_financial_data.csv\n\
             FILE_FORMAT = (FORMAT_NAME = 'csv_format')\n\
             ON_ERROR = 'CONTINUE';"
        );
    }

    #[test]
    fn strict_mode_is_spelled_out() {
        let loader = StageLoader::from_config(&PipelineConfig::default())
            .with_on_error(OnError::AbortStatement);
        assert!(loader.statement().contains("ON_ERROR = 'ABORT_STATEMENT'"));
        assert_eq!(loader.on_error(), OnError::AbortStatement);
    }
}
