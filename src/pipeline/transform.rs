//! Transformer: one set-based insert from the raw table into the clean table.
//!
//! Each clean column is derived from the raw column of the same name according to its
//! [`DataType`]: text is copied verbatim, numbers go through `TRY_TO_DOUBLE` and dates through
//! `TRY_TO_DATE`, so a value that does not parse becomes NULL instead of failing the row.
//!
//! The insert appends. Running it twice over the same raw table yields two copies of every row
//! in the clean table.

use tracing::info;

use crate::config::PipelineConfig;
use crate::error::QueryResult;
use crate::execution::execute;
use crate::types::{DataType, Schema};
use crate::warehouse::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformer {
    raw_table: String,
    clean_table: String,
    clean_schema: Schema,
    date_format: String,
}

impl Transformer {
    pub fn new(
        raw_table: impl Into<String>,
        clean_table: impl Into<String>,
        clean_schema: Schema,
        date_format: impl Into<String>,
    ) -> Self {
        Self {
            raw_table: raw_table.into(),
            clean_table: clean_table.into(),
            clean_schema,
            date_format: date_format.into(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            &config.tables.raw,
            &config.tables.clean,
            Schema::clean_financial(),
            &config.date_format,
        )
    }

    /// The insert-select statement text.
    pub fn statement(&self) -> String {
        let columns = self.clean_schema.field_names().collect::<Vec<_>>().join(", ");
        let projections = self
            .clean_schema
            .fields
            .iter()
            .map(|f| format!("    {}", self.coerce(&f.name, f.data_type)))
            .collect::<Vec<_>>()
            .join(",\n");
        format!(
            "INSERT INTO {} ({columns})\nSELECT\n{projections}\nFROM {};",
            self.clean_table, self.raw_table
        )
    }

    fn coerce(&self, column: &str, data_type: DataType) -> String {
        match data_type {
            DataType::Utf8 => column.to_string(),
            DataType::Float64 => format!("TRY_TO_DOUBLE({column}) AS {column}"),
            DataType::Int64 => format!("CAST(TRY_TO_DOUBLE({column}) AS INTEGER) AS {column}"),
            DataType::Date => format!(
                "TRY_TO_DATE({column}, '{}') AS {column}",
                self.date_format.replace('\'', "''")
            ),
        }
    }

    /// Copy every raw row into the clean table with typed columns.
    pub fn transform_and_load(&self, session: &mut dyn Session) -> QueryResult<()> {
        info!("Starting data transformation and load to clean table...");
        execute(session, &self.statement())?;
        info!("Data transformation and load completed.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_coerces_amount_and_date_only() {
        let sql = Transformer::from_config(&PipelineConfig::default()).statement();
        assert_eq!(
            sql,
            "INSERT INTO clean_financial_data (transaction_id, customer_name, account_type, \
             transaction_amount, currency, transaction_date)\n\
             SELECT\n    \
             transaction_id,\n    \
             customer_name,\n    \
             account_type,\n    \
             TRY_TO_DOUBLE(transaction_amount) AS transaction_amount,\n    \
             currency,\n    \
             TRY_TO_DATE(transaction_date, 'YYYY-MM-DD') AS transaction_date\n\
             FROM raw_financial_data;"
        );
    }

    #[test]
    fn date_format_is_quoted_safely() {
        let t = Transformer::new("r", "c", Schema::clean_financial(), "DD'MM");
        assert!(t.statement().contains("TRY_TO_DATE(transaction_date, 'DD''MM')"));
    }
}
