//! Data-quality rule engine.
//!
//! A [`RuleSet`] is an ordered list of named, count-producing queries. A rule passes when its
//! query returns zero. Every rule runs, in declared order, regardless of earlier outcomes; a
//! rule that finds bad data is a normal result, not an error.
//!
//! A rule whose query cannot be executed is different: that is an infrastructure failure, and it
//! aborts the remaining rules with a [`QueryExecutionError`].

use std::fmt;

use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{QueryExecutionError, RuleSetError};
use crate::execution::execute_count;
use crate::warehouse::Session;

use super::observability::{NoopObserver, PipelineEvent, PipelineObserver};

/// A named predicate over the clean table, expressed as a query returning the failing row count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityRule {
    pub name: String,
    pub query: String,
}

impl QualityRule {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
        }
    }
}

/// Ordered, name-unique collection of [`QualityRule`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<QualityRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard checks for the clean transactions table.
    pub fn financial(clean_table: &str, allowed_currencies: &[String]) -> Self {
        let currencies = allowed_currencies
            .iter()
            .map(|c| format!("'{}'", c.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(", ");
        let rules = vec![
            QualityRule::new(
                "NULL transaction_id",
                format!("SELECT COUNT(*) FROM {clean_table} WHERE transaction_id IS NULL;"),
            ),
            QualityRule::new(
                "Duplicate transaction_id",
                format!("SELECT COUNT(*) - COUNT(DISTINCT transaction_id) FROM {clean_table};"),
            ),
            QualityRule::new(
                "Negative transaction_amount",
                format!("SELECT COUNT(*) FROM {clean_table} WHERE transaction_amount < 0;"),
            ),
            QualityRule::new(
                "Invalid currency",
                format!(
                    "SELECT COUNT(*) FROM {clean_table} WHERE currency NOT IN ({currencies}) OR currency IS NULL;"
                ),
            ),
            QualityRule::new(
                "Future transaction_date",
                format!(
                    "SELECT COUNT(*) FROM {clean_table} WHERE transaction_date > CURRENT_DATE;"
                ),
            ),
        ];
        Self { rules }
    }

    /// Built-in checks followed by any `extra_rules` from the configuration.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, RuleSetError> {
        let mut set = Self::financial(&config.tables.clean, &config.allowed_currencies);
        for rule in &config.extra_rules {
            set.push(QualityRule::new(&rule.name, &rule.query))?;
        }
        Ok(set)
    }

    /// Append a rule; names must be non-empty and unique.
    pub fn push(&mut self, rule: QualityRule) -> Result<(), RuleSetError> {
        if rule.name.trim().is_empty() {
            return Err(RuleSetError::EmptyName);
        }
        if self.rules.iter().any(|r| r.name == rule.name) {
            return Err(RuleSetError::DuplicateName { name: rule.name });
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn with_rule(
        mut self,
        name: impl Into<String>,
        query: impl Into<String>,
    ) -> Result<Self, RuleSetError> {
        self.push(QualityRule::new(name, query))?;
        Ok(self)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QualityRule> {
        self.rules.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Outcome of one rule in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityResult {
    pub rule_name: String,
    pub failing_count: u64,
    pub passed: bool,
}

impl QualityResult {
    pub fn new(rule_name: impl Into<String>, failing_count: u64) -> Self {
        Self {
            rule_name: rule_name.into(),
            failing_count,
            passed: failing_count == 0,
        }
    }
}

impl fmt::Display for QualityResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed {
            write!(f, "Data Quality Check Passed: {}", self.rule_name)
        } else {
            write!(
                f,
                "Data Quality Check Failed: {} - {} issues found",
                self.rule_name, self.failing_count
            )
        }
    }
}

/// Evaluate every rule in order and log pass/fail for each.
pub fn run_checks(
    session: &mut dyn Session,
    rules: &RuleSet,
) -> Result<Vec<QualityResult>, QueryExecutionError> {
    run_checks_with(session, rules, &NoopObserver)
}

/// [`run_checks`], reporting each result to `observer` as it is produced.
pub fn run_checks_with(
    session: &mut dyn Session,
    rules: &RuleSet,
    observer: &dyn PipelineObserver,
) -> Result<Vec<QualityResult>, QueryExecutionError> {
    info!("Running data quality tests...");
    let mut results = Vec::with_capacity(rules.len());
    for rule in rules.iter() {
        let result = QualityResult::new(&rule.name, execute_count(session, &rule.query)?);
        if result.passed {
            info!("{result}");
        } else {
            warn!("{result}");
        }
        observer.on_event(&PipelineEvent::RuleEvaluated(result.clone()));
        results.push(result);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> RuleSet {
        RuleSet::from_config(&PipelineConfig::default()).unwrap()
    }

    #[test]
    fn financial_rules_are_declared_in_order() {
        let names: Vec<_> = defaults().names().map(str::to_owned).collect();
        assert_eq!(
            names,
            vec![
                "NULL transaction_id",
                "Duplicate transaction_id",
                "Negative transaction_amount",
                "Invalid currency",
                "Future transaction_date",
            ]
        );
    }

    #[test]
    fn currency_rule_uses_the_allow_list() {
        let rules = defaults();
        let currency = rules.iter().find(|r| r.name == "Invalid currency").unwrap();
        assert!(currency.query.contains("NOT IN ('USD', 'EUR', 'GBP') OR currency IS NULL"));
    }

    #[test]
    fn duplicate_and_empty_names_are_rejected() {
        let err = defaults().with_rule("Invalid currency", "SELECT 0").unwrap_err();
        assert_eq!(
            err,
            RuleSetError::DuplicateName {
                name: "Invalid currency".into()
            }
        );
        assert_eq!(
            RuleSet::new().with_rule("  ", "SELECT 0").unwrap_err(),
            RuleSetError::EmptyName
        );
    }

    #[test]
    fn extra_rules_follow_builtins() {
        let mut config = PipelineConfig::default();
        config.extra_rules.push(crate::config::RuleConfig {
            name: "Blank customer_name".into(),
            query: "SELECT COUNT(*) FROM clean_financial_data WHERE customer_name IS NULL".into(),
        });
        let rules = RuleSet::from_config(&config).unwrap();
        assert_eq!(rules.len(), 6);
        assert_eq!(rules.names().last(), Some("Blank customer_name"));
    }

    #[test]
    fn result_classification_and_message() {
        let ok = QualityResult::new("NULL transaction_id", 0);
        assert!(ok.passed);
        assert_eq!(ok.to_string(), "Data Quality Check Passed: NULL transaction_id");

        let bad = QualityResult::new("Invalid currency", 2);
        assert!(!bad.passed);
        assert_eq!(
            bad.to_string(),
            "Data Quality Check Failed: Invalid currency - 2 issues found"
        );
    }
}
