mod common;

use std::sync::Arc;

use common::{RecordingObserver, Workspace};
use finance_etl::pipeline::{Pipeline, PipelineEvent, RunState, Stage, bootstrap};
use finance_etl::types::{Schema, Value};

fn bootstrapped(fixture: &str) -> Workspace {
    let ws = Workspace::new();
    ws.stage_fixture(fixture);
    let mut s = ws.session();
    bootstrap(s.as_mut(), &ws.config).unwrap();
    s.close().unwrap();
    ws
}

#[test]
fn full_run_loads_cleans_and_reports_every_rule() {
    let ws = bootstrapped("transactions.csv");
    let report = Pipeline::new(ws.config.clone())
        .unwrap()
        .run(&ws.connector())
        .unwrap();

    assert!(report.outcome.is_success());
    assert_eq!(report.reached, RunState::Validated);

    // 9 data lines, one with a missing field.
    assert_eq!(ws.count("SELECT COUNT(*) FROM raw_financial_data"), 8);
    assert_eq!(ws.count("SELECT COUNT(*) FROM clean_financial_data"), 8);

    let counts: Vec<(&str, u64, bool)> = report
        .quality
        .iter()
        .map(|r| (r.rule_name.as_str(), r.failing_count, r.passed))
        .collect();
    assert_eq!(
        counts,
        vec![
            ("NULL transaction_id", 1, false),
            // 8 rows, 6 distinct non-null ids.
            ("Duplicate transaction_id", 2, false),
            ("Negative transaction_amount", 1, false),
            ("Invalid currency", 2, false),
            ("Future transaction_date", 1, false),
        ]
    );
    assert_eq!(report.failed_rules().count(), 5);
}

#[test]
fn unparseable_amount_and_date_become_null() {
    let ws = bootstrapped("transactions.csv");
    let report = Pipeline::new(ws.config.clone())
        .unwrap()
        .run(&ws.connector())
        .unwrap();
    assert!(report.outcome.is_success());

    let rows = ws.rows(
        "SELECT transaction_id, transaction_amount, transaction_date
         FROM clean_financial_data
         WHERE transaction_id IN ('t-002', 't-003', 't-004')
         ORDER BY transaction_id",
    );
    assert_eq!(
        rows,
        vec![
            vec![
                Value::Utf8("t-002".into()),
                Value::Float64(-5.0),
                Value::Utf8("2024-02-01".into()),
            ],
            // amount "N/A"
            vec![
                Value::Utf8("t-003".into()),
                Value::Null,
                Value::Utf8("2024-03-10".into()),
            ],
            // date "2024/13/40"
            vec![Value::Utf8("t-004".into()), Value::Float64(99.99), Value::Null],
        ]
    );
}

#[test]
fn clean_data_passes_every_rule() {
    let ws = bootstrapped("clean_transactions.csv");
    let report = Pipeline::new(ws.config.clone())
        .unwrap()
        .run(&ws.connector())
        .unwrap();
    assert_eq!(report.quality.len(), 5);
    assert!(report.quality.iter().all(|r| r.passed && r.failing_count == 0));
}

#[test]
fn second_run_over_unchanged_raw_table_doubles_clean_table() {
    let ws = bootstrapped("clean_transactions.csv");
    let pipeline = Pipeline::new(ws.config.clone()).unwrap();

    let first = pipeline.run(&ws.connector()).unwrap();
    assert!(first.outcome.is_success());
    assert_eq!(ws.count("SELECT COUNT(*) FROM raw_financial_data"), 3);
    assert_eq!(ws.count("SELECT COUNT(*) FROM clean_financial_data"), 3);

    let second = pipeline.run(&ws.connector()).unwrap();
    assert!(second.outcome.is_success());
    // The staged file was already loaded, so raw is unchanged; the transform appends again.
    assert_eq!(ws.count("SELECT COUNT(*) FROM raw_financial_data"), 3);
    assert_eq!(ws.count("SELECT COUNT(*) FROM clean_financial_data"), 6);

    let dup = second
        .quality
        .iter()
        .find(|r| r.rule_name == "Duplicate transaction_id")
        .unwrap();
    assert_eq!(dup.failing_count, 3);
}

#[test]
fn missing_raw_table_stops_before_transform_and_releases_session() {
    let ws = Workspace::new();
    ws.stage_fixture("transactions.csv");
    {
        // Only the clean table exists.
        let mut s = ws.session();
        let ddl = Schema::clean_financial().create_table_sql("clean_financial_data");
        s.query(&ddl).unwrap();
        s.close().unwrap();
    }

    let observer = Arc::new(RecordingObserver::default());
    let report = Pipeline::new(ws.config.clone())
        .unwrap()
        .with_observer(observer.clone())
        .run(&ws.connector())
        .unwrap();

    let err = report.outcome.error().expect("run should fail");
    assert_eq!(err.stage, Stage::LoadRaw);
    assert!(err.to_string().contains("no such table: raw_financial_data"));
    assert_eq!(report.reached, RunState::Connected);
    assert!(report.quality.is_empty());
    assert_eq!(ws.count("SELECT COUNT(*) FROM clean_financial_data"), 0);

    let events = observer.events();
    assert!(!events.iter().any(|e| matches!(
        e,
        PipelineEvent::StageStarted { stage: Stage::Transform | Stage::QualityChecks }
    )));
    assert!(events.contains(&PipelineEvent::SessionClosed { clean: true }));
    assert_eq!(
        events.last(),
        Some(&PipelineEvent::Transition {
            from: RunState::Connected,
            to: RunState::Closed,
        })
    );
}

#[test]
fn check_only_runs_rules_against_existing_clean_table() {
    let ws = bootstrapped("transactions.csv");
    let pipeline = Pipeline::new(ws.config.clone()).unwrap();
    pipeline.run(&ws.connector()).unwrap();

    let report = pipeline.check(&ws.connector()).unwrap();
    assert!(report.outcome.is_success());
    assert_eq!(report.quality.len(), 5);
    assert_eq!(ws.count("SELECT COUNT(*) FROM clean_financial_data"), 8);
}

#[test]
fn unreachable_warehouse_is_a_connection_error() {
    let ws = Workspace::new();
    let mut config = ws.config.clone();
    config.warehouse.endpoint = ws
        .dir
        .path()
        .join("missing-dir")
        .join("warehouse.db")
        .display()
        .to_string();
    let connector = finance_etl::warehouse::SqliteConnector::from_config(&config);
    let err = Pipeline::new(config).unwrap().run(&connector).unwrap_err();
    assert!(matches!(err, finance_etl::ConnectionError::Open { .. }));
}
