//! End-to-end runs of the engine over small hand-built corpora.

use chrono::{Duration, NaiveDate};
use stocktake_core::{
    config::{AnalysisConfig, TransactionGrain},
    engine::AnalysisEngine,
    error::AnalysisError,
    indicators::{Indicator, IndicatorState},
    mining::MiningOutcome,
    normalizer::RawRecord,
    recommendations::{Priority, RecommendationCategory},
};

fn monday(week: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(7 * week)
}

fn row(store: &str, start: NaiveDate, begin: &str, sales: &str, end: &str) -> RawRecord {
    RawRecord {
        store: store.into(),
        period_start: start.format("%Y-%m-%d").to_string(),
        period_end: None,
        beginning_inventory: begin.into(),
        shipment: None,
        transfer_in: "0".into(),
        transfer_out: "0".into(),
        rtv: "0".into(),
        sales: sales.into(),
        ending_inventory: end.into(),
    }
}

fn engine(config: AnalysisConfig) -> AnalysisEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    AnalysisEngine::new(config).expect("valid config")
}

/// Ten weekly counts of one store; weeks 0-2 sold nothing.
fn zero_sales_corpus() -> Vec<RawRecord> {
    (0..10)
        .map(|week| {
            if week < 3 {
                row("S1", monday(week), "1000", "0", "1000")
            } else {
                row("S1", monday(week), "1000", "50", "950")
            }
        })
        .collect()
}

#[test]
fn zero_sales_periods_are_found_mined_and_scored() {
    let mut config = AnalysisConfig::default();
    config.mining.min_support = 0.3;
    let output = engine(config).run(&zero_sales_corpus());

    let flagged: Vec<usize> = output
        .cleaned
        .records
        .iter()
        .filter(|r| r.indicators.is_triggered(Indicator::ZeroSalesPeriod))
        .map(|r| r.record.row)
        .collect();
    assert_eq!(flagged, vec![0, 1, 2]);

    let report = output.fraud.mining.report().expect("10 transactions is enough");
    assert!(
        report
            .itemsets
            .iter()
            .any(|i| i.items == vec![Indicator::ZeroSalesPeriod]),
        "{{zero_sales_period}} missing from {:?}",
        report.itemsets
    );

    let scores: Vec<f64> = output
        .fraud
        .assessment
        .records
        .iter()
        .map(|r| r.fraud_score)
        .collect();
    let lowest_zero_sales = scores[..3].iter().cloned().fold(f64::INFINITY, f64::min);
    let highest_other = scores[3..].iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    assert!(
        lowest_zero_sales > highest_other,
        "zero-sales scores {:?} not above the rest {:?}",
        &scores[..3],
        &scores[3..]
    );
}

#[test]
fn missing_shipment_column_does_not_raise_scores() {
    let output = engine(AnalysisConfig::default()).run(&zero_sales_corpus());

    assert!(output.cleaned.records.iter().all(|r| {
        r.indicators.get(Indicator::ZeroShipment) == IndicatorState::NotApplicable
            && r.indicators.get(Indicator::HighShipment) == IndicatorState::NotApplicable
    }));
    assert_eq!(output.cleaned.baseline.shipment_cutoff, None);

    let report = output.fraud.mining.report().expect("10 transactions is enough");
    assert!(report
        .itemsets
        .iter()
        .all(|i| !i.items.contains(&Indicator::ZeroShipment)));
    assert!(report.rules.is_empty(), "unexpected rules {:?}", report.rules);

    let first = &output.fraud.assessment.records[0];
    assert_eq!(first.fraud_score, 1.0);
    assert_eq!(first.matched_rules, 0);
}

#[test]
fn discrepancy_of_exactly_one_hundred_units_is_not_large() {
    let raw = vec![
        row("S1", monday(0), "1000", "0", "900"),
        row("S1", monday(1), "1000", "0", "899.9999"),
    ];
    let output = engine(AnalysisConfig::default()).run(&raw);
    let states: Vec<IndicatorState> = output
        .cleaned
        .records
        .iter()
        .map(|r| r.indicators.get(Indicator::LargeDiscrepancy))
        .collect();
    assert_eq!(states, vec![IndicatorState::Clear, IndicatorState::Triggered]);
}

#[test]
fn tiny_corpus_is_insufficient_not_empty() {
    let raw = vec![
        row("S1", monday(0), "1000", "0", "1000"),
        row("S1", monday(1), "1000", "10", "990"),
    ];
    let output = engine(AnalysisConfig::default()).run(&raw);

    assert_eq!(
        output.fraud.mining,
        MiningOutcome::InsufficientData {
            transactions: 2,
            required: 5
        }
    );
    assert!(output
        .fraud
        .assessment
        .records
        .iter()
        .all(|r| r.matched_rules == 0));
    assert!(matches!(
        output.fraud.mining.clone().into_result(),
        Err(AnalysisError::InsufficientData { observed: 2, required: 5, .. })
    ));
}

#[test]
fn out_of_domain_configuration_aborts_before_processing() {
    let mut config = AnalysisConfig::default();
    config.risk.high_risk_threshold = -1.0;
    assert!(matches!(
        AnalysisEngine::new(config),
        Err(AnalysisError::Configuration { ref field, .. }) if field == "risk.high_risk_threshold"
    ));
}

#[test]
fn configuration_file_overrides_and_validates() {
    let dir = std::env::temp_dir();
    let good = dir.join("stocktake-pipeline-good.json");
    let bad = dir.join("stocktake-pipeline-bad.json");
    std::fs::write(&good, r#"{ "mining": { "min_support": 0.25 } }"#).unwrap();
    std::fs::write(&bad, r#"{ "health": { "accuracy": 0.9 } }"#).unwrap();

    let config = AnalysisConfig::load(good.to_str().unwrap()).unwrap();
    assert_eq!(config.mining.min_support, 0.25);
    assert_eq!(config.mining.min_transactions, 5);

    let err = AnalysisConfig::load(bad.to_str().unwrap()).unwrap_err();
    assert!(err.to_string().contains("health"), "unexpected error: {err}");

    let missing = AnalysisConfig::load("/nonexistent/stocktake.json").unwrap_err();
    assert!(missing.to_string().starts_with("Cannot read"));
}

#[test]
fn invalid_rows_are_excluded_and_tallied() {
    let raw = vec![
        row("S1", monday(0), "1000", "50", "950"),
        row("S1", monday(1), "1000", "abc", "950"),
        row("S1", monday(0), "1000", "50", "950"),
        row("", monday(2), "1000", "50", "950"),
        row("S1", monday(3), "1.000,00", "50", "950"),
    ];
    let output = engine(AnalysisConfig::default()).run(&raw);
    let quality = &output.cleaned.quality;

    assert_eq!(quality.total_rows, 5);
    assert_eq!(quality.valid_rows, 2);
    assert_eq!(quality.invalid_rows, 3);
    assert_eq!(quality.failures_by_reason.get("non-numeric value"), Some(&1));
    assert_eq!(quality.failures_by_reason.get("duplicate period for store"), Some(&1));
    assert_eq!(quality.failures_by_reason.get("empty store identifier"), Some(&1));

    let rows: Vec<usize> = output.cleaned.records.iter().map(|r| r.record.row).collect();
    assert_eq!(rows, vec![0, 4]);
    assert_eq!(output.fraud.assessment.records.len(), 2);
}

#[test]
fn store_month_grain_groups_records() {
    let mut raw = Vec::new();
    for store in ["S1", "S2"] {
        // Four January weeks, two February weeks.
        for week in [0, 1, 2, 3, 5, 6] {
            raw.push(row(store, monday(week), "1000", "50", "950"));
        }
    }
    let mut config = AnalysisConfig::default();
    config.mining.transaction_grain = TransactionGrain::StoreMonth;
    config.mining.min_transactions = 1;

    let output = engine(config).run(&raw);
    let report = output.fraud.mining.report().expect("completed");
    assert_eq!(report.transactions, 4);
    // Scores still come from each record's own indicators.
    assert_eq!(output.fraud.assessment.records.len(), 12);
}

#[test]
fn high_risk_records_sort_by_score_then_row() {
    let raw = vec![
        row("S1", monday(2), "1000", "50", "950"),
        row("S1", monday(0), "1000", "0", "800"),
        row("S1", monday(3), "1000", "50", "950"),
        row("S1", monday(1), "1000", "0", "800"),
        row("S1", monday(5), "1000", "50", "950"),
        row("S1", monday(6), "1000", "50", "950"),
    ];
    let output = engine(AnalysisConfig::default()).run(&raw);
    let flagged = &output.fraud.high_risk_records;

    let rows: Vec<usize> = flagged.iter().map(|r| r.row).collect();
    assert_eq!(rows, vec![1, 3]);
    assert_eq!(flagged[0].fraud_score, flagged[1].fraud_score);
    assert!(flagged[0].fraud_score > 2.5);
    assert_eq!(
        flagged[0].fraud_types,
        vec![
            Indicator::LargeDiscrepancy,
            Indicator::ZeroSalesPeriod,
            Indicator::LowInventoryAccuracy
        ]
    );

    let summary = &output.fraud.assessment.summary;
    assert_eq!(summary.high_risk_records, 2);
    assert_eq!(summary.stores_with_high_risk, vec!["S1".to_string()]);
}

#[test]
fn frequent_large_discrepancies_raise_an_inventory_control_item() {
    let mut raw: Vec<RawRecord> = (0..9)
        .map(|week| row("S1", monday(week), "1000", "50", "950"))
        .collect();
    raw.push(row("S1", monday(9), "1000", "50", "700"));

    let output = engine(AnalysisConfig::default()).run(&raw);
    let item = output
        .recommendations
        .iter()
        .find(|r| r.category == RecommendationCategory::InventoryControl)
        .expect("10% large discrepancies exceeds the 5% share");
    assert_eq!(item.priority, Priority::High);
    assert!(item.message.starts_with("10.0%"));
}

#[test]
fn kpi_report_groups_by_store_month_and_quarter() {
    let mut raw = zero_sales_corpus();
    raw.push(row("S2", monday(14), "500", "100", "400"));
    let output = engine(AnalysisConfig::default()).run(&raw);
    let kpi = &output.kpi;

    assert_eq!(kpi.core.records, 11);
    assert_eq!(kpi.core.stores, 2);
    assert_eq!(kpi.stores.len(), 2);
    assert_eq!(kpi.stores["S1"].records, 10);

    let months: Vec<String> = kpi.monthly.keys().map(|m| m.to_string()).collect();
    assert_eq!(months, vec!["2024-01", "2024-02", "2024-03", "2024-04"]);
    let quarters: Vec<String> = kpi.quarterly.keys().map(|q| q.to_string()).collect();
    assert_eq!(quarters, vec!["2024-Q1", "2024-Q2"]);

    let json = serde_json::to_value(kpi).unwrap();
    assert!(json["monthly"]["2024-01"].is_object());
}
