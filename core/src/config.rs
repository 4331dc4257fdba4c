use crate::{
    error::{AnalysisError, AnalysisResult},
    indicators::Indicator,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Normalization ──────────────────────────────────────────────────

/// How numeric text is read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NumberConvention {
    /// `.` groups thousands, `,` separates the fraction ("3.343,00").
    European,
    /// `.` separates the fraction, no grouping ("3343.00").
    Plain,
    /// Decide per value; values readable both ways are rejected.
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub number_convention: NumberConvention,
    /// chrono format strings, tried in order.
    pub date_formats: Vec<String>,
    /// |discrepancy| above this counts as an inventory imbalance in the
    /// data-quality summary.
    pub imbalance_tolerance: f64,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            number_convention: NumberConvention::Auto,
            date_formats: vec!["%d/%m/%Y".into(), "%Y-%m-%d".into()],
            imbalance_tolerance: 50.0,
        }
    }
}

// ── Health score ───────────────────────────────────────────────────

/// Weights of the four health components. They must sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthWeights {
    pub accuracy: f64,
    pub shrinkage: f64,
    pub turnover: f64,
    pub rtv: f64,
    /// Turnover at or above this value scores a full turnover component.
    pub turnover_saturation: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            accuracy: 0.30,
            shrinkage: 0.30,
            turnover: 0.20,
            rtv: 0.20,
            turnover_saturation: 50.0,
        }
    }
}

// ── Fraud indicators ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorThresholds {
    pub high_shrinkage_rate: f64,
    pub large_discrepancy_units: f64,
    pub unusual_rtv_rate: f64,
    /// Multiple of the store's mean |net transfer| that counts as abnormal.
    pub abnormal_transfer_multiple: f64,
    /// Corpus quantile above which transfer volumes are "high".
    pub transfer_quantile: f64,
    pub shipment_quantile: f64,
    pub low_accuracy: f64,
    pub store_anomaly_z: f64,
    /// Prior periods a store needs before history-based indicators apply.
    pub min_store_history: usize,
    pub month_end_day: u32,
}

impl Default for IndicatorThresholds {
    fn default() -> Self {
        Self {
            high_shrinkage_rate: 0.02,
            large_discrepancy_units: 100.0,
            unusual_rtv_rate: 0.03,
            abnormal_transfer_multiple: 3.0,
            transfer_quantile: 0.9,
            shipment_quantile: 0.9,
            low_accuracy: 0.95,
            store_anomaly_z: 2.0,
            min_store_history: 3,
            month_end_day: 25,
        }
    }
}

// ── Pattern mining ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MiningAlgorithm {
    Apriori,
    FpGrowth,
}

/// What one transaction of the mining database is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionGrain {
    /// One transaction per stocktake record.
    Record,
    /// One transaction per store and calendar month (union of its records).
    StoreMonth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    pub algorithm: MiningAlgorithm,
    pub transaction_grain: TransactionGrain,
    pub min_support: f64,
    pub min_confidence: f64,
    pub min_transactions: usize,
    pub suspicious_confidence: f64,
    pub suspicious_lift: f64,
    pub max_suspicious_rules: usize,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            algorithm: MiningAlgorithm::FpGrowth,
            transaction_grain: TransactionGrain::Record,
            min_support: 0.1,
            min_confidence: 0.5,
            min_transactions: 5,
            suspicious_confidence: 0.7,
            suspicious_lift: 1.5,
            max_suspicious_rules: 10,
        }
    }
}

// ── Risk scoring ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Score contribution of each triggered indicator. Missing entries weigh 0.
    pub indicator_weights: BTreeMap<Indicator, f64>,
    /// Added once per mined rule whose items all fired on the record.
    pub rule_bonus: f64,
    /// A record is high risk when its score is strictly above this.
    pub high_risk_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        let scored = [
            Indicator::HighShrinkagePeriod,
            Indicator::LargeDiscrepancy,
            Indicator::UnusualRtvPattern,
            Indicator::ZeroSalesPeriod,
            Indicator::HighTransferOut,
            Indicator::LowInventoryAccuracy,
            Indicator::StoreShrinkageAnomaly,
        ];
        let indicator_weights = Indicator::ALL
            .iter()
            .map(|i| (*i, if scored.contains(i) { 1.0 } else { 0.0 }))
            .collect();
        Self {
            indicator_weights,
            rule_bonus: 0.5,
            high_risk_threshold: 2.5,
        }
    }
}

impl RiskConfig {
    pub fn weight(&self, indicator: Indicator) -> f64 {
        self.indicator_weights.get(&indicator).copied().unwrap_or(0.0)
    }
}

// ── Reporting ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// |z| against the corpus above which a KPI value is anomalous.
    pub anomaly_z_threshold: f64,
    pub shrinkage_alert_rate: f64,
    pub min_healthy_turnover: f64,
    pub rtv_alert_rate: f64,
    /// Share of records with a given indicator that warrants an action item.
    pub high_shrinkage_share: f64,
    pub large_discrepancy_share: f64,
    pub unusual_rtv_share: f64,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            anomaly_z_threshold: 2.0,
            shrinkage_alert_rate: 0.015,
            min_healthy_turnover: 4.0,
            rtv_alert_rate: 0.02,
            high_shrinkage_share: 0.10,
            large_discrepancy_share: 0.05,
            unusual_rtv_share: 0.05,
        }
    }
}

// ── Top level ──────────────────────────────────────────────────────

/// Every tunable of a run. Read-only once handed to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub normalization: NormalizationConfig,
    pub health: HealthWeights,
    pub indicators: IndicatorThresholds,
    pub mining: MiningConfig,
    pub risk: RiskConfig,
    pub reporting: ReportingConfig,
}

impl AnalysisConfig {
    /// Load overrides from a JSON file. Omitted fields keep their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: AnalysisConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values outside their documented domain.
    pub fn validate(&self) -> AnalysisResult<()> {
        let n = &self.normalization;
        if n.date_formats.is_empty() {
            return Err(AnalysisError::configuration(
                "normalization.date_formats",
                "at least one date format is required",
            ));
        }
        non_negative("normalization.imbalance_tolerance", n.imbalance_tolerance)?;

        let h = &self.health;
        for (field, w) in [
            ("health.accuracy", h.accuracy),
            ("health.shrinkage", h.shrinkage),
            ("health.turnover", h.turnover),
            ("health.rtv", h.rtv),
        ] {
            non_negative(field, w)?;
        }
        let sum = h.accuracy + h.shrinkage + h.turnover + h.rtv;
        if (sum - 1.0).abs() > 1e-9 {
            return Err(AnalysisError::configuration(
                "health",
                format!("weights must sum to 1, got {sum}"),
            ));
        }
        positive("health.turnover_saturation", h.turnover_saturation)?;

        let t = &self.indicators;
        non_negative("indicators.high_shrinkage_rate", t.high_shrinkage_rate)?;
        non_negative("indicators.large_discrepancy_units", t.large_discrepancy_units)?;
        non_negative("indicators.unusual_rtv_rate", t.unusual_rtv_rate)?;
        positive("indicators.abnormal_transfer_multiple", t.abnormal_transfer_multiple)?;
        unit_interval("indicators.transfer_quantile", t.transfer_quantile)?;
        unit_interval("indicators.shipment_quantile", t.shipment_quantile)?;
        unit_interval("indicators.low_accuracy", t.low_accuracy)?;
        positive("indicators.store_anomaly_z", t.store_anomaly_z)?;
        if t.min_store_history < 2 {
            return Err(AnalysisError::configuration(
                "indicators.min_store_history",
                "a standard deviation needs at least 2 prior periods",
            ));
        }
        if !(1..=31).contains(&t.month_end_day) {
            return Err(AnalysisError::configuration(
                "indicators.month_end_day",
                format!("must be a day of month, got {}", t.month_end_day),
            ));
        }

        let m = &self.mining;
        if !(m.min_support.is_finite() && m.min_support > 0.0 && m.min_support <= 1.0) {
            return Err(AnalysisError::configuration(
                "mining.min_support",
                format!("must be in (0, 1], got {}", m.min_support),
            ));
        }
        unit_interval("mining.min_confidence", m.min_confidence)?;
        if m.min_transactions == 0 {
            return Err(AnalysisError::configuration(
                "mining.min_transactions",
                "must be at least 1",
            ));
        }
        unit_interval("mining.suspicious_confidence", m.suspicious_confidence)?;
        non_negative("mining.suspicious_lift", m.suspicious_lift)?;

        let r = &self.risk;
        for (indicator, w) in &r.indicator_weights {
            non_negative(&format!("risk.indicator_weights.{}", indicator.name()), *w)?;
        }
        non_negative("risk.rule_bonus", r.rule_bonus)?;
        non_negative("risk.high_risk_threshold", r.high_risk_threshold)?;

        let p = &self.reporting;
        positive("reporting.anomaly_z_threshold", p.anomaly_z_threshold)?;
        non_negative("reporting.shrinkage_alert_rate", p.shrinkage_alert_rate)?;
        non_negative("reporting.min_healthy_turnover", p.min_healthy_turnover)?;
        non_negative("reporting.rtv_alert_rate", p.rtv_alert_rate)?;
        unit_interval("reporting.high_shrinkage_share", p.high_shrinkage_share)?;
        unit_interval("reporting.large_discrepancy_share", p.large_discrepancy_share)?;
        unit_interval("reporting.unusual_rtv_share", p.unusual_rtv_share)?;

        Ok(())
    }
}

fn non_negative(field: &str, value: f64) -> AnalysisResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(AnalysisError::configuration(
            field,
            format!("must be a finite non-negative number, got {value}"),
        ))
    }
}

fn positive(field: &str, value: f64) -> AnalysisResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(AnalysisError::configuration(
            field,
            format!("must be a finite positive number, got {value}"),
        ))
    }
}

fn unit_interval(field: &str, value: f64) -> AnalysisResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AnalysisError::configuration(
            field,
            format!("must be in [0, 1], got {value}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        AnalysisConfig::default().validate().unwrap();
    }

    #[test]
    fn default_health_weights_sum_to_one() {
        let h = HealthWeights::default();
        let sum = h.accuracy + h.shrinkage + h.turnover + h.rtv;
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn negative_support_is_rejected() {
        let mut config = AnalysisConfig::default();
        config.mining.min_support = -0.1;
        let err = config.validate().unwrap_err();
        assert!(
            matches!(&err, AnalysisError::Configuration { field, .. } if field == "mining.min_support"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn unbalanced_health_weights_are_rejected() {
        let mut config = AnalysisConfig::default();
        config.health.turnover = 0.5;
        assert!(matches!(
            config.validate(),
            Err(AnalysisError::Configuration { .. })
        ));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{ "mining": { "min_support": 0.3, "algorithm": "apriori" } }"#;
        let config: AnalysisConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.mining.min_support, 0.3);
        assert_eq!(config.mining.algorithm, MiningAlgorithm::Apriori);
        assert_eq!(config.mining.min_confidence, 0.5);
        assert_eq!(config.indicators.large_discrepancy_units, 100.0);
        config.validate().unwrap();
    }

    #[test]
    fn indicator_weights_round_trip_through_json() {
        let config = AnalysisConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: AnalysisConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.risk.weight(Indicator::ZeroSalesPeriod), 1.0);
        assert_eq!(back.risk.weight(Indicator::WeekendPeriod), 0.0);
    }
}
