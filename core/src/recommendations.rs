//! Action items derived from the KPI and fraud reports.

use crate::{
    config::ReportingConfig,
    indicators::{quantile, Indicator},
    kpi::KpiReport,
    risk::{RiskAssessment, RiskLevel},
    types::StoreId,
};
use serde::Serialize;

const BOTTOM_HEALTH_QUANTILE: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationCategory {
    Shrinkage,
    Turnover,
    ReturnToVendor,
    StoreHealth,
    FraudPrevention,
    InventoryControl,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub category: RecommendationCategory,
    pub priority: Priority,
    pub message: String,
}

impl Recommendation {
    fn new(category: RecommendationCategory, priority: Priority, message: String) -> Self {
        Self {
            category,
            priority,
            message,
        }
    }
}

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

/// Stores whose mean health score is below the corpus lower quartile.
fn bottom_health_stores(kpi: &KpiReport) -> Vec<StoreId> {
    let scores: Vec<f64> = kpi.stores.values().filter_map(|s| s.mean_health_score).collect();
    let Some(cutoff) = quantile(&scores, BOTTOM_HEALTH_QUANTILE) else {
        return Vec::new();
    };
    kpi.stores
        .iter()
        .filter(|(_, s)| s.mean_health_score.is_some_and(|h| h < cutoff))
        .map(|(id, _)| id.clone())
        .collect()
}

/// Build the recommendation list. Order is fixed: KPI items first, then
/// fraud items.
pub fn build_recommendations(
    kpi: &KpiReport,
    risk: &RiskAssessment,
    config: &ReportingConfig,
) -> Vec<Recommendation> {
    use RecommendationCategory::*;

    let mut items = Vec::new();

    // ── KPI driven ──
    if let Some(rate) = kpi.core.mean_shrinkage_rate.filter(|r| *r > config.shrinkage_alert_rate) {
        items.push(Recommendation::new(
            Shrinkage,
            Priority::High,
            format!(
                "Mean shrinkage rate {} exceeds {}; tighten loss prevention and cycle counts",
                percent(rate),
                percent(config.shrinkage_alert_rate)
            ),
        ));
    }
    if let Some(turnover) = kpi.core.mean_turnover.filter(|t| *t < config.min_healthy_turnover) {
        items.push(Recommendation::new(
            Turnover,
            Priority::Medium,
            format!(
                "Mean inventory turnover {turnover:.2} is below {:.2}; review assortment and replenishment",
                config.min_healthy_turnover
            ),
        ));
    }
    if let Some(rate) = kpi.core.mean_rtv_rate.filter(|r| *r > config.rtv_alert_rate) {
        items.push(Recommendation::new(
            ReturnToVendor,
            Priority::Medium,
            format!(
                "Mean RTV rate {} exceeds {}; review vendor quality and return authorisations",
                percent(rate),
                percent(config.rtv_alert_rate)
            ),
        ));
    }
    let weakest = bottom_health_stores(kpi);
    if !weakest.is_empty() {
        items.push(Recommendation::new(
            StoreHealth,
            Priority::Medium,
            format!(
                "Stores in the bottom health quartile need an operational review: {}",
                weakest.join(", ")
            ),
        ));
    }

    // ── Fraud driven ──
    let rate_of = |indicator: Indicator| {
        risk.indicator_frequencies
            .get(&indicator)
            .map_or(0.0, |f| f.rate)
    };
    let shrinking = rate_of(Indicator::HighShrinkagePeriod);
    if shrinking > config.high_shrinkage_share {
        items.push(Recommendation::new(
            FraudPrevention,
            Priority::High,
            format!(
                "{} of records show high shrinkage; investigate theft and receiving controls",
                percent(shrinking)
            ),
        ));
    }
    let discrepant = rate_of(Indicator::LargeDiscrepancy);
    if discrepant > config.large_discrepancy_share {
        items.push(Recommendation::new(
            InventoryControl,
            Priority::High,
            format!(
                "{} of records carry large discrepancies; audit count and posting procedures",
                percent(discrepant)
            ),
        ));
    }
    let returning = rate_of(Indicator::UnusualRtvPattern);
    if returning > config.unusual_rtv_share {
        items.push(Recommendation::new(
            ReturnToVendor,
            Priority::Medium,
            format!(
                "{} of records show unusual RTV volumes; verify returns against vendor credits",
                percent(returning)
            ),
        ));
    }
    let risky: Vec<&str> = risk
        .stores
        .iter()
        .filter(|(_, s)| matches!(s.level, RiskLevel::High | RiskLevel::VeryHigh))
        .map(|(id, _)| id.as_str())
        .collect();
    if !risky.is_empty() {
        items.push(Recommendation::new(
            FraudPrevention,
            Priority::High,
            format!("Stores at high fraud risk need investigation: {}", risky.join(", ")),
        ));
    }

    items
}
