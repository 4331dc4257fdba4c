//! Per-record KPI derivation and the composite health score.
//!
//! Every ratio whose denominator can vanish is an `Option`: `None` means
//! "undefined", never zero.

use crate::{config::HealthWeights, normalizer::StocktakeRecord};
use serde::Serialize;

const DAYS_PER_YEAR: f64 = 365.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedMetrics {
    pub discrepancy: f64,
    pub shrinkage_rate: Option<f64>,
    pub inventory_accuracy: Option<f64>,
    pub turnover: Option<f64>,
    pub rtv_rate: Option<f64>,
    pub days_sales_inventory: Option<f64>,
    pub transfer_efficiency: Option<f64>,
    pub net_transfer: f64,
    pub period_days: i64,
    pub sales_velocity: f64,
    pub health_score: Option<f64>,
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    (denominator > 0.0).then(|| numerator / denominator)
}

/// Compute every derived metric of one record.
pub fn derive_metrics(record: &StocktakeRecord, weights: &HealthWeights) -> DerivedMetrics {
    let discrepancy = record.discrepancy();
    let begin = record.beginning_inventory;
    let average_inventory = (record.beginning_inventory + record.ending_inventory) / 2.0;

    let shrinkage_rate = ratio(discrepancy, begin);
    let inventory_accuracy = ratio(discrepancy.abs(), begin).map(|r| (1.0 - r).clamp(0.0, 1.0));
    let turnover = ratio(record.sales, average_inventory);
    let rtv_rate = ratio(record.rtv, begin);
    let days_sales_inventory = turnover.and_then(|t| ratio(DAYS_PER_YEAR, t));
    let transfer_efficiency = ratio(record.transfer_in, record.transfer_in + record.transfer_out);
    let period_days = (record.period_end - record.period_start).num_days() + 1;

    let health_score = health_score(
        weights,
        inventory_accuracy,
        shrinkage_rate,
        turnover,
        rtv_rate,
    );

    DerivedMetrics {
        discrepancy,
        shrinkage_rate,
        inventory_accuracy,
        turnover,
        rtv_rate,
        days_sales_inventory,
        transfer_efficiency,
        net_transfer: record.transfer_in - record.transfer_out,
        period_days,
        sales_velocity: record.sales / period_days as f64,
        health_score,
    }
}

/// Weighted mean of the defined components, scaled to [0, 100].
///
/// Components:
///   accuracy   inventory accuracy, already in [0, 1]
///   shrinkage  1 − |shrinkage rate|, clipped to [0, 1]
///   turnover   turnover / saturation, capped at 1
///   rtv        1 − RTV rate, clipped to [0, 1]
///
/// Undefined components drop out and the remaining weights are rescaled.
pub fn health_score(
    weights: &HealthWeights,
    inventory_accuracy: Option<f64>,
    shrinkage_rate: Option<f64>,
    turnover: Option<f64>,
    rtv_rate: Option<f64>,
) -> Option<f64> {
    let components = [
        (weights.accuracy, inventory_accuracy),
        (weights.shrinkage, shrinkage_rate.map(|s| (1.0 - s.abs()).clamp(0.0, 1.0))),
        (weights.turnover, turnover.map(|t| (t / weights.turnover_saturation).min(1.0))),
        (weights.rtv, rtv_rate.map(|r| (1.0 - r).clamp(0.0, 1.0))),
    ];

    let (weighted, total_weight) = components
        .iter()
        .filter_map(|(w, c)| c.map(|c| (w * c, *w)))
        .fold((0.0, 0.0), |(acc, tw), (wc, w)| (acc + wc, tw + w));

    (total_weight > 0.0).then(|| (100.0 * weighted / total_weight).clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(begin: f64, sales: f64, rtv: f64, end: f64) -> StocktakeRecord {
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        StocktakeRecord {
            row: 0,
            store: "S1".into(),
            period_start: day,
            period_end: day + chrono::Duration::days(6),
            beginning_inventory: begin,
            shipment: Some(0.0),
            transfer_in: 0.0,
            transfer_out: 0.0,
            rtv,
            sales,
            ending_inventory: end,
        }
    }

    #[test]
    fn metrics_follow_definitions() {
        let m = derive_metrics(&record(1000.0, 100.0, 10.0, 870.0), &HealthWeights::default());
        assert_eq!(m.discrepancy, -20.0);
        assert_eq!(m.shrinkage_rate, Some(-0.02));
        assert!((m.inventory_accuracy.unwrap() - 0.98).abs() < 1e-12);
        assert_eq!(m.rtv_rate, Some(0.01));
        assert_eq!(m.turnover, Some(100.0 / 935.0));
        assert_eq!(m.period_days, 7);
        assert!((m.sales_velocity - 100.0 / 7.0).abs() < 1e-12);
        assert_eq!(m.transfer_efficiency, None);
    }

    #[test]
    fn zero_beginning_inventory_leaves_rates_undefined() {
        let m = derive_metrics(&record(0.0, 0.0, 0.0, 0.0), &HealthWeights::default());
        assert_eq!(m.shrinkage_rate, None);
        assert_eq!(m.rtv_rate, None);
        assert_eq!(m.inventory_accuracy, None);
        assert_eq!(m.turnover, None);
        assert_eq!(m.days_sales_inventory, None);
        assert_eq!(m.health_score, None);
    }

    #[test]
    fn derivation_is_deterministic() {
        let r = record(512.5, 33.0, 4.0, 470.25);
        let w = HealthWeights::default();
        assert_eq!(derive_metrics(&r, &w), derive_metrics(&r, &w));
    }

    #[test]
    fn health_score_stays_in_range() {
        let w = HealthWeights::default();
        let perfect = health_score(&w, Some(1.0), Some(0.0), Some(500.0), Some(0.0)).unwrap();
        assert!((perfect - 100.0).abs() < 1e-9);
        let worst = health_score(&w, Some(0.0), Some(-3.0), Some(0.0), Some(2.0)).unwrap();
        assert_eq!(worst, 0.0);
    }

    #[test]
    fn health_score_rescales_over_defined_components() {
        let w = HealthWeights::default();
        // Only turnover defined: its component alone sets the score.
        let score = health_score(&w, None, None, Some(25.0), None).unwrap();
        assert!((score - 50.0).abs() < 1e-9);
    }
}
