//! Fraud indicator encoding.
//!
//! Every record is mapped onto the same fixed, ordered vocabulary of
//! indicators. An indicator is `Triggered`, `Clear`, or `NotApplicable` when
//! its input metric is undefined or the store's history is too short.
//! Only `Triggered` counts as an item for mining and scoring.

use crate::{
    config::IndicatorThresholds,
    features::DerivedMetrics,
    normalizer::StocktakeRecord,
    types::StoreId,
};
use chrono::{Datelike, Weekday};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

// ── Vocabulary ───────────────────────────────────────────────────────────────

/// The global indicator vocabulary. Declaration order is the item order used
/// by the miners and every report. Append only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    HighShrinkagePeriod,
    LargeDiscrepancy,
    UnusualRtvPattern,
    ZeroSalesPeriod,
    AbnormalTransferPattern,
    HighTransferOut,
    HighTransferIn,
    LowInventoryAccuracy,
    HighShipment,
    ZeroShipment,
    StoreShrinkageAnomaly,
    WeekendPeriod,
    MonthEndPeriod,
}

impl Indicator {
    pub const COUNT: usize = 13;

    pub const ALL: [Indicator; Indicator::COUNT] = [
        Self::HighShrinkagePeriod,
        Self::LargeDiscrepancy,
        Self::UnusualRtvPattern,
        Self::ZeroSalesPeriod,
        Self::AbnormalTransferPattern,
        Self::HighTransferOut,
        Self::HighTransferIn,
        Self::LowInventoryAccuracy,
        Self::HighShipment,
        Self::ZeroShipment,
        Self::StoreShrinkageAnomaly,
        Self::WeekendPeriod,
        Self::MonthEndPeriod,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Single-bit mask of this indicator in an item bitset.
    pub fn bit(self) -> u32 {
        1 << self.index()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::HighShrinkagePeriod => "high_shrinkage_period",
            Self::LargeDiscrepancy => "large_discrepancy",
            Self::UnusualRtvPattern => "unusual_rtv_pattern",
            Self::ZeroSalesPeriod => "zero_sales_period",
            Self::AbnormalTransferPattern => "abnormal_transfer_pattern",
            Self::HighTransferOut => "high_transfer_out",
            Self::HighTransferIn => "high_transfer_in",
            Self::LowInventoryAccuracy => "low_inventory_accuracy",
            Self::HighShipment => "high_shipment",
            Self::ZeroShipment => "zero_shipment",
            Self::StoreShrinkageAnomaly => "store_shrinkage_anomaly",
            Self::WeekendPeriod => "weekend_period",
            Self::MonthEndPeriod => "month_end_period",
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorState {
    Triggered,
    Clear,
    NotApplicable,
}

impl IndicatorState {
    fn from_bool(triggered: bool) -> Self {
        if triggered {
            Self::Triggered
        } else {
            Self::Clear
        }
    }
}

/// One state per vocabulary entry, always complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorVector {
    states: [IndicatorState; Indicator::COUNT],
}

impl IndicatorVector {
    pub fn get(&self, indicator: Indicator) -> IndicatorState {
        self.states[indicator.index()]
    }

    pub fn is_triggered(&self, indicator: Indicator) -> bool {
        self.get(indicator) == IndicatorState::Triggered
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Indicator, IndicatorState)> + '_ {
        Indicator::ALL.iter().map(move |i| (*i, self.get(*i)))
    }

    pub fn triggered(&self) -> impl Iterator<Item = Indicator> + '_ {
        self.iter()
            .filter(|(_, s)| *s == IndicatorState::Triggered)
            .map(|(i, _)| i)
    }

    /// Triggered indicators as an item bitset.
    pub fn triggered_bits(&self) -> u32 {
        self.triggered().fold(0, |bits, i| bits | i.bit())
    }
}

impl Serialize for IndicatorVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (indicator, state) in self.iter() {
            map.serialize_entry(indicator.name(), &state)?;
        }
        map.end()
    }
}

// ── Read-only context ────────────────────────────────────────────────────────

/// Metrics of one store's strictly earlier periods, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreHistory {
    pub shrinkage_rates: Vec<f64>,
    pub abs_net_transfers: Vec<f64>,
}

/// Corpus-wide cut-offs for the volume indicators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusBaseline {
    pub transfer_out_cutoff: Option<f64>,
    pub transfer_in_cutoff: Option<f64>,
    pub shipment_cutoff: Option<f64>,
}

impl CorpusBaseline {
    pub fn build(records: &[StocktakeRecord], thresholds: &IndicatorThresholds) -> Self {
        let column = |f: fn(&StocktakeRecord) -> f64| -> Vec<f64> { records.iter().map(f).collect() };
        // Absent shipments are not zero shipments.
        let shipments: Vec<f64> = records.iter().filter_map(|r| r.shipment).collect();
        Self {
            transfer_out_cutoff: quantile(&column(|r| r.transfer_out), thresholds.transfer_quantile),
            transfer_in_cutoff: quantile(&column(|r| r.transfer_in), thresholds.transfer_quantile),
            shipment_cutoff: quantile(&shipments, thresholds.shipment_quantile),
        }
    }
}

/// Everything the encoder may read besides the record itself.
#[derive(Debug, Clone, Copy)]
pub struct EncodingContext<'a> {
    pub history: &'a StoreHistory,
    pub baseline: &'a CorpusBaseline,
}

/// Build each record's store history snapshot, in record order.
///
/// History is ordered by period start; a record sees only periods of its own
/// store that start before its own.
pub fn build_store_histories(
    records: &[StocktakeRecord],
    metrics: &[DerivedMetrics],
) -> Vec<StoreHistory> {
    let mut by_store: BTreeMap<&StoreId, Vec<usize>> = BTreeMap::new();
    for (i, record) in records.iter().enumerate() {
        by_store.entry(&record.store).or_default().push(i);
    }

    let mut histories = vec![StoreHistory::default(); records.len()];
    for indices in by_store.values_mut() {
        indices.sort_by_key(|&i| records[i].period_start);
        let mut running = StoreHistory::default();
        for &i in indices.iter() {
            histories[i] = running.clone();
            if let Some(rate) = metrics[i].shrinkage_rate {
                running.shrinkage_rates.push(rate);
            }
            running.abs_net_transfers.push(metrics[i].net_transfer.abs());
        }
    }
    histories
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Encode one record over the full vocabulary.
pub fn encode(
    record: &StocktakeRecord,
    metrics: &DerivedMetrics,
    context: EncodingContext<'_>,
    thresholds: &IndicatorThresholds,
) -> IndicatorVector {
    use IndicatorState::NotApplicable;

    let above = |value: Option<f64>, threshold: f64| {
        value.map_or(NotApplicable, |v| IndicatorState::from_bool(v > threshold))
    };
    let above_cutoff = |value: Option<f64>, cutoff: Option<f64>| match (value, cutoff) {
        (Some(v), Some(c)) => IndicatorState::from_bool(v > c),
        _ => NotApplicable,
    };

    let mut states = [IndicatorState::Clear; Indicator::COUNT];
    let mut set = |indicator: Indicator, state: IndicatorState| states[indicator.index()] = state;

    set(
        Indicator::HighShrinkagePeriod,
        above(metrics.shrinkage_rate, thresholds.high_shrinkage_rate),
    );
    set(
        Indicator::LargeDiscrepancy,
        IndicatorState::from_bool(metrics.discrepancy.abs() > thresholds.large_discrepancy_units),
    );
    set(
        Indicator::UnusualRtvPattern,
        above(metrics.rtv_rate, thresholds.unusual_rtv_rate),
    );
    set(
        Indicator::ZeroSalesPeriod,
        IndicatorState::from_bool(record.sales == 0.0),
    );
    set(
        Indicator::AbnormalTransferPattern,
        abnormal_transfer(metrics.net_transfer, context.history, thresholds),
    );
    set(
        Indicator::HighTransferOut,
        above_cutoff(Some(record.transfer_out), context.baseline.transfer_out_cutoff),
    );
    set(
        Indicator::HighTransferIn,
        above_cutoff(Some(record.transfer_in), context.baseline.transfer_in_cutoff),
    );
    set(
        Indicator::LowInventoryAccuracy,
        metrics
            .inventory_accuracy
            .map_or(NotApplicable, |a| IndicatorState::from_bool(a < thresholds.low_accuracy)),
    );
    set(
        Indicator::HighShipment,
        above_cutoff(record.shipment, context.baseline.shipment_cutoff),
    );
    set(
        Indicator::ZeroShipment,
        record
            .shipment
            .map_or(NotApplicable, |s| IndicatorState::from_bool(s == 0.0)),
    );
    set(
        Indicator::StoreShrinkageAnomaly,
        shrinkage_anomaly(metrics.shrinkage_rate, context.history, thresholds),
    );
    set(
        Indicator::WeekendPeriod,
        IndicatorState::from_bool(matches!(
            record.period_start.weekday(),
            Weekday::Sat | Weekday::Sun
        )),
    );
    set(
        Indicator::MonthEndPeriod,
        IndicatorState::from_bool(record.period_start.day() >= thresholds.month_end_day),
    );

    IndicatorVector { states }
}

fn abnormal_transfer(
    net_transfer: f64,
    history: &StoreHistory,
    thresholds: &IndicatorThresholds,
) -> IndicatorState {
    if history.abs_net_transfers.len() < thresholds.min_store_history {
        return IndicatorState::NotApplicable;
    }
    let baseline = mean(&history.abs_net_transfers);
    let magnitude = net_transfer.abs();
    if baseline <= f64::EPSILON {
        return IndicatorState::from_bool(magnitude > 0.0);
    }
    IndicatorState::from_bool(magnitude > thresholds.abnormal_transfer_multiple * baseline)
}

fn shrinkage_anomaly(
    shrinkage_rate: Option<f64>,
    history: &StoreHistory,
    thresholds: &IndicatorThresholds,
) -> IndicatorState {
    let Some(rate) = shrinkage_rate else {
        return IndicatorState::NotApplicable;
    };
    if history.shrinkage_rates.len() < thresholds.min_store_history {
        return IndicatorState::NotApplicable;
    }
    let mean = mean(&history.shrinkage_rates);
    let std = stddev_sample(&history.shrinkage_rates, mean);
    if std <= f64::EPSILON {
        return IndicatorState::from_bool((rate - mean).abs() > f64::EPSILON);
    }
    IndicatorState::from_bool((rate - mean) / std > thresholds.store_anomaly_z)
}

// ── Statistics helpers ───────────────────────────────────────────────────────

pub(crate) fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / (xs.len() as f64)
}

/// Sample standard deviation (n-1).
pub(crate) fn stddev_sample(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let var = xs
        .iter()
        .map(|x| {
            let d = x - mean;
            d * d
        })
        .sum::<f64>()
        / ((xs.len() - 1) as f64);
    var.sqrt()
}

/// Quantile with linear interpolation between order statistics.
pub(crate) fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let position = q * (sorted.len() - 1) as f64;
    let lo = position.floor() as usize;
    let hi = position.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (position - lo as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::HealthWeights, features::derive_metrics};
    use chrono::NaiveDate;

    fn record(day: u32, begin: f64, sales: f64, end: f64) -> StocktakeRecord {
        let date = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        StocktakeRecord {
            row: 0,
            store: "S1".into(),
            period_start: date,
            period_end: date,
            beginning_inventory: begin,
            shipment: Some(0.0),
            transfer_in: 0.0,
            transfer_out: 0.0,
            rtv: 0.0,
            sales,
            ending_inventory: end,
        }
    }

    fn encode_alone(r: &StocktakeRecord) -> IndicatorVector {
        encode_against(r, std::slice::from_ref(r))
    }

    /// Encode `r` with cut-offs taken from `corpus` and no store history.
    fn encode_against(r: &StocktakeRecord, corpus: &[StocktakeRecord]) -> IndicatorVector {
        let thresholds = IndicatorThresholds::default();
        let metrics = derive_metrics(r, &HealthWeights::default());
        let history = StoreHistory::default();
        let baseline = CorpusBaseline::build(corpus, &thresholds);
        encode(
            r,
            &metrics,
            EncodingContext {
                history: &history,
                baseline: &baseline,
            },
            &thresholds,
        )
    }

    #[test]
    fn vocabulary_is_consistent() {
        for (i, indicator) in Indicator::ALL.iter().enumerate() {
            assert_eq!(indicator.index(), i);
            assert_eq!(Indicator::from_index(i), Some(*indicator));
        }
        assert_eq!(Indicator::from_index(Indicator::COUNT), None);
    }

    #[test]
    fn vector_always_covers_full_vocabulary() {
        let v = encode_alone(&record(2, 0.0, 0.0, 0.0));
        assert_eq!(v.len(), Indicator::COUNT);
        assert_eq!(v.iter().count(), Indicator::COUNT);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json.as_object().unwrap().len(), Indicator::COUNT);
    }

    #[test]
    fn large_discrepancy_threshold_is_strict() {
        // expected ending 1000, counted 900 → discrepancy exactly -100
        let at = encode_alone(&record(2, 1000.0, 0.0, 900.0));
        assert_eq!(at.get(Indicator::LargeDiscrepancy), IndicatorState::Clear);

        let over = encode_alone(&record(2, 1000.0, 0.0, 899.9999));
        assert!(over.is_triggered(Indicator::LargeDiscrepancy));
    }

    #[test]
    fn undefined_metrics_are_not_applicable() {
        let v = encode_alone(&record(2, 0.0, 0.0, 0.0));
        assert_eq!(v.get(Indicator::HighShrinkagePeriod), IndicatorState::NotApplicable);
        assert_eq!(v.get(Indicator::UnusualRtvPattern), IndicatorState::NotApplicable);
        assert_eq!(v.get(Indicator::LowInventoryAccuracy), IndicatorState::NotApplicable);
        assert!(v.is_triggered(Indicator::ZeroSalesPeriod));
    }

    #[test]
    fn short_history_disables_store_indicators() {
        let v = encode_alone(&record(2, 1000.0, 10.0, 990.0));
        assert_eq!(v.get(Indicator::StoreShrinkageAnomaly), IndicatorState::NotApplicable);
        assert_eq!(v.get(Indicator::AbnormalTransferPattern), IndicatorState::NotApplicable);
    }

    #[test]
    fn shrinkage_anomaly_uses_store_history() {
        let thresholds = IndicatorThresholds::default();
        let history = StoreHistory {
            shrinkage_rates: vec![0.001, 0.002, 0.0015, 0.001],
            abs_net_transfers: vec![0.0; 4],
        };
        assert_eq!(
            shrinkage_anomaly(Some(0.05), &history, &thresholds),
            IndicatorState::Triggered
        );
        assert_eq!(
            shrinkage_anomaly(Some(0.0015), &history, &thresholds),
            IndicatorState::Clear
        );
    }

    #[test]
    fn flat_shrinkage_history_flags_any_departure() {
        let thresholds = IndicatorThresholds::default();
        let history = StoreHistory {
            shrinkage_rates: vec![0.01; 3],
            abs_net_transfers: vec![0.0; 3],
        };
        assert_eq!(
            shrinkage_anomaly(Some(0.01), &history, &thresholds),
            IndicatorState::Clear
        );
        assert_eq!(
            shrinkage_anomaly(Some(0.011), &history, &thresholds),
            IndicatorState::Triggered
        );
        assert_eq!(
            shrinkage_anomaly(Some(0.009), &history, &thresholds),
            IndicatorState::Triggered
        );
        assert_eq!(
            shrinkage_anomaly(None, &history, &thresholds),
            IndicatorState::NotApplicable
        );
    }

    #[test]
    fn abnormal_transfer_is_a_multiple_of_store_history() {
        let thresholds = IndicatorThresholds::default();
        let history = StoreHistory {
            shrinkage_rates: vec![0.0; 3],
            abs_net_transfers: vec![5.0, 10.0, 15.0],
        };
        // mean |net transfer| is 10; the multiple is 3.0 and strict.
        assert_eq!(abnormal_transfer(30.0, &history, &thresholds), IndicatorState::Clear);
        assert_eq!(abnormal_transfer(-30.5, &history, &thresholds), IndicatorState::Triggered);
        assert_eq!(abnormal_transfer(31.0, &history, &thresholds), IndicatorState::Triggered);
    }

    #[test]
    fn transfer_free_history_flags_any_net_transfer() {
        let thresholds = IndicatorThresholds::default();
        let history = StoreHistory {
            shrinkage_rates: vec![0.0; 4],
            abs_net_transfers: vec![0.0; 4],
        };
        assert_eq!(abnormal_transfer(0.0, &history, &thresholds), IndicatorState::Clear);
        assert_eq!(abnormal_transfer(5.0, &history, &thresholds), IndicatorState::Triggered);
        assert_eq!(abnormal_transfer(-1.0, &history, &thresholds), IndicatorState::Triggered);
    }

    #[test]
    fn volumes_above_the_corpus_quantile_trigger() {
        // Volumes 0..=9 put the 0.9 quantile at 8.1.
        let corpus: Vec<StocktakeRecord> = (0..10u32)
            .map(|i| {
                let v = f64::from(i);
                StocktakeRecord {
                    transfer_out: v,
                    transfer_in: v,
                    shipment: Some(v),
                    ..record(2, 1000.0, 10.0, 990.0)
                }
            })
            .collect();
        let baseline = CorpusBaseline::build(&corpus, &IndicatorThresholds::default());
        assert!((baseline.shipment_cutoff.unwrap() - 8.1).abs() < 1e-12);

        let top = encode_against(&corpus[9], &corpus);
        assert!(top.is_triggered(Indicator::HighTransferOut));
        assert!(top.is_triggered(Indicator::HighTransferIn));
        assert!(top.is_triggered(Indicator::HighShipment));
        assert!(!top.is_triggered(Indicator::ZeroShipment));

        let below = encode_against(&corpus[8], &corpus);
        assert_eq!(below.get(Indicator::HighTransferOut), IndicatorState::Clear);
        assert_eq!(below.get(Indicator::HighTransferIn), IndicatorState::Clear);
        assert_eq!(below.get(Indicator::HighShipment), IndicatorState::Clear);

        let none = encode_against(&corpus[0], &corpus);
        assert!(none.is_triggered(Indicator::ZeroShipment));
    }

    #[test]
    fn absent_shipment_is_not_a_zero_shipment() {
        let shipped = |v: Option<f64>| StocktakeRecord {
            shipment: v,
            ..record(2, 1000.0, 10.0, 990.0)
        };
        let corpus = vec![shipped(None), shipped(Some(0.0)), shipped(Some(50.0)), shipped(None)];

        let baseline = CorpusBaseline::build(&corpus, &IndicatorThresholds::default());
        assert_eq!(baseline.shipment_cutoff, quantile(&[0.0, 50.0], 0.9));

        let v = encode_against(&corpus[0], &corpus);
        assert_eq!(v.get(Indicator::ZeroShipment), IndicatorState::NotApplicable);
        assert_eq!(v.get(Indicator::HighShipment), IndicatorState::NotApplicable);
        assert!(encode_against(&corpus[1], &corpus).is_triggered(Indicator::ZeroShipment));

        let without_column = vec![shipped(None), shipped(None)];
        let baseline = CorpusBaseline::build(&without_column, &IndicatorThresholds::default());
        assert_eq!(baseline.shipment_cutoff, None);
    }

    #[test]
    fn calendar_indicators() {
        // 2024-01-06 is a Saturday; 2024-01-26 is a Friday.
        let saturday = encode_alone(&record(6, 10.0, 1.0, 9.0));
        assert!(saturday.is_triggered(Indicator::WeekendPeriod));
        assert!(!saturday.is_triggered(Indicator::MonthEndPeriod));

        let month_end = encode_alone(&record(26, 10.0, 1.0, 9.0));
        assert!(!month_end.is_triggered(Indicator::WeekendPeriod));
        assert!(month_end.is_triggered(Indicator::MonthEndPeriod));
    }

    #[test]
    fn histories_only_see_earlier_periods() {
        let records = vec![
            record(15, 100.0, 10.0, 85.0),
            record(1, 100.0, 10.0, 90.0),
            record(8, 100.0, 10.0, 88.0),
        ];
        let metrics: Vec<_> = records
            .iter()
            .map(|r| derive_metrics(r, &HealthWeights::default()))
            .collect();
        let histories = build_store_histories(&records, &metrics);
        assert_eq!(histories[1].shrinkage_rates.len(), 0);
        assert_eq!(histories[2].shrinkage_rates, vec![0.0]);
        assert_eq!(histories[0].shrinkage_rates.len(), 2);
    }

    #[test]
    fn quantile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&values, 0.5), Some(3.0));
        assert!((quantile(&values, 0.9).unwrap() - 4.6).abs() < 1e-12);
        assert_eq!(quantile(&[], 0.9), None);
    }
}
