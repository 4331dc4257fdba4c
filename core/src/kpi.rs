//! KPI Reporter.
//!
//! This stage:
//!   1. Averages every derived metric over the corpus
//!   2. Aggregates KPIs per store, per calendar month and per quarter
//!   3. Ranks stores by mean health score
//!   4. Lists records whose KPIs sit far outside the corpus distribution
//!
//! Means skip undefined values; a mean over no defined value is `None`.

use crate::{
    config::ReportingConfig,
    features::DerivedMetrics,
    indicators::{mean, stddev_sample},
    normalizer::StocktakeRecord,
    types::{RowIndex, StoreId, YearMonth, YearQuarter},
};
use chrono::NaiveDate;
use serde::Serialize;
use std::{cmp::Ordering, collections::BTreeMap};

// ── Accumulators ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
struct Mean {
    sum: f64,
    n: usize,
}

impl Mean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.n += 1;
        }
    }

    fn value(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

// ── Corpus KPIs ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoreKpis {
    pub records: usize,
    pub stores: usize,
    pub mean_discrepancy: Option<f64>,
    pub mean_shrinkage_rate: Option<f64>,
    pub mean_inventory_accuracy: Option<f64>,
    pub mean_turnover: Option<f64>,
    pub mean_rtv_rate: Option<f64>,
    pub mean_days_sales_inventory: Option<f64>,
    pub mean_transfer_efficiency: Option<f64>,
    pub mean_net_transfer: Option<f64>,
    pub mean_sales_velocity: Option<f64>,
    pub mean_health_score: Option<f64>,
    pub total_sales: f64,
    pub total_discrepancy: f64,
}

fn core_kpis(records: &[StocktakeRecord], metrics: &[DerivedMetrics]) -> CoreKpis {
    let mut discrepancy = Mean::default();
    let mut shrinkage = Mean::default();
    let mut accuracy = Mean::default();
    let mut turnover = Mean::default();
    let mut rtv = Mean::default();
    let mut dsi = Mean::default();
    let mut efficiency = Mean::default();
    let mut net_transfer = Mean::default();
    let mut velocity = Mean::default();
    let mut health = Mean::default();

    for m in metrics {
        discrepancy.push(Some(m.discrepancy));
        shrinkage.push(m.shrinkage_rate);
        accuracy.push(m.inventory_accuracy);
        turnover.push(m.turnover);
        rtv.push(m.rtv_rate);
        dsi.push(m.days_sales_inventory);
        efficiency.push(m.transfer_efficiency);
        net_transfer.push(Some(m.net_transfer));
        velocity.push(Some(m.sales_velocity));
        health.push(m.health_score);
    }

    let stores = records
        .iter()
        .map(|r| &r.store)
        .collect::<std::collections::BTreeSet<_>>()
        .len();

    CoreKpis {
        records: records.len(),
        stores,
        mean_discrepancy: discrepancy.value(),
        mean_shrinkage_rate: shrinkage.value(),
        mean_inventory_accuracy: accuracy.value(),
        mean_turnover: turnover.value(),
        mean_rtv_rate: rtv.value(),
        mean_days_sales_inventory: dsi.value(),
        mean_transfer_efficiency: efficiency.value(),
        mean_net_transfer: net_transfer.value(),
        mean_sales_velocity: velocity.value(),
        mean_health_score: health.value(),
        total_sales: records.iter().map(|r| r.sales).sum(),
        total_discrepancy: discrepancy.sum,
    }
}

// ── Group KPIs ───────────────────────────────────────────────────────────────

/// KPIs of a group of records: one store, one month or one quarter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupKpis {
    pub records: usize,
    pub mean_inventory_accuracy: Option<f64>,
    pub mean_shrinkage_rate: Option<f64>,
    pub mean_turnover: Option<f64>,
    pub mean_rtv_rate: Option<f64>,
    pub mean_sales_velocity: Option<f64>,
    pub mean_health_score: Option<f64>,
    pub total_sales: f64,
    pub total_discrepancy: f64,
    pub total_period_days: i64,
}

#[derive(Debug, Default)]
struct GroupTally {
    records: usize,
    accuracy: Mean,
    shrinkage: Mean,
    turnover: Mean,
    rtv: Mean,
    velocity: Mean,
    health: Mean,
    sales: f64,
    discrepancy: f64,
    period_days: i64,
}

impl GroupTally {
    fn add(&mut self, record: &StocktakeRecord, m: &DerivedMetrics) {
        self.records += 1;
        self.accuracy.push(m.inventory_accuracy);
        self.shrinkage.push(m.shrinkage_rate);
        self.turnover.push(m.turnover);
        self.rtv.push(m.rtv_rate);
        self.velocity.push(Some(m.sales_velocity));
        self.health.push(m.health_score);
        self.sales += record.sales;
        self.discrepancy += m.discrepancy;
        self.period_days += m.period_days;
    }

    fn finish(&self) -> GroupKpis {
        GroupKpis {
            records: self.records,
            mean_inventory_accuracy: self.accuracy.value(),
            mean_shrinkage_rate: self.shrinkage.value(),
            mean_turnover: self.turnover.value(),
            mean_rtv_rate: self.rtv.value(),
            mean_sales_velocity: self.velocity.value(),
            mean_health_score: self.health.value(),
            total_sales: self.sales,
            total_discrepancy: self.discrepancy,
            total_period_days: self.period_days,
        }
    }
}

fn group_by<K: Ord>(
    records: &[StocktakeRecord],
    metrics: &[DerivedMetrics],
    key: impl Fn(&StocktakeRecord) -> K,
) -> BTreeMap<K, GroupKpis> {
    let mut tallies: BTreeMap<K, GroupTally> = BTreeMap::new();
    for (record, m) in records.iter().zip(metrics) {
        tallies.entry(key(record)).or_default().add(record, m);
    }
    tallies.into_iter().map(|(k, t)| (k, t.finish())).collect()
}

// ── Ranking ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedStore {
    pub rank: usize,
    pub store: StoreId,
    pub mean_health_score: Option<f64>,
}

/// Health descending, ties by store id; stores without a health score last.
pub fn rank_stores(stores: &BTreeMap<StoreId, GroupKpis>) -> Vec<RankedStore> {
    let mut entries: Vec<(&StoreId, Option<f64>)> = stores
        .iter()
        .map(|(id, k)| (id, k.mean_health_score))
        .collect();
    entries.sort_by(|(a_id, a), (b_id, b)| {
        let by_health = match (a, b) {
            (Some(a), Some(b)) => b.total_cmp(a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_health.then_with(|| a_id.cmp(b_id))
    });
    entries
        .into_iter()
        .enumerate()
        .map(|(i, (store, health))| RankedStore {
            rank: i + 1,
            store: store.clone(),
            mean_health_score: health,
        })
        .collect()
}

// ── Statistical anomalies ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KpiMetric {
    InventoryAccuracy,
    ShrinkageRate,
    Turnover,
    RtvRate,
}

impl KpiMetric {
    pub const ALL: [KpiMetric; 4] = [
        Self::InventoryAccuracy,
        Self::ShrinkageRate,
        Self::Turnover,
        Self::RtvRate,
    ];

    fn value(self, m: &DerivedMetrics) -> Option<f64> {
        match self {
            Self::InventoryAccuracy => m.inventory_accuracy,
            Self::ShrinkageRate => m.shrinkage_rate,
            Self::Turnover => m.turnover,
            Self::RtvRate => m.rtv_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalousMetric {
    pub metric: KpiMetric,
    pub value: f64,
    pub z_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiAnomaly {
    pub row: RowIndex,
    pub store: StoreId,
    pub period_start: NaiveDate,
    pub metrics: Vec<AnomalousMetric>,
}

/// Records with at least one KPI whose |z| against the corpus exceeds the
/// threshold. Metrics with no spread are skipped.
pub fn detect_anomalies(
    records: &[StocktakeRecord],
    metrics: &[DerivedMetrics],
    z_threshold: f64,
) -> Vec<KpiAnomaly> {
    let distributions: Vec<(KpiMetric, f64, f64)> = KpiMetric::ALL
        .iter()
        .filter_map(|&metric| {
            let values: Vec<f64> = metrics.iter().filter_map(|m| metric.value(m)).collect();
            let mu = mean(&values);
            let sigma = stddev_sample(&values, mu);
            (sigma > f64::EPSILON).then_some((metric, mu, sigma))
        })
        .collect();

    records
        .iter()
        .zip(metrics)
        .filter_map(|(record, m)| {
            let fired: Vec<AnomalousMetric> = distributions
                .iter()
                .filter_map(|&(metric, mu, sigma)| {
                    let value = metric.value(m)?;
                    let z_score = (value - mu) / sigma;
                    (z_score.abs() > z_threshold).then_some(AnomalousMetric {
                        metric,
                        value,
                        z_score,
                    })
                })
                .collect();
            (!fired.is_empty()).then(|| KpiAnomaly {
                row: record.row,
                store: record.store.clone(),
                period_start: record.period_start,
                metrics: fired,
            })
        })
        .collect()
}

// ── Report ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiReport {
    pub core: CoreKpis,
    pub stores: BTreeMap<StoreId, GroupKpis>,
    pub ranking: Vec<RankedStore>,
    pub monthly: BTreeMap<YearMonth, GroupKpis>,
    pub quarterly: BTreeMap<YearQuarter, GroupKpis>,
    pub anomalies: Vec<KpiAnomaly>,
}

pub fn build_kpi_report(
    records: &[StocktakeRecord],
    metrics: &[DerivedMetrics],
    config: &ReportingConfig,
) -> KpiReport {
    let stores = group_by(records, metrics, |r| r.store.clone());
    let ranking = rank_stores(&stores);
    let anomalies = detect_anomalies(records, metrics, config.anomaly_z_threshold);

    log::debug!(
        "kpi: {} stores ranked, {} anomalous records",
        ranking.len(),
        anomalies.len()
    );

    KpiReport {
        core: core_kpis(records, metrics),
        ranking,
        stores,
        monthly: group_by(records, metrics, |r| r.period()),
        quarterly: group_by(records, metrics, |r| r.period().quarter()),
        anomalies,
    }
}
