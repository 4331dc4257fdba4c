//! Risk Aggregator.
//!
//! This stage:
//!   1. Scores each record from its triggered indicators and matched rules
//!   2. Flags high-risk records and assigns a risk category
//!   3. Rolls scores up per store, per calendar month and for the corpus
//!   4. Tallies how often each indicator fired
//!
//! The nominal 0–7 score range of the default weights is not a ceiling:
//! rule bonuses can push a score past it.

use crate::{
    config::RiskConfig,
    indicators::{Indicator, IndicatorState, IndicatorVector},
    mining::AssociationRule,
    normalizer::StocktakeRecord,
    types::{RowIndex, StoreId, YearMonth},
};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

// ── Constants ────────────────────────────────────────────────────────────────

const CRITICAL_SCORE: f64 = 5.0;
const HIGH_SCORE: f64 = 4.0;
const MEDIUM_SCORE: f64 = 3.0;

// Store level bins on the mean record score.
const STORE_LOW_MAX: f64 = 1.0;
const STORE_MEDIUM_MAX: f64 = 2.0;
const STORE_HIGH_MAX: f64 = 3.0;

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Medium,
    High,
    Critical,
}

impl RiskCategory {
    pub fn of(score: f64) -> Option<Self> {
        if score >= CRITICAL_SCORE {
            Some(Self::Critical)
        } else if score >= HIGH_SCORE {
            Some(Self::High)
        } else if score >= MEDIUM_SCORE {
            Some(Self::Medium)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn of(mean_score: f64) -> Self {
        if mean_score <= STORE_LOW_MAX {
            Self::Low
        } else if mean_score <= STORE_MEDIUM_MAX {
            Self::Medium
        } else if mean_score <= STORE_HIGH_MAX {
            Self::High
        } else {
            Self::VeryHigh
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordRisk {
    pub row: RowIndex,
    pub store: StoreId,
    pub period_start: NaiveDate,
    pub fraud_score: f64,
    pub high_risk: bool,
    pub category: Option<RiskCategory>,
    /// Triggered indicators carrying a non-zero weight.
    pub fraud_types: Vec<Indicator>,
    pub matched_rules: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreRisk {
    pub records: usize,
    pub mean_score: f64,
    pub max_score: f64,
    pub high_risk_records: usize,
    pub risk_rate: f64,
    pub level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodRisk {
    pub records: usize,
    pub mean_score: f64,
    pub high_risk_records: usize,
    pub risk_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskSummary {
    pub records: usize,
    pub high_risk_records: usize,
    pub high_risk_rate: f64,
    pub mean_score: f64,
    pub max_score: f64,
    pub stores_with_high_risk: Vec<StoreId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorFrequency {
    pub triggered: usize,
    pub not_applicable: usize,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    /// One entry per analysed record, in input order.
    pub records: Vec<RecordRisk>,
    pub stores: BTreeMap<StoreId, StoreRisk>,
    pub periods: BTreeMap<YearMonth, PeriodRisk>,
    pub summary: RiskSummary,
    pub indicator_frequencies: BTreeMap<Indicator, IndicatorFrequency>,
}

impl RiskAssessment {
    /// High-risk records, highest score first; ties by row index.
    pub fn high_risk_records(&self) -> Vec<RecordRisk> {
        let mut flagged: Vec<RecordRisk> =
            self.records.iter().filter(|r| r.high_risk).cloned().collect();
        flagged.sort_by(|a, b| {
            b.fraud_score
                .total_cmp(&a.fraud_score)
                .then(a.row.cmp(&b.row))
        });
        flagged
    }
}

// ── Scoring ──────────────────────────────────────────────────────────────────

/// Score one record. Rules match on the record's own triggered set.
pub fn score_record(
    record: &StocktakeRecord,
    vector: &IndicatorVector,
    rules: &[AssociationRule],
    config: &RiskConfig,
) -> RecordRisk {
    let mut fraud_score = 0.0;
    let mut fraud_types = Vec::new();
    for indicator in vector.triggered() {
        let weight = config.weight(indicator);
        if weight != 0.0 {
            fraud_score += weight;
            fraud_types.push(indicator);
        }
    }

    let triggered = vector.triggered_bits();
    let matched_rules = rules.iter().filter(|r| r.matches(triggered)).count();
    fraud_score += config.rule_bonus * matched_rules as f64;

    RecordRisk {
        row: record.row,
        store: record.store.clone(),
        period_start: record.period_start,
        fraud_score,
        high_risk: fraud_score > config.high_risk_threshold,
        category: RiskCategory::of(fraud_score),
        fraud_types,
        matched_rules,
    }
}

fn share(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

#[derive(Default)]
struct Tally {
    records: usize,
    score_sum: f64,
    max_score: f64,
    high_risk: usize,
}

impl Tally {
    fn add(&mut self, risk: &RecordRisk) {
        self.records += 1;
        self.score_sum += risk.fraud_score;
        self.max_score = self.max_score.max(risk.fraud_score);
        if risk.high_risk {
            self.high_risk += 1;
        }
    }

    fn mean(&self) -> f64 {
        if self.records == 0 {
            0.0
        } else {
            self.score_sum / self.records as f64
        }
    }
}

/// Score every record and build all aggregates.
pub fn assess(
    records: &[StocktakeRecord],
    vectors: &[IndicatorVector],
    rules: &[AssociationRule],
    config: &RiskConfig,
) -> RiskAssessment {
    let scored: Vec<RecordRisk> = records
        .iter()
        .zip(vectors)
        .map(|(record, vector)| score_record(record, vector, rules, config))
        .collect();

    let mut corpus = Tally::default();
    let mut by_store: BTreeMap<StoreId, Tally> = BTreeMap::new();
    let mut by_period: BTreeMap<YearMonth, Tally> = BTreeMap::new();
    for (risk, record) in scored.iter().zip(records) {
        corpus.add(risk);
        by_store.entry(risk.store.clone()).or_default().add(risk);
        by_period.entry(record.period()).or_default().add(risk);
    }

    let stores: BTreeMap<StoreId, StoreRisk> = by_store
        .into_iter()
        .map(|(store, t)| {
            let risk = StoreRisk {
                records: t.records,
                mean_score: t.mean(),
                max_score: t.max_score,
                high_risk_records: t.high_risk,
                risk_rate: share(t.high_risk, t.records),
                level: RiskLevel::of(t.mean()),
            };
            (store, risk)
        })
        .collect();

    let periods = by_period
        .into_iter()
        .map(|(period, t)| {
            let risk = PeriodRisk {
                records: t.records,
                mean_score: t.mean(),
                high_risk_records: t.high_risk,
                risk_rate: share(t.high_risk, t.records),
            };
            (period, risk)
        })
        .collect();

    let summary = RiskSummary {
        records: corpus.records,
        high_risk_records: corpus.high_risk,
        high_risk_rate: share(corpus.high_risk, corpus.records),
        mean_score: corpus.mean(),
        max_score: corpus.max_score,
        stores_with_high_risk: stores
            .iter()
            .filter(|(_, s)| s.high_risk_records > 0)
            .map(|(id, _)| id.clone())
            .collect(),
    };

    log::debug!(
        "risk: {} of {} records high risk across {} stores",
        summary.high_risk_records,
        summary.records,
        stores.len()
    );

    RiskAssessment {
        records: scored,
        stores,
        periods,
        summary,
        indicator_frequencies: indicator_frequencies(vectors),
    }
}

/// Trigger and not-applicable counts for every vocabulary entry.
pub fn indicator_frequencies(vectors: &[IndicatorVector]) -> BTreeMap<Indicator, IndicatorFrequency> {
    let mut frequencies: BTreeMap<Indicator, IndicatorFrequency> = Indicator::ALL
        .iter()
        .map(|i| (*i, IndicatorFrequency::default()))
        .collect();
    for vector in vectors {
        for (indicator, state) in vector.iter() {
            let entry = frequencies.entry(indicator).or_default();
            match state {
                IndicatorState::Triggered => entry.triggered += 1,
                IndicatorState::NotApplicable => entry.not_applicable += 1,
                IndicatorState::Clear => {}
            }
        }
    }
    for entry in frequencies.values_mut() {
        entry.rate = share(entry.triggered, vectors.len());
    }
    frequencies
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_use_inclusive_floors() {
        assert_eq!(RiskCategory::of(2.99), None);
        assert_eq!(RiskCategory::of(3.0), Some(RiskCategory::Medium));
        assert_eq!(RiskCategory::of(4.0), Some(RiskCategory::High));
        assert_eq!(RiskCategory::of(7.5), Some(RiskCategory::Critical));
    }

    #[test]
    fn store_levels_use_inclusive_ceilings() {
        assert_eq!(RiskLevel::of(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::of(1.0), RiskLevel::Low);
        assert_eq!(RiskLevel::of(1.5), RiskLevel::Medium);
        assert_eq!(RiskLevel::of(3.0), RiskLevel::High);
        assert_eq!(RiskLevel::of(3.01), RiskLevel::VeryHigh);
    }

    #[test]
    fn empty_corpus_has_zero_rates() {
        let assessment = assess(&[], &[], &[], &RiskConfig::default());
        assert_eq!(assessment.summary.records, 0);
        assert_eq!(assessment.summary.high_risk_rate, 0.0);
        assert_eq!(assessment.indicator_frequencies.len(), Indicator::COUNT);
        assert!(assessment.high_risk_records().is_empty());
    }
}
