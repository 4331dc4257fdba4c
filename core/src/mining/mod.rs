//! Frequent-pattern mining over the indicator matrix.
//!
//! RULE: both strategies must report exactly the same itemsets and counts
//! for the same input. They differ only in how they count.
//!
//! Items are vocabulary indicators; an itemset is a bitset over
//! `Indicator::index()`, so the vocabulary must stay within 32 entries.

pub mod apriori;
pub mod fp_growth;
pub mod rules;

pub use apriori::Apriori;
pub use fp_growth::FpGrowth;
pub use rules::{generate_rules, AssociationRule};

use crate::{
    config::{MiningAlgorithm, MiningConfig},
    error::{AnalysisError, AnalysisResult},
    indicators::{Indicator, IndicatorVector},
    normalizer::StocktakeRecord,
    types::{StoreId, YearMonth},
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Items present in one transaction or itemset.
pub type ItemBits = u32;

const _: () = assert!(Indicator::COUNT <= ItemBits::BITS as usize);

pub(crate) fn items_of(bits: ItemBits) -> Vec<Indicator> {
    Indicator::ALL
        .iter()
        .copied()
        .filter(|i| bits & i.bit() != 0)
        .collect()
}

pub(crate) fn bits_of(items: &[Indicator]) -> ItemBits {
    items.iter().fold(0, |bits, i| bits | i.bit())
}

// ── Transactions ─────────────────────────────────────────────────────────────

/// The transaction database handed to a miner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionSet {
    transactions: Vec<ItemBits>,
}

impl TransactionSet {
    pub fn new(transactions: Vec<ItemBits>) -> Self {
        Self { transactions }
    }

    /// One transaction per record: its triggered indicators.
    pub fn from_vectors(vectors: &[IndicatorVector]) -> Self {
        Self::new(vectors.iter().map(IndicatorVector::triggered_bits).collect())
    }

    /// One transaction per store and calendar month, holding every indicator
    /// triggered by any record of that group.
    pub fn by_store_month(records: &[StocktakeRecord], vectors: &[IndicatorVector]) -> Self {
        let mut groups: BTreeMap<(&StoreId, YearMonth), ItemBits> = BTreeMap::new();
        for (record, vector) in records.iter().zip(vectors) {
            *groups.entry((&record.store, record.period())).or_insert(0) |= vector.triggered_bits();
        }
        Self::new(groups.into_values().collect())
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ItemBits> + '_ {
        self.transactions.iter().copied()
    }

    /// Number of transactions containing every item of `itemset`.
    pub fn count(&self, itemset: ItemBits) -> usize {
        self.iter().filter(|t| t & itemset == itemset).count()
    }
}

// ── Itemsets ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequentItemset {
    pub items: Vec<Indicator>,
    pub count: usize,
    pub support: f64,
}

impl FrequentItemset {
    pub(crate) fn new(bits: ItemBits, count: usize, total: usize) -> Self {
        Self {
            items: items_of(bits),
            count,
            support: count as f64 / total as f64,
        }
    }

    pub fn bits(&self) -> ItemBits {
        bits_of(&self.items)
    }
}

/// Support test shared by both miners. The quotient is compared directly so
/// a threshold equal to an exact support (e.g. 3/10 against 0.3) passes.
pub(crate) fn meets_support(count: usize, total: usize, min_support: f64) -> bool {
    total > 0 && count > 0 && count as f64 / total as f64 >= min_support
}

/// Size first, then vocabulary order.
pub(crate) fn into_itemsets(found: Vec<(ItemBits, usize)>, total: usize) -> Vec<FrequentItemset> {
    let mut itemsets: Vec<FrequentItemset> = found
        .into_iter()
        .map(|(bits, count)| FrequentItemset::new(bits, count, total))
        .collect();
    itemsets.sort_by(|a, b| {
        a.items
            .len()
            .cmp(&b.items.len())
            .then_with(|| a.items.cmp(&b.items))
    });
    itemsets
}

// ── Strategy ─────────────────────────────────────────────────────────────────

/// A frequent-itemset counting strategy.
pub trait FrequentPatternMiner {
    fn name(&self) -> &'static str;

    /// Every non-empty itemset whose support is at least `min_support`,
    /// sorted by size then vocabulary order.
    fn mine(&self, transactions: &TransactionSet, min_support: f64) -> Vec<FrequentItemset>;
}

pub fn miner_for(algorithm: MiningAlgorithm) -> Box<dyn FrequentPatternMiner> {
    match algorithm {
        MiningAlgorithm::Apriori => Box::new(Apriori),
        MiningAlgorithm::FpGrowth => Box::new(FpGrowth),
    }
}

// ── Outcome ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternReport {
    pub algorithm: MiningAlgorithm,
    pub transactions: usize,
    pub min_support: f64,
    pub min_confidence: f64,
    pub itemsets: Vec<FrequentItemset>,
    pub rules: Vec<AssociationRule>,
    /// High-confidence, high-lift subset of `rules`, in rule order.
    pub suspicious_rules: Vec<AssociationRule>,
}

/// Result of a mining pass. Too few transactions is a distinct outcome, not
/// an empty report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MiningOutcome {
    Completed(PatternReport),
    InsufficientData { transactions: usize, required: usize },
}

impl MiningOutcome {
    pub fn report(&self) -> Option<&PatternReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::InsufficientData { .. } => None,
        }
    }

    /// Mined rules, or none when mining was skipped.
    pub fn rules(&self) -> &[AssociationRule] {
        match self {
            Self::Completed(report) => report.rules.as_slice(),
            Self::InsufficientData { .. } => &[],
        }
    }

    pub fn into_result(self) -> AnalysisResult<PatternReport> {
        match self {
            Self::Completed(report) => Ok(report),
            Self::InsufficientData {
                transactions,
                required,
            } => Err(AnalysisError::InsufficientData {
                stage: "pattern mining",
                observed: transactions,
                required,
            }),
        }
    }
}

/// Mine itemsets and rules with the configured strategy.
pub fn mine_patterns(transactions: &TransactionSet, config: &MiningConfig) -> MiningOutcome {
    if transactions.len() < config.min_transactions {
        log::warn!(
            "mining: skipped, {} transactions below the minimum of {}",
            transactions.len(),
            config.min_transactions
        );
        return MiningOutcome::InsufficientData {
            transactions: transactions.len(),
            required: config.min_transactions,
        };
    }

    let miner = miner_for(config.algorithm);
    let itemsets = miner.mine(transactions, config.min_support);
    let rules = generate_rules(&itemsets, transactions.len(), config.min_confidence);
    let suspicious_rules: Vec<AssociationRule> = rules
        .iter()
        .filter(|r| {
            r.confidence >= config.suspicious_confidence && r.lift >= config.suspicious_lift
        })
        .take(config.max_suspicious_rules)
        .cloned()
        .collect();

    log::info!(
        "mining: {} found {} itemsets and {} rules ({} suspicious) over {} transactions",
        miner.name(),
        itemsets.len(),
        rules.len(),
        suspicious_rules.len(),
        transactions.len()
    );

    MiningOutcome::Completed(PatternReport {
        algorithm: config.algorithm,
        transactions: transactions.len(),
        min_support: config.min_support,
        min_confidence: config.min_confidence,
        itemsets,
        rules,
        suspicious_rules,
    })
}
