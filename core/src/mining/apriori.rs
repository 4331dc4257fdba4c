//! Level-wise candidate generation with subset pruning.

use super::{into_itemsets, meets_support, FrequentItemset, FrequentPatternMiner, ItemBits, TransactionSet};
use crate::indicators::Indicator;
use std::collections::BTreeSet;

pub struct Apriori;

impl FrequentPatternMiner for Apriori {
    fn name(&self) -> &'static str {
        "apriori"
    }

    fn mine(&self, transactions: &TransactionSet, min_support: f64) -> Vec<FrequentItemset> {
        let total = transactions.len();
        let mut found: Vec<(ItemBits, usize)> = Vec::new();

        let mut level: Vec<(ItemBits, usize)> = Indicator::ALL
            .iter()
            .map(|i| (i.bit(), transactions.count(i.bit())))
            .filter(|&(_, count)| meets_support(count, total, min_support))
            .collect();

        while !level.is_empty() {
            found.extend_from_slice(&level);
            level = join(&level)
                .into_iter()
                .map(|candidate| (candidate, transactions.count(candidate)))
                .filter(|&(_, count)| meets_support(count, total, min_support))
                .collect();
        }

        into_itemsets(found, total)
    }
}

/// Candidates of size k + 1 from frequent k-itemsets. Two sets join when
/// they differ in exactly one item; a candidate survives only if every one
/// of its k-subsets is frequent.
fn join(level: &[(ItemBits, usize)]) -> BTreeSet<ItemBits> {
    let frequent: BTreeSet<ItemBits> = level.iter().map(|&(bits, _)| bits).collect();
    let Some(k) = level.first().map(|&(bits, _)| bits.count_ones()) else {
        return BTreeSet::new();
    };

    let mut candidates = BTreeSet::new();
    for (i, &(a, _)) in level.iter().enumerate() {
        for &(b, _) in &level[i + 1..] {
            let union = a | b;
            if union.count_ones() != k + 1 || candidates.contains(&union) {
                continue;
            }
            if all_subsets_frequent(union, &frequent) {
                candidates.insert(union);
            }
        }
    }
    candidates
}

fn all_subsets_frequent(candidate: ItemBits, frequent: &BTreeSet<ItemBits>) -> bool {
    let mut rest = candidate;
    while rest != 0 {
        let lowest = rest & rest.wrapping_neg();
        if !frequent.contains(&(candidate & !lowest)) {
            return false;
        }
        rest &= !lowest;
    }
    true
}
