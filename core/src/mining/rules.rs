//! Association rules from frequent itemsets.

use super::{bits_of, items_of, FrequentItemset, ItemBits};
use crate::indicators::Indicator;
use serde::Serialize;
use std::{cmp::Ordering, collections::HashMap};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssociationRule {
    pub antecedent: Vec<Indicator>,
    pub consequent: Vec<Indicator>,
    pub support: f64,
    pub confidence: f64,
    pub lift: f64,
    pub antecedent_support: f64,
    pub consequent_support: f64,
    pub leverage: f64,
    /// `None` when confidence is 1 (conviction is unbounded).
    pub conviction: Option<f64>,
}

impl AssociationRule {
    pub fn antecedent_bits(&self) -> ItemBits {
        bits_of(&self.antecedent)
    }

    pub fn item_bits(&self) -> ItemBits {
        bits_of(&self.antecedent) | bits_of(&self.consequent)
    }

    /// A transaction satisfies the rule when it holds every item on both sides.
    pub fn matches(&self, transaction: ItemBits) -> bool {
        let items = self.item_bits();
        transaction & items == items
    }
}

impl std::fmt::Display for AssociationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = |items: &[Indicator]| {
            items
                .iter()
                .map(|i| i.name())
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "{{{}}} => {{{}}} (conf {:.3}, lift {:.3})",
            side(&self.antecedent),
            side(&self.consequent),
            self.confidence,
            self.lift
        )
    }
}

/// Lift, then confidence, then support, all descending; then antecedent and
/// consequent in vocabulary order.
pub fn compare_rules(a: &AssociationRule, b: &AssociationRule) -> Ordering {
    b.lift
        .total_cmp(&a.lift)
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| b.support.total_cmp(&a.support))
        .then_with(|| a.antecedent.cmp(&b.antecedent))
        .then_with(|| a.consequent.cmp(&b.consequent))
}

/// Every rule A ⇒ C with A ∪ C frequent, A and C non-empty and disjoint,
/// and confidence at least `min_confidence`.
pub fn generate_rules(
    itemsets: &[FrequentItemset],
    total: usize,
    min_confidence: f64,
) -> Vec<AssociationRule> {
    if total == 0 {
        return Vec::new();
    }
    let counts: HashMap<ItemBits, usize> = itemsets.iter().map(|i| (i.bits(), i.count)).collect();
    let support = |count: usize| count as f64 / total as f64;

    let mut rules = Vec::new();
    for itemset in itemsets.iter().filter(|i| i.items.len() >= 2) {
        let whole = itemset.bits();
        // Walk every proper non-empty submask of `whole`.
        let mut antecedent = (whole - 1) & whole;
        while antecedent != 0 {
            let consequent = whole & !antecedent;
            // Subsets of a frequent itemset are frequent, so both lookups hit.
            if let (Some(&a_count), Some(&c_count)) = (counts.get(&antecedent), counts.get(&consequent)) {
                let confidence = itemset.count as f64 / a_count as f64;
                if confidence >= min_confidence {
                    let rule_support = support(itemset.count);
                    let antecedent_support = support(a_count);
                    let consequent_support = support(c_count);
                    rules.push(AssociationRule {
                        antecedent: items_of(antecedent),
                        consequent: items_of(consequent),
                        support: rule_support,
                        confidence,
                        lift: confidence / consequent_support,
                        antecedent_support,
                        consequent_support,
                        leverage: rule_support - antecedent_support * consequent_support,
                        conviction: (confidence < 1.0)
                            .then(|| (1.0 - consequent_support) / (1.0 - confidence)),
                    });
                }
            }
            antecedent = (antecedent - 1) & whole;
        }
    }

    rules.sort_by(compare_rules);
    rules
}
