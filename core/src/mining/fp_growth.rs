//! Prefix-tree compression with recursive conditional pattern bases.
//!
//! The tree is an arena: nodes refer to each other by index, and the header
//! table keeps every node of an item so its conditional base can be walked
//! upward without revisiting the whole tree.

use super::{into_itemsets, meets_support, FrequentItemset, FrequentPatternMiner, ItemBits, TransactionSet};
use crate::indicators::Indicator;

pub struct FpGrowth;

impl FrequentPatternMiner for FpGrowth {
    fn name(&self) -> &'static str {
        "fp-growth"
    }

    fn mine(&self, transactions: &TransactionSet, min_support: f64) -> Vec<FrequentItemset> {
        let total = transactions.len();
        let paths: Vec<(ItemBits, usize)> = transactions.iter().map(|t| (t, 1)).collect();
        let tree = FpTree::build(&paths, total, min_support);

        let mut found = Vec::new();
        grow(&tree, 0, total, min_support, &mut found);
        into_itemsets(found, total)
    }
}

const ROOT: usize = 0;

#[derive(Debug)]
struct FpNode {
    item: Option<usize>,
    count: usize,
    parent: Option<usize>,
    children: Vec<usize>,
}

#[derive(Debug)]
struct FpTree {
    nodes: Vec<FpNode>,
    /// Frequent items, most frequent first; ties by vocabulary index.
    order: Vec<usize>,
    /// Per item index: every node carrying that item.
    header: Vec<Vec<usize>>,
}

impl FpTree {
    /// Build from weighted item paths, keeping only items that are frequent
    /// within these paths.
    fn build(paths: &[(ItemBits, usize)], total: usize, min_support: f64) -> Self {
        let mut counts = [0usize; Indicator::COUNT];
        for &(bits, weight) in paths {
            for (index, count) in counts.iter_mut().enumerate() {
                if bits & (1 << index) != 0 {
                    *count += weight;
                }
            }
        }

        let mut order: Vec<usize> = (0..Indicator::COUNT)
            .filter(|&i| meets_support(counts[i], total, min_support))
            .collect();
        order.sort_by(|&a, &b| counts[b].cmp(&counts[a]).then(a.cmp(&b)));

        let mut tree = Self {
            nodes: vec![FpNode {
                item: None,
                count: 0,
                parent: None,
                children: Vec::new(),
            }],
            order,
            header: vec![Vec::new(); Indicator::COUNT],
        };

        for &(bits, weight) in paths {
            let items: Vec<usize> = tree
                .order
                .iter()
                .copied()
                .filter(|&i| bits & (1 << i) != 0)
                .collect();
            tree.insert(&items, weight);
        }
        tree
    }

    fn insert(&mut self, items: &[usize], weight: usize) {
        let mut current = ROOT;
        for &item in items {
            let existing = self.nodes[current]
                .children
                .iter()
                .copied()
                .find(|&child| self.nodes[child].item == Some(item));
            current = match existing {
                Some(child) => child,
                None => {
                    let id = self.nodes.len();
                    self.nodes.push(FpNode {
                        item: Some(item),
                        count: 0,
                        parent: Some(current),
                        children: Vec::new(),
                    });
                    self.nodes[current].children.push(id);
                    self.header[item].push(id);
                    id
                }
            };
            self.nodes[current].count += weight;
        }
    }

    fn support_count(&self, item: usize) -> usize {
        self.header[item].iter().map(|&n| self.nodes[n].count).sum()
    }

    /// Prefix paths leading to each node of `item`, weighted by that node's count.
    fn conditional_base(&self, item: usize) -> Vec<(ItemBits, usize)> {
        self.header[item]
            .iter()
            .filter_map(|&node| {
                let mut bits: ItemBits = 0;
                let mut cursor = self.nodes[node].parent;
                while let Some(id) = cursor {
                    if let Some(ancestor) = self.nodes[id].item {
                        bits |= 1 << ancestor;
                    }
                    cursor = self.nodes[id].parent;
                }
                (bits != 0).then_some((bits, self.nodes[node].count))
            })
            .collect()
    }
}

fn grow(
    tree: &FpTree,
    suffix: ItemBits,
    total: usize,
    min_support: f64,
    found: &mut Vec<(ItemBits, usize)>,
) {
    // Least frequent first, as in the classic formulation.
    for &item in tree.order.iter().rev() {
        let itemset = suffix | (1 << item);
        found.push((itemset, tree.support_count(item)));

        let base = tree.conditional_base(item);
        if base.is_empty() {
            continue;
        }
        let conditional = FpTree::build(&base, total, min_support);
        if !conditional.order.is_empty() {
            grow(&conditional, itemset, total, min_support, found);
        }
    }
}
