//! Level-wise (Apriori) frequent itemset counting over order baskets.

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct FrequentItemset {
    pub items: Vec<Uuid>,
    /// Number of baskets containing every item.
    pub frequency: usize,
    /// `frequency / total baskets`.
    pub support: f64,
}

/// Returns itemsets of size `2..=max_size` whose support is at least
/// `min_support`, most frequent first.
pub fn frequent_itemsets(
    baskets: &[Vec<Uuid>],
    min_support: f64,
    max_size: usize,
) -> Vec<FrequentItemset> {
    let baskets: Vec<Vec<Uuid>> = baskets
        .iter()
        .map(|basket| {
            let set: BTreeSet<Uuid> = basket.iter().copied().collect();
            set.into_iter().collect()
        })
        .filter(|basket: &Vec<Uuid>| !basket.is_empty())
        .collect();
    let total = baskets.len();
    if total == 0 || max_size < 2 {
        return Vec::new();
    }
    let min_count = min_count(min_support, total);

    let mut singles: BTreeMap<Vec<Uuid>, usize> = BTreeMap::new();
    for basket in &baskets {
        for item in basket {
            *singles.entry(vec![*item]).or_default() += 1;
        }
    }
    let mut level: BTreeMap<Vec<Uuid>, usize> = singles
        .into_iter()
        .filter(|(_, count)| *count >= min_count)
        .collect();

    let mut found = Vec::new();
    for size in 2..=max_size {
        let candidates = join_candidates(&level, size);
        if candidates.is_empty() {
            break;
        }
        let mut counts: BTreeMap<Vec<Uuid>, usize> = BTreeMap::new();
        for basket in baskets.iter().filter(|b| b.len() >= size) {
            for candidate in &candidates {
                if candidate.iter().all(|item| basket.binary_search(item).is_ok()) {
                    *counts.entry(candidate.clone()).or_default() += 1;
                }
            }
        }
        level = counts
            .into_iter()
            .filter(|(_, count)| *count >= min_count)
            .collect();
        found.extend(level.iter().map(|(items, count)| FrequentItemset {
            items: items.clone(),
            frequency: *count,
            support: *count as f64 / total as f64,
        }));
    }

    found.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| b.items.len().cmp(&a.items.len()))
            .then_with(|| a.items.cmp(&b.items))
    });
    found
}

/// Smallest basket count whose support reaches `min_support`. Products like
/// `0.07 * 100` come out as `7.000000000000001`, so the scaled value is
/// nudged down before rounding up.
fn min_count(min_support: f64, total: usize) -> usize {
    const TOLERANCE: f64 = 1e-9;
    let scaled = min_support.max(0.0) * total as f64;
    ((scaled - TOLERANCE).ceil() as usize).max(1)
}

/// Join sorted `(size - 1)` sets sharing a prefix, then drop candidates with
/// an infrequent subset.
fn join_candidates(level: &BTreeMap<Vec<Uuid>, usize>, size: usize) -> Vec<Vec<Uuid>> {
    let keys: Vec<&Vec<Uuid>> = level.keys().collect();
    let mut candidates = Vec::new();
    for (i, left) in keys.iter().enumerate() {
        for right in keys.iter().skip(i + 1) {
            if left[..size - 2] != right[..size - 2] {
                break;
            }
            let mut candidate = (*left).clone();
            candidate.push(right[size - 2]);
            let all_subsets_frequent = (0..candidate.len()).all(|skip| {
                let subset: Vec<Uuid> = candidate
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| *idx != skip)
                    .map(|(_, item)| *item)
                    .collect();
                level.contains_key(&subset)
            });
            if all_subsets_frequent {
                candidates.push(candidate);
            }
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (Uuid, Uuid, Uuid, Uuid) {
        (
            Uuid::from_u128(1),
            Uuid::from_u128(2),
            Uuid::from_u128(3),
            Uuid::from_u128(4),
        )
    }

    #[test]
    fn finds_pairs_above_support() {
        let (a, b, c, d) = ids();
        let baskets = vec![vec![a, b], vec![a, b, c], vec![a, c], vec![d]];
        let sets = frequent_itemsets(&baskets, 0.5, 2);
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].items, vec![a, b]);
        assert_eq!(sets[0].frequency, 2);
        assert!((sets[0].support - 0.5).abs() < f64::EPSILON);
        assert_eq!(sets[1].items, vec![a, c]);
    }

    #[test]
    fn grows_to_triples_when_allowed() {
        let (a, b, c, _) = ids();
        let baskets = vec![vec![a, b, c], vec![c, b, a], vec![a, b]];
        let sets = frequent_itemsets(&baskets, 0.6, 3);
        assert!(sets.iter().any(|s| s.items == vec![a, b, c] && s.frequency == 2));
        assert_eq!(sets[0].items, vec![a, b]);
        assert_eq!(sets[0].frequency, 3);
    }

    #[test]
    fn duplicate_lines_in_a_basket_count_once() {
        let (a, b, _, _) = ids();
        let baskets = vec![vec![a, a, b]];
        let sets = frequent_itemsets(&baskets, 1.0, 2);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].frequency, 1);
    }

    #[test]
    fn support_equal_to_threshold_is_kept() {
        let (a, b, c, _) = ids();
        let mut baskets = vec![vec![a, b]; 7];
        baskets.extend(std::iter::repeat_n(vec![c], 93));

        let sets = frequent_itemsets(&baskets, 0.07, 2);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].items, vec![a, b]);
        assert_eq!(sets[0].frequency, 7);

        assert_eq!(min_count(0.07, 100), 7);
        assert_eq!(min_count(0.071, 100), 8);
        assert_eq!(min_count(0.0, 100), 1);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(frequent_itemsets(&[], 0.1, 3).is_empty());
        let (a, b, _, _) = ids();
        assert!(frequent_itemsets(&[vec![a, b]], 0.1, 1).is_empty());
    }
}
