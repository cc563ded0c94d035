// src/batch.rs
//! Batch planning: greedy bin-packing of filtered items into size-bounded
//! groups, in item order (recency bias is preserved, never reordered). Size
//! estimation sits behind a one-method strategy so an exact tokenizer can be
//! swapped in without touching the planner.

use serde::Serialize;

use crate::filter::FilteredItem;

/// Size estimation strategy. Estimates must be conservative (round up) since
/// the budget guards a model context window.
pub trait SizeEstimate: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// Character-count proxy: roughly one unit per `chars_per_unit` characters,
/// rounded up. The default of 3 chars/token overestimates for English prose,
/// which is the safe direction.
#[derive(Debug, Clone, Copy)]
pub struct CharEstimator {
    pub chars_per_unit: usize,
}

impl Default for CharEstimator {
    fn default() -> Self {
        Self { chars_per_unit: 3 }
    }
}

impl SizeEstimate for CharEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_unit.max(1))
    }
}

/// Fixed overhead per item for the prompt scaffolding around it.
const ITEM_OVERHEAD: usize = 32;

#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub items: Vec<FilteredItem>,
    pub estimated_size: usize,
    pub index: usize,
}

fn item_size(item: &FilteredItem, estimator: &dyn SizeEstimate) -> usize {
    estimator.estimate(&item.item.title)
        + estimator.estimate(&item.item.url)
        + estimator.estimate(&item.item.body)
        + ITEM_OVERHEAD
}

/// Greedy planner: accumulate items while the running estimate fits the
/// budget; on overflow close the batch and start a new one. An item whose own
/// estimate exceeds the budget gets a batch of its own rather than being
/// truncated or dropped.
pub fn plan(
    items: Vec<FilteredItem>,
    budget: usize,
    estimator: &dyn SizeEstimate,
) -> Vec<Batch> {
    let mut batches: Vec<Batch> = Vec::new();
    let mut current: Vec<FilteredItem> = Vec::new();
    let mut current_size = 0usize;

    let mut close = |current: &mut Vec<FilteredItem>, current_size: &mut usize,
                     batches: &mut Vec<Batch>| {
        if current.is_empty() {
            return;
        }
        batches.push(Batch {
            items: std::mem::take(current),
            estimated_size: *current_size,
            index: batches.len(),
        });
        *current_size = 0;
    };

    for item in items {
        let size = item_size(&item, estimator);

        if size > budget {
            // Oversized item: ship it alone, never drop it silently.
            close(&mut current, &mut current_size, &mut batches);
            batches.push(Batch {
                items: vec![item],
                estimated_size: size,
                index: batches.len(),
            });
            continue;
        }

        if current_size + size > budget {
            close(&mut current, &mut current_size, &mut batches);
        }
        current_size += size;
        current.push(item);
    }
    close(&mut current, &mut current_size, &mut batches);

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::MatchReason;
    use crate::ingest::types::RawItem;

    fn filtered(title: &str, body_len: usize) -> FilteredItem {
        FilteredItem {
            item: RawItem {
                source: "S".into(),
                title: title.into(),
                url: "https://example.test/x".into(),
                published_at: 0,
                body: "x".repeat(body_len),
            },
            reason: MatchReason::MatchAll,
        }
    }

    /// Estimator with 1 unit per char, for readable expected sizes.
    struct Unit;
    impl SizeEstimate for Unit {
        fn estimate(&self, text: &str) -> usize {
            text.chars().count()
        }
    }

    #[test]
    fn char_estimator_rounds_up() {
        let est = CharEstimator::default();
        assert_eq!(est.estimate(""), 0);
        assert_eq!(est.estimate("ab"), 1);
        assert_eq!(est.estimate("abcd"), 2);
    }

    #[test]
    fn batches_respect_budget() {
        let items: Vec<_> = (0..6).map(|i| filtered(&format!("t{i}"), 100)).collect();
        let budget = 400;
        let plan = plan(items, budget, &Unit);
        assert!(plan.len() > 1);
        for b in &plan {
            assert!(b.estimated_size <= budget || b.items.len() == 1);
        }
    }

    #[test]
    fn oversized_item_gets_its_own_batch() {
        let items = vec![
            filtered("small", 50),
            filtered("huge", 10_000),
            filtered("small2", 50),
        ];
        let plan = plan(items, 500, &Unit);
        let huge = plan
            .iter()
            .find(|b| b.items.iter().any(|i| i.item.title == "huge"))
            .unwrap();
        assert_eq!(huge.items.len(), 1);
        assert!(huge.estimated_size > 500);
        // Nothing dropped.
        let total: usize = plan.iter().map(|b| b.items.len()).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn item_order_is_preserved_and_indices_sequential() {
        let items: Vec<_> = (0..10).map(|i| filtered(&format!("t{i}"), 200)).collect();
        let plan = plan(items, 600, &Unit);
        let flat: Vec<&str> = plan
            .iter()
            .flat_map(|b| b.items.iter().map(|i| i.item.title.as_str()))
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();
        assert_eq!(flat, expected.iter().map(String::as_str).collect::<Vec<_>>());
        for (i, b) in plan.iter().enumerate() {
            assert_eq!(b.index, i);
        }
    }

    #[test]
    fn empty_input_plans_nothing() {
        assert!(plan(Vec::new(), 100, &Unit).is_empty());
    }
}
