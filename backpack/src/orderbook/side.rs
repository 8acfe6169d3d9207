use std::collections::BTreeMap;

use ordered_float::OrderedFloat;

use crate::types::PriceLevel;

/// One side of the book: price -> quantity.
///
/// Backed by a `BTreeMap` so point updates and removals are O(log n) and
/// best-first iteration needs no separate sort. A level with zero quantity
/// is never stored.
#[derive(Clone, Debug)]
pub struct BookSide {
    levels: BTreeMap<OrderedFloat<f64>, f64>,
    /// `true` for the ask side, `false` for the bid side.
    /// Determines which end is "best".
    is_ask: bool,
}

impl BookSide {
    /// Create a new empty side.
    ///
    /// # Arguments
    ///
    /// * `is_ask` - `true` for the ask side (best = lowest price),
    ///   `false` for the bid side (best = highest price).
    pub fn new(is_ask: bool) -> Self {
        Self {
            levels: BTreeMap::new(),
            is_ask,
        }
    }

    /// Apply incremental changes. A quantity of exactly `0.0` removes the
    /// level (a no-op if absent); anything else inserts or overwrites it.
    pub fn apply_changes(&mut self, changes: &[PriceLevel]) {
        for change in changes {
            let key = OrderedFloat(change.price);
            if change.quantity == 0.0 {
                self.levels.remove(&key);
            } else {
                self.levels.insert(key, change.quantity);
            }
        }
    }

    /// Replace all levels with a snapshot. Non-positive quantities are
    /// skipped.
    pub fn load(&mut self, levels: &[PriceLevel]) {
        self.levels.clear();
        for level in levels {
            if level.quantity > 0.0 {
                self.levels.insert(OrderedFloat(level.price), level.quantity);
            }
        }
    }

    /// Top-of-book level, or `None` if the side is empty.
    ///
    /// - **Asks**: lowest price (first key).
    /// - **Bids**: highest price (last key).
    pub fn best(&self) -> Option<PriceLevel> {
        let entry = if self.is_ask {
            self.levels.iter().next()
        } else {
            self.levels.iter().next_back()
        };
        entry.map(|(p, q)| PriceLevel::new(p.0, *q))
    }

    /// All levels ordered best first: asks ascending, bids descending.
    pub fn best_first(&self) -> Vec<PriceLevel> {
        let to_level = |(p, q): (&OrderedFloat<f64>, &f64)| PriceLevel::new(p.0, *q);
        if self.is_ask {
            self.levels.iter().map(to_level).collect()
        } else {
            self.levels.iter().rev().map(to_level).collect()
        }
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }

    /// Number of price levels on this side.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}
