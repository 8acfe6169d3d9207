use crate::types::PriceLevel;

use super::side::BookSide;

/// Lazily materialized best-first projections of both sides.
///
/// Each projection is rebuilt from its [`BookSide`] on the first read after
/// [`invalidate`](Self::invalidate) and reused until the next one. The owner
/// must invalidate in the same critical section that mutates the sides.
#[derive(Debug, Default)]
pub struct SortedViewCache {
    bids: Option<Vec<PriceLevel>>,
    asks: Option<Vec<PriceLevel>>,
}

impl SortedViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark both projections stale.
    pub fn invalidate(&mut self) {
        self.bids = None;
        self.asks = None;
    }

    /// Bids, highest price first.
    pub fn bids(&mut self, side: &BookSide) -> &[PriceLevel] {
        self.bids.get_or_insert_with(|| side.best_first())
    }

    /// Asks, lowest price first.
    pub fn asks(&mut self, side: &BookSide) -> &[PriceLevel] {
        self.asks.get_or_insert_with(|| side.best_first())
    }
}
