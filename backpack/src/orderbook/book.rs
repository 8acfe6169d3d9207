use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::types::{PositionSide, PriceLevel, Side};
use crate::ws::events::DepthUpdate;

use super::execution::{estimate_execution, ExecutionEstimate};
use super::pnl::{estimate_pnl, PnlEstimate};
use super::side::BookSide;
use super::view::SortedViewCache;

/// A diff whose leading id does not follow the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGap {
    /// `last_update_id + 1` at the time of the check.
    pub expected: u64,
    /// Leading id carried by the rejected diff.
    pub received: u64,
}

/// Notification payload for one applied diff.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateInfo {
    pub symbol: String,
    /// Venue event time.
    pub event_time: u64,
    /// Matching engine time.
    pub engine_time: u64,
    pub first_update_id: u64,
    pub last_update_id: u64,
}

/// What [`LocalOrderbook::ingest`] did with a diff.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingest {
    Applied(UpdateInfo),
    /// Held until the snapshot is loaded.
    Buffered,
    /// Not ready and the buffer is full; the diff was discarded.
    Dropped,
    /// Out of sequence; nothing was mutated.
    Gap(SequenceGap),
}

/// Outcome of replaying buffered diffs on top of a snapshot.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    pub applied: Vec<UpdateInfo>,
    /// Diffs already covered by the snapshot.
    pub skipped: usize,
}

/// Absolute and relative gap between best ask and best bid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Spread {
    pub absolute: f64,
    /// `absolute / best_bid * 100`.
    pub percentage: f64,
}

/// Point-in-time sorted view of the book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookSnapshot {
    pub symbol: String,
    /// Highest price first.
    pub bids: Vec<PriceLevel>,
    /// Lowest price first.
    pub asks: Vec<PriceLevel>,
    /// Unix epoch milliseconds when captured.
    pub timestamp: u64,
    pub last_update_id: Option<u64>,
}

/// Local replica of one market's order book.
///
/// Owns both sides, the sequence cursor, the readiness flag, the pre-ready
/// buffer and the sorted view cache. Every mutation goes through
/// [`ingest`](Self::ingest), [`apply`](Self::apply),
/// [`load_snapshot`](Self::load_snapshot) or [`reset`](Self::reset), each of
/// which invalidates the cache before returning. Callers sharing a book must
/// serialize access (the stream keeps it behind one mutex).
#[derive(Debug)]
pub struct LocalOrderbook {
    symbol: String,
    bids: BookSide,
    asks: BookSide,
    last_update_id: Option<u64>,
    ready: bool,
    buffer: Vec<DepthUpdate>,
    max_buffer_size: usize,
    dropped: u64,
    view: SortedViewCache,
}

impl LocalOrderbook {
    pub fn new(symbol: impl Into<String>, max_buffer_size: usize) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BookSide::new(false),
            asks: BookSide::new(true),
            last_update_id: None,
            ready: false,
            buffer: Vec::new(),
            max_buffer_size,
            dropped: 0,
            view: SortedViewCache::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn last_update_id(&self) -> Option<u64> {
        self.last_update_id
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    // -- mutation ------------------------------------------------------------

    /// Route a diff: apply it when ready, otherwise buffer it.
    pub fn ingest(&mut self, update: DepthUpdate) -> Ingest {
        if self.ready {
            return match self.apply(&update) {
                Ok(info) => Ingest::Applied(info),
                Err(gap) => Ingest::Gap(gap),
            };
        }

        if self.buffer.len() >= self.max_buffer_size {
            // Newest is dropped; the replay will then hit a gap and resync.
            self.dropped += 1;
            if self.dropped == 1 || self.dropped % 100 == 0 {
                warn!(
                    symbol = %self.symbol,
                    dropped = self.dropped,
                    capacity = self.max_buffer_size,
                    "update buffer full, dropping diff"
                );
            }
            return Ingest::Dropped;
        }

        self.buffer.push(update);
        Ingest::Buffered
    }

    /// Validate and apply one diff.
    ///
    /// If a cursor is set, the diff's leading id must be exactly
    /// `cursor + 1`; otherwise nothing is mutated and the gap is returned.
    /// On success the trailing id becomes the new cursor and the sorted
    /// views are invalidated.
    pub fn apply(&mut self, update: &DepthUpdate) -> Result<UpdateInfo, SequenceGap> {
        if let Some(last) = self.last_update_id {
            let expected = last + 1;
            if update.first_update_id != expected {
                warn!(
                    symbol = %self.symbol,
                    expected,
                    got = update.first_update_id,
                    "order book out of sync"
                );
                return Err(SequenceGap {
                    expected,
                    received: update.first_update_id,
                });
            }
        }

        self.asks.apply_changes(&update.asks);
        self.bids.apply_changes(&update.bids);
        self.last_update_id = Some(update.last_update_id);
        self.view.invalidate();

        Ok(UpdateInfo {
            symbol: update.symbol.clone(),
            event_time: update.event_time,
            engine_time: update.engine_time,
            first_update_id: update.first_update_id,
            last_update_id: update.last_update_id,
        })
    }

    /// Replace both sides with a snapshot and set the cursor to its id.
    /// Does not touch the buffer or readiness.
    pub fn load_snapshot(&mut self, bids: &[PriceLevel], asks: &[PriceLevel], last_update_id: u64) {
        self.bids.load(bids);
        self.asks.load(asks);
        self.last_update_id = Some(last_update_id);
        self.view.invalidate();

        info!(
            symbol = %self.symbol,
            update_id = last_update_id,
            bids = self.bids.len(),
            asks = self.asks.len(),
            "order book snapshot loaded"
        );
    }

    /// Apply buffered diffs on top of the loaded snapshot.
    ///
    /// Diffs whose trailing id is at or below the cursor are dropped, the
    /// rest are applied in ascending leading-id order. The buffer is always
    /// emptied. Stops at the first gap.
    pub fn replay_buffered(&mut self) -> Result<ReplayReport, SequenceGap> {
        let buffered = std::mem::take(&mut self.buffer);
        let dropped = std::mem::take(&mut self.dropped);
        if dropped > 0 {
            warn!(symbol = %self.symbol, dropped, "diffs were dropped while buffering");
        }

        let baseline = self.last_update_id.unwrap_or(0);
        let total = buffered.len();
        let mut pending: Vec<DepthUpdate> = buffered
            .into_iter()
            .filter(|u| u.last_update_id > baseline)
            .collect();
        pending.sort_by_key(|u| u.first_update_id);

        let mut report = ReplayReport {
            applied: Vec::with_capacity(pending.len()),
            skipped: total - pending.len(),
        };
        for update in &pending {
            report.applied.push(self.apply(update)?);
        }

        if total > 0 {
            info!(
                symbol = %self.symbol,
                applied = report.applied.len(),
                skipped = report.skipped,
                "replayed buffered diffs"
            );
        }
        Ok(report)
    }

    /// Start applying diffs directly.
    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    /// Drop all state: levels, cursor, readiness and buffer.
    pub fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_update_id = None;
        self.ready = false;
        self.buffer.clear();
        self.dropped = 0;
        self.view.invalidate();
        debug!(symbol = %self.symbol, "order book reset");
    }

    // -- queries -------------------------------------------------------------

    /// Bids, highest price first. Cached between mutations.
    pub fn sorted_bids(&mut self) -> &[PriceLevel] {
        self.view.bids(&self.bids)
    }

    /// Asks, lowest price first. Cached between mutations.
    pub fn sorted_asks(&mut self) -> &[PriceLevel] {
        self.view.asks(&self.asks)
    }

    /// Highest bid, read straight from the side without building a view.
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.best()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.best()
    }

    pub fn spread(&self) -> Option<Spread> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        let absolute = ask.price - bid.price;
        Some(Spread {
            absolute,
            percentage: absolute / bid.price * 100.0,
        })
    }

    pub fn mid_price(&self) -> Option<f64> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some((bid.price + ask.price) / 2.0)
    }

    /// Sorted view of both sides, each truncated to `depth` levels if given.
    pub fn snapshot(&mut self, depth: Option<usize>) -> BookSnapshot {
        let limit = depth.unwrap_or(usize::MAX);
        let bids = self.sorted_bids().iter().take(limit).copied().collect();
        let asks = self.sorted_asks().iter().take(limit).copied().collect();
        BookSnapshot {
            symbol: self.symbol.clone(),
            bids,
            asks,
            timestamp: epoch_millis(),
            last_update_id: self.last_update_id,
        }
    }

    /// Price a market order of `quantity` against the current book.
    pub fn average_execution_price(&mut self, quantity: f64, side: Side) -> Option<ExecutionEstimate> {
        let levels = match side {
            Side::Buy => self.sorted_asks(),
            Side::Sell => self.sorted_bids(),
        };
        estimate_execution(levels, quantity)
    }

    /// Value a position by walking the exit side of the book.
    pub fn estimate_pnl(
        &mut self,
        entry_price: f64,
        quantity: f64,
        side: PositionSide,
    ) -> Option<PnlEstimate> {
        let exit = self.average_execution_price(quantity, side.exit_side());
        estimate_pnl(entry_price, quantity, side, exit)
    }

    /// PnL of closing the position now, or `None` if the book cannot
    /// absorb the full quantity.
    pub fn calculate_pnl(&mut self, entry_price: f64, quantity: f64, side: PositionSide) -> Option<f64> {
        self.estimate_pnl(entry_price, quantity, side).map(|e| e.pnl)
    }
}

/// Current Unix epoch in milliseconds.
pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
