//! Average execution price of a hypothetical market order.

use serde::Serialize;

use crate::types::PriceLevel;

/// Portion of the order filled at one price level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExecutionLevel {
    pub price: f64,
    pub quantity: f64,
    /// `price * quantity`.
    pub notional: f64,
}

/// Result of walking the book for a given quantity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionEstimate {
    /// Volume-weighted price over the executed quantity only.
    pub average_price: f64,
    pub total_notional: f64,
    pub executed_quantity: f64,
    /// Quantity the book could not absorb; `0.0` when fully filled.
    pub missing_quantity: f64,
    /// Levels consumed, best first.
    pub levels: Vec<ExecutionLevel>,
    pub partial_fill: bool,
}

/// Walk `levels` (best first) taking `min(remaining, level quantity)` at
/// each price until `quantity` is filled or the levels run out.
///
/// Returns `None` for a non-positive (or NaN) quantity or an empty side.
pub fn estimate_execution(levels: &[PriceLevel], quantity: f64) -> Option<ExecutionEstimate> {
    if quantity.is_nan() || quantity <= 0.0 || levels.is_empty() {
        return None;
    }

    let mut remaining = quantity;
    let mut total_notional = 0.0;
    let mut consumed = Vec::new();

    for level in levels {
        if remaining <= 0.0 {
            break;
        }
        let take = remaining.min(level.quantity);
        let notional = take * level.price;

        total_notional += notional;
        remaining -= take;
        consumed.push(ExecutionLevel {
            price: level.price,
            quantity: take,
            notional,
        });
    }

    let partial_fill = remaining > 0.0;
    let executed_quantity = if partial_fill {
        quantity - remaining
    } else {
        quantity
    };

    Some(ExecutionEstimate {
        average_price: total_notional / executed_quantity,
        total_notional,
        executed_quantity,
        missing_quantity: if partial_fill { remaining } else { 0.0 },
        levels: consumed,
        partial_fill,
    })
}
