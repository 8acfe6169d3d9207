//! Mark-to-book PnL of an open position.

use serde::Serialize;

use crate::types::PositionSide;

use super::execution::ExecutionEstimate;

/// PnL of closing a position at the book's current execution price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PnlEstimate {
    pub pnl: f64,
    /// `pnl` relative to entry notional, in percent.
    pub pnl_percentage: f64,
    pub entry_price: f64,
    /// Average price of the exit walk.
    pub exit_price: f64,
    pub quantity: f64,
    pub side: PositionSide,
    pub exit: ExecutionEstimate,
}

/// Value a position against an exit walk of the book.
///
/// `exit` must be the estimate for `quantity` on `side.exit_side()`.
/// Returns `None` when there is no estimate or it is a partial fill: a
/// position that cannot be closed in full at this size is not valued.
/// Non-positive entry price or quantity also yield `None`.
pub fn estimate_pnl(
    entry_price: f64,
    quantity: f64,
    side: PositionSide,
    exit: Option<ExecutionEstimate>,
) -> Option<PnlEstimate> {
    if quantity.is_nan() || quantity <= 0.0 || entry_price.is_nan() || entry_price <= 0.0 {
        return None;
    }
    let exit = exit.filter(|e| !e.partial_fill)?;

    let exit_price = exit.average_price;
    let pnl = match side {
        PositionSide::Long => (exit_price - entry_price) * quantity,
        PositionSide::Short => (entry_price - exit_price) * quantity,
    };

    Some(PnlEstimate {
        pnl,
        pnl_percentage: pnl / (entry_price * quantity) * 100.0,
        entry_price,
        exit_price,
        quantity,
        side,
        exit,
    })
}
