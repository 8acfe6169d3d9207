use tracing::{debug, info};

use crate::error::{BackpackError, Result};
use crate::rest::BackpackHttpClient;
use crate::types::{parse_levels, PriceLevel};

/// Baseline state fetched over REST.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSnapshot {
    /// Positive-quantity bid levels, in payload order.
    pub bids: Vec<PriceLevel>,
    /// Positive-quantity ask levels, in payload order.
    pub asks: Vec<PriceLevel>,
    pub last_update_id: u64,
}

/// Fetch the full depth for `symbol` and its baseline sequence id.
///
/// Zero-quantity levels are dropped. Not retried here.
///
/// # Errors
///
/// Any failure (non-success status, transport error, malformed body or
/// unparseable numbers) is returned as [`BackpackError::SnapshotFetch`].
pub async fn fetch_snapshot(http: &BackpackHttpClient, symbol: &str) -> Result<LoadedSnapshot> {
    debug!(symbol = %symbol, base_url = %http.base_url(), "fetching order book snapshot");

    let into_fetch_error = |e: BackpackError| BackpackError::SnapshotFetch {
        symbol: symbol.to_string(),
        reason: e.to_string(),
    };

    let depth = http.get_depth(symbol).await.map_err(into_fetch_error)?;
    let mut bids = parse_levels(&depth.bids).map_err(into_fetch_error)?;
    let mut asks = parse_levels(&depth.asks).map_err(into_fetch_error)?;
    bids.retain(|l| l.quantity > 0.0);
    asks.retain(|l| l.quantity > 0.0);

    info!(
        symbol = %symbol,
        update_id = depth.last_update_id,
        bids = bids.len(),
        asks = asks.len(),
        "order book snapshot fetched"
    );

    Ok(LoadedSnapshot {
        bids,
        asks,
        last_update_id: depth.last_update_id,
    })
}
