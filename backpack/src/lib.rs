pub mod backoff;
pub mod config;
pub mod error;
pub mod orderbook;
pub mod rest;
pub mod types;
pub mod ws;

// ---- Top-level re-exports for ergonomic usage ----

pub use config::{BackpackConfig, OrderbookConfig};
pub use error::{BackpackError, Result};

// REST client
pub use rest::BackpackHttpClient;

// Core enums + depth types
pub use types::{DepthGranularity, DepthSnapshot, PositionSide, PriceLevel, Side};

// Orderbook (live stream)
pub use orderbook::{
    BookEvent, BookFault, BookSnapshot, ExecutionEstimate, ExecutionLevel, FaultKind,
    LocalOrderbook, OrderbookStream, PnlEstimate, Spread, SyncState, UpdateInfo,
};

// WebSocket events
pub use ws::events::DepthUpdate;
