//! Local order book replica: price ladders, sync machinery and analytics.

pub mod book;
pub mod execution;
pub mod pnl;
pub mod side;
pub mod snapshot;
pub mod stream;
pub mod view;

pub use book::{BookSnapshot, Ingest, LocalOrderbook, ReplayReport, SequenceGap, Spread, UpdateInfo};
pub use execution::{estimate_execution, ExecutionEstimate, ExecutionLevel};
pub use pnl::{estimate_pnl, PnlEstimate};
pub use side::BookSide;
pub use snapshot::{fetch_snapshot, LoadedSnapshot};
pub use stream::{BookEvent, BookFault, FaultKind, OrderbookStream, SyncState};
