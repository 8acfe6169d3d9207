use clap::Parser;

use backpack::DepthGranularity;

/// backpack-depth: keep a local Backpack order book in sync and print it.
#[derive(Parser, Debug)]
#[command(name = "backpack-depth", version)]
pub struct Args {
    /// Market symbol (e.g. SOL_USDC)
    pub symbol: String,

    /// Depth stream granularity (realtime, 200ms, 600ms, 1000ms)
    #[arg(long, default_value = "realtime")]
    pub granularity: DepthGranularity,

    /// Price levels per side to include in JSON output
    #[arg(long, default_value = "5")]
    pub levels: usize,

    /// Also print average buy/sell execution price for this base quantity
    #[arg(long)]
    pub estimate_qty: Option<f64>,

    /// Output as JSON instead of TSV
    #[arg(long)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Reconnect attempts after a disconnect before giving up
    #[arg(long, default_value = "10")]
    pub max_reconnect_attempts: u32,

    /// Base reconnect delay in milliseconds (attempt n waits n times this)
    #[arg(long, default_value = "1000")]
    pub reconnect_delay_ms: u64,
}
