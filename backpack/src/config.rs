use std::time::Duration;

use crate::error::{BackpackError, Result};
use crate::types::DepthGranularity;

pub const DEFAULT_REST_URL: &str = "https://api.backpack.exchange";
pub const DEFAULT_WS_URL: &str = "wss://ws.backpack.exchange";

/// Endpoints for the Backpack REST API and public stream.
#[derive(Debug, Clone)]
pub struct BackpackConfig {
    /// Base URL for REST requests (e.g. `https://api.backpack.exchange`).
    pub rest_url: String,
    /// WebSocket URL for public streams.
    pub ws_url: String,
}

impl Default for BackpackConfig {
    fn default() -> Self {
        Self {
            rest_url: DEFAULT_REST_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
        }
    }
}

impl BackpackConfig {
    /// Read `REST_API_URL` and `WS_URL` from the environment, falling back to
    /// the public production endpoints.
    pub fn from_env() -> Self {
        Self {
            rest_url: std::env::var("REST_API_URL").unwrap_or_else(|_| DEFAULT_REST_URL.into()),
            ws_url: std::env::var("WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.into()),
        }
    }
}

/// Tuning for a single [`OrderbookStream`](crate::OrderbookStream).
///
/// Use [`Default::default()`] and override what you need.
#[derive(Debug, Clone)]
pub struct OrderbookConfig {
    /// Depth stream granularity to subscribe to.
    pub granularity: DepthGranularity,
    /// Reconnect attempts after a disconnect before giving up.
    pub max_reconnect_attempts: u32,
    /// Base reconnect delay; attempt `n` waits `n * reconnect_delay`.
    pub reconnect_delay: Duration,
    /// Diffs held while the snapshot is in flight. Newer diffs are dropped
    /// once full.
    pub max_buffer_size: usize,
    /// Interval between client pings.
    pub ping_interval: Duration,
    /// How long to wait for a pong before failing the connection.
    pub pong_timeout: Duration,
    /// Fail the connection after this long without any inbound frame.
    pub stale_threshold: Duration,
}

impl Default for OrderbookConfig {
    fn default() -> Self {
        Self {
            granularity: DepthGranularity::Realtime,
            max_reconnect_attempts: 10,
            reconnect_delay: Duration::from_millis(1000),
            max_buffer_size: 1000,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            stale_threshold: Duration::from_secs(60),
        }
    }
}

impl OrderbookConfig {
    /// Reject settings the connection timers cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`BackpackError::InvalidConfig`] if `ping_interval`,
    /// `pong_timeout` or `stale_threshold` is zero.
    pub fn validate(&self) -> Result<()> {
        let timers = [
            ("ping_interval", self.ping_interval),
            ("pong_timeout", self.pong_timeout),
            ("stale_threshold", self.stale_threshold),
        ];
        for (name, value) in timers {
            if value.is_zero() {
                return Err(BackpackError::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}
