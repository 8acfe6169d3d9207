use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackpackError {
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("pong timeout")]
    PongTimeout,

    #[error("stale connection: {0}ms since last message")]
    StaleConnection(u64),

    #[error("snapshot fetch failed for {symbol}: {reason}")]
    SnapshotFetch { symbol: String, reason: String },

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    #[error("orderbook stream already started")]
    AlreadyStarted,

    #[error("orderbook background task exited before ready")]
    TaskExited,

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for BackpackError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        BackpackError::WebSocket(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackpackError>;
