pub mod events;

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::OrderbookConfig;
use crate::error::{BackpackError, Result};
use crate::types::DepthGranularity;

use events::{parse_depth_message, DepthUpdate, SubscribeRequest};

const STALE_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One live depth stream connection for a single symbol.
///
/// Owns the socket exclusively. Dropping or [`close`](Self::close)-ing it
/// ends delivery: no diff read through this value can surface afterwards.
pub struct DepthConnection {
    symbol: String,
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    ping_interval: Interval,
    stale_interval: Interval,
    pong_deadline: Option<Instant>,
    last_message_time: Instant,
    pong_timeout: Duration,
    stale_threshold: Duration,
}

impl DepthConnection {
    /// Connect to `url` and subscribe to the depth stream of `symbol`.
    ///
    /// # Errors
    ///
    /// Returns [`BackpackError::InvalidConfig`] for zero heartbeat timers,
    /// or [`BackpackError::WebSocket`] if the handshake or the subscribe
    /// send fails.
    pub async fn connect(
        url: &str,
        symbol: &str,
        granularity: DepthGranularity,
        config: &OrderbookConfig,
    ) -> Result<Self> {
        config.validate()?;
        debug!(url = %url, "connecting depth stream");
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, stream) = ws_stream.split();

        let request = SubscribeRequest::depth(symbol, granularity);
        let payload = serde_json::to_string(&request)?;
        sink.send(Message::Text(payload)).await?;

        info!(symbol = %symbol, stream = %request.params[0], "depth stream connected");

        let mut ping_interval = time::interval(config.ping_interval);
        ping_interval.tick().await; // consume the immediate first tick
        let mut stale_interval = time::interval(STALE_CHECK_INTERVAL.min(config.stale_threshold));
        stale_interval.tick().await;

        Ok(Self {
            symbol: symbol.to_string(),
            sink,
            stream,
            ping_interval,
            stale_interval,
            pong_deadline: None,
            last_message_time: Instant::now(),
            pong_timeout: config.pong_timeout,
            stale_threshold: config.stale_threshold,
        })
    }

    /// Wait for the next depth diff for this symbol.
    ///
    /// Acks, other streams and malformed frames are skipped (malformed ones
    /// are logged). Heartbeats are handled internally. Cancel-safe between
    /// frames.
    ///
    /// # Errors
    ///
    /// Any error means the connection is unusable: close frame, read error,
    /// end of stream, pong timeout or staleness.
    pub async fn next_update(&mut self) -> Result<DepthUpdate> {
        loop {
            let pong_timeout_fut = match self.pong_deadline {
                Some(deadline) => time::sleep_until(deadline),
                None => time::sleep_until(Instant::now() + Duration::from_secs(86400)),
            };
            let pong_active = self.pong_deadline.is_some();

            tokio::select! {
                msg = self.stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.last_message_time = Instant::now();
                            match parse_depth_message(&text, &self.symbol) {
                                Ok(Some(update)) => return Ok(update),
                                Ok(None) => debug!(message = %text, "skipping non-depth message"),
                                Err(e) => warn!(error = %e, "discarding malformed depth message"),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.last_message_time = Instant::now();
                            self.sink.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.last_message_time = Instant::now();
                            self.pong_deadline = None;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!(symbol = %self.symbol, "received close frame");
                            return Err(BackpackError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            self.last_message_time = Instant::now();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(BackpackError::ConnectionClosed),
                    }
                }
                _ = self.ping_interval.tick() => {
                    self.sink.send(Message::Ping(vec![])).await?;
                    self.pong_deadline = Some(Instant::now() + self.pong_timeout);
                }
                _ = self.stale_interval.tick() => {
                    let elapsed = self.last_message_time.elapsed();
                    if elapsed > self.stale_threshold {
                        let ms = elapsed.as_millis() as u64;
                        warn!(symbol = %self.symbol, elapsed_ms = ms, "depth stream stale");
                        return Err(BackpackError::StaleConnection(ms));
                    }
                }
                _ = pong_timeout_fut, if pong_active => {
                    warn!(symbol = %self.symbol, "pong timeout");
                    return Err(BackpackError::PongTimeout);
                }
            }
        }
    }

    /// Send a close frame (best effort, bounded) and drop the socket.
    pub async fn close(mut self) {
        let _ = time::timeout(CLOSE_TIMEOUT, self.sink.send(Message::Close(None))).await;
        debug!(symbol = %self.symbol, "depth stream closed");
    }
}
