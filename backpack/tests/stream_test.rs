//! End-to-end sync tests: a local WebSocket venue plus a mocked REST depth
//! endpoint drive a real `OrderbookStream`.

use std::time::Duration;

use backpack::{
    BackpackConfig, BackpackError, BookEvent, FaultKind, OrderbookConfig, OrderbookStream,
    PriceLevel, SyncState,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SYMBOL: &str = "SOL_USDC";
const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Mock venue
// ---------------------------------------------------------------------------

/// One accepted client connection.
struct VenueConn {
    subscribe: String,
    tx: mpsc::UnboundedSender<Message>,
    /// Frames the client sent after subscribing (only when the venue reads).
    inbound: mpsc::UnboundedReceiver<Message>,
}

impl VenueConn {
    fn send(&self, msg: Message) {
        self.tx.send(msg).unwrap();
    }

    async fn recv(&mut self) -> Message {
        timeout(WAIT, self.inbound.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("connection gone")
    }
}

/// Accepts WebSocket clients and hands each one to the test once it has
/// sent its subscribe frame. Dropping a `VenueConn` closes that socket.
struct MockVenue {
    url: String,
    conns: mpsc::UnboundedReceiver<VenueConn>,
}

impl MockVenue {
    async fn start() -> Self {
        Self::start_with(true).await
    }

    /// With `read_client` unset the venue never reads after the subscribe
    /// frame, so client pings go unanswered.
    async fn start_with(read_client: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (conn_tx, conns) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let conn_tx = conn_tx.clone();
                tokio::spawn(async move {
                    let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                    let (mut sink, mut stream) = ws.split();

                    let subscribe = match stream.next().await {
                        Some(Ok(Message::Text(text))) => text,
                        _ => return,
                    };
                    let (tx, mut rx) = mpsc::unbounded_channel();
                    let (in_tx, inbound) = mpsc::unbounded_channel();
                    if conn_tx.send(VenueConn { subscribe, tx, inbound }).is_err() {
                        return;
                    }

                    loop {
                        tokio::select! {
                            out = rx.recv() => match out {
                                Some(msg) => {
                                    if sink.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                                None => {
                                    let _ = sink.send(Message::Close(None)).await;
                                    break;
                                }
                            },
                            frame = stream.next(), if read_client => match frame {
                                Some(Ok(msg)) => {
                                    let _ = in_tx.send(msg);
                                }
                                _ => break,
                            },
                        }
                    }
                });
            }
        });

        Self { url, conns }
    }

    async fn next_conn(&mut self) -> VenueConn {
        timeout(WAIT, self.conns.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("venue stopped")
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn depth_diff(first: u64, last: u64, bids: &[[&str; 2]], asks: &[[&str; 2]]) -> Message {
    let body = json!({
        "stream": format!("depth.{SYMBOL}"),
        "data": {
            "e": "depth",
            "E": 1_700_000_000_000_000u64,
            "s": SYMBOL,
            "a": asks,
            "b": bids,
            "U": first,
            "u": last,
            "T": 1_700_000_000_000_000u64
        }
    });
    Message::Text(body.to_string())
}

fn depth_body() -> serde_json::Value {
    json!({
        "asks": [["101", "1"], ["102", "3"]],
        "bids": [["99", "1"], ["98", "2"]],
        "lastUpdateId": "100",
        "timestamp": 1_700_000_000_000u64
    })
}

/// Depth endpoint answering after `delay`, so diffs sent right after
/// subscribe are buffered first.
async fn mock_depth(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/depth"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(depth_body())
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

fn test_config() -> OrderbookConfig {
    OrderbookConfig {
        max_reconnect_attempts: 3,
        reconnect_delay: Duration::from_millis(10),
        ..OrderbookConfig::default()
    }
}

fn new_stream(rest: &MockServer, venue: &MockVenue, config: OrderbookConfig) -> OrderbookStream {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let endpoints = BackpackConfig {
        rest_url: rest.uri(),
        ws_url: venue.url.clone(),
    };
    OrderbookStream::new(SYMBOL, &endpoints, config)
}

async fn next_event(rx: &mut broadcast::Receiver<BookEvent>) -> BookEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Skip events until `pred` matches.
async fn wait_event(
    rx: &mut broadcast::Receiver<BookEvent>,
    pred: impl Fn(&BookEvent) -> bool,
) -> BookEvent {
    loop {
        let ev = next_event(rx).await;
        if pred(&ev) {
            return ev;
        }
    }
}

fn is_ready(ev: &BookEvent) -> bool {
    matches!(ev, BookEvent::Ready(_))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_start_buffers_replays_and_applies_live_diffs() {
    let rest = mock_depth(Duration::from_millis(300)).await;
    let mut venue = MockVenue::start().await;
    let mut stream = new_stream(&rest, &venue, test_config());
    let mut events = stream.subscribe_events();

    let (started, conn) = tokio::join!(stream.start(), async {
        let conn = venue.next_conn().await;
        // Both arrive before the snapshot: the first is already covered by
        // it, the second continues it.
        conn.send(depth_diff(95, 100, &[["99", "7"]], &[]));
        conn.send(depth_diff(101, 101, &[["99", "5"]], &[]));
        conn
    });
    started.unwrap();

    let sub: serde_json::Value = serde_json::from_str(&conn.subscribe).unwrap();
    assert_eq!(sub["method"], "SUBSCRIBE");
    assert_eq!(sub["params"][0], format!("depth.{SYMBOL}"));

    match next_event(&mut events).await {
        BookEvent::Update(info) => {
            assert_eq!(info.first_update_id, 101);
            assert_eq!(info.last_update_id, 101);
        }
        other => panic!("expected replayed update, got {other:?}"),
    }
    match next_event(&mut events).await {
        BookEvent::Ready(book) => {
            assert_eq!(book.last_update_id, Some(101));
            assert_eq!(book.bids[0], PriceLevel::new(99.0, 5.0));
        }
        other => panic!("expected ready, got {other:?}"),
    }
    assert!(stream.is_ready());
    assert_eq!(stream.state(), SyncState::Ready);

    // Live: remove the best ask.
    conn.send(depth_diff(102, 103, &[], &[["101", "0"]]));
    match next_event(&mut events).await {
        BookEvent::Update(info) => assert_eq!(info.last_update_id, 103),
        other => panic!("expected update, got {other:?}"),
    }

    assert_eq!(stream.get_best_ask(), Some(PriceLevel::new(102.0, 3.0)));
    assert_eq!(stream.get_best_bid(), Some(PriceLevel::new(99.0, 5.0)));
    let spread = stream.get_spread().unwrap();
    assert!((spread.absolute - 3.0).abs() < 1e-9);
    assert!((stream.get_mid_price().unwrap() - 100.5).abs() < 1e-9);

    let book = stream.get_order_book(Some(1));
    assert_eq!(book.bids.len(), 1);
    assert_eq!(book.asks.len(), 1);
    assert_eq!(book.last_update_id, Some(103));

    assert!(matches!(stream.start().await, Err(BackpackError::AlreadyStarted)));

    stream.shutdown().await;
    drop(conn);
}

#[tokio::test]
async fn test_sequence_gap_triggers_full_resync() {
    let rest = mock_depth(Duration::from_millis(50)).await;
    let mut venue = MockVenue::start().await;
    let mut stream = new_stream(&rest, &venue, test_config());
    let mut events = stream.subscribe_events();

    let (started, first) = tokio::join!(stream.start(), venue.next_conn());
    started.unwrap();
    wait_event(&mut events, is_ready).await;

    first.send(depth_diff(101, 102, &[["97", "4"]], &[]));
    first.send(depth_diff(110, 111, &[["96", "4"]], &[]));

    match wait_event(&mut events, |e| matches!(e, BookEvent::Error(_))).await {
        BookEvent::Error(fault) => assert_eq!(fault.kind, FaultKind::SequenceGap),
        _ => unreachable!(),
    }

    // A fresh connection and a fresh snapshot rebuild the book.
    let _second = venue.next_conn().await;
    match wait_event(&mut events, is_ready).await {
        BookEvent::Ready(book) => {
            assert_eq!(book.last_update_id, Some(100));
            assert!(book.bids.iter().all(|l| l.price != 97.0 && l.price != 96.0));
        }
        _ => unreachable!(),
    }
    assert_eq!(rest.received_requests().await.unwrap().len(), 2);

    stream.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_reconnects_and_resyncs() {
    let rest = mock_depth(Duration::from_millis(50)).await;
    let mut venue = MockVenue::start().await;
    let mut stream = new_stream(&rest, &venue, test_config());
    let mut events = stream.subscribe_events();
    let mut states = stream.subscribe_state();

    let (started, first) = tokio::join!(stream.start(), venue.next_conn());
    started.unwrap();
    wait_event(&mut events, is_ready).await;

    drop(first);

    match wait_event(&mut events, |e| matches!(e, BookEvent::Error(_))).await {
        BookEvent::Error(fault) => assert_eq!(fault.kind, FaultKind::Transport),
        _ => unreachable!(),
    }
    let _second = venue.next_conn().await;
    wait_event(&mut events, is_ready).await;

    timeout(WAIT, states.wait_for(|s| *s == SyncState::Ready))
        .await
        .unwrap()
        .unwrap();
    assert!(stream.is_ready());

    stream.shutdown().await;
}

#[tokio::test]
async fn test_stop_clears_book_and_silences_updates() {
    let rest = mock_depth(Duration::from_millis(50)).await;
    let mut venue = MockVenue::start().await;
    let mut stream = new_stream(&rest, &venue, test_config());
    let mut events = stream.subscribe_events();

    let (started, conn) = tokio::join!(stream.start(), venue.next_conn());
    started.unwrap();
    wait_event(&mut events, is_ready).await;

    stream.stop();
    assert_eq!(stream.state(), SyncState::Stopped);
    assert!(!stream.is_ready());
    let book = stream.get_order_book(None);
    assert!(book.bids.is_empty() && book.asks.is_empty());
    assert_eq!(book.last_update_id, None);

    while events.try_recv().is_ok() {}
    // The socket may already be gone; a failed send is fine.
    let _ = conn.tx.send(depth_diff(101, 101, &[["99", "9"]], &[]));

    match timeout(Duration::from_millis(200), events.recv()).await {
        Err(_) => {}
        Ok(ev) => panic!("event after stop: {ev:?}"),
    }
    assert!(stream.get_best_bid().is_none());
}

#[tokio::test]
async fn test_snapshot_failure_fails_start() {
    let rest = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/depth"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&rest)
        .await;
    let mut venue = MockVenue::start().await;
    let mut stream = new_stream(&rest, &venue, test_config());

    let (started, _conn) = tokio::join!(stream.start(), venue.next_conn());
    assert!(matches!(started, Err(BackpackError::SnapshotFetch { .. })));
    assert_eq!(stream.state(), SyncState::Failed);
    assert!(!stream.is_ready());
}

#[tokio::test]
async fn test_unreachable_venue_exhausts_reconnects() {
    let rest = mock_depth(Duration::ZERO).await;
    // Bind then drop to get a port nobody listens on.
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_url = format!("ws://{}", closed.local_addr().unwrap());
    drop(closed);

    let _ = rustls::crypto::ring::default_provider().install_default();
    let endpoints = BackpackConfig {
        rest_url: rest.uri(),
        ws_url,
    };
    let config = OrderbookConfig {
        max_reconnect_attempts: 2,
        reconnect_delay: Duration::from_millis(5),
        ..OrderbookConfig::default()
    };
    let mut stream = OrderbookStream::new(SYMBOL, &endpoints, config);

    let err = timeout(WAIT, stream.start()).await.unwrap().unwrap_err();
    assert!(matches!(err, BackpackError::ReconnectExhausted { attempts: 2 }));
    assert_eq!(stream.state(), SyncState::Failed);
}

// ---------------------------------------------------------------------------
// Heartbeat and malformed frames
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_pong_reconnects() {
    let rest = mock_depth(Duration::ZERO).await;
    let mut venue = MockVenue::start_with(false).await;
    let config = OrderbookConfig {
        ping_interval: Duration::from_millis(200),
        pong_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let mut stream = new_stream(&rest, &venue, config);
    let mut events = stream.subscribe_events();

    let (started, _first) = tokio::join!(stream.start(), venue.next_conn());
    started.unwrap();

    match wait_event(&mut events, |e| matches!(e, BookEvent::Error(_))).await {
        BookEvent::Error(fault) => {
            assert_eq!(fault.kind, FaultKind::Transport);
            assert!(fault.message.contains("pong"), "message was {}", fault.message);
        }
        _ => unreachable!(),
    }
    let _second = venue.next_conn().await;

    stream.shutdown().await;
}

#[tokio::test]
async fn test_silent_venue_is_stale_and_reconnects() {
    let rest = mock_depth(Duration::ZERO).await;
    let mut venue = MockVenue::start().await;
    let config = OrderbookConfig {
        stale_threshold: Duration::from_millis(200),
        ..test_config()
    };
    let mut stream = new_stream(&rest, &venue, config);
    let mut events = stream.subscribe_events();

    let (started, _first) = tokio::join!(stream.start(), venue.next_conn());
    started.unwrap();

    match wait_event(&mut events, |e| matches!(e, BookEvent::Error(_))).await {
        BookEvent::Error(fault) => {
            assert_eq!(fault.kind, FaultKind::Transport);
            assert!(fault.message.contains("stale"), "message was {}", fault.message);
        }
        _ => unreachable!(),
    }
    let _second = venue.next_conn().await;

    stream.shutdown().await;
}

#[tokio::test]
async fn test_server_ping_gets_pong() {
    let rest = mock_depth(Duration::ZERO).await;
    let mut venue = MockVenue::start().await;
    let mut stream = new_stream(&rest, &venue, test_config());

    let (started, mut conn) = tokio::join!(stream.start(), venue.next_conn());
    started.unwrap();

    conn.send(Message::Ping(b"hb-1".to_vec()));
    loop {
        match conn.recv().await {
            Message::Pong(payload) => {
                assert_eq!(payload, b"hb-1".to_vec());
                break;
            }
            Message::Ping(_) => continue,
            other => panic!("unexpected client frame: {other:?}"),
        }
    }

    stream.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frames_are_skipped_without_fault() {
    let rest = mock_depth(Duration::ZERO).await;
    let mut venue = MockVenue::start().await;
    let mut stream = new_stream(&rest, &venue, test_config());
    let mut events = stream.subscribe_events();

    let (started, conn) = tokio::join!(stream.start(), venue.next_conn());
    started.unwrap();
    wait_event(&mut events, is_ready).await;

    conn.send(Message::Text("not json".into()));
    // Depth event without a symbol.
    let missing_symbol = json!({
        "stream": format!("depth.{SYMBOL}"),
        "data": { "e": "depth", "U": 101, "u": 101, "a": [], "b": [] }
    });
    conn.send(Message::Text(missing_symbol.to_string()));
    conn.send(depth_diff(101, 101, &[["99", "3"]], &[]));

    match next_event(&mut events).await {
        BookEvent::Update(info) => assert_eq!(info.first_update_id, 101),
        other => panic!("expected update, got {other:?}"),
    }
    assert_eq!(stream.get_best_bid(), Some(PriceLevel::new(99.0, 3.0)));
    assert_eq!(stream.state(), SyncState::Ready);

    stream.shutdown().await;
    drop(conn);
}

// ---------------------------------------------------------------------------
// Configuration and restart
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_zero_heartbeat_timer_is_rejected() {
    let rest = mock_depth(Duration::ZERO).await;
    let venue = MockVenue::start().await;
    let config = OrderbookConfig {
        ping_interval: Duration::ZERO,
        ..test_config()
    };
    let mut stream = new_stream(&rest, &venue, config);

    let err = timeout(WAIT, stream.start()).await.unwrap().unwrap_err();
    assert!(matches!(err, BackpackError::InvalidConfig(_)), "{err:?}");
    assert_eq!(stream.state(), SyncState::Stopped);
    assert!(rest.received_requests().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_start_can_be_retried_immediately() {
    let rest = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/depth"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&rest)
        .await;
    let mut venue = MockVenue::start().await;
    let mut stream = new_stream(&rest, &venue, test_config());

    let (first, _c1) = tokio::join!(stream.start(), venue.next_conn());
    assert!(matches!(first, Err(BackpackError::SnapshotFetch { .. })));

    let (second, _c2) = tokio::join!(stream.start(), venue.next_conn());
    assert!(
        matches!(second, Err(BackpackError::SnapshotFetch { .. })),
        "{second:?}"
    );
    assert_eq!(stream.state(), SyncState::Failed);
}
