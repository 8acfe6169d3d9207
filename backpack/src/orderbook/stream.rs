//! Live order book kept in sync with the venue.
//!
//! A background task (the supervisor) owns the stream connection and is
//! the only writer to the book. Readers lock the same mutex, so every query
//! sees a book whose levels, cursor and sorted views agree.
//!
//! ```text
//!   Stopped -> Connecting -> Snapshotting -> Replaying -> Ready
//!                  ^                                        |
//!                  +------------- Resyncing <---------------+
//!                        (gap: immediate, disconnect: backoff)
//! ```
//!
//! Every resync starts over: the connection is dropped, the book is
//! cleared, and a new connection plus a new snapshot rebuild it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::LinearBackoff;
use crate::config::{BackpackConfig, OrderbookConfig};
use crate::error::{BackpackError, Result};
use crate::rest::BackpackHttpClient;
use crate::types::{PositionSide, PriceLevel, Side};
use crate::ws::events::DepthUpdate;
use crate::ws::DepthConnection;

use super::book::{BookSnapshot, Ingest, LocalOrderbook, SequenceGap, Spread, UpdateInfo};
use super::execution::ExecutionEstimate;
use super::pnl::PnlEstimate;
use super::snapshot::{fetch_snapshot, LoadedSnapshot};

const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Supervisor state, published on a `watch` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Stopped,
    Connecting,
    Snapshotting,
    Replaying,
    Ready,
    Resyncing,
    /// Retries exhausted or snapshot failed. Needs an external restart.
    Failed,
}

/// Category of a reported fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Transport,
    SequenceGap,
    SnapshotFailed,
    ReconnectExhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookFault {
    pub kind: FaultKind,
    pub message: String,
}

/// Notifications for observers of the book.
#[derive(Debug, Clone)]
pub enum BookEvent {
    /// Snapshot loaded and buffered diffs replayed.
    Ready(BookSnapshot),
    /// One diff applied.
    Update(UpdateInfo),
    Error(BookFault),
}

type SharedBook = Arc<Mutex<LocalOrderbook>>;

fn lock(book: &SharedBook) -> MutexGuard<'_, LocalOrderbook> {
    book.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// OrderbookStream
// ---------------------------------------------------------------------------

/// Manages a live local order book for a single market symbol.
///
/// Call [`OrderbookStream::new`] then [`OrderbookStream::start`]. Query the
/// book at any time; subscribe to [`BookEvent`]s via
/// [`subscribe_events`](Self::subscribe_events) and to the supervisor
/// state via [`subscribe_state`](Self::subscribe_state).
pub struct OrderbookStream {
    symbol: String,
    config: OrderbookConfig,
    ws_url: String,
    http: BackpackHttpClient,
    book: SharedBook,
    event_tx: broadcast::Sender<BookEvent>,
    state_tx: watch::Sender<SyncState>,
    state_rx: watch::Receiver<SyncState>,
    cancel: Option<CancellationToken>,
    task_handle: Option<JoinHandle<()>>,
}

impl OrderbookStream {
    /// Create a stream for `symbol` (e.g. `"SOL_USDC"`). Nothing connects
    /// until [`start`](Self::start).
    pub fn new(symbol: impl Into<String>, endpoints: &BackpackConfig, config: OrderbookConfig) -> Self {
        let symbol = symbol.into();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SyncState::Stopped);
        let book = LocalOrderbook::new(symbol.clone(), config.max_buffer_size);

        Self {
            symbol,
            config,
            ws_url: endpoints.ws_url.clone(),
            http: BackpackHttpClient::new(&endpoints.rest_url),
            book: Arc::new(Mutex::new(book)),
            event_tx,
            state_tx,
            state_rx,
            cancel: None,
            task_handle: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Spawn the supervisor and wait until the book is first ready.
    ///
    /// Connection failures before that point are retried with backoff.
    ///
    /// # Errors
    ///
    /// Returns [`BackpackError::AlreadyStarted`] if running,
    /// [`BackpackError::InvalidConfig`] for unusable heartbeat timers,
    /// [`BackpackError::SnapshotFetch`] if the snapshot fails, or
    /// [`BackpackError::ReconnectExhausted`] if no connection could be
    /// established within the retry budget.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(BackpackError::AlreadyStarted);
        }
        self.config.validate()?;
        // A failed run may still be unwinding; make sure it stays silent.
        if let Some(previous) = self.cancel.take() {
            previous.cancel();
        }
        info!(symbol = %self.symbol, granularity = %self.config.granularity, "starting order book");

        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let supervisor = Supervisor {
            symbol: self.symbol.clone(),
            ws_url: self.ws_url.clone(),
            http: self.http.clone(),
            config: self.config.clone(),
            book: Arc::clone(&self.book),
            event_tx: self.event_tx.clone(),
            state_tx: self.state_tx.clone(),
            cancel: cancel.clone(),
            backoff: LinearBackoff::new(
                self.config.reconnect_delay,
                self.config.max_reconnect_attempts,
            ),
        };

        self.cancel = Some(cancel);
        self.task_handle = Some(tokio::spawn(supervisor.run(ready_tx)));

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(BackpackError::TaskExited),
        }
    }

    /// A supervisor exists and has not given up. `Failed` is published
    /// before the task returns, so it counts as restartable even while the
    /// task is still winding down.
    fn is_running(&self) -> bool {
        self.task_handle.as_ref().is_some_and(|h| !h.is_finished())
            && self.state() != SyncState::Failed
    }

    /// Stop the supervisor and clear the book.
    ///
    /// Takes effect under the book lock: once this returns, no further
    /// diff is applied and no further event is emitted by this run.
    pub fn stop(&mut self) {
        info!(symbol = %self.symbol, "stopping order book");
        {
            let mut book = lock(&self.book);
            if let Some(cancel) = self.cancel.take() {
                cancel.cancel();
            }
            book.reset();
            self.state_tx.send_replace(SyncState::Stopped);
        }
        self.task_handle.take();
    }

    /// [`stop`](Self::stop), then wait for the supervisor to exit.
    pub async fn shutdown(&mut self) {
        let handle = self.task_handle.take();
        self.stop();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    // -- observation -------------------------------------------------------

    /// Receive `Ready`, `Update` and `Error` notifications.
    pub fn subscribe_events(&self) -> broadcast::Receiver<BookEvent> {
        self.event_tx.subscribe()
    }

    /// Clone a `watch::Receiver` for the supervisor state.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state_rx.clone()
    }

    pub fn state(&self) -> SyncState {
        *self.state_rx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        lock(&self.book).is_ready()
    }

    // -- queries -------------------------------------------------------------

    /// Sorted book, each side truncated to `depth` levels if given.
    pub fn get_order_book(&self, depth: Option<usize>) -> BookSnapshot {
        lock(&self.book).snapshot(depth)
    }

    pub fn get_best_bid(&self) -> Option<PriceLevel> {
        lock(&self.book).best_bid()
    }

    pub fn get_best_ask(&self) -> Option<PriceLevel> {
        lock(&self.book).best_ask()
    }

    pub fn get_spread(&self) -> Option<Spread> {
        lock(&self.book).spread()
    }

    pub fn get_mid_price(&self) -> Option<f64> {
        lock(&self.book).mid_price()
    }

    pub fn get_average_execution_price(&self, quantity: f64, side: Side) -> Option<ExecutionEstimate> {
        lock(&self.book).average_execution_price(quantity, side)
    }

    pub fn calculate_pnl(&self, entry_price: f64, quantity: f64, side: PositionSide) -> Option<f64> {
        lock(&self.book).calculate_pnl(entry_price, quantity, side)
    }

    pub fn estimate_pnl(&self, entry_price: f64, quantity: f64, side: PositionSide) -> Option<PnlEstimate> {
        lock(&self.book).estimate_pnl(entry_price, quantity, side)
    }
}

impl Drop for OrderbookStream {
    fn drop(&mut self) {
        if self.cancel.is_some() {
            self.stop();
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Why a connected session ended.
enum SessionEnd {
    Cancelled,
    Gap(SequenceGap),
    Disconnected(BackpackError),
    SnapshotFailed(BackpackError),
}

/// Why the supervisor will not reconnect.
enum Halt {
    Cancelled,
    Exhausted(u32),
}

/// The background task that owns the connection and drives the book.
struct Supervisor {
    symbol: String,
    ws_url: String,
    http: BackpackHttpClient,
    config: OrderbookConfig,
    book: SharedBook,
    event_tx: broadcast::Sender<BookEvent>,
    state_tx: watch::Sender<SyncState>,
    cancel: CancellationToken,
    backoff: LinearBackoff,
}

impl Supervisor {
    async fn run(mut self, ready_tx: oneshot::Sender<Result<()>>) {
        let mut ready_tx = Some(ready_tx);

        loop {
            self.set_state(SyncState::Connecting);

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = DepthConnection::connect(
                    &self.ws_url,
                    &self.symbol,
                    self.config.granularity,
                    &self.config,
                ) => res,
            };

            let mut conn = match connected {
                Ok(conn) => {
                    self.backoff.reset();
                    conn
                }
                Err(e) => {
                    error!(symbol = %self.symbol, error = %e, "depth stream connect failed");
                    self.report(FaultKind::Transport, e.to_string());
                    match self.wait_reconnect().await {
                        Ok(()) => continue,
                        Err(halt) => return self.halt(halt, &mut ready_tx),
                    }
                }
            };

            let end = self.run_session(&mut conn, &mut ready_tx).await;
            // The session no longer reads from `conn`; nothing it delivered
            // can reach the book after this point.
            conn.close().await;

            match end {
                SessionEnd::Cancelled => break,
                SessionEnd::Gap(gap) => {
                    warn!(
                        symbol = %self.symbol,
                        expected = gap.expected,
                        got = gap.received,
                        "sequence gap, resyncing"
                    );
                    self.report(
                        FaultKind::SequenceGap,
                        format!("expected U={}, got U={}", gap.expected, gap.received),
                    );
                    self.begin_resync();
                }
                SessionEnd::Disconnected(e) => {
                    warn!(symbol = %self.symbol, error = %e, "depth stream disconnected");
                    self.report(FaultKind::Transport, e.to_string());
                    self.begin_resync();
                    if let Err(halt) = self.wait_reconnect().await {
                        return self.halt(halt, &mut ready_tx);
                    }
                }
                SessionEnd::SnapshotFailed(e) => {
                    error!(symbol = %self.symbol, error = %e, "snapshot failed, giving up");
                    self.report(FaultKind::SnapshotFailed, e.to_string());
                    self.guarded(|book| book.reset());
                    self.set_state(SyncState::Failed);
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(Err(e));
                    }
                    return;
                }
            }
        }

        debug!(symbol = %self.symbol, "order book supervisor exiting");
    }

    /// One connection's lifetime: snapshot while buffering, replay, then
    /// apply live diffs until something ends it.
    async fn run_session(
        &self,
        conn: &mut DepthConnection,
        ready_tx: &mut Option<oneshot::Sender<Result<()>>>,
    ) -> SessionEnd {
        self.set_state(SyncState::Snapshotting);

        let fetched = {
            let fetch = fetch_snapshot(&self.http, &self.symbol);
            tokio::pin!(fetch);
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                    res = &mut fetch => break res,
                    update = conn.next_update() => match update {
                        Ok(update) => self.buffer(update),
                        Err(e) => return SessionEnd::Disconnected(e),
                    },
                }
            }
        };
        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(e) => return SessionEnd::SnapshotFailed(e),
        };

        self.set_state(SyncState::Replaying);
        if let Some(end) = self.load_and_replay(snapshot) {
            return end;
        }
        info!(symbol = %self.symbol, "order book ready");
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(Ok(()));
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                update = conn.next_update() => match update {
                    Ok(update) => {
                        if let Some(end) = self.apply_live(update) {
                            return end;
                        }
                    }
                    Err(e) => return SessionEnd::Disconnected(e),
                },
            }
        }
    }

    fn buffer(&self, update: DepthUpdate) {
        self.guarded(|book| book.ingest(update));
    }

    /// Load the snapshot, replay the buffer and flip to ready, all in one
    /// critical section.
    fn load_and_replay(&self, snapshot: LoadedSnapshot) -> Option<SessionEnd> {
        let outcome = self.guarded(|book| {
            book.load_snapshot(&snapshot.bids, &snapshot.asks, snapshot.last_update_id);
            let report = book.replay_buffered()?;
            for info in report.applied {
                let _ = self.event_tx.send(BookEvent::Update(info));
            }
            book.mark_ready();
            let _ = self.event_tx.send(BookEvent::Ready(book.snapshot(None)));
            self.state_tx.send_replace(SyncState::Ready);
            Ok(())
        });

        match outcome {
            None => Some(SessionEnd::Cancelled),
            Some(Err(gap)) => Some(SessionEnd::Gap(gap)),
            Some(Ok(())) => None,
        }
    }

    fn apply_live(&self, update: DepthUpdate) -> Option<SessionEnd> {
        let outcome = self.guarded(|book| match book.ingest(update) {
            Ingest::Applied(info) => {
                let _ = self.event_tx.send(BookEvent::Update(info));
                None
            }
            Ingest::Gap(gap) => Some(gap),
            Ingest::Buffered | Ingest::Dropped => None,
        });

        match outcome {
            None => Some(SessionEnd::Cancelled),
            Some(Some(gap)) => Some(SessionEnd::Gap(gap)),
            Some(None) => None,
        }
    }

    fn begin_resync(&self) {
        self.guarded(|book| {
            book.reset();
            self.state_tx.send_replace(SyncState::Resyncing);
        });
        info!(symbol = %self.symbol, "re-syncing order book");
    }

    /// Wait out the next backoff delay, or halt if the budget is spent.
    async fn wait_reconnect(&mut self) -> std::result::Result<(), Halt> {
        let Some(delay) = self.backoff.next_delay() else {
            return Err(Halt::Exhausted(self.backoff.max_attempts()));
        };
        warn!(
            symbol = %self.symbol,
            attempt = self.backoff.attempt(),
            max_attempts = self.backoff.max_attempts(),
            delay = ?delay,
            "reconnecting depth stream"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = self.cancel.cancelled() => Err(Halt::Cancelled),
        }
    }

    fn halt(&self, halt: Halt, ready_tx: &mut Option<oneshot::Sender<Result<()>>>) {
        let Halt::Exhausted(attempts) = halt else {
            debug!(symbol = %self.symbol, "reconnect wait cancelled");
            return;
        };
        error!(symbol = %self.symbol, attempts, "max reconnection attempts reached");
        self.report(
            FaultKind::ReconnectExhausted,
            format!("gave up after {attempts} reconnect attempts"),
        );
        self.guarded(|book| book.reset());
        self.set_state(SyncState::Failed);
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(Err(BackpackError::ReconnectExhausted { attempts }));
        }
    }

    // -- side effects, all skipped once stopped ------------------------------

    /// Run `f` on the book unless the stream has been stopped. The check
    /// happens under the lock that `stop()` also takes.
    fn guarded<R>(&self, f: impl FnOnce(&mut LocalOrderbook) -> R) -> Option<R> {
        let mut book = lock(&self.book);
        if self.cancel.is_cancelled() {
            return None;
        }
        Some(f(&mut book))
    }

    fn set_state(&self, state: SyncState) {
        self.guarded(|_| {
            self.state_tx.send_replace(state);
        });
    }

    fn report(&self, kind: FaultKind, message: String) {
        self.guarded(|_| {
            let _ = self.event_tx.send(BookEvent::Error(BookFault { kind, message }));
        });
    }
}
