mod cli;
mod output;

use std::process::ExitCode;
use std::time::Duration;

use backpack::{BackpackConfig, BookEvent, OrderbookConfig, OrderbookStream, SyncState};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use output::{write_quote, Quote};

#[tokio::main]
async fn main() -> ExitCode {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("failed to install rustls crypto provider");
        return ExitCode::FAILURE;
    }

    let args = cli::Args::parse();

    let filter = args
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let _ = dotenvy::dotenv(); // load .env if present
    let endpoints = BackpackConfig::from_env();
    let config = OrderbookConfig {
        granularity: args.granularity,
        max_reconnect_attempts: args.max_reconnect_attempts,
        reconnect_delay: Duration::from_millis(args.reconnect_delay_ms),
        ..Default::default()
    };

    let symbol = args.symbol.to_uppercase();
    info!(symbol = %symbol, rest = %endpoints.rest_url, ws = %endpoints.ws_url, "backpack-depth starting");

    let cancel = setup_signal_handlers();
    let mut stream = OrderbookStream::new(symbol, &endpoints, config);

    let code = run(&mut stream, &args, cancel).await;
    stream.shutdown().await;
    code
}

async fn run(stream: &mut OrderbookStream, args: &cli::Args, cancel: CancellationToken) -> ExitCode {
    let mut events = stream.subscribe_events();
    let mut state = stream.subscribe_state();

    let started = tokio::select! {
        _ = cancel.cancelled() => return ExitCode::SUCCESS,
        res = stream.start() => res,
    };
    if let Err(e) = started {
        error!(error = %e, "order book failed to start");
        return ExitCode::FAILURE;
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut buf = String::with_capacity(512);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return ExitCode::SUCCESS,

            changed = state.changed() => {
                if changed.is_err() || *state.borrow() == SyncState::Failed {
                    error!("order book sync failed");
                    return ExitCode::FAILURE;
                }
            }

            event = events.recv() => match event {
                Ok(BookEvent::Ready(_) | BookEvent::Update(_)) => {
                    let quote = Quote::capture(stream, args.levels, args.estimate_qty);
                    if let Err(e) = write_quote(&quote, args.json, &mut buf, &mut out) {
                        // Broken pipe and friends end the run quietly.
                        info!(error = %e, "stdout closed");
                        return ExitCode::SUCCESS;
                    }
                }
                Ok(BookEvent::Error(fault)) => {
                    warn!(kind = ?fault.kind, message = %fault.message, "order book fault");
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "output lagging behind updates"),
                Err(RecvError::Closed) => return ExitCode::FAILURE,
            },
        }
    }
}

/// Register SIGINT and SIGTERM handlers that trigger the returned token.
fn setup_signal_handlers() -> CancellationToken {
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received SIGINT, shutting down");
        cancel_clone.cancel();
    });

    #[cfg(unix)]
    {
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("received SIGTERM, shutting down");
                    cancel_clone.cancel();
                }
                Err(e) => warn!(error = %e, "failed to register SIGTERM handler"),
            }
        });
    }

    cancel
}
