// =============================================================================
// Trading Signal Engine — Main Entry Point
// =============================================================================
//
// Wires the tick stream, the exchange snapshot poller, and the orchestrator's
// mpsc consumer loop together. Everything downstream of `tx` is serialized —
// see `orchestrator::Orchestrator::run` for why that matters.
// =============================================================================

mod config;
mod csv_log;
mod exchange;
mod executor;
mod indicators;
mod market_data;
mod orchestrator;
mod position;
mod strategy;
mod trade_stats;
mod types;
mod warm_state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::BotConfig;
use crate::exchange::{BinanceFuturesClient, ExchangeClient};
use crate::executor::{DryRunExecutor, Executor};
use crate::market_data::tick_stream::{BinanceAggTradeStream, TickEvent, TickSource};
use crate::orchestrator::{InboundEvent, Orchestrator};
use crate::types::ExecutionMode;

const CONFIG_PATH: &str = "bot_config.json";
const WARM_STATE_PATH: &str = "warm_state.json";
const TRADE_CSV_PATH: &str = "trades.csv";
const SNAPSHOT_POLL_INTERVAL_SECS: u64 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("starting trading signal engine");

    let cfg = BotConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load bot config — using defaults");
        BotConfig::default()
    });
    info!(symbol = %cfg.symbol, strategy = ?cfg.strategy, mode = %cfg.mode, "bot configuration resolved");

    let executor: Arc<dyn Executor> = match cfg.mode {
        ExecutionMode::DryRun => Arc::new(DryRunExecutor::new()),
        ExecutionMode::Live => {
            warn!("live execution mode is configured but no live executor is wired up — falling back to dry-run");
            Arc::new(DryRunExecutor::new())
        }
    };

    let exchange_client: Option<Arc<dyn ExchangeClient>> = {
        let key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
        let secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();
        if key.is_empty() || secret.is_empty() {
            warn!("BINANCE_API_KEY/BINANCE_API_SECRET not set — exchange polling disabled, running on warm state and optimistic fills only");
            None
        } else {
            Some(Arc::new(BinanceFuturesClient::new(key, secret)))
        }
    };

    let orchestrator = Orchestrator::new(
        &cfg,
        executor,
        PathBuf::from(WARM_STATE_PATH),
        PathBuf::from(TRADE_CSV_PATH),
    )?;

    let (tx, rx) = mpsc::channel::<InboundEvent>(1024);

    spawn_tick_stream(cfg.symbol.clone(), Arc::new(BinanceAggTradeStream), tx.clone());

    if let Some(client) = exchange_client {
        spawn_snapshot_poller(cfg.symbol.clone(), client, tx.clone());
    }

    {
        let tx = tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("shutdown signal received — stopping gracefully");
                let _ = tx.send(InboundEvent::Shutdown).await;
            }
        });
    }

    drop(tx);

    orchestrator.run(rx).await?;

    info!("trading signal engine shut down complete");
    Ok(())
}

/// Reconnect loop around the live aggTrade WebSocket, forwarding parsed ticks
/// into the orchestrator's inbound channel.
fn spawn_tick_stream(symbol: String, source: Arc<dyn TickSource>, tx: mpsc::Sender<InboundEvent>) {
    tokio::spawn(async move {
        loop {
            let (tick_tx, mut tick_rx) = mpsc::channel(256);
            let sym = symbol.clone();
            let source = source.clone();
            let feed = tokio::spawn(async move {
                if let Err(e) = source.run(&sym, tick_tx).await {
                    error!(symbol = %sym, error = %e, "tick stream error — reconnecting in 5s");
                }
            });

            while let Some(event) = tick_rx.recv().await {
                match event {
                    TickEvent::Tick(tick) => {
                        if tx.send(InboundEvent::Tick(tick)).await.is_err() {
                            feed.abort();
                            return;
                        }
                    }
                    TickEvent::Error(e) => warn!(error = %e, "tick stream reported a transient error"),
                    TickEvent::Close => break,
                }
            }

            feed.abort();
            tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
        }
    });
}

/// Polls position and balance snapshots from the exchange every
/// [`SNAPSHOT_POLL_INTERVAL_SECS`] seconds and forwards them to the
/// orchestrator for reconciliation.
fn spawn_snapshot_poller(symbol: String, client: Arc<dyn ExchangeClient>, tx: mpsc::Sender<InboundEvent>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(SNAPSHOT_POLL_INTERVAL_SECS));
        loop {
            interval.tick().await;

            match client.get_position_risk(&symbol).await {
                Ok(snap) => {
                    if tx.send(InboundEvent::PositionSnapshot(snap)).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "failed to poll position risk"),
            }

            match client.get_balances().await {
                Ok(balances) => {
                    if tx.send(InboundEvent::BalanceSnapshot(balances)).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "failed to poll balances"),
            }
        }
    });
}
