// =============================================================================
// Tick stream — live trade feed for a single perpetual-futures instrument
// =============================================================================
//
// The core only needs three event kinds out of whatever the upstream feed
// speaks: a trade tick, a transient error (the feed is expected to
// reconnect), and a terminal close. Reconnection, heartbeat handling, and
// message-format details belong to the collaborator; this module owns just
// enough of the Binance USD-M `aggTrade` WebSocket to produce `Tick` values
// for the orchestrator.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

use crate::types::Tick;

/// One event out of a tick feed.
#[derive(Debug, Clone)]
pub enum TickEvent {
    Tick(Tick),
    /// Transient error; the feed collaborator is expected to reconnect.
    Error(String),
    /// The stream ended.
    Close,
}

/// A source of [`TickEvent`]s for one instrument. One live implementation
/// talks to the exchange; a deterministic in-memory implementation drives
/// tests without a network dependency.
#[async_trait]
pub trait TickSource: Send + Sync {
    async fn run(&self, symbol: &str, tx: mpsc::Sender<TickEvent>) -> Result<()>;
}

/// Live Binance USD-M futures `aggTrade` feed.
pub struct BinanceAggTradeStream;

#[async_trait]
impl TickSource for BinanceAggTradeStream {
    async fn run(&self, symbol: &str, tx: mpsc::Sender<TickEvent>) -> Result<()> {
        run_binance_agg_trade_stream(symbol, tx).await
    }
}

/// Deterministic in-memory tick source: replays a fixed sequence of ticks,
/// then closes. Used by tests that need a `TickSource` without a socket.
pub struct InMemoryTickSource {
    ticks: Vec<Tick>,
}

impl InMemoryTickSource {
    pub fn new(ticks: Vec<Tick>) -> Self {
        Self { ticks }
    }
}

#[async_trait]
impl TickSource for InMemoryTickSource {
    async fn run(&self, _symbol: &str, tx: mpsc::Sender<TickEvent>) -> Result<()> {
        for tick in &self.ticks {
            if tx.send(TickEvent::Tick(*tick)).await.is_err() {
                return Ok(());
            }
        }
        let _ = tx.send(TickEvent::Close).await;
        Ok(())
    }
}

/// Connects to the Binance USD-M futures `aggTrade` stream for `symbol` and
/// forwards parsed ticks over `tx`. Returns once the socket closes or errors
/// so the caller can decide whether to reconnect.
pub async fn run_binance_agg_trade_stream(symbol: &str, tx: mpsc::Sender<TickEvent>) -> Result<()> {
    let lower = symbol.to_lowercase();
    let url = format!("wss://fstream.binance.com/ws/{lower}@aggTrade");
    info!(url = %url, symbol, "connecting to futures trade WebSocket");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to futures trade WebSocket")?;

    info!(symbol, "futures trade WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_agg_trade(&text) {
                        Ok(tick) => {
                            if tx.send(TickEvent::Tick(tick)).await.is_err() {
                                return Ok(());
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse aggTrade message");
                            let _ = tx.send(TickEvent::Error(e.to_string())).await;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!(symbol, error = %e, "trade WebSocket read error");
                let _ = tx.send(TickEvent::Error(e.to_string())).await;
                return Err(e.into());
            }
            None => {
                warn!(symbol, "trade WebSocket stream ended");
                let _ = tx.send(TickEvent::Close).await;
                return Ok(());
            }
        }
    }
}

/// Parse a Binance `aggTrade` message into a [`Tick`].
///
/// Expected shape:
/// ```json
/// { "e": "aggTrade", "s": "BTCUSDT", "p": "37000.00", "q": "0.123", "T": 123456789 }
/// ```
fn parse_agg_trade(text: &str) -> Result<Tick> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse aggTrade JSON")?;

    let price: f64 = root["p"]
        .as_str()
        .context("missing field p")?
        .parse()
        .context("failed to parse price")?;

    let size: Option<f64> = root["q"].as_str().and_then(|s| s.parse().ok());

    let timestamp = root["T"].as_i64().context("missing field T")?;

    Ok(Tick {
        timestamp,
        price,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_agg_trade() {
        let msg = r#"{"e":"aggTrade","s":"BTCUSDT","p":"37000.50","q":"0.123","T":1000}"#;
        let tick = parse_agg_trade(msg).unwrap();
        assert_eq!(tick.timestamp, 1000);
        assert_eq!(tick.price, 37000.50);
        assert_eq!(tick.size, Some(0.123));
    }

    #[test]
    fn rejects_missing_price() {
        let msg = r#"{"e":"aggTrade","s":"BTCUSDT","q":"0.123","T":1000}"#;
        assert!(parse_agg_trade(msg).is_err());
    }

    #[tokio::test]
    async fn in_memory_tick_source_replays_then_closes() {
        let ticks = vec![
            Tick { timestamp: 0, price: 100.0, size: Some(1.0) },
            Tick { timestamp: 1, price: 101.0, size: Some(2.0) },
        ];
        let source = InMemoryTickSource::new(ticks.clone());
        let (tx, mut rx) = mpsc::channel(8);

        source.run("BTCUSDT", tx).await.unwrap();

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                TickEvent::Tick(t) => seen.push(t),
                TickEvent::Close => break,
                TickEvent::Error(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(seen, ticks);
    }
}
