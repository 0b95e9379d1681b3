// =============================================================================
// Exchange Client — HMAC-signed REST calls against Binance USD-M futures
// =============================================================================
//
// The orchestrator only ever needs two polled reads: the current position
// and the USDT balance. Everything else (order placement) lives behind the
// Executor trait, not here — this client is purely the snapshot poller's
// collaborator.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use crate::position::PositionSnapshot;
use crate::types::BalanceInfo;

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;

/// Polled reads the orchestrator needs from an exchange. A trait so tests
/// can substitute a deterministic in-memory fake.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_position_risk(&self, symbol: &str) -> Result<PositionSnapshot>;
    async fn get_balances(&self) -> Result<Vec<BalanceInfo>>;
}

/// Binance USD-M futures REST client, HMAC-SHA256 signed.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl BinanceFuturesClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("BinanceFuturesClient initialised (base_url=https://fapi.binance.com)");

        Self {
            api_key,
            secret,
            base_url: "https://fapi.binance.com".to_string(),
            client,
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }
}

#[async_trait]
impl ExchangeClient for BinanceFuturesClient {
    /// GET /fapi/v2/positionRisk (signed) for a single `symbol`.
    #[instrument(skip(self), name = "futures::get_position_risk")]
    async fn get_position_risk(&self, symbol: &str) -> Result<PositionSnapshot> {
        let params = format!("symbol={symbol}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v2/positionRisk?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v2/positionRisk request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse positionRisk response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /fapi/v2/positionRisk returned {}: {}", status, body);
        }

        let entry = body
            .as_array()
            .and_then(|arr| arr.iter().find(|e| e["symbol"].as_str() == Some(symbol)))
            .context("symbol not present in positionRisk response")?;

        let snap = PositionSnapshot {
            position_amt: entry["positionAmt"].as_str().unwrap_or("0").to_string(),
            entry_price: Self::parse_str_f64(&entry["entryPrice"]).unwrap_or(0.0),
            mark_price: Self::parse_str_f64(&entry["markPrice"]).unwrap_or(0.0),
            un_realized_profit: Self::parse_str_f64(&entry["unRealizedProfit"]).unwrap_or(0.0),
            leverage: Self::parse_str_f64(&entry["leverage"]).unwrap_or(1.0),
            symbol: symbol.to_string(),
        };

        debug!(symbol, position_amt = %snap.position_amt, "position risk retrieved");
        Ok(snap)
    }

    /// GET /fapi/v2/balance (signed).
    #[instrument(skip(self), name = "futures::get_balances")]
    async fn get_balances(&self) -> Result<Vec<BalanceInfo>> {
        let qs = self.signed_query("");
        let url = format!("{}/fapi/v2/balance?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v2/balance request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse balance response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /fapi/v2/balance returned {}: {}", status, body);
        }

        let raw = body.as_array().context("balance response is not an array")?;

        let mut balances = Vec::with_capacity(raw.len());
        for entry in raw {
            let asset = entry["asset"].as_str().unwrap_or("").to_string();
            let free = Self::parse_str_f64(&entry["availableBalance"])
                .or_else(|_| Self::parse_str_f64(&entry["balance"]))
                .unwrap_or(0.0);
            if asset.is_empty() {
                warn!("skipping malformed balance entry");
                continue;
            }
            balances.push(BalanceInfo {
                asset,
                free,
                locked: 0.0,
            });
        }

        debug!(count = balances.len(), "balances fetched");
        Ok(balances)
    }
}

impl BinanceFuturesClient {
    fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>()
                .with_context(|| format!("failed to parse '{s}' as f64"))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            anyhow::bail!("expected string or number, got: {val}")
        }
    }
}

impl std::fmt::Debug for BinanceFuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceFuturesClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Select the USDT balance (case-insensitive) from a balance list, per the
/// interface contract in spec.md §6.
pub fn usdt_balance(balances: &[BalanceInfo]) -> f64 {
    balances
        .iter()
        .find(|b| b.asset.eq_ignore_ascii_case("USDT"))
        .map(|b| b.free)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usdt_balance_is_case_insensitive() {
        let balances = vec![
            BalanceInfo { asset: "BNB".into(), free: 1.0, locked: 0.0 },
            BalanceInfo { asset: "usdt".into(), free: 250.5, locked: 0.0 },
        ];
        assert_eq!(usdt_balance(&balances), 250.5);
    }

    #[test]
    fn usdt_balance_defaults_to_zero_when_absent() {
        let balances = vec![BalanceInfo { asset: "BNB".into(), free: 1.0, locked: 0.0 }];
        assert_eq!(usdt_balance(&balances), 0.0);
    }
}
