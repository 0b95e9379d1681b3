// =============================================================================
// Bot Configuration — serde-defaulted settings for strategy, risk, and mode
// =============================================================================
//
// Every field carries a serde default so that adding a field later never
// breaks loading an older config file, exactly as `runtime_config.rs` does
// for the upstream dashboard engine.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::strategy::hybrid_engine::{HybridEngineConfig, V1Config, V2Config};
use crate::strategy::trend_engine::TrendEngineConfig;
use crate::types::{ExecutionMode, StrategyKind};

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}
fn default_timeframe_ms() -> i64 {
    60_000
}
fn default_strategy() -> StrategyKind {
    StrategyKind::Hybrid
}
fn default_mode() -> ExecutionMode {
    ExecutionMode::DryRun
}

fn default_ema_fast() -> usize {
    8
}
fn default_ema_mid() -> usize {
    21
}
fn default_ema_slow() -> usize {
    48
}
fn default_rsi_length() -> usize {
    14
}
fn default_rsi_min_long() -> f64 {
    42.0
}
fn default_rsi_max_short() -> f64 {
    58.0
}

fn default_ema_micro_fast() -> usize {
    3
}
fn default_ema_micro_slow() -> usize {
    6
}
fn default_min_bars_between() -> u32 {
    3
}
fn default_min_move_percent() -> f64 {
    0.10
}

fn default_v2_ema_fast() -> usize {
    3
}
fn default_v2_ema_mid() -> usize {
    5
}
fn default_v2_ema_slow() -> usize {
    8
}
fn default_v2_rsi_length() -> usize {
    5
}
fn default_rsi_momentum_threshold() -> f64 {
    3.0
}
fn default_volume_multiplier() -> f64 {
    1.5
}
fn default_volume_lookback() -> usize {
    10
}

fn default_adx_length() -> usize {
    14
}
fn default_exit_volume_multiplier() -> f64 {
    1.2
}

fn default_max_position_size() -> f64 {
    100.0
}
fn default_max_leverage() -> f64 {
    10.0
}
fn default_max_flips_per_hour() -> u32 {
    4
}
fn default_emergency_stop_loss_pct() -> f64 {
    3.0
}
fn default_adx_threshold() -> f64 {
    20.0
}

/// Triple-EMA + RSI tunables shared shape for both the trend engine and the
/// hybrid engine's V1 bias stack.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrendStackSettings {
    #[serde(default = "default_ema_fast")]
    pub ema_fast_len: usize,
    #[serde(default = "default_ema_mid")]
    pub ema_mid_len: usize,
    #[serde(default = "default_ema_slow")]
    pub ema_slow_len: usize,
    #[serde(default = "default_rsi_length")]
    pub rsi_length: usize,
    #[serde(default = "default_rsi_min_long")]
    pub rsi_min_long: f64,
    #[serde(default = "default_rsi_max_short")]
    pub rsi_max_short: f64,
}

impl Default for TrendStackSettings {
    fn default() -> Self {
        Self {
            ema_fast_len: default_ema_fast(),
            ema_mid_len: default_ema_mid(),
            ema_slow_len: default_ema_slow(),
            rsi_length: default_rsi_length(),
            rsi_min_long: default_rsi_min_long(),
            rsi_max_short: default_rsi_max_short(),
        }
    }
}

impl From<TrendStackSettings> for TrendEngineConfig {
    fn from(s: TrendStackSettings) -> Self {
        Self {
            ema_fast_len: s.ema_fast_len,
            ema_mid_len: s.ema_mid_len,
            ema_slow_len: s.ema_slow_len,
            rsi_length: s.rsi_length,
            rsi_min_long: s.rsi_min_long,
            rsi_max_short: s.rsi_max_short,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct V1Settings {
    #[serde(flatten)]
    pub stack: TrendStackSettings,
    #[serde(default = "default_ema_micro_fast")]
    pub ema_micro_fast_len: usize,
    #[serde(default = "default_ema_micro_slow")]
    pub ema_micro_slow_len: usize,
    #[serde(default = "default_min_bars_between")]
    pub min_bars_between: u32,
    #[serde(default = "default_min_move_percent")]
    pub min_move_percent: f64,
}

impl Default for V1Settings {
    fn default() -> Self {
        Self {
            stack: TrendStackSettings::default(),
            ema_micro_fast_len: default_ema_micro_fast(),
            ema_micro_slow_len: default_ema_micro_slow(),
            min_bars_between: default_min_bars_between(),
            min_move_percent: default_min_move_percent(),
        }
    }
}

impl From<V1Settings> for V1Config {
    fn from(s: V1Settings) -> Self {
        Self {
            ema_fast_len: s.stack.ema_fast_len,
            ema_mid_len: s.stack.ema_mid_len,
            ema_slow_len: s.stack.ema_slow_len,
            ema_micro_fast_len: s.ema_micro_fast_len,
            ema_micro_slow_len: s.ema_micro_slow_len,
            rsi_length: s.stack.rsi_length,
            rsi_min_long: s.stack.rsi_min_long,
            rsi_max_short: s.stack.rsi_max_short,
            min_bars_between: s.min_bars_between,
            min_move_percent: s.min_move_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct V2Settings {
    #[serde(default = "default_v2_ema_fast")]
    pub ema_fast_len: usize,
    #[serde(default = "default_v2_ema_mid")]
    pub ema_mid_len: usize,
    #[serde(default = "default_v2_ema_slow")]
    pub ema_slow_len: usize,
    #[serde(default = "default_v2_rsi_length")]
    pub rsi_length: usize,
    #[serde(default = "default_rsi_momentum_threshold")]
    pub rsi_momentum_threshold: f64,
    #[serde(default = "default_volume_multiplier")]
    pub volume_multiplier: f64,
    #[serde(default = "default_volume_lookback")]
    pub volume_lookback: usize,
}

impl Default for V2Settings {
    fn default() -> Self {
        Self {
            ema_fast_len: default_v2_ema_fast(),
            ema_mid_len: default_v2_ema_mid(),
            ema_slow_len: default_v2_ema_slow(),
            rsi_length: default_v2_rsi_length(),
            rsi_momentum_threshold: default_rsi_momentum_threshold(),
            volume_multiplier: default_volume_multiplier(),
            volume_lookback: default_volume_lookback(),
        }
    }
}

impl From<V2Settings> for V2Config {
    fn from(s: V2Settings) -> Self {
        Self {
            ema_fast_len: s.ema_fast_len,
            ema_mid_len: s.ema_mid_len,
            ema_slow_len: s.ema_slow_len,
            rsi_length: s.rsi_length,
            rsi_momentum_threshold: s.rsi_momentum_threshold,
            volume_multiplier: s.volume_multiplier,
            volume_lookback: s.volume_lookback,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HybridSettings {
    #[serde(default)]
    pub v1: V1Settings,
    #[serde(default)]
    pub v2: V2Settings,
    #[serde(default = "default_adx_length")]
    pub adx_length: usize,
    #[serde(default = "default_exit_volume_multiplier")]
    pub exit_volume_multiplier: f64,
}

impl Default for HybridSettings {
    fn default() -> Self {
        Self {
            v1: V1Settings::default(),
            v2: V2Settings::default(),
            adx_length: default_adx_length(),
            exit_volume_multiplier: default_exit_volume_multiplier(),
        }
    }
}

impl From<HybridSettings> for HybridEngineConfig {
    fn from(s: HybridSettings) -> Self {
        Self {
            v1: s.v1.into(),
            v2: s.v2.into(),
            adx_length: s.adx_length,
            exit_volume_multiplier: s.exit_volume_multiplier,
        }
    }
}

/// Risk envelope: every knob the orchestrator's gates read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskEnvelope {
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,
    #[serde(default = "default_max_flips_per_hour")]
    pub max_flips_per_hour: u32,
    #[serde(default)]
    pub stop_loss_pct: f64,
    #[serde(default)]
    pub take_profit_pct: f64,
    #[serde(default)]
    pub use_stop_loss: bool,
    #[serde(default = "default_emergency_stop_loss_pct")]
    pub emergency_stop_loss_pct: f64,
    #[serde(default)]
    pub position_size_pct: Option<f64>,
    #[serde(default)]
    pub require_trending_market: bool,
    #[serde(default = "default_adx_threshold")]
    pub adx_threshold: f64,
}

impl Default for RiskEnvelope {
    fn default() -> Self {
        Self {
            max_position_size: default_max_position_size(),
            max_leverage: default_max_leverage(),
            max_flips_per_hour: default_max_flips_per_hour(),
            stop_loss_pct: 0.0,
            take_profit_pct: 0.0,
            use_stop_loss: false,
            emergency_stop_loss_pct: default_emergency_stop_loss_pct(),
            position_size_pct: None,
            require_trending_market: false,
            adx_threshold: default_adx_threshold(),
        }
    }
}

/// Top-level bot configuration. Credentials are deliberately excluded from
/// the persisted file — they are read from the environment in `main.rs`,
/// matching the teacher's split between `runtime_config.json` (tunables) and
/// `BINANCE_API_KEY`/`BINANCE_API_SECRET` env vars (secrets).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_timeframe_ms")]
    pub timeframe_ms: i64,
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,
    #[serde(default = "default_mode")]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub trend: TrendStackSettings,
    #[serde(default)]
    pub hybrid: HybridSettings,
    #[serde(default)]
    pub risk: RiskEnvelope,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            timeframe_ms: default_timeframe_ms(),
            strategy: default_strategy(),
            mode: default_mode(),
            trend: TrendStackSettings::default(),
            hybrid: HybridSettings::default(),
            risk: RiskEnvelope::default(),
        }
    }
}

impl BotConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read bot config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse bot config from {}", path.display()))?;
        info!(path = %path.display(), symbol = %config.symbol, strategy = ?config.strategy, "bot config loaded");
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("failed to serialise bot config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "bot config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.symbol, "BTCUSDT");
        assert_eq!(cfg.strategy, StrategyKind::Hybrid);
        assert_eq!(cfg.mode, ExecutionMode::DryRun);
        assert_eq!(cfg.risk.max_flips_per_hour, 4);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: BotConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbol, "BTCUSDT");
        assert_eq!(cfg.trend.ema_fast_len, 8);
        assert_eq!(cfg.hybrid.v1.min_bars_between, 3);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbol": "ETHUSDT", "risk": { "max_flips_per_hour": 10 } }"#;
        let cfg: BotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbol, "ETHUSDT");
        assert_eq!(cfg.risk.max_flips_per_hour, 10);
        assert_eq!(cfg.risk.max_position_size, 100.0);
    }

    #[test]
    fn trend_settings_convert_into_engine_config() {
        let settings = TrendStackSettings::default();
        let engine_cfg: TrendEngineConfig = settings.into();
        assert_eq!(engine_cfg.ema_fast_len, 8);
        assert_eq!(engine_cfg.rsi_min_long, 42.0);
    }

    #[test]
    fn hybrid_settings_convert_into_engine_config() {
        let settings = HybridSettings::default();
        let engine_cfg: HybridEngineConfig = settings.into();
        assert_eq!(engine_cfg.v1.min_bars_between, 3);
        assert_eq!(engine_cfg.v2.rsi_momentum_threshold, 3.0);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = BotConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: BotConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbol, cfg2.symbol);
        assert_eq!(cfg.risk.max_position_size, cfg2.risk.max_position_size);
    }
}
