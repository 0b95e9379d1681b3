// =============================================================================
// Shared types used across the trading engine
// =============================================================================
//
// These are the data types every component (indicators, engines, position
// state, orchestrator) passes between each other. Keeping them in one place
// mirrors how the upstream project centralises its domain types.
// =============================================================================

use serde::{Deserialize, Serialize};

/// A single trade print from the exchange feed.
///
/// `timestamp` is monotonic milliseconds; `size` is optional because some
/// feeds omit it for certain message kinds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub timestamp: i64,
    pub price: f64,
    pub size: Option<f64>,
}

/// A fixed-duration OHLCV bar aggregated from ticks.
///
/// While open, a bar is owned exclusively by the bar builder; once emitted
/// as closed it is immutable and safe to share by value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyntheticBar {
    pub start_time: i64,
    pub end_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl SyntheticBar {
    pub(crate) fn new(timestamp: i64, price: f64, size: f64) -> Self {
        Self {
            start_time: timestamp,
            end_time: timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: size,
        }
    }

    pub(crate) fn update(&mut self, timestamp: i64, price: f64, size: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += size;
        self.end_time = timestamp;
    }
}

/// Readiness-tagged indicator output: a streaming indicator is either still
/// warming up (no meaningful value yet) or has produced a value.
///
/// This replaces a nullable scalar so "not ready" can never be confused with
/// a legitimate zero value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorSnapshot<T> {
    Ready(T),
    Warming,
}

impl<T: Copy> IndicatorSnapshot<T> {
    pub fn value(&self) -> Option<T> {
        match self {
            Self::Ready(v) => Some(*v),
            Self::Warming => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Which strategy produced a signal, when the engine distinguishes sub-systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSystem {
    V1,
    V2,
}

/// Why a signal fired, matching the reason vocabulary the orchestrator dedups
/// and logs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalReason {
    LongTrigger,
    ShortTrigger,
    V1Long,
    V1Short,
    V2Long,
    V2Short,
}

impl std::fmt::Display for SignalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LongTrigger => "long-trigger",
            Self::ShortTrigger => "short-trigger",
            Self::V1Long => "v1-long",
            Self::V1Short => "v1-short",
            Self::V2Long => "v2-long",
            Self::V2Short => "v2-short",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of the trend-stack state a signal was generated from, useful for
/// logging and for the orchestrator's decision audit trail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendSnapshot {
    pub bull_stack: bool,
    pub bear_stack: bool,
    pub long_look: bool,
    pub short_look: bool,
    pub long_trig: bool,
    pub short_trig: bool,
}

/// A directional entry/exit signal emitted by a strategy engine.
///
/// Signals are ephemeral: the orchestrator deduplicates them by
/// `(type, bar.end_time)` and never stores them beyond that.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    Long {
        reason: SignalReason,
        system: Option<SignalSystem>,
        trend: TrendSnapshot,
    },
    Short {
        reason: SignalReason,
        system: Option<SignalSystem>,
        trend: TrendSnapshot,
    },
}

impl Signal {
    pub fn side(&self) -> PositionSide {
        match self {
            Self::Long { .. } => PositionSide::Long,
            Self::Short { .. } => PositionSide::Short,
        }
    }

    pub fn reason(&self) -> SignalReason {
        match self {
            Self::Long { reason, .. } | Self::Short { reason, .. } => *reason,
        }
    }
}

/// Which side of the market a position is on, or flat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

impl PositionSide {
    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
            Self::Flat => Self::Flat,
        }
    }

    pub fn is_flat(self) -> bool {
        matches!(self, Self::Flat)
    }
}

/// Current position held by the bot, local view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side: PositionSide,
    pub size: f64,
    pub entry_price: Option<f64>,
    pub opened_at: Option<i64>,
}

impl Position {
    pub fn flat() -> Self {
        Self {
            side: PositionSide::Flat,
            size: 0.0,
            entry_price: None,
            opened_at: None,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.side.is_flat()
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::flat()
    }
}

/// Instruction handed to the executor to open a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeInstruction {
    pub side: PositionSide,
    pub size: f64,
    pub leverage: f64,
    pub price: f64,
    pub signal_reason: SignalReason,
    pub timestamp: i64,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    TrailingStop,
    EmergencyStop,
    StopLoss,
    TakeProfit,
    FlipLong,
    FlipShort,
    RsiReversal,
    RsiFlatteningVolumeDrop,
    Manual,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TrailingStop => "trailing-stop",
            Self::EmergencyStop => "emergency-stop",
            Self::StopLoss => "stop-loss",
            Self::TakeProfit => "take-profit",
            Self::FlipLong => "flip-long",
            Self::FlipShort => "flip-short",
            Self::RsiReversal => "rsi-reversal",
            Self::RsiFlatteningVolumeDrop => "rsi-flattening-volume-drop",
            Self::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// A closed trade, owned append-only by trade stats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub side: PositionSide,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub leverage: f64,
    pub opened_at: i64,
    pub closed_at: i64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub close_reason: CloseReason,
}

/// Warm-state snapshot written to durable storage so the orchestrator can
/// resume after a restart without losing track of its position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmState {
    pub position: Position,
    pub last_bar_close_time: i64,
    pub write_timestamp: i64,
}

/// Which executor implementation is wired up: dry-run (paper) or live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    DryRun,
    Live,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::DryRun
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DryRun => write!(f, "dry-run"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Which strategy engine the orchestrator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    Trend,
    Hybrid,
}

/// Balance snapshot for a single asset from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicator_snapshot_value_roundtrip() {
        let ready: IndicatorSnapshot<f64> = IndicatorSnapshot::Ready(42.0);
        assert_eq!(ready.value(), Some(42.0));
        assert!(ready.is_ready());

        let warming: IndicatorSnapshot<f64> = IndicatorSnapshot::Warming;
        assert_eq!(warming.value(), None);
        assert!(!warming.is_ready());
    }

    #[test]
    fn position_side_opposite_and_flat() {
        assert_eq!(PositionSide::Long.opposite(), PositionSide::Short);
        assert_eq!(PositionSide::Short.opposite(), PositionSide::Long);
        assert_eq!(PositionSide::Flat.opposite(), PositionSide::Flat);
        assert!(PositionSide::Flat.is_flat());
        assert!(!PositionSide::Long.is_flat());
    }

    #[test]
    fn signal_side_and_reason() {
        let trend = TrendSnapshot {
            bull_stack: true,
            bear_stack: false,
            long_look: true,
            short_look: false,
            long_trig: true,
            short_trig: false,
        };
        let sig = Signal::Long {
            reason: SignalReason::LongTrigger,
            system: None,
            trend,
        };
        assert_eq!(sig.side(), PositionSide::Long);
        assert_eq!(sig.reason(), SignalReason::LongTrigger);
    }

    #[test]
    fn position_flat_default() {
        let p = Position::default();
        assert!(p.is_flat());
        assert_eq!(p.size, 0.0);
        assert_eq!(p.entry_price, None);
    }
}
