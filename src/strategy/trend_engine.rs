// =============================================================================
// Trend Engine — edge-triggered triple-EMA + RSI strategy
// =============================================================================
//
// Fires exactly once per bar, and only on the bar where the bull/bear stack
// plus RSI filter first becomes true (rising edge). Re-confirmation on
// subsequent bars produces no further signals until the condition first
// clears and re-arms.
// =============================================================================

use anyhow::Result;

use crate::indicators::{Ema, Rsi};
use crate::types::{Signal, SignalReason, SyntheticBar, TrendSnapshot};

/// Tunables for the edge-triggered trend engine.
#[derive(Debug, Clone, Copy)]
pub struct TrendEngineConfig {
    pub ema_fast_len: usize,
    pub ema_mid_len: usize,
    pub ema_slow_len: usize,
    pub rsi_length: usize,
    pub rsi_min_long: f64,
    pub rsi_max_short: f64,
}

/// Edge-triggered triple-EMA + RSI trend strategy.
pub struct TrendEngine {
    config: TrendEngineConfig,
    ema_fast: Ema,
    ema_mid: Ema,
    ema_slow: Ema,
    rsi: Rsi,
    prev_long_look: bool,
    prev_short_look: bool,
}

impl TrendEngine {
    pub fn new(config: TrendEngineConfig) -> Result<Self> {
        Ok(Self {
            ema_fast: Ema::new(config.ema_fast_len)?,
            ema_mid: Ema::new(config.ema_mid_len)?,
            ema_slow: Ema::new(config.ema_slow_len)?,
            rsi: Rsi::new(config.rsi_length)?,
            config,
            prev_long_look: false,
            prev_short_look: false,
        })
    }

    /// Feed a closing bar. Returns `Some(signal)` on a rising edge, `None`
    /// otherwise — at most one signal per call.
    pub fn on_bar_close(&mut self, bar: &SyntheticBar) -> Option<Signal> {
        let fast = self.ema_fast.update(bar.close).value();
        let mid = self.ema_mid.update(bar.close).value();
        let slow = self.ema_slow.update(bar.close).value();
        let rsi = self.rsi.update(bar.close).value();

        let (Some(fast), Some(mid), Some(slow), Some(rsi)) = (fast, mid, slow, rsi) else {
            return None;
        };

        let bull_stack = fast > mid && mid > slow;
        let bear_stack = fast < mid && mid < slow;
        let long_look = bull_stack && rsi > self.config.rsi_min_long;
        let short_look = bear_stack && rsi < self.config.rsi_max_short;
        let long_trig = long_look && !self.prev_long_look;
        let short_trig = short_look && !self.prev_short_look;

        let trend = TrendSnapshot {
            bull_stack,
            bear_stack,
            long_look,
            short_look,
            long_trig,
            short_trig,
        };

        self.prev_long_look = long_look;
        self.prev_short_look = short_look;

        if long_trig {
            return Some(Signal::Long {
                reason: SignalReason::LongTrigger,
                system: None,
                trend,
            });
        }
        if short_trig {
            return Some(Signal::Short {
                reason: SignalReason::ShortTrigger,
                system: None,
                trend,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PositionSide;

    fn config() -> TrendEngineConfig {
        TrendEngineConfig {
            ema_fast_len: 8,
            ema_mid_len: 21,
            ema_slow_len: 48,
            rsi_length: 14,
            rsi_min_long: 42.0,
            rsi_max_short: 58.0,
        }
    }

    #[test]
    fn s1_trend_long_edge_fires_exactly_once() {
        let mut engine = TrendEngine::new(config()).unwrap();
        let mut long_signals = 0;
        let mut close = 100.0;

        for i in 0..60 {
            let bar = SyntheticBar {
                start_time: i * 30_000,
                end_time: i * 30_000,
                open: close,
                high: close + 0.1,
                low: close - 0.1,
                close,
                volume: 1.0,
            };
            if let Some(sig) = engine.on_bar_close(&bar) {
                if sig.side() == PositionSide::Long {
                    long_signals += 1;
                }
            }
            close += 1.0;
        }

        assert_eq!(long_signals, 1, "a rising trend should fire exactly one Long edge");
    }

    #[test]
    fn no_second_signal_while_condition_stays_true() {
        let mut engine = TrendEngine::new(config()).unwrap();
        let mut close = 100.0;
        let mut fired_at = None;

        for i in 0..80 {
            let bar = SyntheticBar {
                start_time: i * 30_000,
                end_time: i * 30_000,
                open: close,
                high: close + 0.1,
                low: close - 0.1,
                close,
                volume: 1.0,
            };
            let sig = engine.on_bar_close(&bar);
            if sig.is_some() {
                assert!(fired_at.is_none(), "edge trigger must fire at most once while condition holds");
                fired_at = Some(i);
            }
            close += 1.0;
        }
        assert!(fired_at.is_some());
    }

    #[test]
    fn rejects_bad_indicator_lengths() {
        let mut bad = config();
        bad.rsi_length = 1;
        assert!(TrendEngine::new(bad).is_err());
    }
}
