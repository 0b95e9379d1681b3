// =============================================================================
// Hybrid Engine — V1 trend bias + V2 momentum surge + exit detector
// =============================================================================
//
// Owns two parallel indicator sets (a slow trend stack for V1, a fast stack
// for V2) plus a shared ADX used only for the regime gate. V1 is evaluated
// first on every closing bar; V2 is only attempted when V1 does not fire, so
// at most one signal is ever produced per bar.
//
// The exit detector is queried by the orchestrator *before* the bar is fed
// into V1/V2 (see `check_exit`), so it always reacts to the trailing RSI and
// volume history built up through the previous bar, using this bar's own
// volume as the live sample. `on_bar_close` then advances that history.
// =============================================================================

use std::collections::VecDeque;

use anyhow::Result;

use crate::indicators::{Adx, Ema, Rsi};
use crate::types::{
    CloseReason, PositionSide, Signal, SignalReason, SignalSystem, SyntheticBar, TrendSnapshot,
};

/// How many RSI samples the exit detector needs in hand at all times.
const EXIT_RSI_HISTORY_LEN: usize = 3;
/// RSI-momentum magnitude below which the trend is considered flattening.
const EXIT_RSI_FLATTEN_THRESHOLD: f64 = 2.0;

/// V1 (trend/bias) tunables.
#[derive(Debug, Clone, Copy)]
pub struct V1Config {
    pub ema_fast_len: usize,
    pub ema_mid_len: usize,
    pub ema_slow_len: usize,
    pub ema_micro_fast_len: usize,
    pub ema_micro_slow_len: usize,
    pub rsi_length: usize,
    pub rsi_min_long: f64,
    pub rsi_max_short: f64,
    pub min_bars_between: u32,
    pub min_move_percent: f64,
}

/// V2 (momentum surge) tunables.
#[derive(Debug, Clone, Copy)]
pub struct V2Config {
    pub ema_fast_len: usize,
    pub ema_mid_len: usize,
    pub ema_slow_len: usize,
    pub rsi_length: usize,
    pub rsi_momentum_threshold: f64,
    pub volume_multiplier: f64,
    pub volume_lookback: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct HybridEngineConfig {
    pub v1: V1Config,
    pub v2: V2Config,
    pub adx_length: usize,
    /// Volume-ratio floor below which the exit detector sees a volume drop.
    pub exit_volume_multiplier: f64,
}

pub struct HybridEngine {
    // V1 state
    v1_ema_fast: Ema,
    v1_ema_mid: Ema,
    v1_ema_slow: Ema,
    v1_ema_micro_fast: Ema,
    v1_ema_micro_slow: Ema,
    v1_rsi: Rsi,
    v1_cfg: V1Config,
    v1_bars_since_signal: u32,
    v1_last_long_price: Option<f64>,
    v1_last_short_price: Option<f64>,

    // V2 state
    v2_ema_fast: Ema,
    v2_ema_mid: Ema,
    v2_ema_slow: Ema,
    v2_rsi: Rsi,
    v2_rsi_prev: Option<f64>,
    v2_volume_ring: VecDeque<f64>,
    v2_ring_size: usize,
    v2_cfg: V2Config,

    // Shared regime gate
    adx: Adx,

    // Exit detector
    rsi_history: VecDeque<f64>,
    exit_volume_multiplier: f64,
    position_side: PositionSide,
}

impl HybridEngine {
    pub fn new(config: HybridEngineConfig) -> Result<Self> {
        let ring_size = config.v2.volume_lookback.max(10);
        Ok(Self {
            v1_ema_fast: Ema::new(config.v1.ema_fast_len)?,
            v1_ema_mid: Ema::new(config.v1.ema_mid_len)?,
            v1_ema_slow: Ema::new(config.v1.ema_slow_len)?,
            v1_ema_micro_fast: Ema::new(config.v1.ema_micro_fast_len)?,
            v1_ema_micro_slow: Ema::new(config.v1.ema_micro_slow_len)?,
            v1_rsi: Rsi::new(config.v1.rsi_length)?,
            v1_cfg: config.v1,
            v1_bars_since_signal: u32::MAX,
            v1_last_long_price: None,
            v1_last_short_price: None,

            v2_ema_fast: Ema::new(config.v2.ema_fast_len)?,
            v2_ema_mid: Ema::new(config.v2.ema_mid_len)?,
            v2_ema_slow: Ema::new(config.v2.ema_slow_len)?,
            v2_rsi: Rsi::new(config.v2.rsi_length)?,
            v2_rsi_prev: None,
            v2_volume_ring: VecDeque::with_capacity(ring_size),
            v2_ring_size: ring_size,
            v2_cfg: config.v2,

            adx: Adx::new(config.adx_length)?,

            rsi_history: VecDeque::with_capacity(EXIT_RSI_HISTORY_LEN),
            exit_volume_multiplier: config.exit_volume_multiplier,
            position_side: PositionSide::Flat,
        })
    }

    /// Tell the engine which side the orchestrator currently holds — used
    /// only by the exit detector.
    pub fn set_position_side(&mut self, side: PositionSide) {
        self.position_side = side;
    }

    /// True if ADX is not yet warm, or ADX exceeds `threshold`.
    pub fn should_allow_trading(&self, threshold: f64) -> bool {
        match self.adx.snapshot().value() {
            None => true,
            Some(adx) => adx > threshold,
        }
    }

    /// Query the exit detector using the trailing RSI/volume history built
    /// up through the previous bar, plus this bar's own volume. Must be
    /// called *before* [`Self::on_bar_close`] for the same bar.
    pub fn check_exit(&self, bar: &SyntheticBar) -> Option<CloseReason> {
        if self.position_side.is_flat() {
            return None;
        }
        if self.rsi_history.len() < EXIT_RSI_HISTORY_LEN {
            return None;
        }

        let rsi_last = self.rsi_history[self.rsi_history.len() - 1];
        let rsi_three_back = self.rsi_history[self.rsi_history.len() - EXIT_RSI_HISTORY_LEN];

        let rsi_momentum = (rsi_last - rsi_three_back).abs();
        let rsi_flattening = rsi_momentum < EXIT_RSI_FLATTEN_THRESHOLD;

        let avg_volume = self.v2_avg_volume();
        let volume_drop = if avg_volume > 0.0 {
            bar.volume / avg_volume < self.exit_volume_multiplier
        } else {
            false
        };

        let adverse_rsi = match self.position_side {
            PositionSide::Long => rsi_last < rsi_three_back,
            PositionSide::Short => rsi_last > rsi_three_back,
            PositionSide::Flat => false,
        };

        // A gentle decline with thinning volume reads as the move running out
        // of steam, not reversing — check that band before falling through to
        // the sharper adverse-RSI case.
        if rsi_flattening && volume_drop {
            Some(CloseReason::RsiFlatteningVolumeDrop)
        } else if adverse_rsi {
            Some(CloseReason::RsiReversal)
        } else {
            None
        }
    }

    /// Feed a closing bar to V1 and (if V1 doesn't fire) V2, advancing all
    /// indicator state and the exit-detector history.
    pub fn on_bar_close(&mut self, bar: &SyntheticBar) -> Option<Signal> {
        self.adx.update(bar.high, bar.low, bar.close);

        let v1_signal = self.evaluate_v1(bar);

        let v2_rsi_now = self.v2_rsi.update(bar.close).value();
        self.v2_ema_fast.update(bar.close);
        self.v2_ema_mid.update(bar.close);
        self.v2_ema_slow.update(bar.close);

        if let Some(rsi_now) = v2_rsi_now {
            self.rsi_history.push_back(rsi_now);
            while self.rsi_history.len() > EXIT_RSI_HISTORY_LEN {
                self.rsi_history.pop_front();
            }
        }

        let v2_signal = if v1_signal.is_none() {
            self.evaluate_v2(bar)
        } else {
            None
        };

        // Volume ring advances after the V2 spike check used this bar's
        // volume as the live sample against the prior ring's average.
        self.v2_volume_ring.push_back(bar.volume);
        while self.v2_volume_ring.len() > self.v2_ring_size {
            self.v2_volume_ring.pop_front();
        }

        self.v2_rsi_prev = v2_rsi_now;

        v1_signal.or(v2_signal)
    }

    fn v2_avg_volume(&self) -> f64 {
        if self.v2_volume_ring.is_empty() {
            return 0.0;
        }
        self.v2_volume_ring.iter().sum::<f64>() / self.v2_volume_ring.len() as f64
    }

    fn evaluate_v1(&mut self, bar: &SyntheticBar) -> Option<Signal> {
        let fast = self.v1_ema_fast.update(bar.close).value();
        let mid = self.v1_ema_mid.update(bar.close).value();
        let slow = self.v1_ema_slow.update(bar.close).value();
        let micro_fast = self.v1_ema_micro_fast.update(bar.close).value();
        let micro_slow = self.v1_ema_micro_slow.update(bar.close).value();
        let rsi = self.v1_rsi.update(bar.close).value();

        let (Some(fast), Some(mid), Some(slow), Some(micro_fast), Some(micro_slow), Some(rsi)) =
            (fast, mid, slow, micro_fast, micro_slow, rsi)
        else {
            self.v1_bars_since_signal = self.v1_bars_since_signal.saturating_add(1);
            return None;
        };

        self.v1_bars_since_signal = self.v1_bars_since_signal.saturating_add(1);

        let bull_stack = fast > mid && mid > slow;
        let bear_stack = fast < mid && mid < slow;
        let micro_bull = micro_fast > micro_slow;
        let micro_bear = micro_fast < micro_slow;
        let long_look = bull_stack && micro_bull && rsi > self.v1_cfg.rsi_min_long;
        let short_look = bear_stack && micro_bear && rsi < self.v1_cfg.rsi_max_short;

        let bars_ok = self.v1_bars_since_signal >= self.v1_cfg.min_bars_between;

        if long_look && bars_ok {
            let move_ok = match self.v1_last_long_price {
                None => true,
                Some(p) if p > 0.0 => ((bar.close - p) / p).abs() * 100.0 >= self.v1_cfg.min_move_percent,
                Some(_) => true,
            };
            if move_ok {
                self.v1_last_long_price = Some(bar.close);
                self.v1_bars_since_signal = 0;
                let trend = TrendSnapshot {
                    bull_stack,
                    bear_stack,
                    long_look,
                    short_look,
                    long_trig: true,
                    short_trig: false,
                };
                return Some(Signal::Long {
                    reason: SignalReason::V1Long,
                    system: Some(SignalSystem::V1),
                    trend,
                });
            }
        }

        if short_look && bars_ok {
            let move_ok = match self.v1_last_short_price {
                None => true,
                Some(p) if p > 0.0 => ((bar.close - p) / p).abs() * 100.0 >= self.v1_cfg.min_move_percent,
                Some(_) => true,
            };
            if move_ok {
                self.v1_last_short_price = Some(bar.close);
                self.v1_bars_since_signal = 0;
                let trend = TrendSnapshot {
                    bull_stack,
                    bear_stack,
                    long_look,
                    short_look,
                    long_trig: false,
                    short_trig: true,
                };
                return Some(Signal::Short {
                    reason: SignalReason::V1Short,
                    system: Some(SignalSystem::V1),
                    trend,
                });
            }
        }

        None
    }

    fn evaluate_v2(&self, bar: &SyntheticBar) -> Option<Signal> {
        let rsi_now = self.v2_rsi.snapshot().value()?;
        let rsi_prev = self.v2_rsi_prev?;
        let fast = self.v2_ema_fast.snapshot().value()?;
        let mid = self.v2_ema_mid.snapshot().value()?;
        let slow = self.v2_ema_slow.snapshot().value()?;

        let rsi_momentum = rsi_now - rsi_prev;
        let rsi_surge = rsi_momentum.abs() >= self.v2_cfg.rsi_momentum_threshold;

        let avg_volume = self.v2_avg_volume();
        let volume_spike = avg_volume > 0.0 && bar.volume >= avg_volume * self.v2_cfg.volume_multiplier;
        let volume_color_bullish = bar.close > bar.open;

        let ema_bullish = fast > mid && mid > slow;
        let ema_bearish = fast < mid && mid < slow;

        let trend = TrendSnapshot {
            bull_stack: ema_bullish,
            bear_stack: ema_bearish,
            long_look: false,
            short_look: false,
            long_trig: false,
            short_trig: false,
        };

        if rsi_surge && rsi_momentum > 0.0 && volume_spike && volume_color_bullish && ema_bullish {
            return Some(Signal::Long {
                reason: SignalReason::V2Long,
                system: Some(SignalSystem::V2),
                trend,
            });
        }

        if rsi_surge && rsi_momentum < 0.0 && volume_spike && !volume_color_bullish && ema_bearish {
            return Some(Signal::Short {
                reason: SignalReason::V2Short,
                system: Some(SignalSystem::V2),
                trend,
            });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HybridEngineConfig {
        HybridEngineConfig {
            v1: V1Config {
                ema_fast_len: 8,
                ema_mid_len: 21,
                ema_slow_len: 48,
                ema_micro_fast_len: 3,
                ema_micro_slow_len: 6,
                rsi_length: 14,
                rsi_min_long: 42.0,
                rsi_max_short: 58.0,
                min_bars_between: 1,
                min_move_percent: 0.10,
            },
            v2: V2Config {
                ema_fast_len: 3,
                ema_mid_len: 5,
                ema_slow_len: 8,
                rsi_length: 5,
                rsi_momentum_threshold: 3.0,
                volume_multiplier: 1.5,
                volume_lookback: 4,
            },
            adx_length: 14,
            exit_volume_multiplier: 1.2,
        }
    }

    fn bar(i: i64, open: f64, close: f64, volume: f64) -> SyntheticBar {
        SyntheticBar {
            start_time: i * 1000,
            end_time: i * 1000,
            open,
            high: open.max(close) + 0.1,
            low: open.min(close) - 0.1,
            close,
            volume,
        }
    }

    #[test]
    fn s2_min_move_percent_suppresses_then_allows() {
        let mut engine = HybridEngine::new(config()).unwrap();
        // Warm up with a steady uptrend so bull/micro stacks settle true.
        let mut price = 80.0;
        let mut i = 0;
        let mut first_fire_price = None;
        for _ in 0..100 {
            let b = bar(i, price, price, 1.0);
            i += 1;
            if let Some(sig) = engine.on_bar_close(&b) {
                if matches!(sig, Signal::Long { .. }) {
                    first_fire_price = Some(price);
                    break;
                }
            }
            price += 0.5;
        }
        let base = first_fire_price.expect("expected an initial V1 long in a steady uptrend");

        // Next bar: +0.05% move — should be suppressed.
        let tiny_move = base * 1.0005;
        let sig = engine.on_bar_close(&bar(i, tiny_move, tiny_move, 1.0));
        i += 1;
        assert!(
            !matches!(sig, Some(Signal::Long { .. })),
            "a 0.05% move must not clear the 0.10% min-move filter"
        );

        // Next bar: +0.15% move from the stamped entry — should fire.
        let big_move = base * 1.0015;
        let sig = engine.on_bar_close(&bar(i, big_move, big_move, 1.0));
        assert!(matches!(sig, Some(Signal::Long { .. })), "a 0.15% move should clear the filter");
    }

    #[test]
    fn s3_v2_surge_fires_on_volume_and_rsi_jump() {
        let mut cfg = config();
        // Disable V1 firing by starving its long stack: high rsi_min_long and
        // mismatched micro pair keeps long_look false throughout.
        cfg.v1.rsi_min_long = 1000.0;
        cfg.v1.rsi_max_short = -1000.0;
        let mut engine = HybridEngine::new(cfg).unwrap();

        let mut i = 0;
        // Feed flat volume=10 bars to prime the ring and V2 stack/RSI.
        let mut price = 100.0;
        for _ in 0..20 {
            engine.on_bar_close(&bar(i, price, price, 10.0));
            i += 1;
        }

        // A bullish bar with a volume spike and an RSI jump.
        price += 2.0;
        let sig = engine.on_bar_close(&bar(i, price - 1.0, price, 30.0));
        assert!(
            matches!(sig, Some(Signal::Long { reason: SignalReason::V2Long, .. })),
            "expected a V2 long surge signal, got {sig:?}"
        );
    }

    #[test]
    fn s4_exit_detector_distinguishes_reversal_from_flattening() {
        let mut engine = HybridEngine::new(config()).unwrap();
        engine.set_position_side(PositionSide::Long);

        engine.rsi_history = VecDeque::from(vec![60.0, 59.5, 59.0]);
        engine.v2_volume_ring = VecDeque::from(vec![10.0, 10.0, 10.0, 10.0]);
        let flattening_bar = bar(0, 100.0, 100.0, 5.0);
        assert_eq!(
            engine.check_exit(&flattening_bar),
            Some(CloseReason::RsiFlatteningVolumeDrop)
        );

        engine.rsi_history = VecDeque::from(vec![60.0, 58.0, 55.0]);
        assert_eq!(engine.check_exit(&flattening_bar), Some(CloseReason::RsiReversal));
    }

    #[test]
    fn no_exit_while_flat() {
        let engine = HybridEngine::new(config()).unwrap();
        assert_eq!(engine.check_exit(&bar(0, 100.0, 100.0, 1.0)), None);
    }

    #[test]
    fn regime_gate_allows_when_warming() {
        let engine = HybridEngine::new(config()).unwrap();
        assert!(engine.should_allow_trading(25.0));
    }
}
