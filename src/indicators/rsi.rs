// =============================================================================
// RSI — streaming Wilder-style relative strength index
// =============================================================================

use anyhow::{bail, Result};

use crate::types::IndicatorSnapshot;

/// Streaming RSI with Wilder smoothing.
///
/// The first `length` updates accumulate `avgGain`/`avgLoss` as cumulative
/// simple means; afterwards they switch to an EWMA with `alpha = 1/length`.
/// Ready once `length` updates have been fed.
#[derive(Debug, Clone)]
pub struct Rsi {
    length: usize,
    alpha: f64,
    prev_input: Option<f64>,
    avg_gain: f64,
    avg_loss: f64,
    count: u64,
}

impl Rsi {
    pub fn new(length: usize) -> Result<Self> {
        if length < 2 {
            bail!("rsi length must be >= 2, got {length}");
        }
        Ok(Self {
            length,
            alpha: 1.0 / length as f64,
            prev_input: None,
            avg_gain: 0.0,
            avg_loss: 0.0,
            count: 0,
        })
    }

    pub fn update(&mut self, input: f64) -> IndicatorSnapshot<f64> {
        let Some(prev) = self.prev_input else {
            self.prev_input = Some(input);
            self.count = 1;
            return self.snapshot();
        };

        let delta = input - prev;
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        self.prev_input = Some(input);
        self.count += 1;

        if self.count <= self.length as u64 {
            let n = self.count as f64;
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        } else {
            self.avg_gain = gain * self.alpha + self.avg_gain * (1.0 - self.alpha);
            self.avg_loss = loss * self.alpha + self.avg_loss * (1.0 - self.alpha);
        }

        self.snapshot()
    }

    pub fn snapshot(&self) -> IndicatorSnapshot<f64> {
        if !self.is_ready() {
            return IndicatorSnapshot::Warming;
        }
        let value = if self.avg_loss == 0.0 {
            if self.avg_gain > 0.0 {
                100.0
            } else {
                50.0
            }
        } else if self.avg_gain == 0.0 {
            0.0
        } else {
            100.0 - 100.0 / (1.0 + self.avg_gain / self.avg_loss)
        };
        IndicatorSnapshot::Ready(value)
    }

    pub fn is_ready(&self) -> bool {
        self.count >= self.length as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_length_below_two() {
        assert!(Rsi::new(1).is_err());
    }

    #[test]
    fn first_update_is_not_ready_yet() {
        let mut rsi = Rsi::new(14).unwrap();
        assert_eq!(rsi.update(100.0), IndicatorSnapshot::Warming);
        assert!(!rsi.is_ready());
    }

    #[test]
    fn zero_loss_with_positive_gain_is_one_hundred() {
        let mut rsi = Rsi::new(3).unwrap();
        rsi.update(100.0);
        rsi.update(101.0);
        rsi.update(102.0);
        let v = rsi.update(103.0).value().unwrap();
        assert_eq!(v, 100.0);
    }

    #[test]
    fn zero_gain_and_loss_is_fifty() {
        let mut rsi = Rsi::new(3).unwrap();
        rsi.update(100.0);
        rsi.update(100.0);
        let v = rsi.update(100.0).value().unwrap();
        assert_eq!(v, 50.0);
    }

    #[test]
    fn output_always_in_bounds_once_ready() {
        let mut rsi = Rsi::new(5).unwrap();
        let inputs = [100.0, 102.0, 98.0, 105.0, 95.0, 110.0, 90.0, 120.0];
        for input in inputs {
            if let Some(v) = rsi.update(input).value() {
                assert!((0.0..=100.0).contains(&v));
            }
        }
        assert!(rsi.is_ready());
    }

    #[test]
    fn ready_after_length_updates() {
        let mut rsi = Rsi::new(3).unwrap();
        assert!(!rsi.is_ready());
        rsi.update(1.0);
        rsi.update(2.0);
        assert!(!rsi.is_ready());
        rsi.update(3.0);
        assert!(rsi.is_ready());
    }
}
