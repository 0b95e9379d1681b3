// =============================================================================
// EMA — streaming exponential moving average
// =============================================================================

use anyhow::{bail, Result};

use crate::types::IndicatorSnapshot;

/// Streaming exponential moving average.
///
/// The first update seeds the value directly (no SMA warm-up period); every
/// subsequent update applies `value <- input * alpha + value * (1 - alpha)`.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(length: usize) -> Result<Self> {
        if length == 0 {
            bail!("ema length must be > 0, got {length}");
        }
        Ok(Self {
            alpha: 2.0 / (length as f64 + 1.0),
            value: None,
        })
    }

    pub fn update(&mut self, input: f64) -> IndicatorSnapshot<f64> {
        self.value = Some(match self.value {
            None => input,
            Some(prev) => input * self.alpha + prev * (1.0 - self.alpha),
        });
        self.snapshot()
    }

    pub fn snapshot(&self) -> IndicatorSnapshot<f64> {
        match self.value {
            Some(v) => IndicatorSnapshot::Ready(v),
            None => IndicatorSnapshot::Warming,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.value.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_length() {
        assert!(Ema::new(0).is_err());
    }

    #[test]
    fn first_update_seeds_with_input() {
        let mut ema = Ema::new(9).unwrap();
        assert_eq!(ema.snapshot(), IndicatorSnapshot::Warming);
        let out = ema.update(100.0);
        assert_eq!(out, IndicatorSnapshot::Ready(100.0));
        assert!(ema.is_ready());
    }

    #[test]
    fn subsequent_updates_blend_with_alpha() {
        let mut ema = Ema::new(9).unwrap();
        ema.update(100.0);
        let alpha = 2.0 / 10.0;
        let expected = 110.0 * alpha + 100.0 * (1.0 - alpha);
        let out = ema.update(110.0).value().unwrap();
        assert!((out - expected).abs() < 1e-10);
    }

    #[test]
    fn converges_toward_constant_input() {
        let mut ema = Ema::new(5).unwrap();
        for _ in 0..200 {
            ema.update(50.0);
        }
        assert!((ema.snapshot().value().unwrap() - 50.0).abs() < 1e-6);
    }
}
