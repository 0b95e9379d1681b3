// =============================================================================
// ADX — streaming Wilder average directional index for regime detection
// =============================================================================

use anyhow::{bail, Result};

use crate::types::IndicatorSnapshot;

/// Streaming Wilder ADX, fed `(high, low, close)` triples.
///
/// Buffers the first `length` true-range/directional-movement samples as
/// simple averages, then Wilder-smooths. ADX itself is the simple mean of
/// the first `length` DX samples, Wilder-smoothed thereafter. Stays
/// [`IndicatorSnapshot::Warming`] until both stages have filled.
#[derive(Debug, Clone)]
pub struct Adx {
    length: usize,
    alpha: f64,
    prev: Option<(f64, f64, f64)>,
    tr_buf: Vec<f64>,
    plus_dm_buf: Vec<f64>,
    minus_dm_buf: Vec<f64>,
    atr: Option<f64>,
    plus_dm_avg: Option<f64>,
    minus_dm_avg: Option<f64>,
    dx_buf: Vec<f64>,
    adx: Option<f64>,
}

impl Adx {
    pub fn new(length: usize) -> Result<Self> {
        if length < 2 {
            bail!("adx length must be >= 2, got {length}");
        }
        Ok(Self {
            length,
            alpha: 1.0 / length as f64,
            prev: None,
            tr_buf: Vec::with_capacity(length),
            plus_dm_buf: Vec::with_capacity(length),
            minus_dm_buf: Vec::with_capacity(length),
            atr: None,
            plus_dm_avg: None,
            minus_dm_avg: None,
            dx_buf: Vec::with_capacity(length),
            adx: None,
        })
    }

    pub fn update(&mut self, high: f64, low: f64, close: f64) -> IndicatorSnapshot<f64> {
        let Some((prev_high, prev_low, prev_close)) = self.prev else {
            self.prev = Some((high, low, close));
            return self.snapshot();
        };
        self.prev = Some((high, low, close));

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        let plus_dm = if high > prev_high && low > prev_low {
            (high - prev_high).max(0.0)
        } else {
            0.0
        };
        let minus_dm = if low < prev_low && high < prev_high {
            (prev_low - low).max(0.0)
        } else {
            0.0
        };

        if self.atr.is_none() {
            self.tr_buf.push(tr);
            self.plus_dm_buf.push(plus_dm);
            self.minus_dm_buf.push(minus_dm);
            if self.tr_buf.len() == self.length {
                let n = self.length as f64;
                self.atr = Some(self.tr_buf.iter().sum::<f64>() / n);
                self.plus_dm_avg = Some(self.plus_dm_buf.iter().sum::<f64>() / n);
                self.minus_dm_avg = Some(self.minus_dm_buf.iter().sum::<f64>() / n);
                self.accumulate_dx();
            }
        } else {
            let atr = self.atr.unwrap();
            let plus_avg = self.plus_dm_avg.unwrap();
            let minus_avg = self.minus_dm_avg.unwrap();
            self.atr = Some(tr * self.alpha + atr * (1.0 - self.alpha));
            self.plus_dm_avg = Some(plus_dm * self.alpha + plus_avg * (1.0 - self.alpha));
            self.minus_dm_avg = Some(minus_dm * self.alpha + minus_avg * (1.0 - self.alpha));
            self.accumulate_dx();
        }

        self.snapshot()
    }

    fn compute_dx(&self) -> Option<f64> {
        let atr = self.atr?;
        if atr == 0.0 {
            return None;
        }
        let plus_di = 100.0 * self.plus_dm_avg? / atr;
        let minus_di = 100.0 * self.minus_dm_avg? / atr;
        let sum = plus_di + minus_di;
        if sum == 0.0 {
            return Some(0.0);
        }
        Some((plus_di - minus_di).abs() / sum * 100.0)
    }

    fn accumulate_dx(&mut self) {
        let Some(dx) = self.compute_dx() else {
            return;
        };
        match self.adx {
            None => {
                self.dx_buf.push(dx);
                if self.dx_buf.len() == self.length {
                    self.adx = Some(self.dx_buf.iter().sum::<f64>() / self.length as f64);
                }
            }
            Some(adx) => {
                self.adx = Some(dx * self.alpha + adx * (1.0 - self.alpha));
            }
        }
    }

    pub fn snapshot(&self) -> IndicatorSnapshot<f64> {
        match self.adx {
            Some(v) => IndicatorSnapshot::Ready(v),
            None => IndicatorSnapshot::Warming,
        }
    }

    /// True once ADX is set and exceeds `threshold`.
    pub fn is_trending(&self, threshold: f64) -> bool {
        self.adx.map(|v| v > threshold).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_length_below_two() {
        assert!(Adx::new(1).is_err());
    }

    #[test]
    fn warming_until_both_stages_fill() {
        let mut adx = Adx::new(3).unwrap();
        let mut price = 100.0;
        for _ in 0..5 {
            price += 1.0;
            let out = adx.update(price + 0.5, price - 0.5, price);
            assert_eq!(out, IndicatorSnapshot::Warming);
        }
    }

    #[test]
    fn becomes_ready_for_a_strong_trend() {
        let mut adx = Adx::new(5).unwrap();
        let mut price = 100.0;
        let mut last = IndicatorSnapshot::Warming;
        for _ in 0..40 {
            price += 1.0;
            last = adx.update(price + 0.5, price - 0.5, price);
        }
        assert!(last.is_ready());
        assert!(adx.is_trending(20.0));
    }

    #[test]
    fn flat_market_never_trends() {
        let mut adx = Adx::new(4).unwrap();
        let mut last = IndicatorSnapshot::Warming;
        for _ in 0..40 {
            last = adx.update(100.5, 99.5, 100.0);
        }
        assert!(last.is_ready());
        assert!(!adx.is_trending(20.0));
    }

    #[test]
    fn is_trending_false_while_warming() {
        let adx = Adx::new(5).unwrap();
        assert!(!adx.is_trending(0.0));
    }
}
