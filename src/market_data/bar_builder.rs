// =============================================================================
// Bar Builder — aggregates trade ticks into fixed-duration OHLCV bars
// =============================================================================
//
// Owns the open bar exclusively: once a bar closes it is handed out by value
// and is immutable from then on. The boundary tick (the one that crosses the
// timeframe edge) opens the next bar rather than being appended to the one
// that just closed.
// =============================================================================

use anyhow::{bail, Result};

use crate::types::{SyntheticBar, Tick};

/// Result of feeding one tick to the builder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PushOutcome {
    /// The bar that just closed, if this tick crossed the timeframe boundary.
    pub closed: Option<SyntheticBar>,
    /// The bar now open (freshly started, or the one this tick updated).
    pub current: SyntheticBar,
}

/// Aggregates a tick stream into fixed-duration OHLCV bars.
pub struct BarBuilder {
    timeframe_ms: i64,
    open: Option<SyntheticBar>,
}

impl BarBuilder {
    pub fn new(timeframe_ms: i64) -> Result<Self> {
        if timeframe_ms <= 0 {
            bail!("bar builder timeframe must be > 0, got {timeframe_ms}");
        }
        Ok(Self {
            timeframe_ms,
            open: None,
        })
    }

    /// Feed a single tick, returning the closed bar (if any) and the bar now
    /// open.
    pub fn push_tick(&mut self, tick: Tick) -> PushOutcome {
        let size = tick.size.unwrap_or(0.0);

        let Some(bar) = self.open else {
            let fresh = SyntheticBar::new(tick.timestamp, tick.price, size);
            self.open = Some(fresh);
            return PushOutcome {
                closed: None,
                current: fresh,
            };
        };

        if tick.timestamp - bar.start_time >= self.timeframe_ms {
            let fresh = SyntheticBar::new(tick.timestamp, tick.price, size);
            self.open = Some(fresh);
            return PushOutcome {
                closed: Some(bar),
                current: fresh,
            };
        }

        let mut updated = bar;
        updated.update(tick.timestamp, tick.price, size);
        self.open = Some(updated);
        PushOutcome {
            closed: None,
            current: updated,
        }
    }

    /// The bar currently being built, if any ticks have arrived yet.
    pub fn current(&self) -> Option<SyntheticBar> {
        self.open
    }
}
