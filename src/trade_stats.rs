// =============================================================================
// Trade Statistics — per-trade PnL accounting and rolling metrics
// =============================================================================

use tracing::info;

use crate::types::{CloseReason, PositionSide, TradeRecord};

/// A trade still open, started but not yet closed.
#[derive(Debug, Clone, Copy)]
struct PendingTrade {
    side: PositionSide,
    entry_price: f64,
    size: f64,
    leverage: f64,
    opened_at: i64,
}

/// Aggregate metrics computed over every closed trade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeMetrics {
    pub total_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub max_drawdown: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

/// Owns the append-only trade log and derives rolling performance metrics.
pub struct TradeStats {
    pending: Option<PendingTrade>,
    records: Vec<TradeRecord>,
}

impl TradeStats {
    pub fn new() -> Self {
        Self {
            pending: None,
            records: Vec::new(),
        }
    }

    pub fn start_trade(&mut self, side: PositionSide, entry_price: f64, size: f64, leverage: f64, opened_at: i64) {
        self.pending = Some(PendingTrade {
            side,
            entry_price,
            size,
            leverage,
            opened_at,
        });
    }

    /// Finalize the pending trade. No-op (returns `None`) if nothing is open.
    pub fn close_trade(&mut self, exit_price: f64, reason: CloseReason, closed_at: i64) -> Option<TradeRecord> {
        let pending = self.pending.take()?;

        let price_diff = match pending.side {
            PositionSide::Long => exit_price - pending.entry_price,
            PositionSide::Short => pending.entry_price - exit_price,
            PositionSide::Flat => 0.0,
        };
        let pnl = price_diff * pending.size;
        let pnl_pct = if pending.entry_price > 0.0 {
            (price_diff / pending.entry_price) * 100.0 * pending.leverage
        } else {
            0.0
        };

        let record = TradeRecord {
            side: pending.side,
            entry_price: pending.entry_price,
            exit_price,
            size: pending.size,
            leverage: pending.leverage,
            opened_at: pending.opened_at,
            closed_at,
            pnl,
            pnl_pct,
            close_reason: reason,
        };

        info!(
            side = ?record.side,
            entry_price = record.entry_price,
            exit_price = record.exit_price,
            pnl = record.pnl,
            pnl_pct = record.pnl_pct,
            reason = %record.close_reason,
            "trade closed"
        );

        self.records.push(record);
        Some(record)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn records(&self) -> &[TradeRecord] {
        &self.records
    }

    /// Compute aggregate metrics over every trade closed so far.
    pub fn metrics(&self) -> TradeMetrics {
        let total_trades = self.records.len();
        if total_trades == 0 {
            return TradeMetrics {
                total_trades: 0,
                win_rate: 0.0,
                total_pnl: 0.0,
                avg_win: 0.0,
                avg_loss: 0.0,
                profit_factor: 0.0,
                max_drawdown: 0.0,
                largest_win: 0.0,
                largest_loss: 0.0,
            };
        }

        let wins: Vec<f64> = self.records.iter().map(|r| r.pnl).filter(|&p| p > 0.0).collect();
        let losses: Vec<f64> = self.records.iter().map(|r| r.pnl).filter(|&p| p < 0.0).collect();

        let total_pnl: f64 = self.records.iter().map(|r| r.pnl).sum();
        let win_rate = wins.len() as f64 / total_trades as f64;

        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().map(|p| p.abs()).sum();

        let avg_win = if wins.is_empty() { 0.0 } else { gross_profit / wins.len() as f64 };
        let avg_loss = if losses.is_empty() { 0.0 } else { gross_loss / losses.len() as f64 };

        let profit_factor = if gross_profit == 0.0 {
            0.0
        } else if gross_loss == 0.0 {
            f64::INFINITY
        } else {
            gross_profit / gross_loss
        };

        let largest_win = wins.iter().cloned().fold(0.0_f64, f64::max);
        let largest_loss = losses.iter().cloned().fold(0.0_f64, f64::min);

        let mut running = 0.0_f64;
        let mut peak = 0.0_f64;
        let mut max_drawdown = 0.0_f64;
        for r in &self.records {
            running += r.pnl;
            peak = peak.max(running);
            max_drawdown = max_drawdown.max(peak - running);
        }

        TradeMetrics {
            total_trades,
            win_rate,
            total_pnl,
            avg_win,
            avg_loss,
            profit_factor,
            max_drawdown,
            largest_win,
            largest_loss,
        }
    }
}

impl Default for TradeStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_without_a_pending_trade_is_a_no_op() {
        let mut stats = TradeStats::new();
        assert!(stats.close_trade(100.0, CloseReason::Manual, 0).is_none());
    }

    #[test]
    fn long_trade_pnl_and_pnl_pct() {
        let mut stats = TradeStats::new();
        stats.start_trade(PositionSide::Long, 100.0, 2.0, 5.0, 0);
        let rec = stats.close_trade(110.0, CloseReason::TakeProfit, 100).unwrap();
        assert_eq!(rec.pnl, 20.0);
        assert_eq!(rec.pnl_pct, 50.0);
    }

    #[test]
    fn short_trade_pnl_sign_is_inverted() {
        let mut stats = TradeStats::new();
        stats.start_trade(PositionSide::Short, 100.0, 1.0, 1.0, 0);
        let rec = stats.close_trade(90.0, CloseReason::TakeProfit, 100).unwrap();
        assert_eq!(rec.pnl, 10.0);
    }

    #[test]
    fn profit_factor_infinite_with_no_losses() {
        let mut stats = TradeStats::new();
        stats.start_trade(PositionSide::Long, 100.0, 1.0, 1.0, 0);
        stats.close_trade(110.0, CloseReason::TakeProfit, 1).unwrap();
        let m = stats.metrics();
        assert_eq!(m.profit_factor, f64::INFINITY);
    }

    #[test]
    fn profit_factor_zero_with_no_wins() {
        let mut stats = TradeStats::new();
        stats.start_trade(PositionSide::Long, 100.0, 1.0, 1.0, 0);
        stats.close_trade(90.0, CloseReason::StopLoss, 1).unwrap();
        let m = stats.metrics();
        assert_eq!(m.profit_factor, 0.0);
    }

    #[test]
    fn max_drawdown_tracks_the_largest_peak_to_trough_dip() {
        let mut stats = TradeStats::new();
        for (entry, exit) in [(100.0, 110.0), (110.0, 100.0), (100.0, 90.0), (90.0, 120.0)] {
            stats.start_trade(PositionSide::Long, entry, 1.0, 1.0, 0);
            stats.close_trade(exit, CloseReason::Manual, 1).unwrap();
        }
        // running pnl: +10, 0, -10, +20 -> peak 10 at step1, trough -10 at step3: drawdown 20
        let m = stats.metrics();
        assert_eq!(m.max_drawdown, 20.0);
    }

    #[test]
    fn win_rate_and_total_pnl() {
        let mut stats = TradeStats::new();
        stats.start_trade(PositionSide::Long, 100.0, 1.0, 1.0, 0);
        stats.close_trade(110.0, CloseReason::TakeProfit, 1).unwrap();
        stats.start_trade(PositionSide::Long, 100.0, 1.0, 1.0, 0);
        stats.close_trade(95.0, CloseReason::StopLoss, 1).unwrap();
        let m = stats.metrics();
        assert_eq!(m.total_trades, 2);
        assert_eq!(m.win_rate, 0.5);
        assert_eq!(m.total_pnl, 5.0);
    }
}
