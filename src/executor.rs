// =============================================================================
// Executor — mode-agnostic order entry/exit, dry-run implementation
// =============================================================================
//
// One trait, two implementations: the orchestrator never branches on mode
// itself, only the balance-check bypass in `enter_position` (handled by the
// caller, not here). A live implementation would forward these calls to
// `exchange::client::BinanceFuturesClient::place_order`-equivalent endpoints;
// it is out of scope here, same as the teacher's `execution.rs::execute_live`
// is the only branch that talks to Binance.
// =============================================================================

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::types::{CloseReason, TradeInstruction};

#[async_trait]
pub trait Executor: Send + Sync {
    async fn enter_long(&self, order: TradeInstruction) -> anyhow::Result<String>;
    async fn enter_short(&self, order: TradeInstruction) -> anyhow::Result<String>;
    async fn close_position(&self, reason: CloseReason, price: f64) -> anyhow::Result<String>;
}

/// A single simulated fill, recorded in-memory by [`DryRunExecutor`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedFill {
    pub order: TradeInstruction,
    pub fill_id: u64,
}

/// Paper-trading executor: records fills in-memory, never touches the
/// network. The default mode the bot starts in.
#[derive(Default)]
pub struct DryRunExecutor {
    fills: RwLock<Vec<SimulatedFill>>,
    next_id: RwLock<u64>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fills(&self) -> Vec<SimulatedFill> {
        self.fills.read().clone()
    }

    fn record(&self, order: TradeInstruction) -> u64 {
        let mut id_guard = self.next_id.write();
        *id_guard += 1;
        let fill_id = *id_guard;
        self.fills.write().push(SimulatedFill { order, fill_id });
        fill_id
    }
}

#[async_trait]
impl Executor for DryRunExecutor {
    async fn enter_long(&self, order: TradeInstruction) -> anyhow::Result<String> {
        let fill_id = self.record(order);
        let order_id = format!("dryrun-long-{fill_id}");
        info!(order_id = %order_id, price = order.price, size = order.size, "simulated long entry");
        Ok(order_id)
    }

    async fn enter_short(&self, order: TradeInstruction) -> anyhow::Result<String> {
        let fill_id = self.record(order);
        let order_id = format!("dryrun-short-{fill_id}");
        info!(order_id = %order_id, price = order.price, size = order.size, "simulated short entry");
        Ok(order_id)
    }

    async fn close_position(&self, reason: CloseReason, price: f64) -> anyhow::Result<String> {
        let order_id = format!("dryrun-close-{}", Uuid::new_v4());
        info!(order_id = %order_id, reason = %reason, price, "simulated position close");
        Ok(order_id)
    }
}

/// Classify an executor error as an insufficient-balance failure (recoverable:
/// the orchestrator logs and skips the signal) rather than a network error
/// (propagated). Matches Binance's `-2019`/`-2010` codes and any message
/// mentioning "balance"/"insufficient", the same textual classification the
/// teacher applies to exchange error bodies in `reconcile.rs`/`execution.rs`.
pub fn is_insufficient_balance_error(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("-2019") || msg.contains("-2010") || msg.contains("balance") || msg.contains("insufficient")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PositionSide, SignalReason};

    fn order(side: PositionSide) -> TradeInstruction {
        TradeInstruction {
            side,
            size: 10.0,
            leverage: 5.0,
            price: 100.0,
            signal_reason: SignalReason::LongTrigger,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn dry_run_records_entries_without_network() {
        let exec = DryRunExecutor::new();
        exec.enter_long(order(PositionSide::Long)).await.unwrap();
        exec.enter_short(order(PositionSide::Short)).await.unwrap();
        assert_eq!(exec.fills().len(), 2);
    }

    #[tokio::test]
    async fn dry_run_close_always_succeeds() {
        let exec = DryRunExecutor::new();
        let id = exec.close_position(CloseReason::TakeProfit, 105.0).await.unwrap();
        assert!(id.starts_with("dryrun-close-"));
    }

    #[test]
    fn recognizes_balance_error_codes_and_text() {
        assert!(is_insufficient_balance_error(&anyhow::anyhow!("code -2019: margin is insufficient")));
        assert!(is_insufficient_balance_error(&anyhow::anyhow!("code -2010: Account has insufficient balance")));
        assert!(is_insufficient_balance_error(&anyhow::anyhow!("Insufficient balance for this action")));
        assert!(!is_insufficient_balance_error(&anyhow::anyhow!("connection reset by peer")));
    }
}
