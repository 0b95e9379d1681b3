// =============================================================================
// Position State Manager — local/exchange reconciliation with freeze policy
// =============================================================================
//
// The local view is the source of truth between polls. Every poll either
// confirms it, overrides it when the exchange unambiguously disagrees (flat
// vs. non-flat), or counts as a reconciliation failure. Two consecutive
// failures make the caller eligible to freeze new entries.
// =============================================================================

use tracing::{info, warn};

use crate::types::PositionSide;

/// Tolerance below which two position sizes are considered equal.
const SIZE_TOLERANCE: f64 = 1e-4;
/// Relative tolerance below which two average-entry prices are considered equal.
const ENTRY_TOLERANCE_PCT: f64 = 0.01;
/// Consecutive reconciliation failures before the caller should freeze.
pub const MAX_RECONCILE_FAILURES: u32 = 2;

/// Raw position fields as reported by the exchange's position-risk endpoint.
#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    /// Signed position amount as a string, e.g. `"0"`, `"1.500"`, `"-0.25"`.
    pub position_amt: String,
    pub entry_price: f64,
    pub mark_price: f64,
    pub un_realized_profit: f64,
    pub leverage: f64,
    pub symbol: String,
}

/// The orchestrator's own view of the current position between polls.
#[derive(Debug, Clone, Copy)]
pub struct LocalPositionState {
    pub size: f64,
    pub side: PositionSide,
    pub avg_entry: f64,
    pub unrealized_pnl: f64,
    pub last_update: i64,
    pub pending_order: bool,
}

impl LocalPositionState {
    fn flat(now: i64) -> Self {
        Self {
            size: 0.0,
            side: PositionSide::Flat,
            avg_entry: 0.0,
            unrealized_pnl: 0.0,
            last_update: now,
            pending_order: false,
        }
    }
}

/// Outcome of a single `update_from_rest` reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Local and exchange agreed within tolerance.
    Reconciled,
    /// Exchange was flat while local wasn't — externally closed, local overwritten.
    OverrideFlat,
    /// Exchange was non-flat while local was flat — restart or external open, local overwritten.
    OverrideOpened,
    /// Neither side nor an override rule applied; a failure was recorded.
    Failed,
}

impl ReconcileOutcome {
    /// Matches spec.md's `updateFromRest -> bool`: true unless a plain failure.
    pub fn matched(self) -> bool {
        !matches!(self, Self::Failed)
    }
}

pub struct PositionStateManager {
    local: LocalPositionState,
    failure_count: u32,
}

impl PositionStateManager {
    pub fn new(now: i64) -> Self {
        Self {
            local: LocalPositionState::flat(now),
            failure_count: 0,
        }
    }

    pub fn local(&self) -> LocalPositionState {
        self.local
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// True once two consecutive reconciliation failures have been recorded.
    pub fn freeze_eligible(&self) -> bool {
        self.failure_count >= MAX_RECONCILE_FAILURES
    }

    /// Overwrite the local view after a confirmed fill (optimistic entry).
    pub fn set_from_fill(&mut self, side: PositionSide, size: f64, avg_entry: f64, now: i64) {
        self.local = LocalPositionState {
            size,
            side,
            avg_entry,
            unrealized_pnl: 0.0,
            last_update: now,
            pending_order: self.local.pending_order,
        };
    }

    /// Overwrite the local view to flat (after a confirmed close).
    pub fn set_flat(&mut self, now: i64) {
        self.local = LocalPositionState::flat(now);
    }

    pub fn mark_pending_order(&mut self, pending: bool) {
        self.local.pending_order = pending;
    }

    pub fn reset_failures(&mut self) {
        self.failure_count = 0;
    }

    /// Reconcile the local view against a polled exchange snapshot.
    pub fn update_from_rest(&mut self, snap: &PositionSnapshot, now: i64) -> ReconcileOutcome {
        let position_amt: f64 = snap.position_amt.parse().unwrap_or(0.0);
        let rest_size = position_amt.abs();
        let rest_side = if position_amt > 0.0 {
            PositionSide::Long
        } else if position_amt < 0.0 {
            PositionSide::Short
        } else {
            PositionSide::Flat
        };

        let size_match = (rest_size - self.local.size).abs() < SIZE_TOLERANCE;
        let side_match = rest_side == self.local.side;
        let both_flat = rest_side.is_flat() && self.local.side.is_flat();

        let entry_match = both_flat
            || snap.entry_price == 0.0
            || ((snap.entry_price - self.local.avg_entry) / snap.entry_price).abs() < ENTRY_TOLERANCE_PCT;

        let reconciled = size_match && side_match && entry_match;

        if reconciled {
            self.overwrite_from_rest(rest_side, rest_size, snap, now);
            self.failure_count = 0;
            info!(symbol = %snap.symbol, side = ?rest_side, size = rest_size, "position reconciled");
            return ReconcileOutcome::Reconciled;
        }

        if rest_side.is_flat() && !self.local.side.is_flat() {
            warn!(
                symbol = %snap.symbol,
                local_side = ?self.local.side,
                local_size = self.local.size,
                "exchange reports flat while local holds a position — trusting exchange"
            );
            self.overwrite_from_rest(rest_side, rest_size, snap, now);
            self.failure_count = 0;
            return ReconcileOutcome::OverrideFlat;
        }

        if !rest_side.is_flat() && self.local.side.is_flat() {
            warn!(
                symbol = %snap.symbol,
                rest_side = ?rest_side,
                rest_size,
                "exchange reports a position while local is flat — trusting exchange"
            );
            self.overwrite_from_rest(rest_side, rest_size, snap, now);
            self.failure_count = 0;
            return ReconcileOutcome::OverrideOpened;
        }

        self.failure_count += 1;
        warn!(
            symbol = %snap.symbol,
            local_side = ?self.local.side,
            local_size = self.local.size,
            rest_side = ?rest_side,
            rest_size,
            failure_count = self.failure_count,
            "reconciliation failed — local and exchange disagree"
        );
        ReconcileOutcome::Failed
    }

    fn overwrite_from_rest(&mut self, side: PositionSide, size: f64, snap: &PositionSnapshot, now: i64) {
        self.local = LocalPositionState {
            size,
            side,
            avg_entry: if side.is_flat() { 0.0 } else { snap.entry_price },
            unrealized_pnl: snap.un_realized_profit,
            last_update: now,
            pending_order: false,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(amt: &str, entry: f64) -> PositionSnapshot {
        PositionSnapshot {
            position_amt: amt.to_string(),
            entry_price: entry,
            mark_price: entry,
            un_realized_profit: 0.0,
            leverage: 10.0,
            symbol: "BTCUSDT".to_string(),
        }
    }

    #[test]
    fn idempotent_reconciliation_of_unchanged_flat_snapshot() {
        let mut mgr = PositionStateManager::new(0);
        let s = snap("0", 0.0);
        assert_eq!(mgr.update_from_rest(&s, 1), ReconcileOutcome::Reconciled);
        assert_eq!(mgr.failure_count(), 0);
        assert_eq!(mgr.update_from_rest(&s, 2), ReconcileOutcome::Reconciled);
        assert_eq!(mgr.failure_count(), 0);
    }

    #[test]
    fn s6_override_to_flat_when_exchange_disagrees() {
        let mut mgr = PositionStateManager::new(0);
        mgr.set_from_fill(PositionSide::Long, 100.0, 50_000.0, 1);
        mgr.mark_pending_order(true);

        let outcome = mgr.update_from_rest(&snap("0", 0.0), 2);
        assert_eq!(outcome, ReconcileOutcome::OverrideFlat);
        assert!(outcome.matched());
        assert_eq!(mgr.local().side, PositionSide::Flat);
        assert_eq!(mgr.failure_count(), 0);
    }

    #[test]
    fn override_opened_when_local_flat_but_exchange_has_position() {
        let mut mgr = PositionStateManager::new(0);
        let outcome = mgr.update_from_rest(&snap("2.0", 100.0), 1);
        assert_eq!(outcome, ReconcileOutcome::OverrideOpened);
        assert_eq!(mgr.local().side, PositionSide::Long);
        assert_eq!(mgr.local().size, 2.0);
    }

    #[test]
    fn two_consecutive_failures_mark_freeze_eligible() {
        let mut mgr = PositionStateManager::new(0);
        mgr.set_from_fill(PositionSide::Long, 100.0, 50_000.0, 1);

        // Exchange disagrees on size but both sides are non-flat.
        let bad = snap("1.5", 50_000.0);
        assert_eq!(mgr.update_from_rest(&bad, 2), ReconcileOutcome::Failed);
        assert!(!mgr.freeze_eligible());
        assert_eq!(mgr.update_from_rest(&bad, 3), ReconcileOutcome::Failed);
        assert!(mgr.freeze_eligible());
    }

    #[test]
    fn entry_price_tolerance_within_one_percent_reconciles() {
        let mut mgr = PositionStateManager::new(0);
        mgr.set_from_fill(PositionSide::Long, 1.0, 100.0, 1);
        let outcome = mgr.update_from_rest(&snap("1.0", 100.5), 2);
        assert_eq!(outcome, ReconcileOutcome::Reconciled);
    }
}
