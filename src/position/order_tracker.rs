// =============================================================================
// Order Tracker — pending-order bookkeeping with timeout
// =============================================================================

use std::collections::HashMap;

use tracing::{info, warn};

use crate::types::PositionSide;

/// How long an order may remain unconfirmed before it is purged.
pub const ORDER_EXPIRY_MS: i64 = 30_000;
/// Tolerance for matching a pending order's size against an observed fill.
const SIZE_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, Copy)]
pub struct PendingOrder {
    pub side: PositionSide,
    pub size: f64,
    pub price: f64,
    pub timestamp: i64,
    pub confirmed: bool,
    pub confirmed_at: Option<i64>,
}

/// Tracks pending orders keyed by an opaque identifier, with a 30s expiry
/// for orders that never get confirmed by an observed position change.
#[derive(Default)]
pub struct OrderTracker {
    orders: HashMap<String, PendingOrder>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self {
            orders: HashMap::new(),
        }
    }

    /// Register a new pending order.
    pub fn track_order(&mut self, id: impl Into<String>, side: PositionSide, size: f64, price: f64, timestamp: i64) {
        let id = id.into();
        info!(order_id = %id, ?side, size, price, "order tracked, pending confirmation");
        self.orders.insert(
            id,
            PendingOrder {
                side,
                size,
                price,
                timestamp,
                confirmed: false,
                confirmed_at: None,
            },
        );
    }

    /// Find the first unconfirmed order matching `side` and `|size - observed| < tolerance`,
    /// mark it confirmed, and return its id.
    pub fn confirm_by_position_change(&mut self, side: PositionSide, observed_size: f64, now: i64) -> Option<String> {
        let found = self.orders.iter().find_map(|(id, order)| {
            if !order.confirmed && order.side == side && (order.size - observed_size).abs() < SIZE_TOLERANCE {
                Some(id.clone())
            } else {
                None
            }
        })?;

        if let Some(order) = self.orders.get_mut(&found) {
            order.confirmed = true;
            order.confirmed_at = Some(now);
            info!(order_id = %found, "pending order confirmed by observed position change");
        }
        Some(found)
    }

    /// Remove every unconfirmed order older than 30s. Returns the purged ids.
    pub fn purge_expired(&mut self, now: i64) -> Vec<String> {
        let expired: Vec<String> = self
            .orders
            .iter()
            .filter(|(_, o)| !o.confirmed && now - o.timestamp >= ORDER_EXPIRY_MS)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            warn!(order_id = %id, "pending order expired unconfirmed after 30s — purging");
            self.orders.remove(id);
        }
        expired
    }

    /// Remove every unconfirmed order outright (used when the rest snapshot
    /// goes flat and there is nothing left to confirm against).
    pub fn clear_unconfirmed(&mut self) {
        self.orders.retain(|_, o| o.confirmed);
    }

    pub fn get(&self, id: &str) -> Option<&PendingOrder> {
        self.orders.get(id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirms_matching_order_by_side_and_size() {
        let mut tracker = OrderTracker::new();
        tracker.track_order("order-1", PositionSide::Long, 10.0, 100.0, 0);
        let confirmed = tracker.confirm_by_position_change(PositionSide::Long, 10.0, 500);
        assert_eq!(confirmed, Some("order-1".to_string()));
        assert!(tracker.get("order-1").unwrap().confirmed);
    }

    #[test]
    fn does_not_confirm_mismatched_side() {
        let mut tracker = OrderTracker::new();
        tracker.track_order("order-1", PositionSide::Long, 10.0, 100.0, 0);
        assert_eq!(tracker.confirm_by_position_change(PositionSide::Short, 10.0, 500), None);
    }

    #[test]
    fn expired_orders_are_purged_after_30s() {
        let mut tracker = OrderTracker::new();
        tracker.track_order("order-1", PositionSide::Long, 10.0, 100.0, 0);
        assert!(tracker.purge_expired(29_999).is_empty());
        let purged = tracker.purge_expired(30_000);
        assert_eq!(purged, vec!["order-1".to_string()]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn confirmed_orders_are_never_purged() {
        let mut tracker = OrderTracker::new();
        tracker.track_order("order-1", PositionSide::Long, 10.0, 100.0, 0);
        tracker.confirm_by_position_change(PositionSide::Long, 10.0, 10);
        assert!(tracker.purge_expired(1_000_000).is_empty());
    }

    #[test]
    fn clear_unconfirmed_drops_only_unconfirmed() {
        let mut tracker = OrderTracker::new();
        tracker.track_order("a", PositionSide::Long, 1.0, 1.0, 0);
        tracker.track_order("b", PositionSide::Short, 2.0, 2.0, 0);
        tracker.confirm_by_position_change(PositionSide::Long, 1.0, 1);
        tracker.clear_unconfirmed();
        assert_eq!(tracker.len(), 1);
        assert!(tracker.get("a").is_some());
        assert!(tracker.get("b").is_none());
    }
}
