pub mod order_tracker;
pub mod state;

pub use order_tracker::OrderTracker;
pub use state::{LocalPositionState, PositionSnapshot, PositionStateManager, ReconcileOutcome};
