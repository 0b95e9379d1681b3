pub mod hybrid_engine;
pub mod trend_engine;

pub use hybrid_engine::HybridEngine;
pub use trend_engine::{TrendEngine, TrendEngineConfig};
