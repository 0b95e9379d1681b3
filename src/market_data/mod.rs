pub mod bar_builder;
pub mod tick_stream;

pub use bar_builder::{BarBuilder, PushOutcome};
pub use tick_stream::{BinanceAggTradeStream, InMemoryTickSource, TickEvent, TickSource};
