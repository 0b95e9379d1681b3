// =============================================================================
// Streaming technical indicators
// =============================================================================
//
// Each indicator owns its accumulator state and exposes `update` +
// `snapshot`, returning an [`crate::types::IndicatorSnapshot`] rather than a
// nullable scalar so "not yet warm" can never be confused with a legitimate
// zero value.

pub mod adx;
pub mod ema;
pub mod rsi;

pub use adx::Adx;
pub use ema::Ema;
pub use rsi::Rsi;
