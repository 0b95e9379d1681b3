pub mod client;

pub use client::{BinanceFuturesClient, ExchangeClient};
