//! Quote feed module
//!
//! Streams best bid/ask quotes for the configured symbols

mod binance;

pub use binance::BinanceFeed;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Best bid/ask quote for a single symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookQuote {
    /// Trading symbol (e.g. "ETHUSDT")
    pub symbol: String,
    /// Best bid price
    pub bid_price: Decimal,
    /// Quantity resting at the best bid
    pub bid_qty: Decimal,
    /// Best ask price
    pub ask_price: Decimal,
    /// Quantity resting at the best ask
    pub ask_qty: Decimal,
    /// Local timestamp when the quote was received
    pub timestamp: DateTime<Utc>,
}

/// Trait for quote feed implementations
///
/// The single receiver preserves arrival order, which downstream feature
/// deltas depend on.
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    /// Subscribe to the stream of quotes
    async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<BookQuote>>;
}
