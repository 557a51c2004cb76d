//! Market state tracking module
//!
//! Turns raw bookTicker quotes into per-symbol features: order-book
//! imbalance, its rate of change, depth, rolling volatility, and rolling
//! correlation with the reference symbol.

mod tracker;

pub use tracker::FeatureTracker;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-symbol market state snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketState {
    /// Normalized bid/ask quantity imbalance, in [-1, 1]
    pub imbalance: f64,
    /// Change in imbalance since the previous quote (0 on first observation)
    pub imbalance_delta: f64,
    /// Total quantity at the best bid and ask
    pub total_depth: f64,
    /// Standard deviation of simple returns over the price window
    pub volatility: f64,
    /// Pearson correlation with the reference symbol's price window
    pub ref_correlation: f64,
    /// Mid price of the most recent quote
    pub last_price: Decimal,
}

/// Rate-limited state sample emitted for the training collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSample {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub imbalance: f64,
    pub imbalance_change: f64,
    pub total_depth: f64,
    pub price: Decimal,
    pub ref_price: Decimal,
    pub volatility: f64,
    pub ref_corr: f64,
}
