//! Trade lifecycle module
//!
//! Per-symbol position state machine: entry gating, sizing, and
//! TP/SL/timeout exits, plus the realized-PnL ledger.

mod lifecycle;

pub use lifecycle::TradeLifecycle;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

/// Why a position was closed, in trigger-priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    Timeout,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TakeProfit => "take_profit",
            CloseReason::StopLoss => "stop_loss",
            CloseReason::Timeout => "timeout",
        }
    }
}

/// An open position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Position identifier
    pub id: Uuid,
    /// Trading symbol
    pub symbol: String,
    /// Trade side
    pub side: Side,
    /// Mid price at entry
    pub entry_price: Decimal,
    /// Notional size in USD
    pub lot_size_usd: Decimal,
    /// Risk-scaled stop-loss fraction (negative); overrides the symbol's
    /// configured stop-loss rate
    pub dynamic_stop_loss: Option<Decimal>,
    /// Entry timestamp
    pub entry_time: DateTime<Utc>,
}

/// A closed trade record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    /// Original position
    pub position: Position,
    /// Price at close
    pub exit_price: Decimal,
    /// Close timestamp
    pub exit_time: DateTime<Utc>,
    /// Signed price-change fraction in the position's favor
    pub pnl_ratio: Decimal,
    /// Round-trip fees deducted
    pub fees_usd: Decimal,
    /// Realized PnL after fees
    pub net_pnl_usd: Decimal,
    /// Trigger that closed the position
    pub reason: CloseReason,
}

/// Realized-PnL accounting, owned by one lifecycle instance
#[derive(Debug, Clone)]
pub struct Ledger {
    /// Current paper balance
    pub balance_usd: Decimal,
    /// Sum of closed pnl ratios, in percent
    pub cumulative_pnl_pct: Decimal,
    /// Closed trades with strictly positive net PnL
    pub win_count: u64,
    /// Closed trades with strictly negative net PnL
    pub loss_count: u64,
    /// Last close time per symbol, for cooldown enforcement
    pub last_exit: HashMap<String, DateTime<Utc>>,
}

impl Ledger {
    pub fn new(balance_usd: Decimal) -> Self {
        Self {
            balance_usd,
            cumulative_pnl_pct: Decimal::ZERO,
            win_count: 0,
            loss_count: 0,
            last_exit: HashMap::new(),
        }
    }
}
