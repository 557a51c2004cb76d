//! Trade lifecycle state machine

use super::{CloseReason, ClosedTrade, Ledger, Position, Side};
use crate::config::{TradingConfig, TradingConstraints};
use crate::telemetry::{self, GaugeMetric};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Per-symbol position state machine and ledger owner
///
/// A symbol is Idle until a signal clears the entry gate, Open until a tick
/// triggers an exit, then Idle-eligible again once the cooldown elapses.
pub struct TradeLifecycle {
    policy: TradingConfig,
    constraints: HashMap<String, TradingConstraints>,
    default_constraints: TradingConstraints,
    positions: HashMap<String, Position>,
    ledger: Ledger,
    trade_tx: Option<mpsc::Sender<ClosedTrade>>,
}

impl TradeLifecycle {
    /// Create a new lifecycle with the given policy and per-symbol overrides
    pub fn new(policy: TradingConfig, constraints: HashMap<String, TradingConstraints>) -> Self {
        let ledger = Ledger::new(policy.initial_balance_usd);
        Self {
            policy,
            constraints,
            default_constraints: TradingConstraints::default(),
            positions: HashMap::new(),
            ledger,
            trade_tx: None,
        }
    }

    /// Attach a sink for closed trades (persistence hook)
    pub fn with_trade_sink(mut self, tx: mpsc::Sender<ClosedTrade>) -> Self {
        self.trade_tx = Some(tx);
        self
    }

    /// Exit constraints for a symbol; unknown symbols get the built-in default
    pub fn constraints_for(&self, symbol: &str) -> &TradingConstraints {
        self.constraints
            .get(symbol)
            .unwrap_or(&self.default_constraints)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn open_position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    /// Gate a signal and possibly open a position
    ///
    /// Returns the opened position, or None when any gate fails; gate
    /// failures are the expected common case and never an error.
    pub fn on_signal(
        &mut self,
        symbol: &str,
        price: Decimal,
        expectancy: f64,
        risk: f64,
        now: DateTime<Utc>,
    ) -> Option<Position> {
        if self.positions.contains_key(symbol) {
            return None;
        }

        if let Some(last_exit) = self.ledger.last_exit.get(symbol) {
            if now - *last_exit < Duration::seconds(self.policy.cooldown_secs) {
                return None;
            }
        }

        let threshold =
            self.policy.entry_threshold_base + self.policy.entry_threshold_risk_coeff * risk;
        if expectancy.abs() <= threshold {
            return None;
        }

        if price <= Decimal::ZERO {
            return None;
        }

        // Fractional-Kelly sizing: expectancy is a percent, edge a fraction
        let edge = Decimal::try_from(expectancy / 100.0).ok()?;
        let lot_size_usd = (self.ledger.balance_usd
            * edge.abs()
            * self.policy.leverage
            * self.policy.safety_factor)
            .min(self.ledger.balance_usd * self.policy.max_balance_fraction);
        if lot_size_usd <= Decimal::ZERO {
            return None;
        }

        let sl_fraction = (risk / 100.0 * self.policy.risk_multiplier)
            .clamp(self.policy.min_stop_loss, self.policy.max_stop_loss);
        let dynamic_stop_loss = Decimal::try_from(sl_fraction).ok().map(|sl| -sl);

        let side = if expectancy > 0.0 {
            Side::Long
        } else {
            Side::Short
        };

        let position = Position {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            entry_price: price,
            lot_size_usd,
            dynamic_stop_loss,
            entry_time: now,
        };

        let previous = self.positions.insert(symbol.to_string(), position.clone());
        assert!(previous.is_none(), "duplicate open position for {symbol}");

        tracing::info!(
            symbol = %symbol,
            side = side.as_str(),
            price = %price,
            lot = %lot_size_usd,
            expectancy,
            risk,
            "position opened"
        );
        telemetry::increment_trades_opened();
        telemetry::set_gauge(GaugeMetric::OpenPositions, self.positions.len() as f64);

        Some(position)
    }

    /// Evaluate exit triggers for every open position with a known price
    ///
    /// Trigger priority is fixed for determinism: take-profit, then
    /// stop-loss, then timeout. Symbols without a current price are skipped
    /// and re-evaluated next tick.
    pub fn on_tick(
        &mut self,
        prices: &HashMap<String, Decimal>,
        now: DateTime<Utc>,
    ) -> Vec<ClosedTrade> {
        let mut due: Vec<(String, Decimal, Decimal, CloseReason)> = Vec::new();

        for (symbol, position) in &self.positions {
            let Some(&price) = prices.get(symbol) else {
                continue;
            };

            let change = (price - position.entry_price) / position.entry_price;
            let pnl_ratio = match position.side {
                Side::Long => change,
                Side::Short => -change,
            };

            let constraints = self
                .constraints
                .get(symbol)
                .unwrap_or(&self.default_constraints);
            let stop = position
                .dynamic_stop_loss
                .unwrap_or(-constraints.stop_loss_rate);

            let reason = if pnl_ratio >= constraints.take_profit_rate {
                Some(CloseReason::TakeProfit)
            } else if pnl_ratio <= stop {
                Some(CloseReason::StopLoss)
            } else if now - position.entry_time >= Duration::seconds(constraints.max_hold_secs) {
                Some(CloseReason::Timeout)
            } else {
                None
            };

            if let Some(reason) = reason {
                due.push((symbol.clone(), price, pnl_ratio, reason));
            }
        }

        let mut closed = Vec::with_capacity(due.len());
        for (symbol, exit_price, pnl_ratio, reason) in due {
            let position = self
                .positions
                .remove(&symbol)
                .expect("closing a position that is not open");

            let fees_usd = position.lot_size_usd * self.policy.fee_rate;
            let net_pnl_usd = position.lot_size_usd * pnl_ratio - fees_usd;

            self.ledger.balance_usd += net_pnl_usd;
            self.ledger.cumulative_pnl_pct += pnl_ratio * dec!(100);
            if net_pnl_usd > Decimal::ZERO {
                self.ledger.win_count += 1;
            } else if net_pnl_usd < Decimal::ZERO {
                self.ledger.loss_count += 1;
            }
            self.ledger.last_exit.insert(symbol.clone(), now);

            tracing::info!(
                symbol = %symbol,
                reason = reason.as_str(),
                exit_price = %exit_price,
                net_pnl = %net_pnl_usd,
                balance = %self.ledger.balance_usd,
                "position closed"
            );
            telemetry::increment_trades_closed(reason.as_str());
            telemetry::set_gauge(
                GaugeMetric::BalanceUsd,
                self.ledger.balance_usd.try_into().unwrap_or(0.0),
            );
            telemetry::set_gauge(GaugeMetric::OpenPositions, self.positions.len() as f64);
            telemetry::set_gauge(
                GaugeMetric::CumulativePnlPct,
                self.ledger.cumulative_pnl_pct.try_into().unwrap_or(0.0),
            );

            let trade = ClosedTrade {
                position,
                exit_price,
                exit_time: now,
                pnl_ratio,
                fees_usd,
                net_pnl_usd,
                reason,
            };
            if let Some(tx) = &self.trade_tx {
                let _ = tx.try_send(trade.clone());
            }
            closed.push(trade);
        }

        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn policy() -> TradingConfig {
        TradingConfig::default()
    }

    fn lifecycle() -> TradeLifecycle {
        TradeLifecycle::new(policy(), HashMap::new())
    }

    fn prices(symbol: &str, price: Decimal) -> HashMap<String, Decimal> {
        HashMap::from([(symbol.to_string(), price)])
    }

    #[test]
    fn test_signal_below_threshold_is_ignored() {
        let mut lifecycle = lifecycle();
        // threshold = 0.15 + 0.5 * 0.1 = 0.2
        let opened = lifecycle.on_signal("ETHUSDT", dec!(2500), 0.2, 0.1, Utc::now());
        assert!(opened.is_none());
        assert_eq!(lifecycle.open_count(), 0);
    }

    #[test]
    fn test_signal_above_threshold_opens_long() {
        let mut lifecycle = lifecycle();
        let now = Utc::now();
        let position = lifecycle
            .on_signal("ETHUSDT", dec!(2500), 0.5, 0.1, now)
            .unwrap();

        assert_eq!(position.side, Side::Long);
        assert_eq!(position.entry_price, dec!(2500));
        assert_eq!(position.entry_time, now);
        assert_eq!(lifecycle.open_count(), 1);
    }

    #[test]
    fn test_negative_expectancy_opens_short() {
        let mut lifecycle = lifecycle();
        let position = lifecycle
            .on_signal("ETHUSDT", dec!(2500), -0.5, 0.1, Utc::now())
            .unwrap();
        assert_eq!(position.side, Side::Short);
    }

    #[test]
    fn test_lot_sizing_and_cap() {
        let mut lifecycle = lifecycle();
        // balance 1000, edge 0.005, leverage 5, safety 0.5 -> 12.5
        let position = lifecycle
            .on_signal("ETHUSDT", dec!(2500), 0.5, 0.1, Utc::now())
            .unwrap();
        assert_eq!(position.lot_size_usd, dec!(12.5));

        // A huge expectancy hits the 20% balance cap
        let mut lifecycle = TradeLifecycle::new(policy(), HashMap::new());
        let position = lifecycle
            .on_signal("ETHUSDT", dec!(2500), 50.0, 0.1, Utc::now())
            .unwrap();
        assert_eq!(position.lot_size_usd, dec!(200));
    }

    #[test]
    fn test_dynamic_stop_loss_clamped() {
        let mut lifecycle = lifecycle();
        // risk 1.0 -> 1.0/100 * 1.5 = 0.015, inside [0.002, 0.02]
        let position = lifecycle
            .on_signal("ETHUSDT", dec!(2500), 5.0, 1.0, Utc::now())
            .unwrap();
        assert_eq!(position.dynamic_stop_loss, Some(dec!(-0.015)));

        // risk 10 -> 0.15 raw, clamps to max 0.02
        let mut lifecycle = TradeLifecycle::new(policy(), HashMap::new());
        let position = lifecycle
            .on_signal("SOLUSDT", dec!(150), 30.0, 10.0, Utc::now())
            .unwrap();
        assert_eq!(position.dynamic_stop_loss, Some(dec!(-0.02)));
    }

    #[test]
    fn test_at_most_one_position_per_symbol() {
        let mut lifecycle = lifecycle();
        let now = Utc::now();
        assert!(lifecycle.on_signal("ETHUSDT", dec!(2500), 5.0, 0.1, now).is_some());
        assert!(lifecycle.on_signal("ETHUSDT", dec!(2510), 9.0, 0.1, now).is_none());
        assert_eq!(lifecycle.open_count(), 1);

        // A different symbol is unaffected
        assert!(lifecycle.on_signal("SOLUSDT", dec!(150), 5.0, 0.1, now).is_some());
        assert_eq!(lifecycle.open_count(), 2);
    }

    #[test]
    fn test_take_profit_close() {
        let mut constraints = TradingConstraints::default();
        constraints.take_profit_rate = dec!(0.001);
        let mut lifecycle = TradeLifecycle::new(
            policy(),
            HashMap::from([("ETHUSDT".to_string(), constraints)]),
        );

        let entry = Utc::now();
        lifecycle.on_signal("ETHUSDT", dec!(100), 5.0, 0.1, entry).unwrap();

        // +0.15% clears the 0.1% take-profit
        let closed = lifecycle.on_tick(&prices("ETHUSDT", dec!(100.15)), entry + Duration::seconds(5));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, CloseReason::TakeProfit);
        assert_eq!(closed[0].pnl_ratio, dec!(0.0015));

        // net = lot * ratio - lot * fee
        let lot = closed[0].position.lot_size_usd;
        assert_eq!(closed[0].fees_usd, lot * dec!(0.0005));
        assert_eq!(closed[0].net_pnl_usd, lot * dec!(0.0015) - lot * dec!(0.0005));
        assert_eq!(lifecycle.open_count(), 0);
    }

    #[test]
    fn test_stop_loss_close_short() {
        let mut lifecycle = lifecycle();
        let entry = Utc::now();
        // Short position loses when price rises
        lifecycle.on_signal("ETHUSDT", dec!(100), -5.0, 1.0, entry).unwrap();

        // dynamic SL is -0.015; +2% move against the short trips it
        let closed = lifecycle.on_tick(&prices("ETHUSDT", dec!(102)), entry + Duration::seconds(5));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, CloseReason::StopLoss);
        assert!(closed[0].net_pnl_usd < Decimal::ZERO);
    }

    #[test]
    fn test_timeout_close() {
        let mut lifecycle = lifecycle();
        let entry = Utc::now();
        lifecycle.on_signal("ETHUSDT", dec!(100), 5.0, 0.1, entry).unwrap();

        // Flat price, past max_hold_secs (default 300)
        let closed = lifecycle.on_tick(&prices("ETHUSDT", dec!(100)), entry + Duration::seconds(301));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, CloseReason::Timeout);
        // Zero price change still pays the fee
        assert!(closed[0].net_pnl_usd < Decimal::ZERO);
    }

    #[test]
    fn test_take_profit_wins_over_timeout() {
        let mut lifecycle = lifecycle();
        let entry = Utc::now();
        lifecycle.on_signal("ETHUSDT", dec!(100), 5.0, 0.1, entry).unwrap();

        // Both TP and timeout hold; TP has priority
        let closed = lifecycle.on_tick(&prices("ETHUSDT", dec!(101)), entry + Duration::seconds(400));
        assert_eq!(closed[0].reason, CloseReason::TakeProfit);
    }

    #[test]
    fn test_missing_price_skips_position() {
        let mut lifecycle = lifecycle();
        let entry = Utc::now();
        lifecycle.on_signal("ETHUSDT", dec!(100), 5.0, 0.1, entry).unwrap();

        let closed = lifecycle.on_tick(&HashMap::new(), entry + Duration::seconds(400));
        assert!(closed.is_empty());
        assert_eq!(lifecycle.open_count(), 1);

        // The position closes normally on the next tick with a price
        let closed = lifecycle.on_tick(&prices("ETHUSDT", dec!(100)), entry + Duration::seconds(401));
        assert_eq!(closed.len(), 1);
    }

    #[test]
    fn test_cooldown_blocks_reentry() {
        let mut lifecycle = lifecycle();
        let entry = Utc::now();
        lifecycle.on_signal("ETHUSDT", dec!(100), 5.0, 0.1, entry).unwrap();

        let close_time = entry + Duration::seconds(301);
        lifecycle.on_tick(&prices("ETHUSDT", dec!(100)), close_time);

        // Within the 30s cooldown
        assert!(lifecycle
            .on_signal("ETHUSDT", dec!(100), 5.0, 0.1, close_time + Duration::seconds(10))
            .is_none());

        // After the cooldown
        assert!(lifecycle
            .on_signal("ETHUSDT", dec!(100), 5.0, 0.1, close_time + Duration::seconds(30))
            .is_some());
    }

    #[test]
    fn test_ledger_accounting() {
        let mut constraints = TradingConstraints::default();
        constraints.take_profit_rate = dec!(0.001);
        let mut lifecycle = TradeLifecycle::new(
            policy(),
            HashMap::from([("ETHUSDT".to_string(), constraints)]),
        );

        let entry = Utc::now();
        lifecycle.on_signal("ETHUSDT", dec!(100), 5.0, 0.1, entry).unwrap();
        let closed = lifecycle.on_tick(&prices("ETHUSDT", dec!(100.15)), entry + Duration::seconds(5));

        let ledger = lifecycle.ledger();
        assert_eq!(ledger.balance_usd, dec!(1000) + closed[0].net_pnl_usd);
        assert_eq!(ledger.cumulative_pnl_pct, dec!(0.15));
        assert_eq!(ledger.win_count, 1);
        assert_eq!(ledger.loss_count, 0);
        assert!(ledger.last_exit.contains_key("ETHUSDT"));
    }

    #[test]
    fn test_loss_counted_on_negative_net() {
        let mut lifecycle = lifecycle();
        let entry = Utc::now();
        lifecycle.on_signal("ETHUSDT", dec!(100), 5.0, 0.1, entry).unwrap();
        lifecycle.on_tick(&prices("ETHUSDT", dec!(100)), entry + Duration::seconds(301));

        let ledger = lifecycle.ledger();
        assert_eq!(ledger.win_count, 0);
        assert_eq!(ledger.loss_count, 1);
    }

    #[test]
    fn test_default_constraints_for_unknown_symbol() {
        let lifecycle = lifecycle();
        let constraints = lifecycle.constraints_for("UNKNOWN");
        assert_eq!(constraints.take_profit_rate, dec!(0.003));
        assert_eq!(constraints.max_hold_secs, 300);
    }

    #[tokio::test]
    async fn test_closed_trades_reach_sink() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut lifecycle = TradeLifecycle::new(policy(), HashMap::new()).with_trade_sink(tx);

        let entry = Utc::now();
        lifecycle.on_signal("ETHUSDT", dec!(100), 5.0, 0.1, entry).unwrap();
        lifecycle.on_tick(&prices("ETHUSDT", dec!(100)), entry + Duration::seconds(301));

        let trade = rx.recv().await.unwrap();
        assert_eq!(trade.position.symbol, "ETHUSDT");
        assert_eq!(trade.reason, CloseReason::Timeout);
    }
}
