//! Engine orchestration
//!
//! Wires the quote feed through the feature tracker, the model store, and
//! the trade lifecycle, and drives the housekeeping tick and the periodic
//! retraining pass.

use crate::config::Config;
use crate::feed::{BookQuote, QuoteFeed};
use crate::market::{FeatureTracker, MarketSample};
use crate::model::ModelStore;
use crate::trade::{ClosedTrade, Ledger, TradeLifecycle};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Housekeeping tick period driving exit checks
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Core signal-evaluation and trade-lifecycle engine
///
/// Three paths share this state: the quote path (update-then-evaluate under
/// the tracker lock, then the lifecycle lock for entries), the tick path
/// (price snapshot under the tracker lock, exits under the lifecycle lock),
/// and the retrain path (artifact parsing outside any lock, then the model
/// store's own swap). No lock is ever held across I/O or an await point.
pub struct Engine {
    tracker: Mutex<FeatureTracker>,
    store: ModelStore,
    lifecycle: Mutex<TradeLifecycle>,
    targets: Vec<String>,
    model_dir: PathBuf,
    train_command: String,
    reload_interval: Duration,
    startup_delay: Duration,
}

impl Engine {
    /// Build an engine from configuration, with optional persistence sinks
    pub fn new(
        config: &Config,
        sample_tx: Option<mpsc::Sender<MarketSample>>,
        trade_tx: Option<mpsc::Sender<ClosedTrade>>,
    ) -> Self {
        let mut tracker = FeatureTracker::new(
            config.feed.support_symbol.clone(),
            config.model.price_window_len,
            config.data.sample_interval_secs,
        );
        if let Some(tx) = sample_tx {
            tracker = tracker.with_sampler(tx);
        }

        let store = ModelStore::new(
            config.model.codebook_size,
            config.model.feature_dim,
            config.model.default_risk,
        );

        let mut lifecycle =
            TradeLifecycle::new(config.trading.clone(), config.constraints.clone());
        if let Some(tx) = trade_tx {
            lifecycle = lifecycle.with_trade_sink(tx);
        }

        Self {
            tracker: Mutex::new(tracker),
            store,
            lifecycle: Mutex::new(lifecycle),
            targets: config.feed.symbols.clone(),
            model_dir: config.model.model_dir.clone(),
            train_command: config.model.train_command.clone(),
            reload_interval: Duration::from_secs(config.model.reload_interval_secs),
            startup_delay: Duration::from_secs(config.model.startup_delay_secs),
        }
    }

    /// The model store, for startup loading and tests
    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Snapshot of the ledger
    pub fn ledger(&self) -> Ledger {
        self.lifecycle
            .lock()
            .expect("lifecycle lock poisoned")
            .ledger()
            .clone()
    }

    /// Attempt to load every target symbol's model from disk
    pub fn load_models(&self) {
        for symbol in &self.targets {
            if !self.store.reload_from_dir(symbol, &self.model_dir) {
                tracing::warn!(symbol = %symbol, "No model loaded, waiting for training");
            }
        }
    }

    /// Process one quote: update state, evaluate, maybe open a position
    ///
    /// The tracker lock spans update and evaluate so the evaluation never
    /// sees half-updated state for the symbol.
    pub fn on_quote(&self, quote: &BookQuote, now: DateTime<Utc>) {
        let mut tracker = self.tracker.lock().expect("tracker lock poisoned");
        let state = tracker.update(quote, now);

        if !self.targets.iter().any(|s| s == &quote.symbol) {
            // The reference symbol only feeds state
            return;
        }
        let Some(features) = tracker.feature_vector(&quote.symbol) else {
            return;
        };
        let result = self.store.evaluate(&quote.symbol, &features);
        drop(tracker);

        // Expectancy 0.0 means "no signal" (missing model or neutral state)
        if result.expectancy == 0.0 {
            return;
        }

        self.lifecycle
            .lock()
            .expect("lifecycle lock poisoned")
            .on_signal(&quote.symbol, state.last_price, result.expectancy, result.risk, now);
    }

    /// Run one housekeeping tick: evaluate exits against last known prices
    pub fn on_tick(&self, now: DateTime<Utc>) -> Vec<ClosedTrade> {
        let prices = {
            self.tracker
                .lock()
                .expect("tracker lock poisoned")
                .last_prices()
        };

        self.lifecycle
            .lock()
            .expect("lifecycle lock poisoned")
            .on_tick(&prices, now)
    }

    /// Run the engine until the quote stream ends
    pub async fn run(self: Arc<Self>, feed: &dyn QuoteFeed) -> anyhow::Result<()> {
        self.load_models();

        let mut quotes = feed.subscribe().await?;

        let engine = Arc::clone(&self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;
                engine.on_tick(Utc::now());
            }
        });

        let engine = Arc::clone(&self);
        tokio::spawn(async move {
            engine.run_retrain_loop().await;
        });

        tracing::info!(markets = self.targets.len(), "Trading engine running");

        // A single consumer task keeps per-symbol arrival order intact
        while let Some(quote) = quotes.recv().await {
            self.on_quote(&quote, Utc::now());
        }

        tracing::warn!("Quote stream ended, engine stopping");
        Ok(())
    }

    /// Periodically invoke the external trainer, then refresh models
    async fn run_retrain_loop(&self) {
        tokio::time::sleep(self.startup_delay).await;

        loop {
            for symbol in &self.targets {
                tracing::info!(symbol = %symbol, "Training model");
                match self.spawn_trainer(symbol).await {
                    Ok(status) if status.success() => {
                        if self.store.reload_from_dir(symbol, &self.model_dir) {
                            tracing::info!(symbol = %symbol, "Model updated");
                        }
                    }
                    Ok(status) => {
                        tracing::warn!(symbol = %symbol, code = ?status.code(), "Trainer failed");
                    }
                    Err(e) => {
                        tracing::warn!(symbol = %symbol, error = %e, "Failed to launch trainer");
                    }
                }
            }
            tokio::time::sleep(self.reload_interval).await;
        }
    }

    async fn spawn_trainer(&self, symbol: &str) -> std::io::Result<ExitStatus> {
        let mut parts = self.train_command.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty train command")
        })?;

        tokio::process::Command::new(program)
            .args(parts)
            .arg(symbol)
            .status()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CodebookTables;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn test_config() -> Config {
        let toml = r#"
            [feed]
            symbols = ["ETHUSDT"]
            support_symbol = "BTCUSDT"

            [model]
            codebook_size = 2
            feature_dim = 7
        "#;
        toml::from_str(toml).unwrap()
    }

    /// Two-node codebook whose nodes both predict the given expectancy/risk,
    /// so the BMU choice cannot change the outcome
    fn flat_tables(expectancy: f64, risk: f64) -> CodebookTables {
        CodebookTables {
            weights: vec![vec![0.0; 7], vec![1.0; 7]],
            expectancy: vec![expectancy, expectancy],
            risk: vec![risk, risk],
            mins: vec![0.0; 7],
            maxs: vec![1.0; 7],
        }
    }

    fn quote(symbol: &str, bid: Decimal, bid_qty: Decimal, ask: Decimal, ask_qty: Decimal) -> BookQuote {
        BookQuote {
            symbol: symbol.to_string(),
            bid_price: bid,
            bid_qty,
            ask_price: ask,
            ask_qty,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_quote_without_model_opens_nothing() {
        let engine = Engine::new(&test_config(), None, None);
        let now = Utc::now();

        engine.on_quote(&quote("BTCUSDT", dec!(95000), dec!(1), dec!(95000.1), dec!(1)), now);
        engine.on_quote(&quote("ETHUSDT", dec!(2500), dec!(10), dec!(2500.1), dec!(5)), now);

        let lifecycle = engine.lifecycle.lock().unwrap();
        assert_eq!(lifecycle.open_count(), 0);
    }

    #[test]
    fn test_quote_with_model_opens_position() {
        let engine = Engine::new(&test_config(), None, None);
        assert!(engine.store().reload("ETHUSDT", flat_tables(5.0, 0.1)));

        let now = Utc::now();
        engine.on_quote(&quote("BTCUSDT", dec!(95000), dec!(1), dec!(95000.1), dec!(1)), now);
        engine.on_quote(&quote("ETHUSDT", dec!(2500), dec!(10), dec!(2500.1), dec!(5)), now);

        let lifecycle = engine.lifecycle.lock().unwrap();
        let position = lifecycle.open_position("ETHUSDT").unwrap();
        assert_eq!(position.entry_price, dec!(2500.05));
    }

    #[test]
    fn test_reference_symbol_is_not_traded() {
        let engine = Engine::new(&test_config(), None, None);
        assert!(engine.store().reload("BTCUSDT", flat_tables(5.0, 0.1)));

        let now = Utc::now();
        engine.on_quote(&quote("BTCUSDT", dec!(95000), dec!(1), dec!(95000.1), dec!(1)), now);

        let lifecycle = engine.lifecycle.lock().unwrap();
        assert_eq!(lifecycle.open_count(), 0);
    }

    #[test]
    fn test_eth_signal_waits_for_reference() {
        let engine = Engine::new(&test_config(), None, None);
        assert!(engine.store().reload("ETHUSDT", flat_tables(5.0, 0.1)));

        // No BTC quote yet, so no feature vector and no trade
        engine.on_quote(
            &quote("ETHUSDT", dec!(2500), dec!(10), dec!(2500.1), dec!(5)),
            Utc::now(),
        );

        let lifecycle = engine.lifecycle.lock().unwrap();
        assert_eq!(lifecycle.open_count(), 0);
    }

    #[test]
    fn test_tick_closes_on_take_profit() {
        let engine = Engine::new(&test_config(), None, None);
        assert!(engine.store().reload("ETHUSDT", flat_tables(5.0, 0.1)));

        let now = Utc::now();
        engine.on_quote(&quote("BTCUSDT", dec!(95000), dec!(1), dec!(95000.1), dec!(1)), now);
        engine.on_quote(&quote("ETHUSDT", dec!(100), dec!(10), dec!(100.1), dec!(5)), now);

        // Move the mid up ~1%, far past the default 0.3% take-profit
        engine.on_quote(&quote("ETHUSDT", dec!(101), dec!(10), dec!(101.1), dec!(5)), now);

        let closed = engine.on_tick(now + chrono::Duration::seconds(2));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, crate::trade::CloseReason::TakeProfit);

        let ledger = engine.ledger();
        assert_eq!(ledger.win_count, 1);
        assert!(ledger.balance_usd > dec!(1000));
    }
}
