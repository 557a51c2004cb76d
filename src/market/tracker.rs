//! Feature tracker implementation

use super::{MarketSample, MarketState};
use crate::feed::BookQuote;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;

/// Rolling state for one symbol
#[derive(Debug)]
struct SymbolTrack {
    state: MarketState,
    /// FIFO mid-price window backing volatility/correlation
    window: VecDeque<f64>,
    last_sample: Option<DateTime<Utc>>,
}

impl SymbolTrack {
    fn new() -> Self {
        Self {
            state: MarketState::default(),
            window: VecDeque::new(),
            last_sample: None,
        }
    }
}

/// Maintains per-symbol market state from incoming quotes
///
/// Symbols are tracked lazily from their first quote and never evicted.
pub struct FeatureTracker {
    ref_symbol: String,
    window_len: usize,
    sample_interval: Duration,
    sample_tx: Option<mpsc::Sender<MarketSample>>,
    tracks: HashMap<String, SymbolTrack>,
}

impl FeatureTracker {
    /// Create a new tracker
    pub fn new(ref_symbol: impl Into<String>, window_len: usize, sample_interval_secs: i64) -> Self {
        Self {
            ref_symbol: ref_symbol.into(),
            window_len,
            sample_interval: Duration::seconds(sample_interval_secs),
            sample_tx: None,
            tracks: HashMap::new(),
        }
    }

    /// Attach a sample sink; at most one sample per symbol per interval
    pub fn with_sampler(mut self, tx: mpsc::Sender<MarketSample>) -> Self {
        self.sample_tx = Some(tx);
        self
    }

    /// Apply a quote and return the updated state snapshot
    pub fn update(&mut self, quote: &BookQuote, now: DateTime<Utc>) -> MarketState {
        let mid = (quote.bid_price + quote.ask_price) / Decimal::TWO;
        let depth = quote.bid_qty + quote.ask_qty;
        let window_len = self.window_len;

        let existed = self.tracks.contains_key(&quote.symbol);
        let track = self
            .tracks
            .entry(quote.symbol.clone())
            .or_insert_with(SymbolTrack::new);

        if depth > Decimal::ZERO {
            let imbalance: f64 = ((quote.bid_qty - quote.ask_qty) / depth)
                .try_into()
                .unwrap_or(0.0);
            track.state.imbalance_delta = if existed {
                imbalance - track.state.imbalance
            } else {
                0.0
            };
            track.state.imbalance = imbalance;
            track.state.total_depth = depth.try_into().unwrap_or(0.0);
        } else {
            // Empty book: retain the previous imbalance, no delta this update
            track.state.imbalance_delta = 0.0;
        }

        track.state.last_price = mid;
        track.window.push_back(mid.try_into().unwrap_or(0.0));
        while track.window.len() > window_len {
            track.window.pop_front();
        }
        track.state.volatility = returns_std_dev(&track.window);

        // Correlation needs the reference window, so it is computed after
        // releasing the mutable borrow on this symbol's track
        let correlation = if quote.symbol == self.ref_symbol {
            1.0
        } else {
            match (
                self.tracks.get(&quote.symbol),
                self.tracks.get(&self.ref_symbol),
            ) {
                (Some(target), Some(reference)) => pearson(&target.window, &reference.window),
                _ => 0.0,
            }
        };

        let ref_price = self
            .tracks
            .get(&self.ref_symbol)
            .map(|t| t.state.last_price)
            .unwrap_or_default();

        let track = self
            .tracks
            .get_mut(&quote.symbol)
            .expect("track inserted above");
        track.state.ref_correlation = correlation;

        self.maybe_sample(&quote.symbol, ref_price, now);

        self.tracks[&quote.symbol].state.clone()
    }

    /// Feature vector consumed by the model:
    /// [imbalance, imbalance_delta, total_depth, volatility, ref_correlation,
    ///  ref_imbalance, ref_imbalance_delta]
    ///
    /// None until both the symbol and the reference symbol have been seen.
    pub fn feature_vector(&self, symbol: &str) -> Option<Vec<f64>> {
        let target = &self.tracks.get(symbol)?.state;
        let reference = &self.tracks.get(&self.ref_symbol)?.state;
        Some(vec![
            target.imbalance,
            target.imbalance_delta,
            target.total_depth,
            target.volatility,
            target.ref_correlation,
            reference.imbalance,
            reference.imbalance_delta,
        ])
    }

    /// State snapshot for a symbol, if seen
    pub fn state(&self, symbol: &str) -> Option<&MarketState> {
        self.tracks.get(symbol).map(|t| &t.state)
    }

    /// Last known mid prices for all symbols with a positive price
    pub fn last_prices(&self) -> HashMap<String, Decimal> {
        self.tracks
            .iter()
            .filter(|(_, t)| t.state.last_price > Decimal::ZERO)
            .map(|(s, t)| (s.clone(), t.state.last_price))
            .collect()
    }

    /// Emit a sample if the sink is attached and the symbol's interval elapsed.
    /// try_send only; a full channel drops the sample rather than blocking.
    fn maybe_sample(&mut self, symbol: &str, ref_price: Decimal, now: DateTime<Utc>) {
        if self.sample_tx.is_none() {
            return;
        }
        let interval = self.sample_interval;
        let Some(track) = self.tracks.get_mut(symbol) else {
            return;
        };
        let due = match track.last_sample {
            Some(last) => now - last >= interval,
            None => true,
        };
        if !due {
            return;
        }
        track.last_sample = Some(now);

        let sample = MarketSample {
            timestamp: now,
            symbol: symbol.to_string(),
            imbalance: track.state.imbalance,
            imbalance_change: track.state.imbalance_delta,
            total_depth: track.state.total_depth,
            price: track.state.last_price,
            ref_price,
            volatility: track.state.volatility,
            ref_corr: track.state.ref_correlation,
        };
        if let Some(tx) = &self.sample_tx {
            let _ = tx.try_send(sample);
        }
    }
}

/// Standard deviation of simple returns over a price window
fn returns_std_dev(window: &VecDeque<f64>) -> f64 {
    if window.len() < 2 {
        return 0.0;
    }

    let mut returns = Vec::with_capacity(window.len() - 1);
    for i in 1..window.len() {
        let prev = window[i - 1];
        if prev > 0.0 {
            returns.push(window[i] / prev - 1.0);
        }
    }

    if returns.is_empty() {
        return 0.0;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Pearson correlation between the tail-aligned overlap of two windows
fn pearson(a: &VecDeque<f64>, b: &VecDeque<f64>) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }

    let xs: Vec<f64> = a.iter().skip(a.len() - n).copied().collect();
    let ys: Vec<f64> = b.iter().skip(b.len() - n).copied().collect();

    let nf = n as f64;
    let mean_x = xs.iter().sum::<f64>() / nf;
    let mean_y = ys.iter().sum::<f64>() / nf;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = xs[i] - mean_x;
        let dy = ys[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom < 1e-12 {
        return 0.0;
    }
    cov / denom
}
