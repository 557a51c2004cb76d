//! Codebook evaluation and atomic hot-reload

use super::{CodebookTables, SomResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Degenerate scaling ranges below this map to the feature midpoint
const RANGE_EPSILON: f64 = 1e-9;

/// Immutable published model for one symbol
#[derive(Debug)]
pub struct Codebook {
    /// Prototype weight vectors, N rows of D columns
    weights: Vec<Vec<f64>>,
    /// Expectancy per node
    expectancy: Vec<f64>,
    /// Risk per node; may be empty when the artifact was absent
    risk: Vec<f64>,
    /// Per-feature scaling bounds
    mins: Vec<f64>,
    maxs: Vec<f64>,
}

impl Codebook {
    pub fn feature_dim(&self) -> usize {
        self.mins.len()
    }

    pub fn node_count(&self) -> usize {
        self.weights.len()
    }

    /// Min/max scale the first D raw features into [0, 1]
    ///
    /// A constant feature (range below epsilon) maps to 0.5; out-of-range
    /// values saturate rather than extrapolate.
    fn scale(&self, raw: &[f64]) -> Vec<f64> {
        (0..self.feature_dim())
            .map(|i| {
                let range = self.maxs[i] - self.mins[i];
                if range < RANGE_EPSILON {
                    0.5
                } else {
                    ((raw[i] - self.mins[i]) / range).clamp(0.0, 1.0)
                }
            })
            .collect()
    }

    /// Index of the node with minimum L1 distance; ties go to the lowest index
    fn best_matching_unit(&self, scaled: &[f64]) -> usize {
        let mut best_idx = 0;
        let mut min_dist = f64::INFINITY;
        for (idx, weights) in self.weights.iter().enumerate() {
            let dist = l1_distance(weights, scaled);
            if dist < min_dist {
                min_dist = dist;
                best_idx = idx;
            }
        }
        best_idx
    }

    /// Score a raw feature vector against this codebook
    pub fn evaluate(&self, raw: &[f64], default_risk: f64) -> SomResult {
        let scaled = self.scale(raw);
        let bmu = self.best_matching_unit(&scaled);
        SomResult {
            expectancy: self.expectancy[bmu],
            // A truncated risk table falls back per index
            risk: self.risk.get(bmu).copied().unwrap_or(default_risk),
        }
    }
}

fn l1_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

/// Thread-safe store of per-symbol codebooks
///
/// Readers clone the published `Arc` under the read lock and compute outside
/// it, so a concurrent reload either serves the old codebook entirely or the
/// new one entirely, and `evaluate` never blocks on I/O.
pub struct ModelStore {
    codebook_size: usize,
    feature_dim: usize,
    default_risk: f64,
    books: RwLock<HashMap<String, Arc<Codebook>>>,
}

impl ModelStore {
    /// Create an empty store with the deployment's codebook shape
    pub fn new(codebook_size: usize, feature_dim: usize, default_risk: f64) -> Self {
        Self {
            codebook_size,
            feature_dim,
            default_risk,
            books: RwLock::new(HashMap::new()),
        }
    }

    /// Whether a codebook is currently published for the symbol
    pub fn has_model(&self, symbol: &str) -> bool {
        self.books
            .read()
            .expect("model store lock poisoned")
            .contains_key(symbol)
    }

    /// Score a raw feature vector for a symbol
    ///
    /// Fails soft: a missing codebook or an input shorter than the feature
    /// dimension yields the neutral result (expectancy 0.0, default risk),
    /// which callers treat as "no signal".
    pub fn evaluate(&self, symbol: &str, raw: &[f64]) -> SomResult {
        let book = {
            let books = self.books.read().expect("model store lock poisoned");
            books.get(symbol).cloned()
        };

        let neutral = SomResult {
            expectancy: 0.0,
            risk: self.default_risk,
        };
        match book {
            Some(book) if raw.len() >= book.feature_dim() => book.evaluate(raw, self.default_risk),
            _ => neutral,
        }
    }

    /// Validate a candidate and, on success, atomically publish it
    ///
    /// A rejected candidate leaves the currently-served codebook untouched;
    /// there is no window where the symbol serves partial tables.
    pub fn reload(&self, symbol: &str, tables: CodebookTables) -> bool {
        if let Err(e) = tables.validate(self.codebook_size, self.feature_dim) {
            tracing::warn!(symbol = %symbol, error = %e, "rejected codebook candidate");
            return false;
        }

        let book = Arc::new(Codebook {
            weights: tables.weights,
            expectancy: tables.expectancy,
            risk: tables.risk,
            mins: tables.mins,
            maxs: tables.maxs,
        });

        self.books
            .write()
            .expect("model store lock poisoned")
            .insert(symbol.to_string(), book);
        tracing::info!(symbol = %symbol, "codebook published");
        true
    }

    /// Parse artifacts from disk (outside any lock), then reload
    pub fn reload_from_dir(&self, symbol: &str, dir: &Path) -> bool {
        match CodebookTables::from_dir(dir, symbol) {
            Ok(tables) => self.reload(symbol, tables),
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "failed to load model artifacts");
                false
            }
        }
    }
}
