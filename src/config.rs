//! Configuration types for som-hft

use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub feed: FeedConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Per-symbol exit-constraint overrides; symbols without an entry use
    /// [`TradingConstraints::default`]
    #[serde(default)]
    pub constraints: HashMap<String, TradingConstraints>,
}

/// Quote feed configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Symbols to trade (e.g. ["ETHUSDT", "SOLUSDT"])
    pub symbols: Vec<String>,

    /// Reference symbol whose state feeds every symbol's feature vector
    #[serde(default = "default_support_symbol")]
    pub support_symbol: String,
}

fn default_support_symbol() -> String {
    "BTCUSDT".to_string()
}

/// SOM model configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Directory holding per-symbol model artifacts
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Number of prototype nodes per codebook
    #[serde(default = "default_codebook_size")]
    pub codebook_size: usize,

    /// Feature vector dimension
    #[serde(default = "default_feature_dim")]
    pub feature_dim: usize,

    /// Fixed-length price window backing volatility/correlation features
    #[serde(default = "default_price_window_len")]
    pub price_window_len: usize,

    /// Risk returned when a symbol has no codebook or an incomplete risk table
    #[serde(default = "default_model_risk")]
    pub default_risk: f64,

    /// Seconds between retraining passes
    #[serde(default = "default_reload_interval_secs")]
    pub reload_interval_secs: u64,

    /// Seconds to wait after startup before the first retraining pass
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,

    /// External trainer invocation; the symbol is appended as an argument
    #[serde(default = "default_train_command")]
    pub train_command: String,
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("./models")
}
fn default_codebook_size() -> usize {
    400
}
fn default_feature_dim() -> usize {
    7
}
fn default_price_window_len() -> usize {
    60
}
fn default_model_risk() -> f64 {
    0.05
}
fn default_reload_interval_secs() -> u64 {
    1800
}
fn default_startup_delay_secs() -> u64 {
    300
}
fn default_train_command() -> String {
    "python3 train_som.py".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            codebook_size: default_codebook_size(),
            feature_dim: default_feature_dim(),
            price_window_len: default_price_window_len(),
            default_risk: default_model_risk(),
            reload_interval_secs: default_reload_interval_secs(),
            startup_delay_secs: default_startup_delay_secs(),
            train_command: default_train_command(),
        }
    }
}

/// Entry policy, sizing, and ledger configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Starting paper balance in USD
    #[serde(default = "default_initial_balance")]
    pub initial_balance_usd: Decimal,

    /// Round-trip fee rate deducted from every closed trade
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,

    /// Sizing leverage multiplier
    #[serde(default = "default_leverage")]
    pub leverage: Decimal,

    /// Fractional-Kelly safety factor applied to the sized lot
    #[serde(default = "default_safety_factor")]
    pub safety_factor: Decimal,

    /// Hard cap on a single lot as a fraction of balance
    #[serde(default = "default_max_balance_fraction")]
    pub max_balance_fraction: Decimal,

    /// Seconds a symbol stays ineligible after a close
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: i64,

    /// Entry threshold: a signal trades when
    /// |expectancy| > entry_threshold_base + entry_threshold_risk_coeff * risk.
    /// Set the coefficient to 0 for a flat threshold.
    #[serde(default = "default_entry_threshold_base")]
    pub entry_threshold_base: f64,

    #[serde(default = "default_entry_threshold_risk_coeff")]
    pub entry_threshold_risk_coeff: f64,

    /// Scales predicted risk into the per-position stop-loss fraction
    #[serde(default = "default_risk_multiplier")]
    pub risk_multiplier: f64,

    /// Clamp bounds for the dynamic stop-loss fraction
    #[serde(default = "default_min_stop_loss")]
    pub min_stop_loss: f64,

    #[serde(default = "default_max_stop_loss")]
    pub max_stop_loss: f64,
}

fn default_initial_balance() -> Decimal {
    Decimal::new(1000, 0)
}
fn default_fee_rate() -> Decimal {
    Decimal::new(5, 4) // 0.0005 = 0.05%
}
fn default_leverage() -> Decimal {
    Decimal::new(5, 0)
}
fn default_safety_factor() -> Decimal {
    Decimal::new(5, 1) // half Kelly
}
fn default_max_balance_fraction() -> Decimal {
    Decimal::new(20, 2) // 0.20 = 20%
}
fn default_cooldown_secs() -> i64 {
    30
}
fn default_entry_threshold_base() -> f64 {
    0.15
}
fn default_entry_threshold_risk_coeff() -> f64 {
    0.5
}
fn default_risk_multiplier() -> f64 {
    1.5
}
fn default_min_stop_loss() -> f64 {
    0.002
}
fn default_max_stop_loss() -> f64 {
    0.02
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            initial_balance_usd: default_initial_balance(),
            fee_rate: default_fee_rate(),
            leverage: default_leverage(),
            safety_factor: default_safety_factor(),
            max_balance_fraction: default_max_balance_fraction(),
            cooldown_secs: default_cooldown_secs(),
            entry_threshold_base: default_entry_threshold_base(),
            entry_threshold_risk_coeff: default_entry_threshold_risk_coeff(),
            risk_multiplier: default_risk_multiplier(),
            min_stop_loss: default_min_stop_loss(),
            max_stop_loss: default_max_stop_loss(),
        }
    }
}

/// Per-symbol exit constraints
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConstraints {
    /// Close when pnl ratio reaches this fraction
    #[serde(default = "default_take_profit_rate")]
    pub take_profit_rate: Decimal,

    /// Close when pnl ratio reaches the negative of this fraction
    /// (a position's dynamic stop-loss takes precedence when present)
    #[serde(default = "default_stop_loss_rate")]
    pub stop_loss_rate: Decimal,

    /// Close unconditionally after this many seconds
    #[serde(default = "default_max_hold_secs")]
    pub max_hold_secs: i64,

    /// Risk assumed when the model cannot supply one
    #[serde(default = "default_constraint_risk")]
    pub default_risk: f64,
}

fn default_take_profit_rate() -> Decimal {
    Decimal::new(3, 3) // 0.003 = 0.3%
}
fn default_stop_loss_rate() -> Decimal {
    Decimal::new(2, 3) // 0.002 = 0.2%
}
fn default_max_hold_secs() -> i64 {
    300
}
fn default_constraint_risk() -> f64 {
    0.05
}

impl Default for TradingConstraints {
    fn default() -> Self {
        Self {
            take_profit_rate: default_take_profit_rate(),
            stop_loss_rate: default_stop_loss_rate(),
            max_hold_secs: default_max_hold_secs(),
            default_risk: default_constraint_risk(),
        }
    }
}

/// Sample/trade persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_true")]
    pub capture_enabled: bool,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Minimum seconds between persisted samples per symbol
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: i64,
}

fn default_true() -> bool {
    true
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_sample_interval_secs() -> i64 {
    30
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            capture_enabled: true,
            output_dir: default_output_dir(),
            sample_interval_secs: default_sample_interval_secs(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_metrics_port() -> u16 {
    9090
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
