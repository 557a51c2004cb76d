//! Prometheus metrics

use metrics_exporter_prometheus::PrometheusBuilder;

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Current paper balance
    BalanceUsd,
    /// Open position count
    OpenPositions,
    /// Cumulative closed PnL in percent
    CumulativePnlPct,
}

impl GaugeMetric {
    fn name(&self) -> &'static str {
        match self {
            GaugeMetric::BalanceUsd => "somhft_balance_usd",
            GaugeMetric::OpenPositions => "somhft_open_positions",
            GaugeMetric::CumulativePnlPct => "somhft_cumulative_pnl_pct",
        }
    }
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    metrics::gauge!(metric.name()).set(value);
}

/// Count an opened position
pub fn increment_trades_opened() {
    metrics::counter!("somhft_trades_opened_total").increment(1);
}

/// Count a closed position, labeled by close reason
pub fn increment_trades_closed(reason: &'static str) {
    metrics::counter!("somhft_trades_closed_total", "reason" => reason).increment(1);
}

/// Start the Prometheus exporter on the given port
pub(super) fn install_exporter(port: u16) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics exporter: {}", e))?;

    tracing::info!(port, "Prometheus exporter listening");
    Ok(())
}
