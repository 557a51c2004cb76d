//! CSV recorder for market samples and closed trades

use crate::market::MarketSample;
use crate::trade::ClosedTrade;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

const SAMPLE_HEADER: [&str; 9] = [
    "timestamp",
    "symbol",
    "imbalance",
    "imbalance_change",
    "total_depth",
    "price",
    "ref_price",
    "volatility",
    "ref_corr",
];

const TRADE_HEADER: [&str; 10] = [
    "timestamp",
    "symbol",
    "side",
    "entry_price",
    "exit_price",
    "lot_size_usd",
    "pnl_ratio",
    "fees_usd",
    "net_pnl_usd",
    "reason",
];

/// Writes market samples to `<SYMBOL>_market_data.csv` (the training
/// collaborator's input) and closed trades to `trades.csv`
///
/// Each stream is drained by its own writer task; callers only hold cheap
/// channel senders and never block on disk.
pub struct CsvRecorder {
    sample_tx: mpsc::Sender<MarketSample>,
    trade_tx: mpsc::Sender<ClosedTrade>,
}

impl CsvRecorder {
    /// Create a recorder writing into the given directory
    pub fn new(output_dir: PathBuf) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&output_dir)?;

        let (sample_tx, sample_rx) = mpsc::channel(10_000);
        let (trade_tx, trade_rx) = mpsc::channel(1_000);

        let sample_dir = output_dir.clone();
        tokio::spawn(async move {
            run_sample_writer(sample_dir, sample_rx).await;
        });
        tokio::spawn(async move {
            run_trade_writer(output_dir, trade_rx).await;
        });

        Ok(Self {
            sample_tx,
            trade_tx,
        })
    }

    /// Sender for market samples (wired into the feature tracker)
    pub fn sample_sender(&self) -> mpsc::Sender<MarketSample> {
        self.sample_tx.clone()
    }

    /// Sender for closed trades (wired into the trade lifecycle)
    pub fn trade_sender(&self) -> mpsc::Sender<ClosedTrade> {
        self.trade_tx.clone()
    }
}

async fn run_sample_writer(dir: PathBuf, mut rx: mpsc::Receiver<MarketSample>) {
    let mut writers: HashMap<String, csv::Writer<File>> = HashMap::new();

    while let Some(sample) = rx.recv().await {
        if let Err(e) = append_sample(&dir, &mut writers, &sample) {
            tracing::error!(error = %e, symbol = %sample.symbol, "Failed to write market sample");
        }
    }
    tracing::info!("Sample writer shutting down");
}

fn append_sample(
    dir: &Path,
    writers: &mut HashMap<String, csv::Writer<File>>,
    sample: &MarketSample,
) -> anyhow::Result<()> {
    let writer = match writers.entry(sample.symbol.clone()) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => {
            let path = dir.join(format!("{}_market_data.csv", sample.symbol));
            entry.insert(open_append(&path, &SAMPLE_HEADER)?)
        }
    };

    writer.write_record([
        sample.timestamp.timestamp().to_string(),
        sample.symbol.clone(),
        format!("{:.6}", sample.imbalance),
        format!("{:.6}", sample.imbalance_change),
        format!("{:.6}", sample.total_depth),
        sample.price.to_string(),
        sample.ref_price.to_string(),
        format!("{:.6}", sample.volatility),
        format!("{:.6}", sample.ref_corr),
    ])?;
    writer.flush()?;
    Ok(())
}

async fn run_trade_writer(dir: PathBuf, mut rx: mpsc::Receiver<ClosedTrade>) {
    let mut writer: Option<csv::Writer<File>> = None;

    while let Some(trade) = rx.recv().await {
        let result = (|| -> anyhow::Result<()> {
            if writer.is_none() {
                writer = Some(open_append(&dir.join("trades.csv"), &TRADE_HEADER)?);
            }
            let writer = writer.as_mut().expect("trade writer initialized above");
            writer.write_record([
                trade.exit_time.timestamp().to_string(),
                trade.position.symbol.clone(),
                trade.position.side.as_str().to_string(),
                trade.position.entry_price.to_string(),
                trade.exit_price.to_string(),
                trade.position.lot_size_usd.to_string(),
                trade.pnl_ratio.to_string(),
                trade.fees_usd.to_string(),
                trade.net_pnl_usd.to_string(),
                trade.reason.as_str().to_string(),
            ])?;
            writer.flush()?;
            Ok(())
        })();

        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to write closed trade");
        }
    }
    tracing::info!("Trade writer shutting down");
}

/// Open a CSV in append mode, writing the header only when the file is new
fn open_append(path: &Path, header: &[&str]) -> anyhow::Result<csv::Writer<File>> {
    let new_file = !path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::Writer::from_writer(file);
    if new_file {
        writer.write_record(header)?;
        writer.flush()?;
    }
    Ok(writer)
}
