//! Run command implementation

use crate::config::Config;
use crate::data::CsvRecorder;
use crate::engine::Engine;
use crate::feed::BinanceFeed;
use clap::Args;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl RunArgs {
    pub async fn execute(&self, config: Config) -> anyhow::Result<()> {
        let (sample_tx, trade_tx) = if config.data.capture_enabled {
            let recorder = CsvRecorder::new(config.data.output_dir.clone())?;
            (Some(recorder.sample_sender()), Some(recorder.trade_sender()))
        } else {
            (None, None)
        };

        // Targets plus the reference symbol, deduplicated
        let mut streams = config.feed.symbols.clone();
        if !streams.contains(&config.feed.support_symbol) {
            streams.push(config.feed.support_symbol.clone());
        }

        let engine = Arc::new(Engine::new(&config, sample_tx, trade_tx));
        let feed = BinanceFeed::new(streams);

        tracing::info!("Starting paper trading");
        engine.run(&feed).await
    }
}
