use clap::Parser;
use som_hft::cli::{Cli, Commands};
use som_hft::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
        eprintln!("Using default configuration");
        toml::from_str(include_str!("../config.toml.example")).expect("Invalid default config")
    });

    // Initialize telemetry
    let _guard = som_hft::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            tracing::info!("Starting paper trading mode");
            args.execute(config).await?;
        }
        Commands::Status => {
            println!("som-hft status");
            println!("  Mode: Paper Trading");
            println!("  Status: Not running");
        }
        Commands::Config => {
            println!("Current configuration:");
            println!(
                "  Feed: {} (support: {})",
                config.feed.symbols.join(", "),
                config.feed.support_symbol
            );
            println!(
                "  Model: {}x{} codebooks from {:?}, reload every {}s",
                config.model.codebook_size,
                config.model.feature_dim,
                config.model.model_dir,
                config.model.reload_interval_secs
            );
            println!(
                "  Trading: balance={}, leverage={}, cooldown={}s",
                config.trading.initial_balance_usd,
                config.trading.leverage,
                config.trading.cooldown_secs
            );
        }
    }

    Ok(())
}
