//! wagerline binary
//!
//! Runs the settlement engine against RocksDB, verifies published outcomes,
//! and writes sample configuration.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use wagerline::common::config::{generate_sample_config, ConfigLoader};
use wagerline::config::EngineConfig;
use wagerline::engine::WagerEngine;
use wagerline::errors::WagerResult;
use wagerline::fairness::{self, outcome};

/// Round settlement engine for coinflip, wheel and pot games
#[derive(Parser)]
#[command(name = "wagerline")]
#[command(about = "Provably fair round settlement engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover unfinished rounds and drive all games until ctrl-c
    Run {
        /// Override the storage directory
        #[arg(short, long)]
        data_dir: Option<String>,

        /// Keep everything in memory
        #[arg(long)]
        in_memory: bool,

        /// Use development defaults (local beacon, short rounds)
        #[arg(long)]
        dev: bool,
    },

    /// Recompute a round outcome from its revealed inputs
    Verify {
        /// Revealed server seed
        #[arg(long)]
        seed: String,

        /// Commitment hash published before the round
        #[arg(long)]
        commitment: String,

        /// External randomness from the beacon
        #[arg(long)]
        external: String,

        /// Pot total, to print the winning ticket
        #[arg(long)]
        pot: Option<i64>,

        /// Wheel slot count, to print the roll
        #[arg(long)]
        slots: Option<u32>,
    },

    /// Write a sample configuration file
    SampleConfig {
        #[arg(short, long, default_value = "wagerline.toml")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> WagerResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            data_dir,
            in_memory,
            dev,
        } => {
            let mut config = if dev {
                EngineConfig::development()
            } else {
                load_config(cli.config)?
            };
            if let Some(dir) = data_dir {
                config.storage.data_directory = dir;
            }
            if in_memory {
                config.storage.in_memory = true;
            }
            init_tracing(&config, cli.verbose);
            run(config).await
        }
        Commands::Verify {
            seed,
            commitment,
            external,
            pot,
            slots,
        } => {
            init_tracing(&EngineConfig::default(), cli.verbose);
            let verification = fairness::verify(&seed, &commitment, &external)?;
            println!("commitment ok     {}", verification.commitment_hash);
            println!("outcome hash      {}", verification.outcome_hash);
            println!("raw value         {}", verification.raw_outcome_value);
            println!("fraction          {:.12}", verification.fraction);
            if let Some(pot) = pot {
                println!("ticket            {}", outcome::ticket(verification.raw_outcome_value, pot));
            }
            if let Some(slots) = slots {
                println!("roll              {}", outcome::roll(verification.raw_outcome_value, slots));
            }
            Ok(())
        }
        Commands::SampleConfig { output } => {
            generate_sample_config(&output)?;
            println!("Sample configuration written to {}", output);
            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>) -> WagerResult<EngineConfig> {
    match path {
        Some(path) => ConfigLoader::new().with_path(path).load(),
        None => ConfigLoader::new().load(),
    }
}

fn init_tracing(config: &EngineConfig, verbose: bool) {
    let default = if verbose {
        "debug"
    } else {
        config.monitoring.log_level.as_filter()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: EngineConfig) -> WagerResult<()> {
    let engine = WagerEngine::build(config)?;

    let resumed = engine.recover().await?;
    tracing::info!(resumed, "Recovery complete");

    let mut events = engine.subscribe_events();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(event = event.name(), round_id = %event.round_id(), "{:?}", event),
                Err(RecvError::Lagged(skipped)) => tracing::warn!("Event log lagged; skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let scheduler = Arc::new(engine.scheduler());
    let ticker = scheduler.clone().spawn();

    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("Unable to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
    scheduler.stop();
    let _ = ticker.await;
    event_log.abort();

    if engine.config().monitoring.enable_metrics {
        println!("{}", engine.metrics().render());
    }
    Ok(())
}
