//! Audiochat CLI
//!
//! Command-line interface for the audiochat processing pipeline.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use audiochat::cli::commands::{self, ProcessOptions};
use audiochat::cli::{CacheAction, Cli, Commands};
use audiochat::config::PipelineConfig;
use audiochat::pipeline::Segment;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Audiochat v{}", env!("CARGO_PKG_VERSION"));

    let config = PipelineConfig::resolve(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Some(cmd) => handle_command(&config, cmd),
        None => {
            println!("Audiochat v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(config: &PipelineConfig, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Process {
            input,
            instruction,
            effects,
            output,
            start,
            end,
            bit_depth,
        } => {
            let bit_depth = bit_depth
                .map(|b| b.parse::<u16>())
                .transpose()
                .context("parsing --bit-depth")?;
            let segment = start.zip(end).map(|(s, e)| Segment::new(s, e));
            let options = ProcessOptions {
                input,
                instruction,
                effects,
                output,
                segment,
                bit_depth,
            };
            commands::process(config, &options)
                .with_context(|| format!("processing {}", options.input.display()))
        }
        Commands::Analyze { input } => commands::analyze(config, &input)
            .with_context(|| format!("analyzing {}", input.display())),
        Commands::Waveform { input, points } => commands::waveform(config, &input, points)
            .with_context(|| format!("building waveform of {}", input.display())),
        Commands::Effects => commands::list_effects().context("listing effects"),
        Commands::Cache { action } => match action {
            CacheAction::Stats => commands::cache_stats(config).context("reading cache stats"),
            CacheAction::Sweep { max_age_days } => {
                commands::cache_sweep(config, max_age_days).context("sweeping cache")
            }
            CacheAction::Clear => commands::cache_clear(config).context("clearing cache"),
        },
    }
}
