//! CLI Module
//!
//! Command-line interface for the audiochat pipeline.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Audiochat - natural-language audio processing
#[derive(Parser, Debug)]
#[command(name = "audiochat-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process an audio file from an instruction or an explicit chain
    #[command(name = "process")]
    Process {
        /// Input audio file
        input: PathBuf,

        /// What to do with the audio, in plain words
        #[arg(short, long, default_value = "")]
        instruction: String,

        /// JSON effects chain, bypasses instruction mapping
        #[arg(short, long)]
        effects: Option<PathBuf>,

        /// Output file (default: <input>_processed.wav)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Segment start in seconds
        #[arg(long, requires = "end")]
        start: Option<f64>,

        /// Segment end in seconds
        #[arg(long, requires = "start")]
        end: Option<f64>,

        /// Output bit depth (16, 24 or 32)
        #[arg(long, value_parser = clap::builder::PossibleValuesParser::new(["16", "24", "32"]))]
        bit_depth: Option<String>,
    },

    /// Print the analysis of an audio file
    #[command(name = "analyze")]
    Analyze {
        /// Input audio file
        input: PathBuf,
    },

    /// Print the waveform preview of an audio file as JSON
    #[command(name = "waveform")]
    Waveform {
        /// Input audio file
        input: PathBuf,

        /// Number of preview points
        #[arg(long, default_value_t = crate::analysis::DEFAULT_WAVEFORM_POINTS)]
        points: usize,
    },

    /// List every effect type with its default parameters
    #[command(name = "effects")]
    Effects,

    /// Inspect or maintain the cache
    #[command(name = "cache")]
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show hit counts and entries per namespace
    Stats,

    /// Remove entries older than the configured or given age
    Sweep {
        /// Override the configured maximum age
        #[arg(long)]
        max_age_days: Option<u32>,
    },

    /// Remove every entry
    Clear,
}
