//! CLI command definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Comparador: CLI for Comparar - cross-browser snapshot comparison sessions
#[derive(Parser, Debug)]
#[command(name = "comparador")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (warnings and errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a comparison session with its HTTP intake
    Serve(ServeArgs),

    /// Diff two snapshot images once
    Diff(DiffArgs),

    /// Show the effective session configuration
    Config(ConfigArgs),
}

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Session configuration file (JSON)
    #[arg(short, long, env = "COMPARAR_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP port to listen on
    #[arg(short, long, default_value = "8080")]
    pub port: u16,

    /// IP address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,
}

/// Arguments for the diff command
#[derive(Parser, Debug)]
pub struct DiffArgs {
    /// Baseline image
    pub baseline: PathBuf,

    /// Image compared against the baseline
    pub compared: PathBuf,

    /// Write the rendered diff image here
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Summed RGB distance tolerated before a pixel counts as changed
    #[arg(long, default_value = "10")]
    pub color_threshold: u8,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Session configuration file (JSON)
    #[arg(short, long, env = "COMPARAR_CONFIG")]
    pub config: Option<PathBuf>,
}
