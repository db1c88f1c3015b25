//! Command-line interface definitions for trackdedup.
//!
//! This module defines all CLI arguments, subcommands, and options using the clap derive API.
//! Global options (verbosity, color, endpoints) apply to every subcommand.
//!
//! # Example
//!
//! ```bash
//! # Report what a deduplication pass would do (no writes)
//! trackdedup run
//!
//! # Fingerprint up to 500 uncovered files and apply all changes
//! trackdedup run --limit 500 --execute
//!
//! # Check coverage only
//! trackdedup coverage --threshold 90%
//!
//! # Compute (and embed) fingerprints for local files
//! trackdedup fingerprint ~/Music/*.flac --execute
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Content-addressed duplicate detection for a music catalog.
///
/// trackdedup gives every audio file a durable BLAKE3 identity, refuses to
/// deduplicate until enough of the catalog carries one, and moves losing
/// copies to the catalog's trash instead of deleting them.
#[derive(Debug, Parser)]
#[command(name = "trackdedup")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Print fatal errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file (TOML)
    ///
    /// Defaults to config.toml in the platform configuration directory.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Catalog application base URL (overrides configuration)
    #[arg(long, global = true, value_name = "URL")]
    pub catalog_url: Option<String>,

    /// Workspace database base URL (overrides configuration)
    #[arg(long, global = true, value_name = "URL")]
    pub workspace_url: Option<String>,

    /// Number of I/O threads for fingerprinting (overrides configuration)
    #[arg(long, global = true, value_name = "N")]
    pub io_threads: Option<usize>,

    /// Report format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a full deduplication pass
    Run(RunArgs),
    /// Measure fingerprint coverage and evaluate the gate
    Coverage(CoverageArgs),
    /// Compute or extract fingerprints for local files
    Fingerprint(FingerprintArgs),
    /// Print the effective configuration as TOML
    Config,
}

/// Arguments for the run subcommand.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Minimum fingerprint coverage for deduplication (e.g. 0.8 or 80%)
    #[arg(long, value_name = "RATIO", value_parser = parse_ratio)]
    pub threshold: Option<f64>,

    /// Minimum name similarity for matching items without fingerprint
    #[arg(long, value_name = "RATIO", value_parser = parse_ratio)]
    pub similarity: Option<f64>,

    /// Fingerprint at most N uncovered files in this invocation
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Group and resolve but make no changes (default)
    #[arg(long, conflicts_with = "execute")]
    pub dry_run: bool,

    /// Apply changes: embed fingerprints, sync tags and records, move losers to trash
    #[arg(long)]
    pub execute: bool,

    /// Only group by identical fingerprint; never match by name
    #[arg(long)]
    pub exact_only: bool,

    /// Do not require the coverage threshold before deduplicating
    ///
    /// Warning: name matching on a poorly fingerprinted catalog produces
    /// many false duplicate groups.
    #[arg(long)]
    pub no_gate: bool,

    /// Read the catalog from a JSON snapshot instead of the API (forces dry run)
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,
}

/// Arguments for the coverage subcommand.
#[derive(Debug, Args)]
pub struct CoverageArgs {
    /// Minimum fingerprint coverage to report against (e.g. 0.8 or 80%)
    #[arg(long, value_name = "RATIO", value_parser = parse_ratio)]
    pub threshold: Option<f64>,

    /// Read the catalog from a JSON snapshot instead of the API
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,
}

/// Arguments for the fingerprint subcommand.
#[derive(Debug, Args)]
pub struct FingerprintArgs {
    /// Audio files to fingerprint
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Embed computed fingerprints into the files
    #[arg(long)]
    pub execute: bool,
}

/// Report format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON for scripting
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Parse a ratio given as a fraction or a percentage.
///
/// # Examples
///
/// ```
/// use trackdedup::cli::parse_ratio;
///
/// assert_eq!(parse_ratio("0.8").unwrap(), 0.8);
/// assert_eq!(parse_ratio("80%").unwrap(), 0.8);
/// assert!(parse_ratio("1.5").is_err());
/// ```
pub fn parse_ratio(s: &str) -> Result<f64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Ratio cannot be empty".to_string());
    }

    let (number, divisor) = match s.strip_suffix('%') {
        Some(n) => (n.trim(), 100.0),
        None => (s, 1.0),
    };
    let value: f64 = number
        .parse()
        .map_err(|_| format!("Invalid ratio: '{}'", s))?;
    let ratio = value / divisor;

    if !(0.0..=1.0).contains(&ratio) {
        return Err(format!("Ratio must be between 0 and 1 (or 0% and 100%): '{}'", s));
    }
    Ok(ratio)
}
