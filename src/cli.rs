//! Command-line interface parsing
//!
//! Runtime tuning lives in the environment (see `config.rs`); the CLI only
//! carries the overrides that are useful when launching by hand.

use std::path::PathBuf;

use clap::Parser;

/// Veitider - road-stretch travel-time server
#[derive(Parser, Debug)]
#[command(name = "veitider")]
#[command(about = "Serves aggregated road-stretch travel times from the DATEX II feed")]
#[command(version)]
pub struct Cli {
    /// Port to bind instead of the configured one
    #[arg(long)]
    pub port: Option<u16>,

    /// Stretch definitions file instead of the configured one
    #[arg(long, value_name = "FILE")]
    pub stretches: Option<PathBuf>,

    /// Run one fetch/aggregate cycle, print the table as JSON, and exit
    ///
    /// Handy for verifying credentials and stretch definitions without
    /// starting the server.
    #[arg(long)]
    pub fetch_once: bool,
}
