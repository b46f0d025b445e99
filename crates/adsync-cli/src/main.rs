//! Adsync CLI - Headless ad-break simulator
//!
//! Features:
//! - Scripted pre-roll, mid-roll and post-roll sessions
//! - Simulated pipeline with deterministic timing
//! - Event stream output as text or JSON lines

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

/// Adsync CLI - Ad playback coordination toolkit
#[derive(Parser)]
#[command(name = "adsync-cli")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Simulate ad-supported playback sessions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play content with a scripted ad schedule
    Simulate {
        /// Content duration in seconds
        #[arg(short, long, default_value = "60")]
        content: u64,

        /// Number of pre-roll ads
        #[arg(long, default_value = "1")]
        preroll: usize,

        /// Mid-roll offsets in seconds (repeatable)
        #[arg(short, long)]
        midroll: Vec<u64>,

        /// Number of post-roll ads
        #[arg(long, default_value = "0")]
        postroll: usize,

        /// Ad creative duration in seconds
        #[arg(long, default_value = "5")]
        ad_duration: u64,

        /// JSON ad schedule, overrides the break options
        #[arg(long)]
        plan: Option<PathBuf>,

        /// JSON player configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// Make the ad request fail
        #[arg(long)]
        fail_request: bool,

        /// Fail the ad with this id instead of playing it
        #[arg(long)]
        fail_ad: Option<String>,

        /// Simulation step in milliseconds
        #[arg(long, default_value = "250")]
        step: u64,
    },

    /// Show the effective player configuration
    Config {
        /// JSON player configuration (defaults when omitted)
        path: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();
    adsync_core::init();

    match cli.command {
        Commands::Simulate {
            content,
            preroll,
            midroll,
            postroll,
            ad_duration,
            plan,
            config,
            fail_request,
            fail_ad,
            step,
        } => {
            let options = commands::SimulateOptions {
                content_ms: content * 1000,
                preroll,
                midrolls_ms: midroll.into_iter().map(|s| s * 1000).collect(),
                postroll,
                ad_duration_ms: ad_duration * 1000,
                plan,
                config,
                fail_request,
                fail_ad,
                step_ms: step,
            };
            commands::simulate(options, &cli.format)?;
        }
        Commands::Config { path } => {
            commands::show_config(path, &cli.format)?;
        }
    }

    Ok(())
}
