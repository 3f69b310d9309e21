//! Lumen CLI - fetch an image, run a pixel effect over it, save the result.
//!
//! # Usage
//!
//! ```bash
//! # Pixelate a remote image
//! lumen show https://example.com/cat.png -o cat.png
//!
//! # Sepia tone a local file, printing a JSON summary
//! lumen show file:///tmp/photo.jpg --effect sepia --intensity 0.6 --json
//!
//! # View configuration
//! lumen config show
//! ```

use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// Lumen - cancellable image fetch, filter and publish pipeline.
#[derive(Parser, Debug)]
#[command(name = "lumen")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch an image, filter it and write it to disk
    Show(cli::show::ShowArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't up yet, so config warnings go straight to stderr.
    let config = match lumen_core::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `lumen config path`."
            );
            lumen_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Lumen v{}", lumen_core::VERSION);

    match cli.command {
        Commands::Show(args) => cli::show::execute(config, args).await,
        Commands::Config(args) => cli::config::execute(args).await,
    }
}
