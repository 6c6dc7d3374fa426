//! `declutter` -- CLI binary for the declutter pipeline.
//!
//! Provides the following subcommands:
//!
//! - `declutter serve` -- Run the pipeline workers and the HTTP API.
//! - `declutter run` -- Push one image through an in-process pipeline.
//! - `declutter status` -- Query a running server for session status.
//! - `declutter config show` -- Print the resolved configuration.

use clap::{Parser, Subcommand};

mod commands;

/// Declutter pipeline CLI.
#[derive(Parser)]
#[command(name = "declutter", about = "Detect, evaluate and crop resellable objects", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Start workers, coordinator, sweeper and the HTTP API.
    Serve(commands::serve::ServeArgs),

    /// Run one image through the pipeline and print the outcome.
    Run(commands::run::RunArgs),

    /// Show session status from a running server.
    Status(commands::status::StatusArgs),

    /// Show resolved configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
}

/// Subcommands for `declutter config`.
#[derive(Subcommand)]
enum ConfigCmd {
    /// Print the full configuration as JSON.
    Show {
        /// Config file path (overrides auto-discovery).
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve(args) => commands::serve::run(args).await?,
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Status(args) => commands::status::run(args).await?,
        Commands::Config { action } => match action {
            ConfigCmd::Show { config } => {
                let cfg = commands::load_config(config.as_deref()).await?;
                commands::config_cmd::config_show(&cfg)?;
            }
        },
    }

    Ok(())
}
