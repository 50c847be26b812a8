use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use keymesh::commands;
use keymesh::config::Config;

#[derive(Parser)]
#[command(
    name = "keymesh",
    version,
    about = "Keyserver mesh spider and pool IP query service",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one crawl of the mesh and print the host listing
    Crawl {
        /// Seed hostnames to start from (overrides configuration)
        #[arg(short, long)]
        seed: Vec<String>,
    },

    /// Run the periodic crawl loop and the query service
    Serve {
        /// Seed hostnames to start from (overrides configuration)
        #[arg(short, long)]
        seed: Vec<String>,

        /// Bind address (overrides configuration)
        #[arg(short, long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    match cli.command {
        Commands::Crawl { seed } => {
            config.validate()?;
            tracing::info!(seeds = ?seed, "starting crawl command");
            commands::crawl(config, seed).await?;
        }

        Commands::Serve { seed, bind } => {
            if let Some(bind) = bind {
                config.server.bind_addr = bind;
            }
            config.validate()?;
            tracing::info!(bind = %config.server.bind_addr, "starting serve command");
            commands::serve(config, seed).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("keymesh=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("keymesh=info,warn"))
    };

    match format {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
    }

    Ok(())
}
