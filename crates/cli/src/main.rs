//! diskdoc CLI: the main entry point.
//!
//! Commands:
//! - `init`: Write the default config to `~/.diskdoc/config.toml`
//! - `run` : Work on a single task, streaming the agent's reply
//! - `chat`: Read tasks from stdin, one per line, sharing one history

use anyhow::Context;
use clap::{Parser, Subcommand};
use diskdoc_config::AppConfig;
use tracing_subscriber::EnvFilter;

mod commands;
mod console;
mod tools;

#[derive(Parser)]
#[command(
    name = "diskdoc",
    about = "diskdoc: an LLM agent that diagnoses and fixes storage problems",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Activate a built-in skill before the first task (repeatable)
    #[arg(long = "skill", global = true, value_name = "NAME")]
    skills: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Work on one task and exit
    Run {
        /// The problem to diagnose, e.g. "why is /var full?"
        task: String,
    },

    /// Interactive session; each line is a new task
    Chat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            init_tracing(cli.verbose, "info");
            commands::init::run(force)
        }
        Commands::Run { task } => {
            let config = load_config(cli.verbose)?;
            commands::task::run(&config, &task, &cli.skills).await
        }
        Commands::Chat => {
            let config = load_config(cli.verbose)?;
            commands::task::chat(&config, &cli.skills).await
        }
    }
}

fn load_config(verbose: bool) -> anyhow::Result<AppConfig> {
    let config = AppConfig::load().context("Failed to load config")?;
    init_tracing(verbose, &config.log_level);
    Ok(config)
}

/// `RUST_LOG` wins, then `--verbose`, then the configured level. Logs go
/// to stderr so stdout carries only the agent's reply.
fn init_tracing(verbose: bool, configured: &str) {
    let fallback = if verbose { "debug" } else { configured };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
