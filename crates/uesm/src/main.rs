//! uesm - UE session manager
//!
//! Main entry point for the uesm CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use uesm_config::{ConfigSource, LoadedConfig, LoggingConfig};

mod commands;

use commands::{config, demo};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// uesm - UE session manager
#[derive(Parser)]
#[command(name = "uesm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Use this config file instead of discovering one
    #[arg(long, global = true, env = "UESM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Configuration management
    Config(config::ConfigArgs),

    /// Run a session lifecycle walkthrough against the configured backend
    Demo(demo::DemoArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => LoadedConfig {
            config: uesm_config::load_config_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            sources: vec![ConfigSource {
                path: path.clone(),
                loaded: true,
            }],
            warnings: Vec::new(),
        },
        None => uesm_config::load_config(None)?,
    };

    let _guard = init_tracing(&loaded.config.logging(), cli.verbose);
    for warning in &loaded.warnings {
        tracing::warn!("{warning}");
    }

    let ctx = commands::Context {
        json_output: cli.json,
        loaded,
    };

    match cli.command {
        Commands::Config(args) => config::run(args, &ctx).await,
        Commands::Demo(args) => demo::run(args, &ctx).await,
    }
}

/// Install the console layer and, when `file_dir` is set, a daily-rolling
/// JSON file layer. The returned guard must live until exit so buffered file
/// output is flushed.
fn init_tracing(logging: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let level = if verbose {
        "debug".to_string()
    } else {
        logging.level.to_ascii_lowercase()
    };
    let directives = format!("uesm={level},uesm_session={level},uesm_config={level},warn");
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    // Console output goes to stderr; stdout is reserved for command output.
    let console = if logging.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    };

    let (file, guard) = match &logging.file_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "uesm.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_filter(EnvFilter::new(
                "uesm=trace,uesm_session=trace,uesm_config=trace,info",
            ));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry().with(console).with(file).init();
    guard
}
