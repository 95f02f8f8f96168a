//! Config command - configuration management.

use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};

use uesm_config::UesmConfig;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration with defaults filled in
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./uesm.toml) instead of user config
        #[arg(long)]
        local: bool,
    },
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Init { local } => cmd_init(local, ctx),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let config = ctx.config();
    let effective = UesmConfig {
        store: Some(config.store()),
        session: Some(config.session()),
        logging: Some(config.logging()),
    };
    let validation = config.validate();

    if ctx.json_output {
        let output = serde_json::json!({
            "config": effective,
            "sources": ctx.loaded.loaded_from(),
            "valid": validation.is_ok(),
            "error": validation.as_ref().err().map(ToString::to_string),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("# uesm configuration\n");
    let sources = ctx.loaded.loaded_from();
    if sources.is_empty() {
        println!("# No config files loaded (using defaults)\n");
    } else {
        for path in sources {
            println!("# Loaded: {}", path.display());
        }
        println!();
    }

    print!("{}", effective.to_toml()?);

    if let Err(e) = validation {
        println!("\n# Invalid: {e}");
    }
    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    if ctx.json_output {
        let sources: Vec<_> = ctx
            .loaded
            .sources
            .iter()
            .map(|s| serde_json::json!({ "path": s.path, "loaded": s.loaded }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    println!("Config file search order (later overrides earlier):\n");

    for source in &ctx.loaded.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, source.path.display());
    }

    println!();
    let loaded_count = ctx.loaded.loaded_from().len();
    if loaded_count == 0 {
        println!("No config files found. Run 'uesm config init' to create one.");
    } else {
        println!("{} config file(s) loaded.", loaded_count);
    }

    Ok(())
}

fn cmd_init(local: bool, ctx: &Context) -> Result<()> {
    let path = if local {
        uesm_config::project_config_path(None)
    } else {
        uesm_config::xdg_config_path()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?
    };

    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    uesm_config::save_config(&UesmConfig::with_defaults(), &path)?;

    if ctx.json_output {
        println!("{}", serde_json::json!({ "created": path }));
    } else {
        println!("Created config file: {}", path.display());
    }
    Ok(())
}
