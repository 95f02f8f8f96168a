//! CLI command handlers.

pub mod config;
pub mod demo;

use uesm_config::{LoadedConfig, UesmConfig};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Configuration and the files it came from.
    pub loaded: LoadedConfig,
}

impl Context {
    /// The merged configuration.
    pub fn config(&self) -> &UesmConfig {
        &self.loaded.config
    }
}
