//! Configuration for the UE session manager.
//!
//! Provides TOML-based configuration with:
//! - A `[store]` section selecting the key-value backend
//! - A `[session]` section with TTL bounds and keep-alive behaviour
//! - A `[logging]` section for console and file output
//! - Config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    project_config_path, save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
