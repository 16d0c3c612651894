//! Configuration file loading for copilot-pilot
//!
//! This module handles file I/O and merging of configuration from multiple sources.
//! The priority order (highest to lowest):
//!
//! 1. `PILOT_*` environment variables
//! 2. `--config <path>` specified file
//! 3. Project root: `./pilot.toml` or `./.pilot.toml`
//! 4. Global: `$XDG_CONFIG_HOME/copilot-pilot/config.toml`
//! 5. Default values

mod file_config;
mod loader;

pub use file_config::{
    ConfigIssue, FileConfig, FileLoggingConfig, FileMcpConfig, FilePoolConfig, FileServiceConfig,
};
pub use loader::ConfigLoader;
