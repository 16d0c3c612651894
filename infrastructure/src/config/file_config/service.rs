//! Service configuration from TOML (`[service]` section)

use crate::copilot::client::DEFAULT_CLI_PATH;
use serde::{Deserialize, Serialize};

/// Raw service configuration from TOML.
///
/// ```toml
/// [service]
/// default_timeout_ms = 1800000
/// grace_period_ms = 2000
/// default_model = "gpt-5"
/// cli_path = "/opt/copilot/bin/copilot"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileServiceConfig {
    /// Timeout for sends that do not specify one.
    pub default_timeout_ms: u64,
    /// Longest timeout served by the backend's blocking call.
    pub blocking_call_ceiling_ms: u64,
    /// Wait after `assistant.turn_end` before settling without `session.idle`.
    pub grace_period_ms: u64,
    pub default_model: Option<String>,
    /// Copilot CLI binary, looked up on `PATH` when not absolute.
    pub cli_path: String,
}

impl Default for FileServiceConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 1_800_000,
            blocking_call_ceiling_ms: 120_000,
            grace_period_ms: 2_000,
            default_model: None,
            cli_path: DEFAULT_CLI_PATH.to_string(),
        }
    }
}
