//! Raw TOML configuration data types
//!
//! These structs represent the exact structure of the TOML config file.
//! Durations are plain millisecond integers on disk and become
//! [`Duration`]s in [`FileConfig::to_service_config`].

mod logging;
mod mcp;
mod pool;
mod service;

pub use logging::FileLoggingConfig;
pub use mcp::FileMcpConfig;
pub use pool::FilePoolConfig;
pub use service::FileServiceConfig;

use pilot_application::{PoolConfig, ServiceConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Complete file configuration (raw TOML structure)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Timeouts, default model and CLI location
    pub service: FileServiceConfig,
    /// Session pool sizing
    pub pool: FilePoolConfig,
    /// Default MCP server loading
    pub mcp: FileMcpConfig,
    /// Conversation transcript
    pub logging: FileLoggingConfig,
}

/// A suspicious but loadable setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl FileConfig {
    /// Check the configuration, returning every warning found.
    ///
    /// None of these stop the program; the binary reports them and carries on.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut warn = |field: &'static str, message: String| {
            issues.push(ConfigIssue { field, message });
        };

        if self.pool.max_sessions == 0 {
            warn(
                "pool.max_sessions",
                "0 is not a usable pool size, 1 will be used".to_string(),
            );
        }
        if self.service.default_timeout_ms == 0 {
            warn(
                "service.default_timeout_ms",
                "every send without an explicit timeout will time out immediately".to_string(),
            );
        }
        if self.service.grace_period_ms == 0 {
            warn(
                "service.grace_period_ms",
                "responses settle at the first turn end, multi-turn replies may be cut short"
                    .to_string(),
            );
        } else if self.service.grace_period_ms >= self.service.default_timeout_ms {
            warn(
                "service.grace_period_ms",
                format!(
                    "grace period ({}ms) is not shorter than the default timeout ({}ms)",
                    self.service.grace_period_ms, self.service.default_timeout_ms
                ),
            );
        }
        if self.service.cli_path.trim().is_empty() {
            warn(
                "service.cli_path",
                "empty, the Copilot CLI cannot be located".to_string(),
            );
        }

        issues
    }

    /// Convert to the application's service configuration.
    pub fn to_service_config(&self) -> ServiceConfig {
        ServiceConfig {
            default_timeout: Duration::from_millis(self.service.default_timeout_ms),
            blocking_call_ceiling: Duration::from_millis(self.service.blocking_call_ceiling_ms),
            grace_period: Duration::from_millis(self.service.grace_period_ms),
            default_model: self.service.default_model.clone(),
            load_default_mcp_config: self.mcp.load_default_config,
            pool: PoolConfig {
                max_sessions: self.pool.max_sessions,
                idle_timeout: Duration::from_millis(self.pool.idle_timeout_ms),
                acquire_timeout: Duration::from_millis(self.pool.acquire_timeout_ms),
                reap_interval: Duration::from_millis(self.pool.reap_interval_ms),
            },
        }
    }
}
