//! Service configuration: timeouts and pool sizing.

use std::time::Duration;

/// Controls how [`PilotService`](crate::use_cases::pilot_service::PilotService)
/// drives the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Timeout applied when a send does not specify one.
    pub default_timeout: Duration,
    /// Longest timeout the backend's blocking `send_and_wait` honours.
    /// Sends with a longer timeout always stream.
    pub blocking_call_ceiling: Duration,
    /// Wait after `assistant.turn_end` before settling without `session.idle`.
    pub grace_period: Duration,
    /// Model used when a send does not name one.
    pub default_model: Option<String>,
    /// Merge the per-user MCP config into sessions unless a send opts out.
    pub load_default_mcp_config: bool,
    pub pool: PoolConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30 * 60),
            blocking_call_ceiling: Duration::from_secs(120),
            grace_period: Duration::from_millis(2000),
            default_model: None,
            load_default_mcp_config: true,
            pool: PoolConfig::default(),
        }
    }
}

impl ServiceConfig {
    // ==================== Builder Methods ====================

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_blocking_call_ceiling(mut self, ceiling: Duration) -> Self {
        self.blocking_call_ceiling = ceiling;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_default_mcp_config(mut self, enabled: bool) -> Self {
        self.load_default_mcp_config = enabled;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

/// Sizing and eviction for the session pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Upper bound on live pooled sessions (idle + busy + being created).
    pub max_sessions: usize,
    /// Idle sessions older than this are destroyed.
    pub idle_timeout: Duration,
    /// How long `acquire` waits for capacity.
    pub acquire_timeout: Duration,
    /// Period of the background reaper.
    pub reap_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 5,
            idle_timeout: Duration::from_secs(5 * 60),
            acquire_timeout: Duration::from_secs(30),
            reap_interval: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }
}
