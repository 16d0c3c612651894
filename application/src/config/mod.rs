//! Application-level configuration.
//!
//! - [`ServiceConfig`]: timeouts, grace period and defaults used by
//!   [`PilotService`](crate::use_cases::pilot_service::PilotService)
//! - [`PoolConfig`]: sizing and idle eviction for the
//!   [`SessionPool`](crate::use_cases::session_pool::SessionPool)

pub mod service_config;

pub use service_config::{PoolConfig, ServiceConfig};
