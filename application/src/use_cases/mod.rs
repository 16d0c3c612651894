//! Use cases
//!
//! Application-level operations that drive backend sessions.

pub mod pilot_service;
pub mod session_pool;
pub mod streaming_completion;
