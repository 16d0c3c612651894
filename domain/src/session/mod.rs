//! Session domain.
//!
//! - [`event::SessionEvent`]: one typed lifecycle event from a backend session
//! - [`usage::TokenUsage`]: usage aggregated over all turns of one send
//! - [`result::StreamingResult`] / [`result::ServiceResult`]: settled outcomes

pub mod event;
pub mod result;
pub mod usage;
