//! Agent management module
//!
//! This module provides agent registration, status tracking, and the
//! skill index used for skill-based matching.

pub mod registry;

pub use registry::{Agent, AgentId, AgentRegistry, AgentStats, AgentStatus};
