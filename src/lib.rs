//! # ACD Engine
//!
//! Skill-based automatic call distribution for contact-center backends.
//! The engine keeps a registry of agents with their skill sets and live
//! load, scores eligible agents for each incoming work item, and queues
//! items no one can take yet until capacity frees up.
//!
//! ## Architecture
//!
//! - **Agent registry** — agent records, a skill inverted index, and
//!   atomic capacity accounting
//! - **Matcher** — eligibility filtering and score-based ranking
//! - **Work queue** — priority-ordered holding area with cancellation
//!   and expiry
//! - **Remote authority** — optional HTTP backend consulted first for
//!   every decision, with automatic local fallback
//! - **Routing engine** — the facade wiring the above together, plus a
//!   background drain scheduler
//!
//! ## Quick start
//!
//! ```no_run
//! use std::collections::BTreeSet;
//! use acd_engine::prelude::*;
//!
//! # async fn example() -> acd_engine::Result<()> {
//! let engine = RoutingEngine::new(EngineConfig::default())?;
//!
//! let skills: BTreeSet<String> = ["sales".to_string()].into();
//! engine
//!     .register_agent(AgentId::new("alice"), skills.clone(), None)
//!     .await?;
//!
//! match engine.find_best_agent(&skills, Priority::Normal).await? {
//!     Some(agent_id) => println!("route to {agent_id}"),
//!     None => engine.enqueue(WorkItem::new(skills, Priority::Normal)).await?,
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod engine;
pub mod error;
pub mod queue;
pub mod remote;
pub mod routing;

pub use agent::{Agent, AgentId, AgentRegistry, AgentStats, AgentStatus};
pub use config::{EngineConfig, QueueConfig, RemoteConfig, RoutingConfig};
pub use engine::{RoutingEngine, RoutingStats};
pub use error::{Result, RoutingError};
pub use queue::{Assignment, Priority, QueueStats, WorkItem, WorkQueue};
pub use remote::{HttpRemoteAuthority, RemoteAuthority};
pub use routing::Matcher;

/// Common imports for working with the engine
pub mod prelude {
    pub use crate::agent::{Agent, AgentId, AgentStatus};
    pub use crate::config::EngineConfig;
    pub use crate::engine::{RoutingEngine, RoutingStats};
    pub use crate::error::{Result, RoutingError};
    pub use crate::queue::{Assignment, Priority, WorkItem};
    pub use crate::remote::RemoteAuthority;
}
