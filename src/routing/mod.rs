//! Agent matching module
//!
//! This module implements the fitness scoring and best-fit selection
//! that decides which eligible agent takes an incoming work item.
//!
//! Selection is a pure read over a registry snapshot; claiming the
//! selected agent's capacity is a separate atomic commit on the
//! [`AgentRegistry`](crate::agent::AgentRegistry).

pub mod matcher;
pub mod scorer;

pub use matcher::Matcher;
pub use scorer::score;
