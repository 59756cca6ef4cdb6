//! Work queue management module
//!
//! This module provides priority-ordered queueing for work items that
//! could not be matched to an agent on arrival.

pub mod manager;

pub use manager::{Assignment, Priority, QueueStats, WorkItem, WorkQueue};
