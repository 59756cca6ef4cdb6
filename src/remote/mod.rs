//! Remote authority client module
//!
//! The external routing service may also compute registration, matching,
//! and queueing decisions. Every call here is failure-tolerant: the
//! engine wraps each one in a timeout and falls back to local
//! computation, so a dead remote never stops routing.

pub mod client;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::{AgentId, AgentStatus};
use crate::queue::{Assignment, Priority, WorkItem};

pub use client::HttpRemoteAuthority;

/// Remote authority errors
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Transport-level failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with something the client cannot use
    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

/// Result type for remote authority calls
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Full agent record pushed to the remote service on registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentUpdate {
    pub id: AgentId,
    pub skills: BTreeSet<String>,
    pub max_concurrent: u32,
    pub status: AgentStatus,
}

/// Completion outcome pushed to the remote service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Matching request forwarded to the remote service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    pub required_skills: BTreeSet<String>,
    pub priority: Priority,
}

/// External routing authority.
///
/// All methods may time out or error; callers recover via the local
/// fallback path and never surface these failures.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Push a full agent record
    async fn update_agent(&self, update: AgentUpdate) -> RemoteResult<()>;

    /// Push an agent status change
    async fn update_agent_status(&self, id: &AgentId, status: AgentStatus) -> RemoteResult<()>;

    /// Push a completion outcome for an agent
    async fn update_agent_metrics(&self, id: &AgentId, report: MetricsReport) -> RemoteResult<()>;

    /// Ask the service to pick the best agent; its answer is authoritative
    async fn find_best_agent(&self, request: MatchRequest) -> RemoteResult<Option<AgentId>>;

    /// Hand a work item to the service's queue
    async fn queue_work_item(&self, item: &WorkItem) -> RemoteResult<()>;

    /// Ask the service to drain its queue
    async fn process_queue(&self) -> RemoteResult<Vec<Assignment>>;
}
