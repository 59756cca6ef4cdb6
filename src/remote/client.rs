use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::agent::{AgentId, AgentStatus};
use crate::error::{Result, RoutingError};
use crate::queue::{Assignment, WorkItem};

use super::{AgentUpdate, MatchRequest, MetricsReport, RemoteAuthority, RemoteResult};

/// HTTP client for the remote routing authority
pub struct HttpRemoteAuthority {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MatchResponse {
    agent_id: Option<AgentId>,
}

impl HttpRemoteAuthority {
    /// Create a client against the given base URL.
    ///
    /// The per-request timeout is a transport safety net; the engine
    /// applies its own, tighter fallback timeout around every call.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        base_url
            .parse::<reqwest::Url>()
            .map_err(|e| RoutingError::config(format!("Invalid remote base URL: {}", e)))?;

        let client = Client::builder()
            .timeout(timeout.saturating_mul(2))
            .build()
            .map_err(|e| RoutingError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn update_agent(&self, update: AgentUpdate) -> RemoteResult<()> {
        debug!("🌐 PUT agent {}", update.id);
        self.client
            .put(self.url(&format!("/agents/{}", update.id)))
            .json(&update)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn update_agent_status(&self, id: &AgentId, status: AgentStatus) -> RemoteResult<()> {
        debug!("🌐 PUT agent {} status {}", id, status);
        self.client
            .put(self.url(&format!("/agents/{}/status", id)))
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn update_agent_metrics(&self, id: &AgentId, report: MetricsReport) -> RemoteResult<()> {
        debug!("🌐 POST agent {} metrics", id);
        self.client
            .post(self.url(&format!("/agents/{}/metrics", id)))
            .json(&report)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn find_best_agent(&self, request: MatchRequest) -> RemoteResult<Option<AgentId>> {
        let response: MatchResponse = self
            .client
            .post(self.url("/routing/match"))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("🌐 Remote match answer: {:?}", response.agent_id);
        Ok(response.agent_id)
    }

    async fn queue_work_item(&self, item: &WorkItem) -> RemoteResult<()> {
        debug!("🌐 POST work item {} to remote queue", item.id);
        self.client
            .post(self.url("/queue"))
            .json(item)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn process_queue(&self) -> RemoteResult<Vec<Assignment>> {
        let assignments: Vec<Assignment> = self
            .client
            .post(self.url("/queue/process"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("🌐 Remote drain returned {} assignments", assignments.len());
        Ok(assignments)
    }
}
