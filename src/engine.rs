use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentId, AgentRegistry, AgentStats, AgentStatus};
use crate::config::EngineConfig;
use crate::error::{Result, RoutingError};
use crate::queue::{Assignment, Priority, QueueStats, WorkItem, WorkQueue};
use crate::remote::{
    AgentUpdate, HttpRemoteAuthority, MatchRequest, MetricsReport, RemoteAuthority, RemoteResult,
};
use crate::routing::Matcher;

/// Engine-level counters
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingStats {
    pub assignments: u64,
    pub queued: u64,
    pub drained: u64,
    pub cancelled: u64,
    pub expired: u64,
    pub remote_fallbacks: u64,
}

/// Skill-based routing engine.
///
/// Central coordinator for agent registration, best-fit matching, and
/// work queueing. Routing decisions are delegated to the remote
/// authority when one is configured; on any remote failure or timeout
/// the engine falls back to local computation, so routing keeps
/// functioning when the authority is down.
pub struct RoutingEngine {
    config: EngineConfig,

    registry: Arc<AgentRegistry>,
    matcher: Matcher,
    queue: Arc<WorkQueue>,
    remote: Option<Arc<dyn RemoteAuthority>>,

    stats: RwLock<RoutingStats>,

    /// Signalled when an agent gains capacity, triggering a drain pass
    work_available: Notify,

    /// Assignments produced by background drain passes
    assignment_tx: broadcast::Sender<Assignment>,

    shutdown_tx: watch::Sender<bool>,
}

impl RoutingEngine {
    /// Create an engine from configuration.
    ///
    /// A remote authority client is built when `remote.base_url` is
    /// configured; otherwise every decision is computed locally.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let remote: Option<Arc<dyn RemoteAuthority>> = match &config.remote.base_url {
            Some(url) => Some(Arc::new(HttpRemoteAuthority::new(
                url,
                config.remote.timeout,
            )?)),
            None => None,
        };
        Self::with_remote(config, remote)
    }

    /// Create an engine with an injected remote authority (or none)
    pub fn with_remote(
        config: EngineConfig,
        remote: Option<Arc<dyn RemoteAuthority>>,
    ) -> Result<Self> {
        config.validate().map_err(RoutingError::config)?;

        let registry = Arc::new(AgentRegistry::new());
        let (shutdown_tx, _) = watch::channel(false);
        let (assignment_tx, _) = broadcast::channel(64);

        Ok(Self {
            registry: Arc::clone(&registry),
            matcher: Matcher::new(Arc::clone(&registry)),
            queue: Arc::new(WorkQueue::new(config.queues.max_queue_size)),
            remote,
            stats: RwLock::new(RoutingStats::default()),
            work_available: Notify::new(),
            assignment_tx,
            shutdown_tx,
            config,
        })
    }

    /// Register an agent (or replace its record).
    ///
    /// `max_concurrent` falls back to the configured default when unset.
    pub async fn register_agent(
        &self,
        id: AgentId,
        skills: BTreeSet<String>,
        max_concurrent: Option<u32>,
    ) -> Result<()> {
        let capacity = max_concurrent.unwrap_or(self.config.routing.default_max_concurrent);
        self.registry
            .register(id.clone(), skills.clone(), capacity)
            .await?;

        let remote = self.remote.clone().map(|remote| async move {
            remote
                .update_agent(AgentUpdate {
                    id,
                    skills,
                    max_concurrent: capacity,
                    status: AgentStatus::Available,
                })
                .await
        });
        self.notify_remote("update_agent", remote).await;

        self.work_available.notify_one();
        Ok(())
    }

    /// Deregister an agent, removing it from matching entirely
    pub async fn deregister_agent(&self, id: &AgentId) -> Result<()> {
        self.registry.deregister(id).await?;

        let remote = self.remote.clone().map(|remote| {
            let id = id.clone();
            async move { remote.update_agent_status(&id, AgentStatus::Offline).await }
        });
        self.notify_remote("update_agent_status", remote).await;
        Ok(())
    }

    /// Update an agent's status
    pub async fn update_agent_status(&self, id: &AgentId, status: AgentStatus) -> Result<()> {
        self.registry.set_status(id, status).await?;

        let remote = self.remote.clone().map(|remote| {
            let id = id.clone();
            async move { remote.update_agent_status(&id, status).await }
        });
        self.notify_remote("update_agent_status", remote).await;

        if status == AgentStatus::Available {
            self.work_available.notify_one();
        }
        Ok(())
    }

    /// Record a work completion, releasing one unit of the agent's load
    pub async fn record_completion(&self, id: &AgentId, success: bool) -> Result<()> {
        self.registry.record_completion(id, success).await?;

        let remote = self.remote.clone().map(|remote| {
            let id = id.clone();
            async move {
                remote
                    .update_agent_metrics(
                        &id,
                        MetricsReport {
                            success,
                            timestamp: Utc::now(),
                        },
                    )
                    .await
            }
        });
        self.notify_remote("update_agent_metrics", remote).await;

        // The agent just freed capacity; queued work may now match.
        self.work_available.notify_one();
        Ok(())
    }

    /// Find and claim the best agent for the given requirements.
    ///
    /// The remote authority is consulted first and its answer returned
    /// verbatim; on remote failure the engine selects locally. Either
    /// way the returned agent's load has been committed atomically, so
    /// a second call without a completion in between will not hand out
    /// capacity the agent does not have. `Ok(None)` is a defined
    /// outcome: no eligible agent, the caller should enqueue.
    pub async fn find_best_agent(
        &self,
        required_skills: &BTreeSet<String>,
        priority: Priority,
    ) -> Result<Option<AgentId>> {
        let remote = self.remote.clone().map(|remote| {
            let registry = Arc::clone(&self.registry);
            let request = MatchRequest {
                required_skills: required_skills.clone(),
                priority,
            };
            async move {
                let answer = remote.find_best_agent(request).await?;
                if let Some(agent_id) = &answer {
                    // Authoritative answer, but local load is still
                    // re-validated before claiming capacity.
                    match registry.try_commit(agent_id).await {
                        Ok(true) => {}
                        Ok(false) => warn!(
                            "⚠️ Remote selected agent {} which is at capacity locally",
                            agent_id
                        ),
                        Err(_) => debug!(
                            "Remote selected agent {} which is not registered locally",
                            agent_id
                        ),
                    }
                }
                Ok(answer)
            }
        });

        let assigned = self
            .remote_or_local("find_best_agent", remote, async {
                Ok(self.select_and_commit(required_skills, priority).await)
            })
            .await?;

        if assigned.is_some() {
            self.stats.write().assignments += 1;
        }
        Ok(assigned)
    }

    /// Enqueue a work item for later matching.
    ///
    /// A duplicate id is not queued twice and is not counted.
    pub async fn enqueue(&self, mut item: WorkItem) -> Result<()> {
        item.enqueued_at = Utc::now();
        item.assigned_agent = None;

        let remote = self.remote.clone().map(|remote| {
            let item = item.clone();
            async move { remote.queue_work_item(&item).await.map(|_| true) }
        });
        let queued = self
            .remote_or_local("enqueue", remote, async {
                Ok(self.queue.enqueue(item.clone()).await?.is_some())
            })
            .await?;

        if queued {
            self.stats.write().queued += 1;
        }
        Ok(())
    }

    /// Attempt to match queued work, high priority first, oldest first.
    ///
    /// Matched items are removed from the queue and returned paired with
    /// their agents; unmatched items stay queued in their original
    /// relative order, so repeated calls are safe.
    pub async fn drain(&self) -> Result<Vec<Assignment>> {
        let remote = self.remote.clone().map(|remote| {
            let registry = Arc::clone(&self.registry);
            let queue = Arc::clone(&self.queue);
            async move {
                let assignments = remote.process_queue().await?;
                for assignment in &assignments {
                    match registry.try_commit(&assignment.agent_id).await {
                        Ok(true) => {}
                        Ok(false) => warn!(
                            "⚠️ Remote assigned agent {} which is at capacity locally",
                            assignment.agent_id
                        ),
                        Err(_) => debug!(
                            "Remote assigned agent {} which is not registered locally",
                            assignment.agent_id
                        ),
                    }
                    queue.finish_assignment(&assignment.item.id).await;
                }
                Ok(assignments)
            }
        });

        let assignments = self
            .remote_or_local("process_queue", remote, self.drain_local())
            .await?;

        if !assignments.is_empty() {
            self.stats.write().drained += assignments.len() as u64;
            for assignment in &assignments {
                let _ = self.assignment_tx.send(assignment.clone());
            }
        }
        Ok(assignments)
    }

    /// Remove and return queued items older than the configured TTL.
    /// A no-op unless `queues.max_wait_time` is set.
    pub async fn drain_expired(&self) -> Vec<WorkItem> {
        match self.config.queues.max_wait_time {
            Some(max_wait) => {
                let expired = self.queue.remove_expired(max_wait, Utc::now()).await;
                if !expired.is_empty() {
                    self.stats.write().expired += expired.len() as u64;
                }
                expired
            }
            None => Vec::new(),
        }
    }

    /// Withdraw a queued work item before it is matched.
    ///
    /// Returns `false` when the item is unknown or a drain pass is
    /// already matching it; an item is either drained or cancelled,
    /// never both.
    pub async fn cancel(&self, item_id: &str) -> bool {
        let cancelled = self.queue.cancel(item_id).await;
        if cancelled {
            self.stats.write().cancelled += 1;
        }
        cancelled
    }

    /// Start the background drain scheduler.
    ///
    /// Drains run periodically and whenever an agent gains capacity.
    /// Assignments made in the background are published to
    /// [`subscribe_assignments`](Self::subscribe_assignments).
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            info!(
                "🚀 Drain scheduler started (interval: {:?})",
                engine.config.queues.drain_interval
            );
            let mut ticker = tokio::time::interval(engine.config.queues.drain_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = engine.work_available.notified() => {}
                    _ = shutdown.changed() => {
                        info!("🛑 Drain scheduler stopped");
                        return;
                    }
                }
                // With a remote authority the queued items live on the
                // service, so an empty local queue proves nothing.
                if engine.remote.is_none() && engine.queue.is_empty().await {
                    continue;
                }
                match engine.drain().await {
                    Ok(assignments) if !assignments.is_empty() => {
                        info!(
                            "📊 Background drain made {} assignments",
                            assignments.len()
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Background drain failed: {}", e),
                }
            }
        })
    }

    /// Stop the background drain scheduler
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Subscribe to assignments made by background drain passes
    pub fn subscribe_assignments(&self) -> broadcast::Receiver<Assignment> {
        self.assignment_tx.subscribe()
    }

    /// Engine counters snapshot
    pub fn stats(&self) -> RoutingStats {
        *self.stats.read()
    }

    /// Aggregate agent statistics
    pub async fn agent_stats(&self) -> AgentStats {
        self.registry.stats().await
    }

    /// Work queue statistics
    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    /// Number of queued work items
    pub async fn queue_len(&self) -> usize {
        self.queue.len().await
    }

    /// Whether a work item is still queued
    pub async fn is_queued(&self, item_id: &str) -> bool {
        self.queue.contains(item_id).await
    }

    /// Snapshot of a single agent
    pub async fn agent(&self, id: &AgentId) -> Option<Agent> {
        self.registry.agent(id).await
    }

    /// List all registered agents
    pub async fn list_agents(&self) -> Vec<Agent> {
        self.registry.list_agents().await
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Try the remote authority first, then fall back to the local
    /// computation. The single dual-path strategy shared by matching,
    /// enqueueing, and draining. The remote future runs outside every
    /// lock and is bounded by the configured timeout.
    async fn remote_or_local<T, R, L>(
        &self,
        op: &'static str,
        remote: Option<R>,
        local: L,
    ) -> Result<T>
    where
        R: Future<Output = RemoteResult<T>>,
        L: Future<Output = Result<T>>,
    {
        if let Some(remote) = remote {
            match tokio::time::timeout(self.config.remote.timeout, remote).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => warn!("⚠️ Remote {} failed, using local fallback: {}", op, e),
                Err(_) => warn!(
                    "⚠️ Remote {} timed out after {:?}, using local fallback",
                    op, self.config.remote.timeout
                ),
            }
            self.stats.write().remote_fallbacks += 1;
        }
        local.await
    }

    /// Fire-and-forget push to the remote authority. Local state is
    /// already authoritative at this point, so failures are only logged.
    async fn notify_remote<R>(&self, op: &'static str, remote: Option<R>)
    where
        R: Future<Output = RemoteResult<()>>,
    {
        if let Some(remote) = remote {
            match tokio::time::timeout(self.config.remote.timeout, remote).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("⚠️ Remote {} failed: {}", op, e),
                Err(_) => warn!("⚠️ Remote {} timed out", op),
            }
        }
    }

    /// Local selection plus atomic commit.
    ///
    /// Walks the ranked candidates and claims the first whose
    /// eligibility still holds under the registry lock, so two racing
    /// callers can never push an agent past its capacity.
    async fn select_and_commit(
        &self,
        required_skills: &BTreeSet<String>,
        priority: Priority,
    ) -> Option<AgentId> {
        for agent_id in self.matcher.rank(required_skills, priority).await {
            match self.registry.try_commit(&agent_id).await {
                Ok(true) => return Some(agent_id),
                Ok(false) | Err(_) => continue,
            }
        }
        None
    }

    async fn drain_local(&self) -> Result<Vec<Assignment>> {
        self.drain_expired().await;

        let mut assignments = Vec::new();
        let mut deferred = Vec::new();
        while let Some(item) = self.queue.next_for_assignment().await {
            match self
                .select_and_commit(&item.required_skills, item.priority)
                .await
            {
                Some(agent_id) => match self.queue.finish_assignment(&item.id).await {
                    Some(mut item) => {
                        item.assigned_agent = Some(agent_id.clone());
                        info!("📤 Assigned queued work item {} to agent {}", item.id, agent_id);
                        assignments.push(Assignment { item, agent_id });
                    }
                    None => {
                        // The item vanished while marked; give the capacity back.
                        let _ = self.registry.release(&agent_id).await;
                    }
                },
                None => deferred.push(item.id),
            }
        }
        for item_id in deferred {
            self.queue.abort_assignment(&item_id);
        }
        Ok(assignments)
    }
}
