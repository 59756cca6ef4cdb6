use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Result, RoutingError};

/// Unique agent identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Agent status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Agent is available for work
    Available,

    /// Agent is busy and must not receive new work
    Busy,

    /// Agent is away
    Away,

    /// Agent is offline
    Offline,
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "available" | "Available" => Ok(AgentStatus::Available),
            "busy" | "Busy" => Ok(AgentStatus::Busy),
            "away" | "Away" => Ok(AgentStatus::Away),
            "offline" | "Offline" => Ok(AgentStatus::Offline),
            _ => Err(format!("Unknown agent status: {}", s)),
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Available => "available",
            AgentStatus::Busy => "busy",
            AgentStatus::Away => "away",
            AgentStatus::Offline => "offline",
        };
        write!(f, "{}", s)
    }
}

/// Agent information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,

    /// Skill tags. An empty set marks a generalist, who qualifies for
    /// skill-less work only.
    pub skills: BTreeSet<String>,

    pub status: AgentStatus,

    /// Number of concurrently assigned work items
    pub current_load: u32,

    /// Capacity ceiling, at least 1
    pub max_concurrent: u32,

    /// Rolling percentage of successful completions, 0.0..=100.0
    pub success_rate: f64,

    pub total_calls: u64,
    pub successful_calls: u64,

    /// Timestamp of last work completion, unset for a fresh agent
    pub last_completion: Option<DateTime<Utc>>,
}

impl Agent {
    /// An agent is eligible iff it is available and below capacity.
    pub fn is_eligible(&self) -> bool {
        self.status == AgentStatus::Available && self.current_load < self.max_concurrent
    }
}

/// Registry state guarded by a single lock so that agent mutations and
/// skill index patches stay consistent. Stale index entries would route
/// work to agents that no longer carry the skill.
#[derive(Debug, Default)]
struct RegistryState {
    agents: HashMap<AgentId, Agent>,
    skill_index: HashMap<String, BTreeSet<AgentId>>,
}

impl RegistryState {
    fn unindex(&mut self, agent: &Agent) {
        for skill in &agent.skills {
            if let Some(entry) = self.skill_index.get_mut(skill) {
                entry.remove(&agent.id);
                if entry.is_empty() {
                    self.skill_index.remove(skill);
                }
            }
        }
    }

    fn index(&mut self, agent: &Agent) {
        for skill in &agent.skills {
            self.skill_index
                .entry(skill.clone())
                .or_default()
                .insert(agent.id.clone());
        }
    }

    /// Intersection of the index entries for every required skill.
    /// An empty requirement matches every registered agent.
    fn candidates_for(&self, required: &BTreeSet<String>) -> BTreeSet<AgentId> {
        if required.is_empty() {
            return self.agents.keys().cloned().collect();
        }

        let mut skills = required.iter();
        let first = match skills.next() {
            Some(s) => s,
            None => return BTreeSet::new(),
        };

        let mut candidates = match self.skill_index.get(first) {
            Some(ids) => ids.clone(),
            None => return BTreeSet::new(),
        };

        for skill in skills {
            match self.skill_index.get(skill) {
                Some(ids) => candidates.retain(|id| ids.contains(id)),
                None => return BTreeSet::new(),
            }
            if candidates.is_empty() {
                break;
            }
        }

        candidates
    }
}

/// Agent registry owning the authoritative in-process agent state and
/// the skill index, shared between the matcher and the work queue.
pub struct AgentRegistry {
    state: RwLock<RegistryState>,
}

impl AgentRegistry {
    /// Create a new, empty agent registry
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Register an agent, replacing any previous record with the same id.
    ///
    /// The new record starts available with zero load and fresh counters;
    /// the skill index is patched for both the old and the new skill set.
    pub async fn register(
        &self,
        id: AgentId,
        skills: BTreeSet<String>,
        max_concurrent: u32,
    ) -> Result<()> {
        if max_concurrent == 0 {
            return Err(RoutingError::invalid_input(format!(
                "max_concurrent must be at least 1 for agent {}",
                id
            )));
        }

        let mut state = self.state.write().await;
        if let Some(previous) = state.agents.remove(&id) {
            state.unindex(&previous);
            debug!("👤 Replacing existing registration for agent {}", id);
        }

        let agent = Agent {
            id: id.clone(),
            skills,
            status: AgentStatus::Available,
            current_load: 0,
            max_concurrent,
            success_rate: 0.0,
            total_calls: 0,
            successful_calls: 0,
            last_completion: None,
        };
        state.index(&agent);
        state.agents.insert(id.clone(), agent);

        info!("👤 Agent {} registered (capacity: {})", id, max_concurrent);
        Ok(())
    }

    /// Remove an agent and all of its skill index entries
    pub async fn deregister(&self, id: &AgentId) -> Result<()> {
        let mut state = self.state.write().await;
        match state.agents.remove(id) {
            Some(agent) => {
                state.unindex(&agent);
                info!("🔌 Agent {} deregistered", id);
                Ok(())
            }
            None => Err(RoutingError::not_found(format!("Agent not found: {}", id))),
        }
    }

    /// Update agent status
    pub async fn set_status(&self, id: &AgentId, status: AgentStatus) -> Result<()> {
        let mut state = self.state.write().await;
        match state.agents.get_mut(id) {
            Some(agent) => {
                info!("🔄 Agent {} status: {} -> {}", id, agent.status, status);
                agent.status = status;
                Ok(())
            }
            None => Err(RoutingError::not_found(format!("Agent not found: {}", id))),
        }
    }

    /// Record a work completion for an agent.
    ///
    /// Updates the performance counters, recomputes the success rate,
    /// stamps the completion time, and releases one unit of load.
    pub async fn record_completion(&self, id: &AgentId, success: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(id)
            .ok_or_else(|| RoutingError::not_found(format!("Agent not found: {}", id)))?;

        agent.total_calls += 1;
        if success {
            agent.successful_calls += 1;
        }
        agent.success_rate = agent.successful_calls as f64 / agent.total_calls as f64 * 100.0;
        agent.last_completion = Some(Utc::now());
        agent.current_load = agent.current_load.saturating_sub(1);

        debug!(
            "📈 Agent {} completion recorded (success: {}, rate: {:.1}%, load: {})",
            id, success, agent.success_rate, agent.current_load
        );
        Ok(())
    }

    /// Atomically re-validate eligibility and claim one unit of capacity.
    ///
    /// Returns `Ok(true)` when the load was incremented, `Ok(false)` when
    /// the agent is known but no longer eligible, and `NotFound` for an
    /// unknown agent. This is the single commit point that keeps
    /// `current_load` from ever exceeding `max_concurrent`.
    pub async fn try_commit(&self, id: &AgentId) -> Result<bool> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(id)
            .ok_or_else(|| RoutingError::not_found(format!("Agent not found: {}", id)))?;

        if agent.is_eligible() {
            agent.current_load += 1;
            debug!(
                "🔒 Agent {} load committed ({}/{})",
                id, agent.current_load, agent.max_concurrent
            );
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Release one unit of load without touching the performance counters.
    /// Used when an assignment is abandoned after the commit.
    pub async fn release(&self, id: &AgentId) -> Result<()> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(id)
            .ok_or_else(|| RoutingError::not_found(format!("Agent not found: {}", id)))?;
        agent.current_load = agent.current_load.saturating_sub(1);
        Ok(())
    }

    /// Snapshot the eligible agents holding every required skill,
    /// in ascending id order.
    pub async fn eligible_candidates(&self, required: &BTreeSet<String>) -> Vec<Agent> {
        let state = self.state.read().await;
        state
            .candidates_for(required)
            .iter()
            .filter_map(|id| state.agents.get(id))
            .filter(|agent| agent.is_eligible())
            .cloned()
            .collect()
    }

    /// Agent ids holding every required skill, regardless of eligibility
    pub async fn candidates_for(&self, required: &BTreeSet<String>) -> BTreeSet<AgentId> {
        self.state.read().await.candidates_for(required)
    }

    /// Get a snapshot of a single agent
    pub async fn agent(&self, id: &AgentId) -> Option<Agent> {
        self.state.read().await.agents.get(id).cloned()
    }

    /// List all registered agents
    pub async fn list_agents(&self) -> Vec<Agent> {
        let state = self.state.read().await;
        let mut agents: Vec<Agent> = state.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Number of registered agents
    pub async fn len(&self) -> usize {
        self.state.read().await.agents.len()
    }

    /// Get aggregate agent statistics
    pub async fn stats(&self) -> AgentStats {
        let state = self.state.read().await;
        let mut stats = AgentStats::default();
        for agent in state.agents.values() {
            stats.total += 1;
            match agent.status {
                AgentStatus::Available => stats.available += 1,
                AgentStatus::Busy => stats.busy += 1,
                AgentStatus::Away => stats.away += 1,
                AgentStatus::Offline => stats.offline += 1,
            }
        }
        stats
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate agent statistics
#[derive(Debug, Clone, Default)]
pub struct AgentStats {
    pub total: usize,
    pub available: usize,
    pub busy: usize,
    pub away: usize,
    pub offline: usize,
}
