use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::agent::{AgentId, AgentRegistry};
use crate::queue::Priority;
use crate::routing::scorer::score;

/// Best-fit agent selector.
///
/// Ranks the eligible agents holding every required skill by fitness
/// score. Selection never mutates registry state; the caller commits the
/// assignment separately so speculative lookups consume no capacity.
pub struct Matcher {
    registry: Arc<AgentRegistry>,
}

impl Matcher {
    /// Create a matcher over a shared agent registry
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }

    /// Rank eligible candidates best-first.
    ///
    /// Equal scores are broken by lowest agent id so selection stays
    /// deterministic and reproducible.
    pub async fn rank(&self, required_skills: &BTreeSet<String>, priority: Priority) -> Vec<AgentId> {
        let now = Utc::now();
        let candidates = self.registry.eligible_candidates(required_skills).await;
        if candidates.is_empty() {
            debug!("❌ No eligible agents for skills: {:?}", required_skills);
            return Vec::new();
        }

        // Candidates arrive in ascending id order; a stable sort by
        // descending score therefore breaks ties toward the lowest id.
        let mut scored: Vec<(f64, AgentId)> = candidates
            .iter()
            .map(|agent| (score(agent, priority, now), agent.id.clone()))
            .collect();
        scored.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        scored.into_iter().map(|(_, id)| id).collect()
    }

    /// Select the single best eligible agent, if any
    pub async fn select(
        &self,
        required_skills: &BTreeSet<String>,
        priority: Priority,
    ) -> Option<AgentId> {
        let best = self.rank(required_skills, priority).await.into_iter().next();
        if let Some(agent_id) = &best {
            debug!(
                "🎯 Selected agent {} for skills {:?} ({:?} priority)",
                agent_id, required_skills, priority
            );
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skills(tags: &[&str]) -> BTreeSet<String> {
        tags.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn prefers_higher_success_rate() {
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register(AgentId::from("a"), skills(&["sales"]), 1)
            .await
            .unwrap();
        registry
            .register(AgentId::from("b"), skills(&["sales", "support"]), 1)
            .await
            .unwrap();

        // Build b's track record: 9 successes, 1 failure -> 90% rate.
        for i in 0..10 {
            registry
                .record_completion(&AgentId::from("b"), i > 0)
                .await
                .unwrap();
        }

        let matcher = Matcher::new(registry);
        let best = matcher.select(&skills(&["sales"]), Priority::Normal).await;
        assert_eq!(best, Some(AgentId::from("b")));
    }

    #[tokio::test]
    async fn ties_break_toward_lowest_id() {
        let registry = Arc::new(AgentRegistry::new());
        for id in ["charlie", "alpha", "bravo"] {
            registry
                .register(AgentId::from(id), skills(&["sales"]), 1)
                .await
                .unwrap();
        }

        let matcher = Matcher::new(registry);
        let ranked = matcher.rank(&skills(&["sales"]), Priority::Normal).await;
        assert_eq!(
            ranked,
            vec![
                AgentId::from("alpha"),
                AgentId::from("bravo"),
                AgentId::from("charlie")
            ]
        );
    }

    #[tokio::test]
    async fn skips_loaded_and_unskilled_agents() {
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register(AgentId::from("a"), skills(&["sales"]), 1)
            .await
            .unwrap();
        registry
            .register(AgentId::from("b"), skills(&["billing"]), 1)
            .await
            .unwrap();
        registry.try_commit(&AgentId::from("a")).await.unwrap();

        let matcher = Matcher::new(registry);
        assert!(matcher.select(&skills(&["sales"]), Priority::Normal).await.is_none());
    }

    #[tokio::test]
    async fn generalists_take_skill_less_work() {
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register(AgentId::from("generalist"), BTreeSet::new(), 1)
            .await
            .unwrap();

        let matcher = Matcher::new(registry);
        assert_eq!(
            matcher.select(&BTreeSet::new(), Priority::Normal).await,
            Some(AgentId::from("generalist"))
        );
        assert!(matcher.select(&skills(&["sales"]), Priority::Normal).await.is_none());
    }
}
