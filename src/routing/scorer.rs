use chrono::{DateTime, Utc};

use crate::agent::Agent;
use crate::queue::Priority;

/// Minutes of idle time credited to an agent that has never completed work
const FRESH_AGENT_IDLE_MINUTES: f64 = 60.0;

/// Idle minutes beyond which the time bonus stops growing
const IDLE_BONUS_CAP_MINUTES: f64 = 60.0;

/// Compute the fitness score of a candidate agent for a work item.
///
/// The score balances three competing goals: reward proven performers
/// (`success_rate`), discourage piling work onto loaded agents (a load
/// penalty of up to 20 points), and promote fairness by crediting idle
/// time (up to 30 points, capped at an hour of idleness). The priority
/// multiplier scales the whole score, so high-priority work is steered
/// toward the same winner but is less willing to wait for the ideal
/// agent.
///
/// Pure function: safe to run unsynchronized against a snapshot.
pub fn score(agent: &Agent, priority: Priority, now: DateTime<Utc>) -> f64 {
    let load_penalty = agent.current_load as f64 / agent.max_concurrent as f64 * 20.0;

    let minutes_idle = match agent.last_completion {
        Some(last) => (now.signed_duration_since(last).num_seconds() as f64 / 60.0).max(0.0),
        None => FRESH_AGENT_IDLE_MINUTES,
    };
    let time_bonus = minutes_idle.min(IDLE_BONUS_CAP_MINUTES) / 2.0;

    let priority_multiplier = match priority {
        Priority::High => 1.5,
        Priority::Low => 0.8,
        Priority::Normal => 1.0,
    };

    (agent.success_rate + time_bonus - load_penalty) * priority_multiplier
}
