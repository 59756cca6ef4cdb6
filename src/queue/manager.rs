use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::AgentId;
use crate::error::{Result, RoutingError};

/// Work item priority
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// A unit of incoming work (a call) requiring zero or more skills
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,

    /// Skills an agent must have, all of them, to take this item
    pub required_skills: std::collections::BTreeSet<String>,

    pub priority: Priority,

    /// Stamped when the item enters the queue
    pub enqueued_at: DateTime<Utc>,

    /// Set once the item has been matched
    pub assigned_agent: Option<AgentId>,
}

impl WorkItem {
    /// Create a work item with a generated id
    pub fn new(required_skills: std::collections::BTreeSet<String>, priority: Priority) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), required_skills, priority)
    }

    /// Create a work item with a caller-supplied id
    pub fn with_id(
        id: String,
        required_skills: std::collections::BTreeSet<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id,
            required_skills,
            priority,
            enqueued_at: Utc::now(),
            assigned_agent: None,
        }
    }
}

/// A matched work item paired with the agent it was assigned to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub item: WorkItem,
    pub agent_id: AgentId,
}

/// Priority-ordered work queue.
///
/// Items are kept sorted by priority descending, then arrival time
/// ascending, so draining always attempts high-priority work first and
/// oldest-first within a priority band.
pub struct WorkQueue {
    /// Queued items, maintained in drain order
    items: Mutex<VecDeque<WorkItem>>,

    /// Items currently being matched (to prevent double assignment)
    assigning: DashSet<String>,

    max_size: usize,
}

impl WorkQueue {
    /// Create a new work queue with the given capacity
    pub fn new(max_size: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            assigning: DashSet::new(),
            max_size,
        }
    }

    /// Enqueue a work item, keeping the queue drain-ordered.
    ///
    /// Returns `Some(position)` when the item was inserted and `None`
    /// for a duplicate id, which is not enqueued twice.
    pub async fn enqueue(&self, item: WorkItem) -> Result<Option<usize>> {
        let mut items = self.items.lock().await;

        if items.iter().any(|queued| queued.id == item.id) || self.assigning.contains(&item.id) {
            warn!("📞 Work item {} already queued, not re-queuing", item.id);
            return Ok(None);
        }

        if items.len() >= self.max_size {
            return Err(RoutingError::queue("Queue is full"));
        }

        info!(
            "📞 Enqueuing work item {} (priority: {:?}, skills: {:?})",
            item.id, item.priority, item.required_skills
        );
        let position = Self::insert_sorted(&mut items, item);
        debug!("📊 Queue size: {} items", items.len());
        Ok(Some(position))
    }

    fn insert_sorted(items: &mut VecDeque<WorkItem>, item: WorkItem) -> usize {
        let position = items
            .iter()
            .position(|queued| {
                queued.priority < item.priority
                    || (queued.priority == item.priority && queued.enqueued_at > item.enqueued_at)
            })
            .unwrap_or(items.len());
        items.insert(position, item);
        position
    }

    /// Take the next item for a matching attempt without removing it.
    ///
    /// The item stays queued but is marked as being assigned, so a
    /// concurrent drain pass or cancellation cannot touch it. The caller
    /// must follow up with [`finish_assignment`](Self::finish_assignment)
    /// or [`abort_assignment`](Self::abort_assignment).
    pub async fn next_for_assignment(&self) -> Option<WorkItem> {
        let items = self.items.lock().await;
        for item in items.iter() {
            if self.assigning.insert(item.id.clone()) {
                return Some(item.clone());
            }
        }
        None
    }

    /// Remove a matched item from the queue
    pub async fn finish_assignment(&self, item_id: &str) -> Option<WorkItem> {
        let mut items = self.items.lock().await;
        self.assigning.remove(item_id);
        let position = items.iter().position(|item| item.id == item_id)?;
        let item = items.remove(position);
        if let Some(item) = &item {
            info!(
                "📤 Work item {} removed from queue (remaining: {})",
                item.id,
                items.len()
            );
        }
        item
    }

    /// Put an item back up for matching after a failed attempt
    pub fn abort_assignment(&self, item_id: &str) {
        self.assigning.remove(item_id);
    }

    /// Withdraw a queued item before it is matched.
    ///
    /// Returns `false` when the item is unknown or currently being
    /// matched by a drain pass; an item is either drained or cancelled,
    /// never both.
    pub async fn cancel(&self, item_id: &str) -> bool {
        let mut items = self.items.lock().await;
        if self.assigning.contains(item_id) {
            debug!("🔒 Work item {} is being assigned, cancel refused", item_id);
            return false;
        }
        match items.iter().position(|item| item.id == item_id) {
            Some(position) => {
                items.remove(position);
                info!("🚫 Work item {} cancelled", item_id);
                true
            }
            None => false,
        }
    }

    /// Remove items that have waited longer than `max_wait`
    pub async fn remove_expired(&self, max_wait: Duration, now: DateTime<Utc>) -> Vec<WorkItem> {
        let mut items = self.items.lock().await;
        let mut expired = Vec::new();
        items.retain(|item| {
            if self.assigning.contains(&item.id) {
                return true;
            }
            let waited = now.signed_duration_since(item.enqueued_at);
            if waited.num_milliseconds() > max_wait.as_millis() as i64 {
                warn!(
                    "⏰ Removing expired work item {} (waited {}s)",
                    item.id,
                    waited.num_seconds()
                );
                expired.push(item.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    /// Whether an item with the given id is queued
    pub async fn contains(&self, item_id: &str) -> bool {
        self.items.lock().await.iter().any(|item| item.id == item_id)
    }

    /// Number of queued items
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Get queue statistics
    pub async fn stats(&self) -> QueueStats {
        let items = self.items.lock().await;
        let now = Utc::now();
        let total_items = items.len();

        let (average_wait_seconds, longest_wait_seconds) = if total_items > 0 {
            let waits: Vec<i64> = items
                .iter()
                .map(|item| now.signed_duration_since(item.enqueued_at).num_seconds())
                .collect();
            let total: i64 = waits.iter().sum();
            let longest = waits.iter().max().cloned().unwrap_or(0);
            ((total / total_items as i64).max(0) as u64, longest.max(0) as u64)
        } else {
            (0, 0)
        };

        QueueStats {
            total_items,
            average_wait_seconds,
            longest_wait_seconds,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub total_items: usize,
    pub average_wait_seconds: u64,
    pub longest_wait_seconds: u64,
}
