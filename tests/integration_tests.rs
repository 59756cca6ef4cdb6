//! End-to-end tests for the routing engine: registration, matching,
//! queueing, cancellation, expiry, and remote fallback.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serial_test::serial;
use tokio_test::assert_ok;

use acd_engine::prelude::*;
use acd_engine::remote::{
    AgentUpdate, MatchRequest, MetricsReport, RemoteError, RemoteResult,
};

fn skills(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

fn engine() -> RoutingEngine {
    init_tracing();
    match RoutingEngine::with_remote(EngineConfig::default(), None) {
        Ok(engine) => engine,
        Err(e) => panic!("engine construction failed: {e}"),
    }
}

/// Remote authority that fails every call, forcing the local path
struct FailingRemote {
    calls: AtomicUsize,
}

impl FailingRemote {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn fail<T>(&self) -> RemoteResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RemoteError::Unexpected("service unavailable".to_string()))
    }
}

#[async_trait]
impl RemoteAuthority for FailingRemote {
    async fn update_agent(&self, _update: AgentUpdate) -> RemoteResult<()> {
        self.fail()
    }

    async fn update_agent_status(&self, _id: &AgentId, _status: AgentStatus) -> RemoteResult<()> {
        self.fail()
    }

    async fn update_agent_metrics(&self, _id: &AgentId, _report: MetricsReport) -> RemoteResult<()> {
        self.fail()
    }

    async fn find_best_agent(&self, _request: MatchRequest) -> RemoteResult<Option<AgentId>> {
        self.fail()
    }

    async fn queue_work_item(&self, _item: &WorkItem) -> RemoteResult<()> {
        self.fail()
    }

    async fn process_queue(&self) -> RemoteResult<Vec<Assignment>> {
        self.fail()
    }
}

/// Healthy remote authority that accepts work and counts drain requests
struct CountingRemote {
    process_queue_calls: AtomicUsize,
}

impl CountingRemote {
    fn new() -> Self {
        Self {
            process_queue_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RemoteAuthority for CountingRemote {
    async fn update_agent(&self, _update: AgentUpdate) -> RemoteResult<()> {
        Ok(())
    }

    async fn update_agent_status(&self, _id: &AgentId, _status: AgentStatus) -> RemoteResult<()> {
        Ok(())
    }

    async fn update_agent_metrics(&self, _id: &AgentId, _report: MetricsReport) -> RemoteResult<()> {
        Ok(())
    }

    async fn find_best_agent(&self, _request: MatchRequest) -> RemoteResult<Option<AgentId>> {
        Ok(None)
    }

    async fn queue_work_item(&self, _item: &WorkItem) -> RemoteResult<()> {
        Ok(())
    }

    async fn process_queue(&self) -> RemoteResult<Vec<Assignment>> {
        self.process_queue_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

/// Remote authority that answers matches with a fixed agent
struct ScriptedRemote {
    best: Option<AgentId>,
}

#[async_trait]
impl RemoteAuthority for ScriptedRemote {
    async fn update_agent(&self, _update: AgentUpdate) -> RemoteResult<()> {
        Ok(())
    }

    async fn update_agent_status(&self, _id: &AgentId, _status: AgentStatus) -> RemoteResult<()> {
        Ok(())
    }

    async fn update_agent_metrics(&self, _id: &AgentId, _report: MetricsReport) -> RemoteResult<()> {
        Ok(())
    }

    async fn find_best_agent(&self, _request: MatchRequest) -> RemoteResult<Option<AgentId>> {
        Ok(self.best.clone())
    }

    async fn queue_work_item(&self, _item: &WorkItem) -> RemoteResult<()> {
        Ok(())
    }

    async fn process_queue(&self) -> RemoteResult<Vec<Assignment>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn routes_to_highest_scoring_then_next_best() -> Result<()> {
    let engine = engine();

    engine
        .register_agent(AgentId::new("agent-a"), skills(&["sales"]), Some(1))
        .await?;
    engine
        .register_agent(AgentId::new("agent-b"), skills(&["sales"]), Some(1))
        .await?;

    // Build history: agent-a ends at 100% success, agent-b at 90%.
    for i in 0..10 {
        assert!(engine
            .find_best_agent(&skills(&["sales"]), Priority::Normal)
            .await?
            .is_some());
        engine
            .record_completion(&AgentId::new("agent-b"), i > 0)
            .await
            .ok();
        engine
            .record_completion(&AgentId::new("agent-a"), true)
            .await
            .ok();
    }

    // Both idle again. agent-a has 100% success, agent-b 90%.
    let first = engine
        .find_best_agent(&skills(&["sales"]), Priority::Normal)
        .await?;
    assert_eq!(first, Some(AgentId::new("agent-a")));

    // agent-a is now at capacity, so the next request goes to agent-b.
    let second = engine
        .find_best_agent(&skills(&["sales"]), Priority::Normal)
        .await?;
    assert_eq!(second, Some(AgentId::new("agent-b")));

    // Everyone is full.
    let third = engine
        .find_best_agent(&skills(&["sales"]), Priority::Normal)
        .await?;
    assert_eq!(third, None);

    Ok(())
}

#[tokio::test]
async fn requires_all_skills() -> Result<()> {
    let engine = engine();

    engine
        .register_agent(AgentId::new("generalist"), skills(&["sales"]), None)
        .await?;

    // sales alone matches, sales+spanish does not
    assert!(engine
        .find_best_agent(&skills(&["sales"]), Priority::Normal)
        .await?
        .is_some());
    assert_eq!(
        engine
            .find_best_agent(&skills(&["sales", "spanish"]), Priority::Normal)
            .await?,
        None
    );

    Ok(())
}

#[tokio::test]
async fn unmatched_work_queues_until_capacity_frees() -> Result<()> {
    let engine = engine();

    engine
        .register_agent(AgentId::new("carol"), skills(&["billing"]), Some(1))
        .await?;

    // Occupy carol, then a new billing call finds no one.
    assert!(engine
        .find_best_agent(&skills(&["billing"]), Priority::Normal)
        .await?
        .is_some());
    assert_eq!(
        engine
            .find_best_agent(&skills(&["billing"]), Priority::Normal)
            .await?,
        None
    );

    let item = WorkItem::with_id("call-1".to_string(), skills(&["billing"]), Priority::Normal);
    engine.enqueue(item).await?;
    assert_eq!(engine.queue_len().await, 1);

    // Still no capacity: drain matches nothing and the item stays put.
    assert!(engine.drain().await?.is_empty());
    assert!(engine.is_queued("call-1").await);

    // Completion frees carol; the next drain assigns the queued call.
    engine
        .record_completion(&AgentId::new("carol"), true)
        .await?;
    let assignments = engine.drain().await?;
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].item.id, "call-1");
    assert_eq!(assignments[0].agent_id, AgentId::new("carol"));
    assert_eq!(
        assignments[0].item.assigned_agent,
        Some(AgentId::new("carol"))
    );
    assert!(!engine.is_queued("call-1").await);

    Ok(())
}

#[tokio::test]
async fn concurrent_requests_never_exceed_capacity() -> Result<()> {
    let engine = Arc::new(engine());

    engine
        .register_agent(AgentId::new("dave"), skills(&["support"]), Some(2))
        .await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .find_best_agent(&skills(&["support"]), Priority::Normal)
                .await
        }));
    }

    let mut granted = 0;
    for handle in handles {
        if handle.await??.is_some() {
            granted += 1;
        }
    }
    assert_eq!(granted, 2);

    let agent = engine.agent(&AgentId::new("dave")).await;
    assert_eq!(agent.map(|a| a.current_load), Some(2));

    Ok(())
}

#[tokio::test]
async fn drain_respects_priority_then_arrival_order() -> Result<()> {
    let engine = engine();

    // Low and normal enqueued before high; high still drains first.
    engine
        .enqueue(WorkItem::with_id(
            "low-1".to_string(),
            skills(&["sales"]),
            Priority::Low,
        ))
        .await?;
    engine
        .enqueue(WorkItem::with_id(
            "normal-1".to_string(),
            skills(&["sales"]),
            Priority::Normal,
        ))
        .await?;
    engine
        .enqueue(WorkItem::with_id(
            "high-1".to_string(),
            skills(&["sales"]),
            Priority::High,
        ))
        .await?;
    engine
        .enqueue(WorkItem::with_id(
            "normal-2".to_string(),
            skills(&["sales"]),
            Priority::Normal,
        ))
        .await?;

    engine
        .register_agent(AgentId::new("erin"), skills(&["sales"]), Some(4))
        .await?;

    let assignments = engine.drain().await?;
    let order: Vec<&str> = assignments.iter().map(|a| a.item.id.as_str()).collect();
    assert_eq!(order, vec!["high-1", "normal-1", "normal-2", "low-1"]);

    Ok(())
}

#[tokio::test]
async fn cancelled_item_is_never_assigned() -> Result<()> {
    let engine = engine();

    engine
        .enqueue(WorkItem::with_id(
            "call-9".to_string(),
            skills(&["sales"]),
            Priority::Normal,
        ))
        .await?;

    assert!(engine.cancel("call-9").await);
    assert!(!engine.cancel("call-9").await);
    assert!(!engine.cancel("never-queued").await);

    engine
        .register_agent(AgentId::new("frank"), skills(&["sales"]), None)
        .await?;
    assert!(engine.drain().await?.is_empty());
    assert_eq!(engine.stats().cancelled, 1);

    Ok(())
}

#[tokio::test]
async fn expired_items_are_dropped_on_drain() -> Result<()> {
    let mut config = EngineConfig::default();
    config.queues.max_wait_time = Some(Duration::from_millis(50));
    let engine = RoutingEngine::with_remote(config, None)?;

    engine
        .enqueue(WorkItem::with_id(
            "stale".to_string(),
            skills(&["billing"]),
            Priority::Normal,
        ))
        .await?;

    tokio::time::sleep(Duration::from_millis(120)).await;

    engine
        .register_agent(AgentId::new("gina"), skills(&["billing"]), None)
        .await?;
    assert!(engine.drain().await?.is_empty());
    assert_eq!(engine.queue_len().await, 0);
    assert_eq!(engine.stats().expired, 1);

    Ok(())
}

#[tokio::test]
async fn queue_rejects_overflow() -> Result<()> {
    let mut config = EngineConfig::default();
    config.queues.max_queue_size = 2;
    let engine = RoutingEngine::with_remote(config, None)?;

    for i in 0..2 {
        engine
            .enqueue(WorkItem::with_id(
                format!("call-{i}"),
                skills(&["sales"]),
                Priority::Normal,
            ))
            .await?;
    }

    let overflow = engine
        .enqueue(WorkItem::with_id(
            "call-2".to_string(),
            skills(&["sales"]),
            Priority::Normal,
        ))
        .await;
    assert!(matches!(overflow, Err(RoutingError::Queue(_))));
    assert_eq!(engine.queue_len().await, 2);

    Ok(())
}

#[tokio::test]
async fn away_agents_are_skipped() -> Result<()> {
    let engine = engine();

    engine
        .register_agent(AgentId::new("henry"), skills(&["sales"]), None)
        .await?;
    engine
        .update_agent_status(&AgentId::new("henry"), AgentStatus::Away)
        .await?;

    assert_eq!(
        engine
            .find_best_agent(&skills(&["sales"]), Priority::Normal)
            .await?,
        None
    );

    engine
        .update_agent_status(&AgentId::new("henry"), AgentStatus::Available)
        .await?;
    assert_eq!(
        engine
            .find_best_agent(&skills(&["sales"]), Priority::Normal)
            .await?,
        Some(AgentId::new("henry"))
    );

    Ok(())
}

#[tokio::test]
async fn deregistered_agent_is_gone() -> Result<()> {
    let engine = engine();

    engine
        .register_agent(AgentId::new("iris"), skills(&["sales"]), None)
        .await?;
    engine.deregister_agent(&AgentId::new("iris")).await?;

    assert_eq!(
        engine
            .find_best_agent(&skills(&["sales"]), Priority::Normal)
            .await?,
        None
    );
    assert!(engine.agent(&AgentId::new("iris")).await.is_none());
    assert!(matches!(
        engine.deregister_agent(&AgentId::new("iris")).await,
        Err(RoutingError::NotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn remote_failure_falls_back_to_local() -> Result<()> {
    let remote = Arc::new(FailingRemote::new());
    let engine = RoutingEngine::with_remote(EngineConfig::default(), Some(remote.clone()))?;

    engine
        .register_agent(AgentId::new("jack"), skills(&["sales"]), None)
        .await?;

    // The remote match fails; the local scorer still picks jack.
    let picked = engine
        .find_best_agent(&skills(&["sales"]), Priority::Normal)
        .await?;
    assert_eq!(picked, Some(AgentId::new("jack")));
    assert!(engine.stats().remote_fallbacks >= 1);
    assert!(remote.calls.load(Ordering::SeqCst) >= 1);

    // Queueing and draining degrade the same way.
    engine
        .enqueue(WorkItem::with_id(
            "call-7".to_string(),
            skills(&["billing"]),
            Priority::Normal,
        ))
        .await?;
    assert_eq!(engine.queue_len().await, 1);
    assert!(engine.drain().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn remote_answer_is_returned_and_load_committed() -> Result<()> {
    let remote = Arc::new(ScriptedRemote {
        best: Some(AgentId::new("kate")),
    });
    let engine = RoutingEngine::with_remote(EngineConfig::default(), Some(remote))?;

    engine
        .register_agent(AgentId::new("kate"), skills(&["sales"]), Some(3))
        .await?;

    let picked = engine
        .find_best_agent(&skills(&["sales"]), Priority::Normal)
        .await?;
    assert_eq!(picked, Some(AgentId::new("kate")));

    // Local shadow state tracked the claim made on the remote's behalf.
    let agent = engine.agent(&AgentId::new("kate")).await;
    assert_eq!(agent.map(|a| a.current_load), Some(1));
    assert_eq!(engine.stats().remote_fallbacks, 0);

    Ok(())
}

#[tokio::test]
async fn completion_updates_success_rate() -> Result<()> {
    let engine = engine();
    let id = AgentId::new("lena");

    engine
        .register_agent(id.clone(), skills(&["support"]), Some(2))
        .await?;

    assert!(engine
        .find_best_agent(&skills(&["support"]), Priority::Normal)
        .await?
        .is_some());
    assert_ok!(engine.record_completion(&id, true).await);
    assert!(engine
        .find_best_agent(&skills(&["support"]), Priority::Normal)
        .await?
        .is_some());
    assert_ok!(engine.record_completion(&id, false).await);

    let agent = match engine.agent(&id).await {
        Some(agent) => agent,
        None => panic!("agent disappeared"),
    };
    assert_eq!(agent.total_calls, 2);
    assert_eq!(agent.successful_calls, 1);
    assert!((agent.success_rate - 50.0).abs() < f64::EPSILON);
    assert_eq!(agent.current_load, 0);

    Ok(())
}

#[tokio::test]
async fn duplicate_enqueue_is_dropped_and_not_counted() -> Result<()> {
    let engine = engine();

    engine
        .enqueue(WorkItem::with_id(
            "call-1".to_string(),
            skills(&["sales"]),
            Priority::Normal,
        ))
        .await?;
    engine
        .enqueue(WorkItem::with_id(
            "call-1".to_string(),
            skills(&["billing"]),
            Priority::High,
        ))
        .await?;

    assert_eq!(engine.queue_len().await, 1);
    assert_eq!(engine.stats().queued, 1);

    Ok(())
}

#[tokio::test]
#[serial]
async fn scheduler_drains_remote_queue_periodically() -> Result<()> {
    let mut config = EngineConfig::default();
    config.queues.drain_interval = Duration::from_millis(30);
    let remote = Arc::new(CountingRemote::new());
    let engine = Arc::new(RoutingEngine::with_remote(config, Some(remote.clone()))?);

    let handle = engine.start();

    // The item is accepted by the remote, so the local queue stays
    // empty; the scheduler must still ask the service to process.
    engine
        .enqueue(WorkItem::with_id(
            "call-1".to_string(),
            skills(&["sales"]),
            Priority::Normal,
        ))
        .await?;
    assert_eq!(engine.queue_len().await, 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(remote.process_queue_calls.load(Ordering::SeqCst) > 0);

    engine.shutdown();
    assert_ok!(tokio::time::timeout(Duration::from_secs(2), handle).await?);

    Ok(())
}

#[tokio::test]
#[serial]
async fn background_scheduler_assigns_when_capacity_appears() -> Result<()> {
    let mut config = EngineConfig::default();
    config.queues.drain_interval = Duration::from_millis(50);
    let engine = Arc::new(RoutingEngine::with_remote(config, None)?);

    let mut assignments = engine.subscribe_assignments();
    let handle = engine.start();

    engine
        .enqueue(WorkItem::with_id(
            "call-42".to_string(),
            skills(&["sales"]),
            Priority::High,
        ))
        .await?;

    // No agents yet; once one registers, the scheduler should match.
    engine
        .register_agent(AgentId::new("mona"), skills(&["sales"]), None)
        .await?;

    let assignment = tokio::time::timeout(Duration::from_secs(2), assignments.recv()).await??;
    assert_eq!(assignment.item.id, "call-42");
    assert_eq!(assignment.agent_id, AgentId::new("mona"));
    assert_eq!(engine.queue_len().await, 0);

    engine.shutdown();
    assert_ok!(tokio::time::timeout(Duration::from_secs(2), handle).await?);

    Ok(())
}
