use chrono::{DateTime, Utc};
use hivemind_bus::MessageBus;
use hivemind_core::config::{Config, RoutingPolicy};
use hivemind_core::{
    Agent, AgentRole, AgentStatus, Error, EventHub, EventKind, EventSubscription,
    ExecutionCommand, HubEvent, KnowledgePayload, LinkConfig, Message, Payload, RemoteLink,
    Result, SubscriptionId, TaskDispatch, TaskInput, TaskOutcome, TaskPriority, TransportKind,
};
use hivemind_learning::{
    AggregateMetrics, CapabilityMatrix, KnowledgeEntry, LearningCore, LearningPattern, Pathway,
};
use hivemind_router::{AvailabilityTracker, RoleRouter, RoutingDecision};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

/// Sender id stamped on dispatched commands.
pub const COORDINATOR_ID: &str = "coordinator";

const DISPATCH_METHOD: &str = "task.execute";

/// A dispatched task waiting for its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTask {
    pub task_id: String,
    pub task_type: String,
    pub role: AgentRole,
    pub agent_id: String,
    pub priority: TaskPriority,
    pub command: ExecutionCommand,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub agent_id: String,
    pub role: AgentRole,
    pub outcome: TaskOutcome,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStatus {
    pub queue_length: usize,
    pub connected_links: usize,
    pub agents: Vec<Agent>,
    pub busy_roles: Vec<AgentRole>,
    pub links: Vec<RemoteLink>,
    pub pending_tasks: usize,
}

#[derive(Default)]
struct TaskBook {
    pending: HashMap<String, PendingTask>,
    /// Taken out of `pending` by `complete` but not yet in `results`.
    completing: HashSet<String>,
    results: HashMap<String, TaskResult>,
    /// Completion order of `results`, oldest first.
    finished: VecDeque<String>,
    waiters: HashMap<String, Vec<oneshot::Sender<TaskResult>>>,
}

impl TaskBook {
    fn is_known(&self, task_id: &str) -> bool {
        self.pending.contains_key(task_id) || self.completing.contains(task_id)
    }

    /// Store a finished result, evicting the oldest beyond `capacity`.
    /// Returns the waiters to wake.
    fn finish(&mut self, result: TaskResult, capacity: usize) -> Vec<oneshot::Sender<TaskResult>> {
        let task_id = result.task_id.clone();
        self.completing.remove(&task_id);
        self.results.insert(task_id.clone(), result);
        self.finished.push_back(task_id.clone());
        while self.finished.len() > capacity {
            if let Some(oldest) = self.finished.pop_front() {
                self.results.remove(&oldest);
                debug!(task = %oldest, "Evicted finished task result");
            }
        }
        self.waiters.remove(&task_id).unwrap_or_default()
    }
}

/// Entry point for outside collaborators: submit work, report outcomes,
/// read status and learning state, subscribe to events.
///
/// Owns only per-call correlation state; agents and links live on the bus,
/// learning state in the learning core.
pub struct Coordinator {
    bus: Arc<MessageBus>,
    learning: LearningCore,
    router: RoleRouter,
    policy: RoutingPolicy,
    availability: AvailabilityTracker,
    events: Arc<EventHub>,
    tasks: Mutex<TaskBook>,
    result_timeout: Duration,
    max_results: usize,
}

impl Coordinator {
    pub fn new(config: &Config, bus: Arc<MessageBus>, learning: LearningCore) -> Self {
        let events = bus.events().clone();
        Self {
            bus,
            learning,
            router: RoleRouter::new().with_table_entries(&config.router.task_table),
            policy: config.router.policy,
            availability: AvailabilityTracker::new(),
            events,
            tasks: Mutex::new(TaskBook::default()),
            result_timeout: Duration::from_secs(config.coordinator.result_timeout_secs.max(1)),
            max_results: config.coordinator.max_results.max(1),
        }
    }

    pub fn route(&self, task_type: &str, input: &TaskInput, priority: TaskPriority) -> RoutingDecision {
        self.router.decide(task_type, input, priority)
    }

    /// Pick the role to dispatch to, honouring the routing policy.
    async fn resolve_role(&self, routed: AgentRole) -> Result<AgentRole> {
        match self.policy {
            RoutingPolicy::Strict => Ok(routed),
            RoutingPolicy::Fallback => {
                let agents = self.bus.agents().await;
                let staffed: Vec<AgentRole> = AgentRole::ALL
                    .iter()
                    .copied()
                    .filter(|role| agents.iter().any(|a| a.role == *role))
                    .collect();
                self.availability
                    .get_available_role_among(routed, &staffed)
                    .await
                    .ok_or_else(|| Error::NoAvailableRole(routed.to_string()))
            }
        }
    }

    /// First reachable agent for `role`, idle ones first.
    async fn agent_for_role(&self, role: AgentRole) -> Option<Agent> {
        let mut candidates: Vec<Agent> = self
            .bus
            .agents_with_role(role)
            .await
            .into_iter()
            .filter(|a| a.status != AgentStatus::Offline)
            .collect();
        candidates.sort_by_key(|a| a.status != AgentStatus::Idle);
        candidates.into_iter().next()
    }

    /// Route, reserve the role, and dispatch a `command` message to the
    /// agent registered for it. Returns the task id.
    pub async fn submit(
        &self,
        task_type: &str,
        input: TaskInput,
        priority: TaskPriority,
    ) -> Result<String> {
        let decision = self.router.decide(task_type, &input, priority);
        let role = self.resolve_role(decision.role).await?;
        let agent = self
            .agent_for_role(role)
            .await
            .ok_or_else(|| Error::NoAvailableRole(role.to_string()))?;

        let task_id = uuid::Uuid::new_v4().to_string();
        self.availability.assign(&task_id, role).await?;

        let action = if input.description.trim().is_empty() {
            task_type.to_string()
        } else {
            input.description.clone()
        };
        let command = ExecutionCommand::new(&action, task_type);
        let message = Message::command(
            DISPATCH_METHOD,
            Payload::Task(TaskDispatch {
                task_id: task_id.clone(),
                task_type: task_type.to_string(),
                input,
                command: command.clone(),
            }),
        )
        .with_from(COORDINATOR_ID)
        .with_priority(priority);

        if let Err(e) = self.bus.send(&agent.id, message).await {
            self.availability.complete(&task_id).await;
            warn!(task = %task_id, agent = %agent.id, error = %e, "Dispatch failed");
            return Err(e);
        }
        if let Err(e) = self.bus.set_agent_status(&agent.id, AgentStatus::Busy).await {
            debug!(agent = %agent.id, error = %e, "Could not mark agent busy");
        }

        self.tasks.lock().await.pending.insert(
            task_id.clone(),
            PendingTask {
                task_id: task_id.clone(),
                task_type: task_type.to_string(),
                role,
                agent_id: agent.id.clone(),
                priority,
                command,
                submitted_at: Utc::now(),
            },
        );

        info!(
            task = %task_id,
            task_type = %task_type,
            role = %role,
            agent = %agent.id,
            reason = ?decision.reason,
            "Task dispatched"
        );
        Ok(task_id)
    }

    /// Record the outcome of a dispatched task: feed learning, free the role,
    /// emit `task_completed`/`task_failed` and wake waiters.
    pub async fn complete(&self, task_id: &str, outcome: TaskOutcome) -> Result<TaskResult> {
        let pending = {
            let mut book = self.tasks.lock().await;
            let pending = book
                .pending
                .remove(task_id)
                .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;
            book.completing.insert(task_id.to_string());
            pending
        };

        self.learning
            .learn_from_execution(&pending.agent_id, &pending.command, &outcome)
            .await;
        self.availability.complete(task_id).await;
        if let Err(e) = self
            .bus
            .set_agent_status(&pending.agent_id, AgentStatus::Idle)
            .await
        {
            debug!(agent = %pending.agent_id, error = %e, "Could not mark agent idle");
        }

        let event = if outcome.success {
            HubEvent::TaskCompleted {
                task_id: task_id.to_string(),
                agent_id: pending.agent_id.clone(),
                role: pending.role,
            }
        } else {
            HubEvent::TaskFailed {
                task_id: task_id.to_string(),
                agent_id: Some(pending.agent_id.clone()),
                role: pending.role,
                error: outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "task failed".to_string()),
            }
        };

        let result = TaskResult {
            task_id: task_id.to_string(),
            agent_id: pending.agent_id,
            role: pending.role,
            outcome,
            completed_at: Utc::now(),
        };

        let waiters = self
            .tasks
            .lock()
            .await
            .finish(result.clone(), self.max_results);
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }

        info!(task = %task_id, success = result.outcome.success, "Task finished");
        self.events.publish(event);
        Ok(result)
    }

    /// Wait for a task's result, bounded by the configured timeout.
    pub async fn wait_for_result(&self, task_id: &str) -> Result<TaskResult> {
        self.wait_for_result_within(task_id, self.result_timeout).await
    }

    pub async fn wait_for_result_within(&self, task_id: &str, timeout: Duration) -> Result<TaskResult> {
        let rx = {
            let mut book = self.tasks.lock().await;
            if let Some(result) = book.results.get(task_id) {
                return Ok(result.clone());
            }
            if !book.is_known(task_id) {
                return Err(Error::NotFound(format!("task {}", task_id)));
            }
            let (tx, rx) = oneshot::channel();
            book.waiters.entry(task_id.to_string()).or_default().push(tx);
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(Error::Other(format!("task {} waiter dropped", task_id))),
            Err(_) => Err(Error::Timeout(format!(
                "no result for task {} within {}s",
                task_id,
                timeout.as_secs()
            ))),
        }
    }

    pub async fn pending_task(&self, task_id: &str) -> Option<PendingTask> {
        self.tasks.lock().await.pending.get(task_id).cloned()
    }

    /// Snapshot of bus, availability and task state. Never fails.
    pub async fn status(&self) -> CoordinatorStatus {
        let health = self.bus.health_check().await;
        CoordinatorStatus {
            queue_length: health.queued_messages,
            connected_links: health.connected_links,
            agents: self.bus.agents().await,
            busy_roles: self.availability.busy_roles().await,
            links: self.bus.links().await,
            pending_tasks: self.tasks.lock().await.pending.len(),
        }
    }

    pub async fn metrics(&self) -> AggregateMetrics {
        self.learning.metrics().await
    }

    pub async fn capabilities(&self) -> CapabilityMatrix {
        self.learning.capabilities().await
    }

    pub async fn pathways(&self) -> Vec<Pathway> {
        self.learning.pathways().await
    }

    pub async fn patterns(&self) -> Vec<LearningPattern> {
        self.learning.patterns().await
    }

    pub async fn knowledge(&self, topic: &str) -> Option<KnowledgeEntry> {
        self.learning.knowledge(topic).await
    }

    pub fn subscribe(&self, kinds: &[EventKind]) -> EventSubscription {
        self.events.subscribe(kinds)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub async fn register_agent(&self, agent: Agent) {
        let id = agent.id.clone();
        self.bus.register_agent(agent).await;
        self.learning.register_agent(&id).await;
    }

    /// Register and connect a remote link. Connection failures show up as
    /// link status and a `server_error` event, not as an error here.
    pub async fn register_link(
        &self,
        name: &str,
        transport: TransportKind,
        config: LinkConfig,
    ) -> Result<RemoteLink> {
        self.bus.register_link(name, transport, config).await?;
        match self.bus.connect(name).await {
            Ok(()) => {}
            Err(e) if e.is_link_failure() || matches!(e, Error::AlreadyConnecting(_)) => {
                warn!(link = %name, error = %e, "Link not connected");
            }
            Err(e) => return Err(e),
        }
        self.bus
            .link(name)
            .await
            .ok_or_else(|| Error::NotFound(format!("link {}", name)))
    }

    pub async fn disconnect_link(&self, name: &str) -> Result<()> {
        self.bus.disconnect(name).await
    }

    /// Open a practice session; returns the capability tag.
    pub async fn learn_new_capability(&self, agent_id: &str, command: &ExecutionCommand) -> String {
        self.learning.learn_new_capability(agent_id, command).await
    }

    pub async fn share_learning(&self, from_agent: &str, topic: &str, knowledge: KnowledgePayload) {
        self.learning
            .ingest_external_learning(from_agent, topic, knowledge)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivemind_core::config::{BusConfig, LearningConfig, TransportConfig};
    use hivemind_core::LinkStatus;
    use hivemind_learning::{OutcomeSource, PracticeSession};
    use hivemind_transport::TransportRegistry;

    fn coordinator_with(config: Config) -> (Coordinator, Arc<MessageBus>) {
        let events = Arc::new(EventHub::default());
        let bus = Arc::new(MessageBus::new(
            &BusConfig::default(),
            TransportConfig::default(),
            TransportRegistry::new(),
            events.clone(),
        ));
        let learning = LearningCore::new(LearningConfig::default(), events);
        (Coordinator::new(&config, bus.clone(), learning), bus)
    }

    async fn staffed(config: Config) -> (Coordinator, Arc<MessageBus>) {
        let (coordinator, bus) = coordinator_with(config);
        for role in AgentRole::ALL {
            let id = format!("{}-1", role.as_str());
            coordinator
                .register_agent(Agent::new(&id, &id, role))
                .await;
        }
        (coordinator, bus)
    }

    #[tokio::test]
    async fn test_testing_tasks_go_to_qa_until_busy() {
        let (coordinator, bus) = staffed(Config::default()).await;

        for _ in 0..3 {
            let decision = coordinator.route("testing", &TaskInput::default(), TaskPriority::Medium);
            assert_eq!(decision.role, AgentRole::Qa);
        }

        let first = coordinator
            .submit("testing", TaskInput::text("run the suite"), TaskPriority::Medium)
            .await
            .unwrap();
        assert_eq!(coordinator.status().await.busy_roles, vec![AgentRole::Qa]);

        let dispatched = bus.receive("qa-1").await.unwrap();
        assert_eq!(dispatched.from.as_deref(), Some(COORDINATOR_ID));
        match dispatched.payload {
            Payload::Task(task) => assert_eq!(task.task_id, first),
            other => panic!("unexpected payload {:?}", other),
        }

        let err = coordinator
            .submit("testing", TaskInput::default(), TaskPriority::Medium)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoAvailableRole(_)));

        coordinator
            .complete(&first, TaskOutcome::success(serde_json::json!({"passed": 12})))
            .await
            .unwrap();
        assert!(coordinator.status().await.busy_roles.is_empty());
        coordinator
            .submit("testing", TaskInput::default(), TaskPriority::Medium)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fallback_policy_picks_idle_staffed_role() {
        let mut config = Config::default();
        config.router.policy = RoutingPolicy::Fallback;
        let (coordinator, _bus) = coordinator_with(config);
        coordinator
            .register_agent(Agent::new("qa-1", "QA", AgentRole::Qa))
            .await;
        coordinator
            .register_agent(Agent::new("junior-1", "Junior", AgentRole::Junior))
            .await;

        coordinator
            .submit("testing", TaskInput::default(), TaskPriority::Medium)
            .await
            .unwrap();
        let second = coordinator
            .submit("testing", TaskInput::default(), TaskPriority::Medium)
            .await
            .unwrap();
        assert_eq!(
            coordinator.pending_task(&second).await.unwrap().role,
            AgentRole::Junior
        );

        let err = coordinator
            .submit("testing", TaskInput::default(), TaskPriority::Medium)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoAvailableRole(_)));
    }

    #[tokio::test]
    async fn test_unstaffed_role_is_not_reserved() {
        let (coordinator, _bus) = coordinator_with(Config::default());
        let err = coordinator
            .submit("deployment", TaskInput::default(), TaskPriority::Medium)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoAvailableRole(_)));
        assert!(coordinator.status().await.busy_roles.is_empty());
    }

    #[tokio::test]
    async fn test_complete_feeds_learning_and_events() {
        let (coordinator, bus) = staffed(Config::default()).await;
        let mut sub = coordinator.subscribe(&[EventKind::TaskCompleted, EventKind::TaskFailed]);

        let ok = coordinator
            .submit("deployment", TaskInput::text("deploy v2"), TaskPriority::Low)
            .await
            .unwrap();
        assert_eq!(bus.agent("ops-1").await.unwrap().status, AgentStatus::Busy);
        coordinator
            .complete(&ok, TaskOutcome::success(serde_json::Value::Null))
            .await
            .unwrap();
        assert_eq!(bus.agent("ops-1").await.unwrap().status, AgentStatus::Idle);

        let caps = coordinator.capabilities().await;
        let entry = &caps["ops-1"]["deployment"];
        assert!(entry.success_rate > 0.5);

        let failing = coordinator
            .submit("translation", TaskInput::default(), TaskPriority::Medium)
            .await
            .unwrap();
        coordinator
            .complete(&failing, TaskOutcome::failure("no dictionary"))
            .await
            .unwrap();

        let events = sub.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], HubEvent::TaskCompleted { role: AgentRole::Ops, .. }));
        assert!(matches!(
            &events[1],
            HubEvent::TaskFailed { role: AgentRole::Junior, error, .. } if error == "no dictionary"
        ));

        assert!(matches!(
            coordinator.complete(&ok, TaskOutcome::success(serde_json::Value::Null)).await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(coordinator.metrics().await.pattern_count, 2);
    }

    #[tokio::test]
    async fn test_wait_for_result_wakes_on_complete() {
        let (coordinator, _bus) = staffed(Config::default()).await;
        let coordinator = Arc::new(coordinator);
        let task_id = coordinator
            .submit("review", TaskInput::default(), TaskPriority::Medium)
            .await
            .unwrap();

        let waiter = {
            let coordinator = coordinator.clone();
            let task_id = task_id.clone();
            tokio::spawn(async move { coordinator.wait_for_result(&task_id).await })
        };
        tokio::task::yield_now().await;

        coordinator
            .complete(&task_id, TaskOutcome::success(serde_json::json!("lgtm")))
            .await
            .unwrap();
        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result.role, AgentRole::Senior);
        assert_eq!(result.outcome.output, serde_json::json!("lgtm"));

        // Already finished: returns immediately.
        assert_eq!(coordinator.wait_for_result(&task_id).await.unwrap(), result);
        assert!(matches!(
            coordinator.wait_for_result("nope").await,
            Err(Error::NotFound(_))
        ));
    }

    struct SlowFailure;

    impl OutcomeSource for SlowFailure {
        fn attempt(&self, _session: &PracticeSession) -> Result<bool> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(false)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_wait_while_complete_is_blocked_on_learning() {
        let events = Arc::new(EventHub::default());
        let bus = Arc::new(MessageBus::new(
            &BusConfig::default(),
            TransportConfig::default(),
            TransportRegistry::new(),
            events.clone(),
        ));
        let learning = LearningCore::new(LearningConfig::default(), events)
            .with_outcome_source(Arc::new(SlowFailure));
        let coordinator = Arc::new(Coordinator::new(&Config::default(), bus, learning.clone()));
        coordinator
            .register_agent(Agent::new("qa-1", "QA", AgentRole::Qa))
            .await;
        let task_id = coordinator
            .submit("testing", TaskInput::default(), TaskPriority::Medium)
            .await
            .unwrap();

        // A practice round holds the learning lock while the attempt sleeps.
        learning
            .learn_new_capability("qa-1", &ExecutionCommand::new("write tests", "qa"))
            .await;
        let practice = {
            let learning = learning.clone();
            tokio::spawn(async move { learning.run_practice_round().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let completing = {
            let coordinator = coordinator.clone();
            let task_id = task_id.clone();
            tokio::spawn(async move {
                coordinator
                    .complete(&task_id, TaskOutcome::success(serde_json::Value::Null))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = coordinator
            .wait_for_result_within(&task_id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.agent_id, "qa-1");
        assert!(completing.await.unwrap().is_ok());
        assert_eq!(practice.await.unwrap().attempted, 1);
    }

    #[tokio::test]
    async fn test_oldest_results_are_evicted() {
        let mut config = Config::default();
        config.coordinator.max_results = 2;
        let (coordinator, _bus) = staffed(config).await;

        let mut finished = Vec::new();
        for _ in 0..3 {
            let task_id = coordinator
                .submit("review", TaskInput::default(), TaskPriority::Medium)
                .await
                .unwrap();
            coordinator
                .complete(&task_id, TaskOutcome::success(serde_json::Value::Null))
                .await
                .unwrap();
            finished.push(task_id);
        }

        assert!(matches!(
            coordinator.wait_for_result(&finished[0]).await,
            Err(Error::NotFound(_))
        ));
        for task_id in &finished[1..] {
            assert_eq!(coordinator.wait_for_result(task_id).await.unwrap().task_id, *task_id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_result_times_out() {
        let (coordinator, _bus) = staffed(Config::default()).await;
        let task_id = coordinator
            .submit("monitoring", TaskInput::default(), TaskPriority::Medium)
            .await
            .unwrap();
        let err = coordinator.wait_for_result(&task_id).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_register_link_failure_is_not_an_error() {
        let (coordinator, _bus) = coordinator_with(Config::default());
        let mut sub = coordinator.subscribe(&[EventKind::ServerError]);

        let link = coordinator
            .register_link("upstream", TransportKind::Poll, LinkConfig::new("http://127.0.0.1:1"))
            .await
            .unwrap();
        assert_eq!(link.status, LinkStatus::Error);
        assert_eq!(sub.drain().len(), 1);

        let status = coordinator.status().await;
        assert_eq!(status.connected_links, 0);
        assert_eq!(status.links.len(), 1);
    }

    #[tokio::test]
    async fn test_share_learning_and_unsubscribe() {
        let (coordinator, _bus) = coordinator_with(Config::default());
        let sub = coordinator.subscribe(&[EventKind::LearningShared]);
        assert!(coordinator.unsubscribe(sub.id));
        assert!(!coordinator.unsubscribe(sub.id));

        coordinator
            .share_learning("a", "rust", KnowledgePayload::new("ownership"))
            .await;
        assert!(coordinator.knowledge("rust").await.is_some());

        let capability = coordinator
            .learn_new_capability("a", &ExecutionCommand::new("integrate the API", "api"))
            .await;
        assert_eq!(capability, "integration");
    }
}
