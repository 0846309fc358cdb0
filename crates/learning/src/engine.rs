use crate::capability::{extract_capability_tag, CapabilityEntry, CapabilityMatrix};
use crate::knowledge::{KnowledgeContribution, KnowledgeEntry};
use crate::metrics::{self, AggregateMetrics, EmergentBehaviorRecord, MetricInputs};
use crate::pathway::{EmergentCrossing, Pathway, PathwayGraph};
use crate::pattern::{LearningPattern, LearningSource};
use crate::practice::{OutcomeSource, PracticeSession, RandomOutcome};
use crate::source::KnowledgeSource;
use crate::store::{LearningSnapshot, LearningStore, SNAPSHOT_VERSION};
use chrono::Utc;
use hivemind_core::config::LearningConfig;
use hivemind_core::{
    EventHub, ExecutionCommand, HubEvent, KnowledgePayload, MessageKind, Result, TaskOutcome,
};
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const EXECUTION_SUCCESS_CONFIDENCE: f64 = 0.8;
const EXECUTION_FAILURE_CONFIDENCE: f64 = 0.3;
const EXTERNAL_CONFIDENCE: f64 = 0.9;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeReport {
    pub attempted: usize,
    pub mastered: usize,
    pub abandoned: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionReport {
    pub ingested: usize,
    pub empty: usize,
    pub failed: usize,
    /// Topics with knowledge but no known agent to attribute it to.
    pub skipped: usize,
}

#[derive(Default)]
struct LearningState {
    patterns: Vec<LearningPattern>,
    /// Distinct pattern topics, kept in step with `patterns`.
    topics: HashSet<String>,
    capabilities: CapabilityMatrix,
    pathways: PathwayGraph,
    knowledge: BTreeMap<String, KnowledgeEntry>,
    sessions: BTreeMap<(String, String), PracticeSession>,
    metrics: AggregateMetrics,
    known_agents: BTreeSet<String>,
}

impl LearningState {
    fn from_snapshot(snapshot: LearningSnapshot) -> Self {
        let topics = snapshot.patterns.iter().map(|p| p.topic.clone()).collect();
        Self {
            patterns: snapshot.patterns,
            topics,
            capabilities: snapshot.capabilities,
            pathways: PathwayGraph::from_list(snapshot.pathways),
            knowledge: snapshot.knowledge,
            sessions: snapshot
                .sessions
                .into_iter()
                .map(|s| (s.key(), s))
                .collect(),
            metrics: snapshot.metrics,
            known_agents: snapshot.known_agents,
        }
    }

    fn snapshot(&self) -> LearningSnapshot {
        LearningSnapshot {
            version: SNAPSHOT_VERSION,
            patterns: self.patterns.clone(),
            capabilities: self.capabilities.clone(),
            pathways: self.pathways.to_list(),
            knowledge: self.knowledge.clone(),
            sessions: self.sessions.values().cloned().collect(),
            metrics: self.metrics.clone(),
            known_agents: self.known_agents.clone(),
        }
    }

    fn push_pattern(&mut self, pattern: LearningPattern) {
        if !self.topics.contains(&pattern.topic) {
            self.topics.insert(pattern.topic.clone());
        }
        self.patterns.push(pattern);
    }

    fn recompute(&mut self, config: &LearningConfig) {
        let topic_count = self.topics.len();
        self.metrics = metrics::compute(
            MetricInputs {
                patterns: &self.patterns,
                capabilities: &self.capabilities,
                pathways: &self.pathways,
                topic_count,
            },
            &self.metrics,
            config,
            Utc::now(),
        );
    }

    /// Log the crossing and turn it into an event.
    fn note_emergent(&mut self, crossing: EmergentCrossing) -> HubEvent {
        let description = format!(
            "{} → {} collaboration exceeded {} traversals",
            crossing.from, crossing.to, crossing.frequency.saturating_sub(1)
        );
        self.metrics.emergent_behavior_log.push(EmergentBehaviorRecord {
            from: crossing.from.clone(),
            to: crossing.to.clone(),
            frequency: crossing.frequency,
            description: description.clone(),
            detected_at: Utc::now(),
        });
        HubEvent::EmergentBehavior {
            from: crossing.from,
            to: crossing.to,
            frequency: crossing.frequency,
            description,
        }
    }
}

/// Owner of the pattern log, capability matrix, pathway graph, knowledge
/// store, practice sessions and aggregate metrics.
///
/// All of it is one consistency domain behind a single async mutex. Reads
/// hand out copies; events are published only after the lock is released.
#[derive(Clone)]
pub struct LearningCore {
    state: Arc<Mutex<LearningState>>,
    events: Arc<EventHub>,
    config: LearningConfig,
    outcomes: Arc<dyn OutcomeSource>,
    store: Option<Arc<dyn LearningStore>>,
}

impl LearningCore {
    pub fn new(config: LearningConfig, events: Arc<EventHub>) -> Self {
        let outcomes = Arc::new(RandomOutcome::new(config.practice.success_probability));
        Self {
            state: Arc::new(Mutex::new(LearningState::default())),
            events,
            config,
            outcomes,
            store: None,
        }
    }

    pub fn with_outcome_source(mut self, outcomes: Arc<dyn OutcomeSource>) -> Self {
        self.outcomes = outcomes;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn LearningStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    fn publish_all(&self, events: Vec<HubEvent>) {
        for event in events {
            self.events.publish(event);
        }
    }

    /// Remember an agent as a candidate for externally ingested knowledge.
    pub async fn register_agent(&self, agent_id: &str) {
        let mut state = self.state.lock().await;
        if state.known_agents.insert(agent_id.to_string()) {
            debug!(agent = %agent_id, "Learning core knows agent");
        }
    }

    pub async fn learn_from_execution(
        &self,
        agent_id: &str,
        command: &ExecutionCommand,
        outcome: &TaskOutcome,
    ) {
        let confidence = if outcome.success {
            EXECUTION_SUCCESS_CONFIDENCE
        } else {
            EXECUTION_FAILURE_CONFIDENCE
        };
        let source = if command.collaborators.is_empty() {
            LearningSource::Interaction
        } else {
            LearningSource::Delegation
        };
        let tag = extract_capability_tag(&command.action);

        let events: Vec<HubEvent> = {
            let mut state = self.state.lock().await;
            state.known_agents.insert(agent_id.to_string());
            state.push_pattern(LearningPattern::new(
                agent_id,
                &command.topic,
                source,
                json!({
                    "action": command.action,
                    "capability": tag,
                    "success": outcome.success,
                    "output": outcome.output,
                    "error": outcome.error,
                }),
                confidence,
            ));

            let initial = self.config.initial_strength;
            state
                .capabilities
                .entry(agent_id.to_string())
                .or_default()
                .entry(command.topic.clone())
                .or_insert_with(|| CapabilityEntry::new(initial))
                .record(outcome.success, &self.config);

            // Same vocabulary as routed messages: delegating is a command.
            let purpose = MessageKind::Command.to_string();
            let crossings: Vec<EmergentCrossing> = command
                .collaborators
                .iter()
                .filter_map(|to| state.pathways.traverse(agent_id, to, &purpose, &self.config))
                .collect();

            state.recompute(&self.config);
            crossings
                .into_iter()
                .map(|c| state.note_emergent(c))
                .collect()
        };

        debug!(
            agent = %agent_id,
            topic = %command.topic,
            success = outcome.success,
            "Learned from execution"
        );
        self.publish_all(events);
    }

    pub async fn ingest_external_learning(
        &self,
        from_agent: &str,
        topic: &str,
        knowledge: KnowledgePayload,
    ) {
        {
            let mut state = self.state.lock().await;
            let pattern = LearningPattern::new(
                from_agent,
                topic,
                LearningSource::External,
                serde_json::to_value(&knowledge).unwrap_or(serde_json::Value::Null),
                EXTERNAL_CONFIDENCE,
            );
            let contribution = KnowledgeContribution {
                from_agent: from_agent.to_string(),
                knowledge,
                confidence: pattern.confidence,
                pattern_id: pattern.id.clone(),
                received_at: pattern.timestamp,
            };
            state.push_pattern(pattern);
            state
                .knowledge
                .entry(topic.to_string())
                .or_insert_with(|| KnowledgeEntry::new(topic))
                .merge(contribution);
            state.recompute(&self.config);
        }

        info!(from = %from_agent, topic = %topic, "Knowledge shared");
        self.events.publish(HubEvent::LearningShared {
            from_agent: from_agent.to_string(),
            topic: topic.to_string(),
        });
    }

    /// Open a practice session for the capability named by the command's
    /// action. An already open session for the same pair is kept.
    pub async fn learn_new_capability(&self, agent_id: &str, command: &ExecutionCommand) -> String {
        let capability = extract_capability_tag(&command.action);
        let mut state = self.state.lock().await;

        state.push_pattern(LearningPattern::new(
            agent_id,
            &capability,
            LearningSource::Learning,
            json!({ "action": command.action, "topic": command.topic }),
            self.config.practice.initial_confidence,
        ));

        let key = (agent_id.to_string(), capability.clone());
        if state.sessions.contains_key(&key) {
            debug!(agent = %agent_id, capability = %capability, "Practice session already open");
        } else {
            state
                .sessions
                .insert(key, PracticeSession::open(agent_id, &capability, &self.config.practice));
            info!(agent = %agent_id, capability = %capability, "Practice session opened");
        }

        let initial = self.config.practice.initial_confidence;
        state
            .capabilities
            .entry(agent_id.to_string())
            .or_default()
            .entry(capability.clone())
            .or_insert_with(|| CapabilityEntry::new(initial));

        state.recompute(&self.config);
        capability
    }

    /// One traversal of the `from → to` pathway.
    pub async fn record_interaction(&self, from: &str, to: &str, purpose: &str) {
        let event = {
            let mut state = self.state.lock().await;
            let crossing = state.pathways.traverse(from, to, purpose, &self.config);
            state.recompute(&self.config);
            crossing.map(|c| state.note_emergent(c))
        };

        if let Some(event) = event {
            info!(from = %from, to = %to, "Emergent collaboration detected");
            self.events.publish(event);
        }
    }

    /// One attempt for every open session.
    pub async fn run_practice_round(&self) -> PracticeReport {
        let mut report = PracticeReport::default();
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            let keys: Vec<(String, String)> = state.sessions.keys().cloned().collect();

            for key in keys {
                let Some(session) = state.sessions.get_mut(&key) else {
                    continue;
                };
                let success = match self.outcomes.attempt(session) {
                    Ok(success) => success,
                    Err(e) => {
                        warn!(
                            agent = %session.agent_id,
                            capability = %session.capability,
                            error = %e,
                            "Practice attempt failed"
                        );
                        report.errors += 1;
                        continue;
                    }
                };

                report.attempted += 1;
                session.attempts += 1;
                if success {
                    session.confidence =
                        (session.confidence + self.config.practice.confidence_step).min(1.0);
                }

                if session.is_mastered() {
                    let session = session.clone();
                    state.sessions.remove(&key);
                    state
                        .capabilities
                        .entry(session.agent_id.clone())
                        .or_default()
                        .entry(session.capability.clone())
                        .or_insert_with(|| CapabilityEntry::new(session.confidence))
                        .finalize(&self.config);
                    state.push_pattern(LearningPattern::new(
                        &session.agent_id,
                        &session.capability,
                        LearningSource::Practice,
                        json!({ "attempts": session.attempts, "mastered": true }),
                        session.confidence,
                    ));
                    info!(
                        agent = %session.agent_id,
                        capability = %session.capability,
                        attempts = session.attempts,
                        "Capability mastered"
                    );
                    events.push(HubEvent::CapabilityMastered {
                        agent_id: session.agent_id,
                        capability: session.capability,
                        attempts: session.attempts,
                    });
                    report.mastered += 1;
                } else if session.is_exhausted() {
                    info!(
                        agent = %session.agent_id,
                        capability = %session.capability,
                        "Practice session abandoned"
                    );
                    state.sessions.remove(&key);
                    report.abandoned += 1;
                }
            }

            if report.mastered > 0 {
                state.recompute(&self.config);
            }
        }

        self.publish_all(events);
        report
    }

    /// Fetch each topic from `source` and ingest it for a randomly chosen
    /// known agent. Fetching happens outside the lock.
    pub async fn ingest_from_source(
        &self,
        source: &dyn KnowledgeSource,
        topics: &[String],
    ) -> IngestionReport {
        let mut report = IngestionReport::default();
        for topic in topics {
            let knowledge = match source.fetch(topic).await {
                Ok(Some(k)) => k,
                Ok(None) => {
                    report.empty += 1;
                    continue;
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Knowledge fetch failed");
                    report.failed += 1;
                    continue;
                }
            };

            let agent = {
                let state = self.state.lock().await;
                state
                    .known_agents
                    .iter()
                    .choose(&mut rand::thread_rng())
                    .cloned()
            };
            match agent {
                Some(agent) => {
                    self.ingest_external_learning(&agent, topic, knowledge).await;
                    report.ingested += 1;
                }
                None => {
                    debug!(topic = %topic, "No known agent for ingested knowledge");
                    report.skipped += 1;
                }
            }
        }
        report
    }

    /// Look up a topic and count one application for every pattern on it.
    pub async fn apply_knowledge(&self, topic: &str) -> Option<KnowledgeEntry> {
        let mut state = self.state.lock().await;
        let entry = state.knowledge.get(topic).cloned()?;
        for pattern in state.patterns.iter_mut().filter(|p| p.topic == topic) {
            pattern.application_count += 1;
        }
        Some(entry)
    }

    pub async fn metrics(&self) -> AggregateMetrics {
        self.state.lock().await.metrics.clone()
    }

    pub async fn capabilities(&self) -> CapabilityMatrix {
        self.state.lock().await.capabilities.clone()
    }

    pub async fn pathways(&self) -> Vec<Pathway> {
        self.state.lock().await.pathways.to_list()
    }

    pub async fn patterns(&self) -> Vec<LearningPattern> {
        self.state.lock().await.patterns.clone()
    }

    pub async fn knowledge(&self, topic: &str) -> Option<KnowledgeEntry> {
        self.state.lock().await.knowledge.get(topic).cloned()
    }

    pub async fn knowledge_topics(&self) -> Vec<String> {
        self.state.lock().await.knowledge.keys().cloned().collect()
    }

    pub async fn sessions(&self) -> Vec<PracticeSession> {
        self.state.lock().await.sessions.values().cloned().collect()
    }

    pub async fn known_agents(&self) -> Vec<String> {
        self.state.lock().await.known_agents.iter().cloned().collect()
    }

    pub async fn snapshot(&self) -> LearningSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Restore from the store. Returns whether anything was loaded.
    pub async fn load(&self) -> Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        match store.load_all().await? {
            Some(snapshot) => {
                if snapshot.version != SNAPSHOT_VERSION {
                    warn!(
                        store = store.name(),
                        version = snapshot.version,
                        "Loading learning snapshot with unexpected version"
                    );
                }
                let patterns = snapshot.patterns.len();
                *self.state.lock().await = LearningState::from_snapshot(snapshot);
                info!(store = store.name(), patterns, "Learning state restored");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn save(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = self.snapshot().await;
        store.save_all(&snapshot).await?;
        debug!(store = store.name(), patterns = snapshot.patterns.len(), "Learning state saved");
        Ok(())
    }
}
