use crate::runner::Cycle;
use async_trait::async_trait;
use hivemind_core::Result;
use hivemind_learning::{KnowledgeSource, LearningCore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// One attempt per open practice session.
pub struct PracticeCycle {
    learning: LearningCore,
}

impl PracticeCycle {
    pub fn new(learning: LearningCore) -> Self {
        Self { learning }
    }
}

#[async_trait]
impl Cycle for PracticeCycle {
    fn name(&self) -> &str {
        "practice"
    }

    async fn run_once(&self) -> Result<()> {
        let report = self.learning.run_practice_round().await;
        if report.mastered > 0 || report.abandoned > 0 {
            info!(
                attempted = report.attempted,
                mastered = report.mastered,
                abandoned = report.abandoned,
                "Practice round finished"
            );
        } else {
            debug!(attempted = report.attempted, errors = report.errors, "Practice round finished");
        }
        Ok(())
    }
}

/// Pulls knowledge for a rotating window of topics each round.
pub struct IngestionCycle {
    learning: LearningCore,
    source: Arc<dyn KnowledgeSource>,
    topics: Vec<String>,
    per_round: usize,
    cursor: AtomicUsize,
}

impl IngestionCycle {
    pub fn new(
        learning: LearningCore,
        source: Arc<dyn KnowledgeSource>,
        topics: Vec<String>,
        per_round: usize,
    ) -> Self {
        Self {
            learning,
            source,
            topics,
            per_round: per_round.max(1),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Topics for the next round, wrapping around the list.
    pub fn next_topics(&self) -> Vec<String> {
        if self.topics.is_empty() {
            return Vec::new();
        }
        let count = self.per_round.min(self.topics.len());
        let start = self.cursor.fetch_add(count, Ordering::Relaxed) % self.topics.len();
        (0..count)
            .map(|i| self.topics[(start + i) % self.topics.len()].clone())
            .collect()
    }
}

#[async_trait]
impl Cycle for IngestionCycle {
    fn name(&self) -> &str {
        "ingestion"
    }

    async fn run_once(&self) -> Result<()> {
        let topics = self.next_topics();
        if topics.is_empty() {
            return Ok(());
        }
        let report = self
            .learning
            .ingest_from_source(self.source.as_ref(), &topics)
            .await;
        info!(
            topics = ?topics,
            ingested = report.ingested,
            failed = report.failed,
            skipped = report.skipped,
            "Ingestion round finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CycleRunner;
    use hivemind_core::config::LearningConfig;
    use hivemind_core::{Error, EventHub, ExecutionCommand, KnowledgePayload};
    use hivemind_learning::{NullKnowledgeSource, OutcomeSource, PracticeSession};
    use std::time::Duration;
    use tokio::sync::{broadcast, Mutex};

    struct AlwaysSucceeds;

    impl OutcomeSource for AlwaysSucceeds {
        fn attempt(&self, _session: &PracticeSession) -> Result<bool> {
            Ok(true)
        }
    }

    /// Records requested topics; fails for `bad`.
    #[derive(Default)]
    struct RecordingSource {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl KnowledgeSource for RecordingSource {
        async fn fetch(&self, topic: &str) -> Result<Option<KnowledgePayload>> {
            self.seen.lock().await.push(topic.to_string());
            if topic == "bad" {
                return Err(Error::Other("offline".to_string()));
            }
            Ok(Some(KnowledgePayload::new(&format!("about {}", topic))))
        }
    }

    fn learning() -> LearningCore {
        LearningCore::new(LearningConfig::default(), Arc::new(EventHub::default()))
            .with_outcome_source(Arc::new(AlwaysSucceeds))
    }

    fn topics(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_topic_rotation_wraps() {
        let cycle = IngestionCycle::new(
            learning(),
            Arc::new(NullKnowledgeSource),
            topics(&["a", "b", "c", "d", "e"]),
            3,
        );
        assert_eq!(cycle.next_topics(), topics(&["a", "b", "c"]));
        assert_eq!(cycle.next_topics(), topics(&["d", "e", "a"]));
        assert_eq!(cycle.next_topics(), topics(&["b", "c", "d"]));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_per_topic() {
        let core = learning();
        core.register_agent("agent-1").await;
        let source = Arc::new(RecordingSource::default());
        let cycle = IngestionCycle::new(core.clone(), source.clone(), topics(&["bad", "rust"]), 2);

        cycle.run_once().await.unwrap();
        assert_eq!(*source.seen.lock().await, topics(&["bad", "rust"]));
        assert!(core.knowledge("rust").await.is_some());
        assert!(core.knowledge("bad").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_practice_cycle_masters_over_time() {
        let core = learning();
        core.learn_new_capability("junior-1", &ExecutionCommand::new("deploy it", "ops"))
            .await;

        let runner = Arc::new(CycleRunner::new(
            Arc::new(PracticeCycle::new(core.clone())),
            Duration::from_secs(30),
        ));
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(runner.clone().run_loop(rx));

        tokio::time::sleep(Duration::from_secs(5 * 30 + 1)).await;
        assert_eq!(core.sessions().await.len(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(core.sessions().await.is_empty());
        assert_eq!(core.capabilities().await["junior-1"]["deployment"].strength, 1.0);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
