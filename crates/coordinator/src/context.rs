use crate::coordinator::Coordinator;
use crate::pump::EventPump;
use hivemind_bus::MessageBus;
use hivemind_core::{Config, EventHub, Paths, Result};
use hivemind_learning::{
    KnowledgeSource, LearningCore, LearningStore, NullKnowledgeSource, OutcomeSource,
};
use hivemind_scheduler::{CycleRunner, IngestionCycle, PracticeCycle};
use hivemind_transport::TransportRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Optional overrides for [`AppContext::build_with`]. Anything left `None`
/// is built from config.
#[derive(Default)]
pub struct ContextParts {
    pub store: Option<Arc<dyn LearningStore>>,
    pub knowledge_source: Option<Arc<dyn KnowledgeSource>>,
    pub outcome_source: Option<Arc<dyn OutcomeSource>>,
    pub transports: Option<TransportRegistry>,
}

/// Every long-lived component, constructed once and injected where needed.
pub struct AppContext {
    pub config: Config,
    pub paths: Paths,
    pub events: Arc<EventHub>,
    pub bus: Arc<MessageBus>,
    pub learning: LearningCore,
    pub coordinator: Arc<Coordinator>,
    pub practice: Arc<CycleRunner>,
    pub ingestion: Arc<CycleRunner>,
    pump: Mutex<Option<EventPump>>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl AppContext {
    pub fn build(config: Config, paths: Paths) -> Result<Self> {
        Self::build_with(config, paths, ContextParts::default())
    }

    pub fn build_with(config: Config, paths: Paths, parts: ContextParts) -> Result<Self> {
        let events = Arc::new(EventHub::new(config.bus.event_capacity));

        let transports = parts
            .transports
            .unwrap_or_else(|| TransportRegistry::with_defaults(&config.transport));
        let bus = Arc::new(MessageBus::new(
            &config.bus,
            config.transport.clone(),
            transports,
            events.clone(),
        ));

        let store = match parts.store {
            Some(store) => store,
            None => hivemind_storage::open_store(&config, &paths)?,
        };
        let mut learning =
            LearningCore::new(config.learning.clone(), events.clone()).with_store(store);
        if let Some(outcomes) = parts.outcome_source {
            learning = learning.with_outcome_source(outcomes);
        }

        let pump = EventPump::new(&events, learning.clone());
        let coordinator = Arc::new(Coordinator::new(&config, bus.clone(), learning.clone()));

        let practice = Arc::new(CycleRunner::new(
            Arc::new(PracticeCycle::new(learning.clone())),
            Duration::from_secs(config.scheduler.practice_interval_secs),
        ));
        let source = parts
            .knowledge_source
            .unwrap_or_else(|| Arc::new(NullKnowledgeSource));
        let ingestion = Arc::new(CycleRunner::new(
            Arc::new(IngestionCycle::new(
                learning.clone(),
                source,
                config.scheduler.topics.clone(),
                config.scheduler.topics_per_round,
            )),
            Duration::from_secs(config.scheduler.ingestion_interval_secs),
        ));

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            paths,
            events,
            bus,
            learning,
            coordinator,
            practice,
            ingestion,
            pump: Mutex::new(Some(pump)),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Restore learning state, start background loops, then register the
    /// agents and links declared in config.
    pub async fn start(&self) -> Result<()> {
        match self.learning.load().await {
            Ok(true) => {}
            Ok(false) => info!("No saved learning state, starting fresh"),
            Err(e) => warn!(error = %e, "Could not restore learning state, starting fresh"),
        }

        {
            let mut handles = self.handles.lock().await;
            handles.push(tokio::spawn(
                self.bus.clone().run_inbound_loop(self.shutdown_tx.subscribe()),
            ));
            if let Some(pump) = self.pump.lock().await.take() {
                handles.push(tokio::spawn(pump.run_loop(self.shutdown_tx.subscribe())));
            }
            if self.config.scheduler.enabled {
                handles.push(tokio::spawn(
                    self.practice.clone().run_loop(self.shutdown_tx.subscribe()),
                ));
                handles.push(tokio::spawn(
                    self.ingestion.clone().run_loop(self.shutdown_tx.subscribe()),
                ));
            }
        }

        for agent in &self.config.agents {
            self.coordinator.register_agent(agent.clone()).await;
        }
        for entry in &self.config.links {
            if entry.auto_connect {
                if let Err(e) = self
                    .coordinator
                    .register_link(&entry.name, entry.transport, entry.config.clone())
                    .await
                {
                    warn!(link = %entry.name, error = %e, "Skipping configured link");
                }
            } else if let Err(e) = self
                .bus
                .register_link(&entry.name, entry.transport, entry.config.clone())
                .await
            {
                warn!(link = %entry.name, error = %e, "Skipping configured link");
            }
        }

        info!(
            agents = self.config.agents.len(),
            links = self.config.links.len(),
            cycles = self.config.scheduler.enabled,
            "Hivemind started"
        );
        Ok(())
    }

    /// Stop background loops, close links and save learning state.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.bus.close_all().await;
        if let Err(e) = self.learning.save().await {
            error!(error = %e, "Failed to save learning state");
        }
        info!("Hivemind stopped");
    }
}
