use crate::capability::CapabilityMatrix;
use crate::knowledge::KnowledgeEntry;
use crate::metrics::AggregateMetrics;
use crate::pathway::Pathway;
use crate::pattern::LearningPattern;
use crate::practice::PracticeSession;
use async_trait::async_trait;
use hivemind_core::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything the learning core persists, in one piece.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningSnapshot {
    pub version: u32,
    #[serde(default)]
    pub patterns: Vec<LearningPattern>,
    #[serde(default)]
    pub capabilities: CapabilityMatrix,
    #[serde(default)]
    pub pathways: Vec<Pathway>,
    #[serde(default)]
    pub knowledge: BTreeMap<String, KnowledgeEntry>,
    #[serde(default)]
    pub sessions: Vec<PracticeSession>,
    #[serde(default)]
    pub metrics: AggregateMetrics,
    #[serde(default)]
    pub known_agents: BTreeSet<String>,
}

impl Default for LearningSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            patterns: Vec::new(),
            capabilities: CapabilityMatrix::new(),
            pathways: Vec::new(),
            knowledge: BTreeMap::new(),
            sessions: Vec::new(),
            metrics: AggregateMetrics::default(),
            known_agents: BTreeSet::new(),
        }
    }
}

#[async_trait]
pub trait LearningStore: Send + Sync {
    fn name(&self) -> &str;
    async fn save_all(&self, snapshot: &LearningSnapshot) -> Result<()>;
    /// `Ok(None)` when nothing has been saved yet.
    async fn load_all(&self) -> Result<Option<LearningSnapshot>>;
}

/// Keeps the last saved snapshot in memory.
#[derive(Default)]
pub struct InMemoryStore {
    saved: Mutex<Option<LearningSnapshot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LearningStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save_all(&self, snapshot: &LearningSnapshot) -> Result<()> {
        *self.saved.lock().await = Some(snapshot.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Option<LearningSnapshot>> {
        Ok(self.saved.lock().await.clone())
    }
}
