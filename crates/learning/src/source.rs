use async_trait::async_trait;
use hivemind_core::{KnowledgePayload, Result};
use std::collections::HashMap;

/// Where the ingestion cycle gets external knowledge from.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// `Ok(None)` when the source has nothing for the topic.
    async fn fetch(&self, topic: &str) -> Result<Option<KnowledgePayload>>;
}

/// Never yields anything.
pub struct NullKnowledgeSource;

#[async_trait]
impl KnowledgeSource for NullKnowledgeSource {
    async fn fetch(&self, _topic: &str) -> Result<Option<KnowledgePayload>> {
        Ok(None)
    }
}

/// Fixed topic → knowledge table.
#[derive(Default)]
pub struct StaticKnowledgeSource {
    entries: HashMap<String, KnowledgePayload>,
}

impl StaticKnowledgeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, topic: &str, knowledge: KnowledgePayload) -> Self {
        self.entries.insert(topic.to_string(), knowledge);
        self
    }
}

#[async_trait]
impl KnowledgeSource for StaticKnowledgeSource {
    async fn fetch(&self, topic: &str) -> Result<Option<KnowledgePayload>> {
        Ok(self.entries.get(topic).cloned())
    }
}
