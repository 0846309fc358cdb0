//! Capability matrix, pathway graph and aggregate metrics for the agent
//! collective, plus the ingestion entry points that update them.

pub mod capability;
pub mod engine;
pub mod knowledge;
pub mod metrics;
pub mod pathway;
pub mod pattern;
pub mod practice;
pub mod source;
pub mod store;

pub use capability::{extract_capability_tag, CapabilityEntry, CapabilityMatrix};
pub use engine::{IngestionReport, LearningCore, PracticeReport};
pub use knowledge::{KnowledgeContribution, KnowledgeEntry};
pub use metrics::{AggregateMetrics, EmergentBehaviorRecord};
pub use pathway::Pathway;
pub use pattern::{LearningPattern, LearningSource};
pub use practice::{OutcomeSource, PracticeSession, RandomOutcome};
pub use source::{KnowledgeSource, NullKnowledgeSource, StaticKnowledgeSource};
pub use store::{InMemoryStore, LearningSnapshot, LearningStore};
