use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningSource {
    Interaction,
    External,
    Practice,
    Learning,
    Delegation,
}

impl std::fmt::Display for LearningSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LearningSource::Interaction => write!(f, "interaction"),
            LearningSource::External => write!(f, "external"),
            LearningSource::Practice => write!(f, "practice"),
            LearningSource::Learning => write!(f, "learning"),
            LearningSource::Delegation => write!(f, "delegation"),
        }
    }
}

/// One entry of the append-only learning log. Only `application_count`
/// changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPattern {
    pub id: String,
    pub agent_id: String,
    pub topic: String,
    pub source: LearningSource,
    pub knowledge: serde_json::Value,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub application_count: u64,
}

impl LearningPattern {
    pub fn new(
        agent_id: &str,
        topic: &str,
        source: LearningSource,
        knowledge: serde_json::Value,
        confidence: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            topic: topic.to_string(),
            source,
            knowledge,
            confidence: confidence.clamp(0.0, 1.0),
            timestamp: Utc::now(),
            application_count: 0,
        }
    }
}
