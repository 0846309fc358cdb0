use chrono::{DateTime, Utc};
use hivemind_core::KnowledgePayload;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One agent's contribution to a topic, kept for provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeContribution {
    pub from_agent: String,
    pub knowledge: KnowledgePayload,
    pub confidence: f64,
    pub pattern_id: String,
    pub received_at: DateTime<Utc>,
}

/// Topic-keyed knowledge with every contribution that shaped it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    pub topic: String,
    pub contributions: Vec<KnowledgeContribution>,
    /// Latest summary plus the union of all `details` objects; later keys win.
    pub merged: Value,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            contributions: Vec::new(),
            merged: Value::Object(Map::new()),
            updated_at: Utc::now(),
        }
    }

    pub fn merge(&mut self, contribution: KnowledgeContribution) {
        if !self.merged.is_object() {
            self.merged = Value::Object(Map::new());
        }
        if let Value::Object(target) = &mut self.merged {
            target.insert(
                "summary".to_string(),
                Value::String(contribution.knowledge.summary.clone()),
            );
            match &contribution.knowledge.details {
                Value::Object(details) => {
                    for (k, v) in details {
                        target.insert(k.clone(), v.clone());
                    }
                }
                Value::Null => {}
                other => {
                    target.insert("details".to_string(), other.clone());
                }
            }
            if let Some(source) = &contribution.knowledge.source {
                target.insert("source".to_string(), Value::String(source.clone()));
            }
        }
        self.updated_at = contribution.received_at;
        self.contributions.push(contribution);
    }

    pub fn contributors(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for c in &self.contributions {
            if !out.contains(&c.from_agent.as_str()) {
                out.push(&c.from_agent);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contribution(from: &str, summary: &str, details: Value) -> KnowledgeContribution {
        KnowledgeContribution {
            from_agent: from.to_string(),
            knowledge: KnowledgePayload {
                summary: summary.to_string(),
                details,
                source: None,
            },
            confidence: 0.9,
            pattern_id: "p".to_string(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_merge_keeps_provenance() {
        let mut entry = KnowledgeEntry::new("rust");
        entry.merge(contribution("a", "ownership", json!({"borrowck": true, "level": 1})));
        entry.merge(contribution("b", "lifetimes", json!({"level": 2})));
        entry.merge(contribution("a", "traits", Value::Null));

        assert_eq!(entry.contributions.len(), 3);
        assert_eq!(entry.contributors(), vec!["a", "b"]);
        assert_eq!(entry.merged["summary"], "traits");
        assert_eq!(entry.merged["borrowck"], true);
        assert_eq!(entry.merged["level"], 2);
    }
}
