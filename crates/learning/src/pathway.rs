use chrono::{DateTime, Utc};
use hivemind_core::config::LearningConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Directed, strength-weighted edge between two agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pathway {
    pub from: String,
    pub to: String,
    pub strength: f64,
    /// Number of traversals. Never decreases.
    pub frequency: u64,
    /// Kind of the last message that traversed the edge.
    pub purpose: String,
    pub created_at: DateTime<Utc>,
    pub last_traversed: DateTime<Utc>,
    /// Set once the emergent-behavior event for this edge has fired.
    #[serde(default)]
    pub emergent_reported: bool,
}

/// Fired the first time a pathway's frequency exceeds the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct EmergentCrossing {
    pub from: String,
    pub to: String,
    pub frequency: u64,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct PathwayGraph {
    edges: HashMap<(String, String), Pathway>,
}

impl PathwayGraph {
    pub(crate) fn from_list(pathways: Vec<Pathway>) -> Self {
        let edges = pathways
            .into_iter()
            .map(|p| ((p.from.clone(), p.to.clone()), p))
            .collect();
        Self { edges }
    }

    /// Record one traversal. Returns the crossing when this traversal is the
    /// one that first takes the frequency past the threshold.
    pub(crate) fn traverse(
        &mut self,
        from: &str,
        to: &str,
        purpose: &str,
        config: &LearningConfig,
    ) -> Option<EmergentCrossing> {
        let now = Utc::now();
        let edge = self
            .edges
            .entry((from.to_string(), to.to_string()))
            .and_modify(|p| {
                p.frequency = p.frequency.saturating_add(1);
                p.strength = (p.strength + config.pathway_step).min(1.0);
                p.purpose = purpose.to_string();
                p.last_traversed = now;
            })
            .or_insert_with(|| Pathway {
                from: from.to_string(),
                to: to.to_string(),
                strength: config.pathway_initial_strength.clamp(0.0, 1.0),
                frequency: 1,
                purpose: purpose.to_string(),
                created_at: now,
                last_traversed: now,
                emergent_reported: false,
            });

        if edge.frequency > config.emergent_threshold && !edge.emergent_reported {
            edge.emergent_reported = true;
            return Some(EmergentCrossing {
                from: edge.from.clone(),
                to: edge.to.clone(),
                frequency: edge.frequency,
            });
        }
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.edges.len()
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Pathway> {
        self.edges.values()
    }

    /// Pathways ordered by (from, to).
    pub(crate) fn to_list(&self) -> Vec<Pathway> {
        let mut list: Vec<Pathway> = self.edges.values().cloned().collect();
        list.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_creation_and_strengthening() {
        let config = LearningConfig::default();
        let mut graph = PathwayGraph::default();
        graph.traverse("a", "b", "command", &config);
        let first = graph.to_list()[0].clone();
        assert_eq!(first.frequency, 1);
        assert!((first.strength - 0.1).abs() < 1e-9);

        graph.traverse("a", "b", "notification", &config);
        let second = graph.to_list()[0].clone();
        assert_eq!(second.frequency, 2);
        assert!((second.strength - 0.15).abs() < 1e-9);
        assert_eq!(second.purpose, "notification");

        // Direction matters.
        graph.traverse("b", "a", "command", &config);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_emergent_fires_exactly_once() {
        let config = LearningConfig::default();
        let mut graph = PathwayGraph::default();
        let mut fired = Vec::new();
        let mut last_frequency = 0;

        for _ in 0..(config.emergent_threshold + 10_000) {
            if let Some(crossing) = graph.traverse("a", "b", "command", &config) {
                fired.push(crossing);
            }
            let freq = graph.to_list()[0].frequency;
            assert!(freq >= last_frequency);
            last_frequency = freq;
        }

        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].frequency, config.emergent_threshold + 1);
        let edge = &graph.to_list()[0];
        assert_eq!(edge.strength, 1.0);
        assert!(edge.emergent_reported);
    }

    #[test]
    fn test_restored_flag_suppresses_refire() {
        let config = LearningConfig::default();
        let mut graph = PathwayGraph::default();
        for _ in 0..=config.emergent_threshold {
            graph.traverse("a", "b", "command", &config);
        }
        let mut restored = PathwayGraph::from_list(graph.to_list());
        assert!(restored.traverse("a", "b", "command", &config).is_none());
    }
}
