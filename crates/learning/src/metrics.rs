//! Aggregate collective metrics, recomputed after every ingestion.

use crate::capability::CapabilityMatrix;
use crate::pathway::PathwayGraph;
use crate::pattern::LearningPattern;
use chrono::{DateTime, Duration, Utc};
use hivemind_core::config::LearningConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergentBehaviorRecord {
    pub from: String,
    pub to: String,
    pub frequency: u64,
    pub description: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateMetrics {
    pub collective_intelligence: f64,
    /// Patterns per hour over the trailing window.
    pub learning_velocity: f64,
    /// Fraction of pathways above the efficiency threshold.
    pub network_efficiency: f64,
    #[serde(default)]
    pub emergent_behavior_log: Vec<EmergentBehaviorRecord>,
    pub topic_count: usize,
    pub mean_capability_strength: f64,
    pub pathway_count: usize,
    pub pattern_count: usize,
    pub computed_at: DateTime<Utc>,
}

impl Default for AggregateMetrics {
    fn default() -> Self {
        Self {
            collective_intelligence: 0.0,
            learning_velocity: 0.0,
            network_efficiency: 0.0,
            emergent_behavior_log: Vec::new(),
            topic_count: 0,
            mean_capability_strength: 0.0,
            pathway_count: 0,
            pattern_count: 0,
            computed_at: Utc::now(),
        }
    }
}

pub(crate) struct MetricInputs<'a> {
    pub patterns: &'a [LearningPattern],
    pub capabilities: &'a CapabilityMatrix,
    pub pathways: &'a PathwayGraph,
    pub topic_count: usize,
}

/// Recompute every derived figure. The emergent log is carried over
/// from `previous`.
pub(crate) fn compute(
    inputs: MetricInputs<'_>,
    previous: &AggregateMetrics,
    config: &LearningConfig,
    now: DateTime<Utc>,
) -> AggregateMetrics {
    let strengths: Vec<f64> = inputs
        .capabilities
        .values()
        .flat_map(|caps| caps.values().map(|c| c.strength))
        .collect();
    let mean_strength = if strengths.is_empty() {
        0.0
    } else {
        strengths.iter().sum::<f64>() / strengths.len() as f64
    };

    let pathway_count = inputs.pathways.len();
    let network_efficiency = if pathway_count == 0 {
        0.0
    } else {
        let strong = inputs
            .pathways
            .values()
            .filter(|p| p.strength > config.efficiency_threshold)
            .count();
        strong as f64 / pathway_count as f64
    };

    let window_secs = config.velocity_window_secs.max(1);
    let cutoff = now - Duration::seconds(window_secs as i64);
    // The log is append-only, so recent patterns sit at the tail.
    let recent = inputs
        .patterns
        .iter()
        .rev()
        .take_while(|p| p.timestamp >= cutoff)
        .count();
    let learning_velocity = recent as f64 * 3600.0 / window_secs as f64;

    let w = &config.weights;
    let collective_intelligence = w.topics * inputs.topic_count as f64
        + w.strength * mean_strength
        + w.pathways * pathway_count as f64;

    AggregateMetrics {
        collective_intelligence,
        learning_velocity,
        network_efficiency,
        emergent_behavior_log: previous.emergent_behavior_log.clone(),
        topic_count: inputs.topic_count,
        mean_capability_strength: mean_strength,
        pathway_count,
        pattern_count: inputs.patterns.len(),
        computed_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityEntry;
    use crate::pattern::LearningSource;
    use std::collections::BTreeMap;

    #[test]
    fn test_empty_state() {
        let config = LearningConfig::default();
        let graph = PathwayGraph::default();
        let caps = CapabilityMatrix::new();
        let metrics = compute(
            MetricInputs {
                patterns: &[],
                capabilities: &caps,
                pathways: &graph,
                topic_count: 0,
            },
            &AggregateMetrics::default(),
            &config,
            Utc::now(),
        );
        assert_eq!(metrics.network_efficiency, 0.0);
        assert_eq!(metrics.collective_intelligence, 0.0);
        assert_eq!(metrics.learning_velocity, 0.0);
    }

    #[test]
    fn test_weighted_sum_and_efficiency() {
        let config = LearningConfig::default();
        let mut graph = PathwayGraph::default();
        // a→b traversed 10 times: 0.1 + 9 * 0.05 = 0.55 > 0.5.
        for _ in 0..10 {
            graph.traverse("a", "b", "command", &config);
        }
        graph.traverse("b", "c", "command", &config);

        let mut caps = CapabilityMatrix::new();
        let mut agent = BTreeMap::new();
        agent.insert("testing".to_string(), CapabilityEntry::new(0.5));
        agent.insert("deploy".to_string(), CapabilityEntry::new(1.0));
        caps.insert("a".to_string(), agent);

        let now = Utc::now();
        let mut old = LearningPattern::new("a", "t", LearningSource::External, serde_json::Value::Null, 0.9);
        old.timestamp = now - Duration::hours(2);
        let fresh = LearningPattern::new("a", "t", LearningSource::External, serde_json::Value::Null, 0.9);
        let patterns = vec![old, fresh];

        let metrics = compute(
            MetricInputs {
                patterns: &patterns,
                capabilities: &caps,
                pathways: &graph,
                topic_count: 2,
            },
            &AggregateMetrics::default(),
            &config,
            now,
        );

        assert!((metrics.mean_capability_strength - 0.75).abs() < 1e-9);
        assert!((metrics.network_efficiency - 0.5).abs() < 1e-9);
        // 0.3 * 2 + 0.4 * 0.75 + 0.3 * 2
        assert!((metrics.collective_intelligence - 1.5).abs() < 1e-9);
        assert!((metrics.learning_velocity - 1.0).abs() < 1e-9);
        assert_eq!(metrics.pattern_count, 2);
    }
}
