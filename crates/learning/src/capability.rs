//! Per agent × capability strength tracking.
//!
//! Strength is reinforced multiplicatively: a success multiplies it by
//! `success_factor` (capped at 1.0), a failure by `failure_factor`. The
//! success rate is an exponential moving average. Both stay in [0, 1].

use chrono::{DateTime, Utc};
use hivemind_core::config::LearningConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_FAILURE: &str = "failure";
pub const OUTCOME_MASTERED: &str = "mastered";

/// agent id → capability name → entry.
pub type CapabilityMatrix = BTreeMap<String, BTreeMap<String, CapabilityEntry>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityEntry {
    pub strength: f64,
    pub success_rate: f64,
    pub last_used: DateTime<Utc>,
    #[serde(default)]
    pub usage_count: u64,
    /// Most recent outcome tags (`success`, `failure`, `mastered`), oldest
    /// first.
    #[serde(default)]
    pub history: VecDeque<String>,
}

impl CapabilityEntry {
    pub fn new(initial: f64) -> Self {
        let initial = initial.clamp(0.0, 1.0);
        Self {
            strength: initial,
            success_rate: initial,
            last_used: Utc::now(),
            usage_count: 0,
            history: VecDeque::new(),
        }
    }

    pub fn record(&mut self, success: bool, config: &LearningConfig) {
        let factor = if success {
            config.success_factor
        } else {
            config.failure_factor
        };
        self.strength = clamp_unit(self.strength * factor);

        let outcome = if success { 1.0 } else { 0.0 };
        let keep = config.ema_weight.clamp(0.0, 1.0);
        self.success_rate = clamp_unit(keep * self.success_rate + (1.0 - keep) * outcome);

        self.usage_count += 1;
        self.last_used = Utc::now();
        self.push_history(if success { OUTCOME_SUCCESS } else { OUTCOME_FAILURE }, config);
    }

    /// Mastered through practice.
    pub fn finalize(&mut self, config: &LearningConfig) {
        self.strength = 1.0;
        self.success_rate = 1.0;
        self.last_used = Utc::now();
        self.push_history(OUTCOME_MASTERED, config);
    }

    fn push_history(&mut self, tag: &str, config: &LearningConfig) {
        self.history.push_back(tag.to_string());
        while self.history.len() > config.history_limit {
            self.history.pop_front();
        }
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Capability tags in match order, with the stems that select them.
const CAPABILITY_TAGS: [(&str, &[&str]); 8] = [
    ("development", &["develop", "implement", "build", "coding"]),
    ("testing", &["test", "verif"]),
    ("deployment", &["deploy", "release", "rollout"]),
    ("analysis", &["analy", "investigat", "review"]),
    ("coordination", &["coordinat", "delegat", "orchestrat"]),
    ("learning", &["learn", "study", "train"]),
    ("integration", &["integrat", "connect"]),
    ("automation", &["automat", "script", "schedul"]),
];

/// Coarse capability tag for a command's action text. First matching tag
/// wins; falls back to `general`.
pub fn extract_capability_tag(action: &str) -> String {
    let lower = action.to_lowercase();
    CAPABILITY_TAGS
        .iter()
        .find(|(_, stems)| stems.iter().any(|stem| lower.contains(*stem)))
        .map(|(tag, _)| tag.to_string())
        .unwrap_or_else(|| "general".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strength_stays_in_unit_interval() {
        let config = LearningConfig::default();
        let mut entry = CapabilityEntry::new(0.5);
        // Deterministic mixed sequence with long success and failure runs.
        for i in 0..5_000u32 {
            let success = (i / 37) % 3 != 0 || i % 11 == 0;
            entry.record(success, &config);
            assert!((0.0..=1.0).contains(&entry.strength));
            assert!((0.0..=1.0).contains(&entry.success_rate));
        }
        assert_eq!(entry.history.len(), config.history_limit);
    }

    #[test]
    fn test_success_moves_rate_towards_one() {
        let config = LearningConfig::default();
        let mut entry = CapabilityEntry::new(0.5);
        entry.record(true, &config);
        assert!((entry.success_rate - 0.6).abs() < 1e-9);
        assert!((entry.strength - 0.55).abs() < 1e-9);

        entry.record(false, &config);
        assert!((entry.success_rate - 0.48).abs() < 1e-9);
        assert_eq!(entry.history, ["success", "failure"]);

        entry.finalize(&config);
        assert_eq!(entry.history.back().map(String::as_str), Some("mastered"));
    }

    #[test]
    fn test_strength_caps_at_one() {
        let config = LearningConfig::default();
        let mut entry = CapabilityEntry::new(0.95);
        entry.record(true, &config);
        assert_eq!(entry.strength, 1.0);
    }

    #[test]
    fn test_capability_tags() {
        assert_eq!(extract_capability_tag("Run the testing suite"), "testing");
        assert_eq!(extract_capability_tag("deploy to staging"), "deployment");
        assert_eq!(extract_capability_tag("Analyze the logs"), "analysis");
        assert_eq!(extract_capability_tag("automate backups"), "automation");
        assert_eq!(extract_capability_tag("write a poem"), "general");
        // First tag in the fixed order wins.
        assert_eq!(
            extract_capability_tag("development and testing"),
            "development"
        );
    }
}
