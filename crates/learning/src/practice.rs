use chrono::{DateTime, Utc};
use hivemind_core::config::PracticeConfig;
use hivemind_core::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// An open attempt at mastering one capability for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSession {
    pub agent_id: String,
    pub capability: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub confidence: f64,
    pub success_threshold: f64,
    pub opened_at: DateTime<Utc>,
}

impl PracticeSession {
    pub fn open(agent_id: &str, capability: &str, config: &PracticeConfig) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            capability: capability.to_string(),
            attempts: 0,
            max_attempts: config.max_attempts,
            confidence: config.initial_confidence.clamp(0.0, 1.0),
            success_threshold: config.success_threshold,
            opened_at: Utc::now(),
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.agent_id.clone(), self.capability.clone())
    }

    pub fn is_mastered(&self) -> bool {
        self.confidence >= self.success_threshold
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Decides whether a single practice attempt succeeds.
pub trait OutcomeSource: Send + Sync {
    fn attempt(&self, session: &PracticeSession) -> Result<bool>;
}

/// Succeeds with a fixed probability.
pub struct RandomOutcome {
    success_probability: f64,
}

impl RandomOutcome {
    pub fn new(success_probability: f64) -> Self {
        Self {
            success_probability: success_probability.clamp(0.0, 1.0),
        }
    }
}

impl OutcomeSource for RandomOutcome {
    fn attempt(&self, _session: &PracticeSession) -> Result<bool> {
        Ok(rand::thread_rng().gen_bool(self.success_probability))
    }
}
