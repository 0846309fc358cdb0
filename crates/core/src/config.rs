use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths::Paths;
use crate::types::{Agent, AgentRole, LinkConfig, TransportKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusConfig {
    /// Capacity of each event subscriber queue.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Capacity of the channel carrying transport callbacks into the bus.
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,
}

fn default_event_capacity() -> usize {
    256
}

fn default_inbound_buffer() -> usize {
    512
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            inbound_buffer: default_inbound_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Outbound frames per second allowed on a single link.
    #[serde(default = "default_rate_per_second")]
    pub rate_per_second: f64,
    #[serde(default = "default_rate_burst")]
    pub rate_burst: u32,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_rate_per_second() -> f64 {
    20.0
}

fn default_rate_burst() -> u32 {
    40
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            rate_per_second: default_rate_per_second(),
            rate_burst: default_rate_burst(),
        }
    }
}

/// What `submit` does when the routed role is busy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    /// Only the routed role may take the task; busy means `NoAvailableRole`.
    #[default]
    Strict,
    /// Fall back to the first idle role in fixed order.
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    #[serde(default)]
    pub policy: RoutingPolicy,
    /// Extra exact task-type → role entries, checked after the built-in table.
    #[serde(default)]
    pub task_table: HashMap<String, AgentRole>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeConfig {
    #[serde(default = "default_initial_confidence")]
    pub initial_confidence: f64,
    #[serde(default = "default_confidence_step")]
    pub confidence_step: f64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Used by the random outcome source only.
    #[serde(default = "default_success_probability")]
    pub success_probability: f64,
}

fn default_initial_confidence() -> f64 {
    0.1
}

fn default_confidence_step() -> f64 {
    0.15
}

fn default_success_threshold() -> f64 {
    0.9
}

fn default_max_attempts() -> u32 {
    10
}

fn default_success_probability() -> f64 {
    0.8
}

impl Default for PracticeConfig {
    fn default() -> Self {
        Self {
            initial_confidence: default_initial_confidence(),
            confidence_step: default_confidence_step(),
            success_threshold: default_success_threshold(),
            max_attempts: default_max_attempts(),
            success_probability: default_success_probability(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricWeights {
    #[serde(default = "default_topic_weight")]
    pub topics: f64,
    #[serde(default = "default_strength_weight")]
    pub strength: f64,
    #[serde(default = "default_pathway_weight")]
    pub pathways: f64,
}

fn default_topic_weight() -> f64 {
    0.3
}

fn default_strength_weight() -> f64 {
    0.4
}

fn default_pathway_weight() -> f64 {
    0.3
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            topics: default_topic_weight(),
            strength: default_strength_weight(),
            pathways: default_pathway_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningConfig {
    #[serde(default = "default_success_factor")]
    pub success_factor: f64,
    #[serde(default = "default_failure_factor")]
    pub failure_factor: f64,
    /// Weight kept from the previous success rate on each update.
    #[serde(default = "default_ema_weight")]
    pub ema_weight: f64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_initial_strength")]
    pub initial_strength: f64,
    #[serde(default = "default_pathway_initial_strength")]
    pub pathway_initial_strength: f64,
    #[serde(default = "default_pathway_step")]
    pub pathway_step: f64,
    #[serde(default = "default_emergent_threshold")]
    pub emergent_threshold: u64,
    #[serde(default = "default_efficiency_threshold")]
    pub efficiency_threshold: f64,
    #[serde(default = "default_velocity_window_secs")]
    pub velocity_window_secs: u64,
    #[serde(default)]
    pub practice: PracticeConfig,
    #[serde(default)]
    pub weights: MetricWeights,
}

fn default_success_factor() -> f64 {
    1.1
}

fn default_failure_factor() -> f64 {
    0.95
}

fn default_ema_weight() -> f64 {
    0.8
}

fn default_history_limit() -> usize {
    20
}

fn default_initial_strength() -> f64 {
    0.5
}

fn default_pathway_initial_strength() -> f64 {
    0.1
}

fn default_pathway_step() -> f64 {
    0.05
}

fn default_emergent_threshold() -> u64 {
    100
}

fn default_efficiency_threshold() -> f64 {
    0.5
}

fn default_velocity_window_secs() -> u64 {
    3600
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            success_factor: default_success_factor(),
            failure_factor: default_failure_factor(),
            ema_weight: default_ema_weight(),
            history_limit: default_history_limit(),
            initial_strength: default_initial_strength(),
            pathway_initial_strength: default_pathway_initial_strength(),
            pathway_step: default_pathway_step(),
            emergent_threshold: default_emergent_threshold(),
            efficiency_threshold: default_efficiency_threshold(),
            velocity_window_secs: default_velocity_window_secs(),
            practice: PracticeConfig::default(),
            weights: MetricWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_practice_interval_secs")]
    pub practice_interval_secs: u64,
    #[serde(default = "default_ingestion_interval_secs")]
    pub ingestion_interval_secs: u64,
    /// Topics rotated through by the external-ingestion cycle.
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,
    /// How many topics one ingestion round pulls.
    #[serde(default = "default_topics_per_round")]
    pub topics_per_round: usize,
}

fn default_true() -> bool {
    true
}

fn default_practice_interval_secs() -> u64 {
    30
}

fn default_ingestion_interval_secs() -> u64 {
    3600
}

fn default_topics() -> Vec<String> {
    [
        "software architecture",
        "testing strategies",
        "deployment automation",
        "distributed systems",
        "security practices",
        "performance tuning",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_topics_per_round() -> usize {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            practice_interval_secs: default_practice_interval_secs(),
            ingestion_interval_secs: default_ingestion_interval_secs(),
            topics: default_topics(),
            topics_per_round: default_topics_per_round(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorConfig {
    #[serde(default = "default_result_timeout_secs")]
    pub result_timeout_secs: u64,
    /// Finished results kept for late waiters; the oldest are evicted first.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_result_timeout_secs() -> u64 {
    30
}

fn default_max_results() -> usize {
    1024
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            result_timeout_secs: default_result_timeout_secs(),
            max_results: default_max_results(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Json,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Overrides the backend's default file under `~/.hivemind/state`.
    #[serde(default)]
    pub path: Option<String>,
}

/// A remote link declared in config and registered at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkEntry {
    pub name: String,
    pub transport: TransportKind,
    #[serde(flatten)]
    pub config: LinkConfig,
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub links: Vec<LinkEntry>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        let rate = self.transport.rate_per_second;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(Error::Config(format!(
                "transport.ratePerSecond must be positive, got {}",
                rate
            )));
        }
        Ok(())
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Config written by `hivemind onboard`: one agent per role.
    pub fn starter() -> Self {
        let agents = AgentRole::ALL
            .iter()
            .map(|role| {
                Agent::new(
                    &format!("{}-1", role.as_str()),
                    &format!("{} agent", role.as_str()),
                    *role,
                )
            })
            .collect();
        Self {
            agents,
            ..Self::default()
        }
    }

    /// File the configured store backend reads and writes.
    pub fn storage_path(&self, paths: &Paths) -> std::path::PathBuf {
        if let Some(p) = self.storage.path.as_deref() {
            let p = p.trim();
            if !p.is_empty() {
                return std::path::PathBuf::from(p);
            }
        }
        match self.storage.backend {
            StorageBackend::Sqlite => paths.learning_db(),
            _ => paths.learning_json(),
        }
    }
}
