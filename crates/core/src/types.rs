use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Roles an agent can declare. The router maps work onto these.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Escalation target for urgent/high priority work.
    Coordinator,
    /// Handles images, screenshots and other multimodal input.
    Vision,
    /// Long-form reasoning and strategic analysis.
    Reasoning,
    /// Architecture and code review.
    Senior,
    /// General-purpose fallback.
    Junior,
    /// Testing and verification.
    Qa,
    /// Deployment and operations.
    Ops,
}

impl AgentRole {
    /// Fixed iteration order used when looking for an idle role.
    pub const ALL: [AgentRole; 7] = [
        AgentRole::Coordinator,
        AgentRole::Vision,
        AgentRole::Reasoning,
        AgentRole::Senior,
        AgentRole::Junior,
        AgentRole::Qa,
        AgentRole::Ops,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Coordinator => "coordinator",
            AgentRole::Vision => "vision",
            AgentRole::Reasoning => "reasoning",
            AgentRole::Senior => "senior",
            AgentRole::Junior => "junior",
            AgentRole::Qa => "qa",
            AgentRole::Ops => "ops",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "coordinator" => Some(AgentRole::Coordinator),
            "vision" => Some(AgentRole::Vision),
            "reasoning" => Some(AgentRole::Reasoning),
            "senior" => Some(AgentRole::Senior),
            "junior" => Some(AgentRole::Junior),
            "qa" => Some(AgentRole::Qa),
            "ops" => Some(AgentRole::Ops),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Offline,
    Online,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Offline => write!(f, "offline"),
            AgentStatus::Online => write!(f, "online"),
        }
    }
}

/// A named worker that can receive dispatched tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default = "default_agent_status")]
    pub status: AgentStatus,
}

fn default_agent_status() -> AgentStatus {
    AgentStatus::Idle
}

impl Agent {
    pub fn new(id: &str, name: &str, role: AgentRole) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            role,
            capabilities: BTreeSet::new(),
            status: AgentStatus::Idle,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(TaskPriority::Low),
            "medium" | "normal" => Some(TaskPriority::Medium),
            "high" => Some(TaskPriority::High),
            "urgent" | "critical" => Some(TaskPriority::Urgent),
            _ => None,
        }
    }

    /// Urgent and high priority work goes to the escalation role.
    pub fn is_escalated(&self) -> bool {
        matches!(self, TaskPriority::High | TaskPriority::Urgent)
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Medium => write!(f, "medium"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Urgent => write!(f, "urgent"),
        }
    }
}

/// Wire-level delivery mechanism of a remote link.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Server-sent events in, HTTP POST out.
    StreamPush,
    /// Duplex WebSocket.
    Socket,
    /// Periodic HTTP fetch.
    Poll,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::StreamPush => "stream_push",
            TransportKind::Socket => "socket",
            TransportKind::Poll => "poll",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "stream_push" | "stream-push" | "sse" => Some(TransportKind::StreamPush),
            "socket" | "websocket" | "ws" => Some(TransportKind::Socket),
            "poll" | "polling" | "http" => Some(TransportKind::Poll),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings for a remote link. Auth material is carried through
/// untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LinkConfig {
    pub url: String,
    /// Request channel for push transports, which cannot write on their
    /// inbound stream.
    #[serde(default)]
    pub outbound_url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Consecutive poll failures tolerated before the link is put in error.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    3
}

impl LinkConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            outbound_url: None,
            headers: HashMap::new(),
            auth_token: None,
            poll_interval_secs: default_poll_interval_secs(),
            failure_threshold: default_failure_threshold(),
        }
    }

    /// Headers to attach to every request, including the bearer token.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(token) = self.auth_token.as_deref() {
            if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("authorization")) {
                headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
            }
        }
        headers
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkStatus::Disconnected => write!(f, "disconnected"),
            LinkStatus::Connecting => write!(f, "connecting"),
            LinkStatus::Connected => write!(f, "connected"),
            LinkStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLink {
    pub name: String,
    pub transport: TransportKind,
    pub config: LinkConfig,
    pub status: LinkStatus,
    pub last_ping: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl RemoteLink {
    pub fn new(name: &str, transport: TransportKind, config: LinkConfig) -> Self {
        Self {
            name: name.to_string(),
            transport,
            config,
            status: LinkStatus::Disconnected,
            last_ping: None,
            last_error: None,
        }
    }
}
