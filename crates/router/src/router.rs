use hivemind_core::{AgentRole, TaskInput, TaskPriority};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Which precedence rule picked the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    Escalation,
    Multimodal,
    Reasoning,
    TaskTable,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub role: AgentRole,
    pub reason: RouteReason,
}

struct KeywordRule {
    keywords: Vec<&'static str>,
    patterns: Vec<Regex>,
}

impl KeywordRule {
    fn matches(&self, task_type: &str) -> bool {
        let lower = task_type.to_lowercase();
        self.keywords.iter().any(|kw| lower.contains(kw))
            || self.patterns.iter().any(|p| p.is_match(&lower))
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %p, error = %e, "Skipping invalid routing pattern");
                None
            }
        })
        .collect()
}

/// Normalised task-type key: lower case, `_` and spaces folded to `-`.
fn table_key(task_type: &str) -> String {
    task_type
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c.is_whitespace() { '-' } else { c })
        .collect()
}

/// Maps (task type, payload, priority) to a role. Stateless: the same inputs
/// always give the same role.
///
/// Precedence, first match wins:
/// 1. urgent/high priority → coordinator
/// 2. visual or multimodal content → vision
/// 3. complex reasoning or strategic analysis → reasoning
/// 4. exact task-type table entry
/// 5. junior
pub struct RoleRouter {
    multimodal: KeywordRule,
    reasoning: KeywordRule,
    table: HashMap<String, AgentRole>,
}

impl Default for RoleRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl RoleRouter {
    pub fn new() -> Self {
        let multimodal = KeywordRule {
            keywords: vec!["multimodal", "multi-modal", "screenshot"],
            patterns: compile(&[
                r"\b(image|vision|visual|diagram|photo|picture|video|ocr)s?\b",
            ]),
        };

        let reasoning = KeywordRule {
            keywords: vec!["reasoning", "strategic", "strategy"],
            patterns: compile(&[
                r"\b(analy(sis|ze|se|tics)|plan(ning)?|research|decision|complex)\b",
            ]),
        };

        let mut table = HashMap::new();
        for (task_type, role) in [
            ("testing", AgentRole::Qa),
            ("test", AgentRole::Qa),
            ("qa", AgentRole::Qa),
            ("verification", AgentRole::Qa),
            ("deployment", AgentRole::Ops),
            ("deploy", AgentRole::Ops),
            ("operations", AgentRole::Ops),
            ("monitoring", AgentRole::Ops),
            ("infrastructure", AgentRole::Ops),
            ("architecture", AgentRole::Senior),
            ("code-review", AgentRole::Senior),
            ("review", AgentRole::Senior),
            ("refactoring", AgentRole::Senior),
            ("coordination", AgentRole::Coordinator),
        ] {
            table.insert(task_type.to_string(), role);
        }

        Self {
            multimodal,
            reasoning,
            table,
        }
    }

    /// Add task-type entries from config. Built-in entries are kept.
    pub fn with_table_entries(mut self, entries: &HashMap<String, AgentRole>) -> Self {
        for (task_type, role) in entries {
            self.table.entry(table_key(task_type)).or_insert(*role);
        }
        self
    }

    pub fn decide(&self, task_type: &str, input: &TaskInput, priority: TaskPriority) -> RoutingDecision {
        let (role, reason) = if priority.is_escalated() {
            (AgentRole::Coordinator, RouteReason::Escalation)
        } else if input.has_visual_content() || self.multimodal.matches(task_type) {
            (AgentRole::Vision, RouteReason::Multimodal)
        } else if self.reasoning.matches(task_type) {
            (AgentRole::Reasoning, RouteReason::Reasoning)
        } else if let Some(role) = self.table.get(&table_key(task_type)) {
            (*role, RouteReason::TaskTable)
        } else {
            (AgentRole::Junior, RouteReason::Fallback)
        };

        debug!(task_type = %task_type, priority = %priority, role = %role, reason = ?reason, "Routed task");
        RoutingDecision { role, reason }
    }

    pub fn route(&self, task_type: &str, input: &TaskInput, priority: TaskPriority) -> AgentRole {
        self.decide(task_type, input, priority).role
    }
}
