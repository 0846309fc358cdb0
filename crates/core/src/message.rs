use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TaskPriority;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Notification,
    Command,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Request => write!(f, "request"),
            MessageKind::Response => write!(f, "response"),
            MessageKind::Notification => write!(f, "notification"),
            MessageKind::Command => write!(f, "command"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
}

impl Attachment {
    pub fn is_visual(&self) -> bool {
        self.mime_type.starts_with("image/") || self.mime_type.starts_with("video/")
    }
}

/// Work item as handed in by a collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskInput {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub multimodal: bool,
}

impl TaskInput {
    pub fn text(description: &str) -> Self {
        Self {
            description: description.to_string(),
            ..Default::default()
        }
    }

    pub fn has_visual_content(&self) -> bool {
        self.multimodal || self.attachments.iter().any(Attachment::is_visual)
    }
}

/// What an agent was asked to do, as seen by the learning core.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionCommand {
    pub action: String,
    pub topic: String,
    /// Agents this command delegated to. Each one is a pathway traversal.
    #[serde(default)]
    pub collaborators: Vec<String>,
}

impl ExecutionCommand {
    pub fn new(action: &str, topic: &str) -> Self {
        Self {
            action: action.to_string(),
            topic: topic.to_string(),
            collaborators: Vec::new(),
        }
    }

    pub fn with_collaborators<I, S>(mut self, collaborators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collaborators = collaborators.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub success: bool,
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn failure(error: &str) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.to_string()),
        }
    }
}

/// A dispatched task as carried in a `command` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskDispatch {
    pub task_id: String,
    pub task_type: String,
    pub input: TaskInput,
    pub command: ExecutionCommand,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgePayload {
    pub summary: String,
    #[serde(default)]
    pub details: serde_json::Value,
    /// Where the knowledge came from (source name, URL, agent id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl KnowledgePayload {
    pub fn new(summary: &str) -> Self {
        Self {
            summary: summary.to_string(),
            details: serde_json::Value::Null,
            source: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Task(TaskDispatch),
    Outcome(TaskOutcome),
    Knowledge(KnowledgePayload),
    Rpc {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    Empty,
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Empty
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,
    pub method: String,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// `None` means broadcast to every local mailbox.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(kind: MessageKind, method: &str, payload: Payload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            method: method.to_string(),
            payload,
            error: None,
            from: None,
            to: None,
            priority: TaskPriority::default(),
            timestamp: Utc::now(),
        }
    }

    pub fn command(method: &str, payload: Payload) -> Self {
        Self::new(MessageKind::Command, method, payload)
    }

    pub fn request(method: &str, params: serde_json::Value) -> Self {
        Self::new(
            MessageKind::Request,
            method,
            Payload::Rpc {
                params: Some(params),
                result: None,
            },
        )
    }

    pub fn notification(method: &str, payload: Payload) -> Self {
        Self::new(MessageKind::Notification, method, payload)
    }

    /// Response correlated to `request`, addressed back to its sender.
    pub fn response_to(request: &Message, payload: Payload) -> Self {
        let mut msg = Self::new(MessageKind::Response, &request.method, payload);
        msg.id = request.id.clone();
        msg.to = request.from.clone();
        msg.from = request.to.clone();
        msg
    }

    pub fn with_from(mut self, from: &str) -> Self {
        self.from = Some(from.to_string());
        self
    }

    pub fn with_to(mut self, to: &str) -> Self {
        self.to = Some(to.to_string());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_tagging() {
        let msg = Message::notification(
            "learning/share",
            Payload::Knowledge(KnowledgePayload::new("rust ownership")),
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "notification");
        assert_eq!(json["payload"]["kind"], "knowledge");
        assert_eq!(json["payload"]["summary"], "rust ownership");
        assert!(json.get("to").is_none());
    }

    #[test]
    fn test_response_swaps_endpoints() {
        let req = Message::request("tools/list", serde_json::json!({}))
            .with_from("agent-a")
            .with_to("remote");
        let resp = Message::response_to(&req, Payload::Empty);
        assert_eq!(resp.id, req.id);
        assert_eq!(resp.to.as_deref(), Some("agent-a"));
        assert_eq!(resp.from.as_deref(), Some("remote"));
        assert_eq!(resp.kind, MessageKind::Response);
    }

    #[test]
    fn test_visual_content_detection() {
        let mut input = TaskInput::text("look at this");
        assert!(!input.has_visual_content());
        input.attachments.push(Attachment {
            name: "shot.png".to_string(),
            mime_type: "image/png".to_string(),
        });
        assert!(input.has_visual_content());
    }

    #[test]
    fn test_message_ids_unique() {
        let a = Message::command("task/run", Payload::Empty);
        let b = Message::command("task/run", Payload::Empty);
        assert_ne!(a.id, b.id);
    }
}
