pub mod config;
pub mod error;
pub mod events;
pub mod message;
pub mod paths;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventHub, EventKind, EventSubscription, HubEvent, SubscriptionId};
pub use message::{
    Attachment, ExecutionCommand, KnowledgePayload, Message, MessageKind, Payload, TaskDispatch,
    TaskInput, TaskOutcome,
};
pub use paths::Paths;
pub use types::{
    Agent, AgentRole, AgentStatus, LinkConfig, LinkStatus, RemoteLink, TaskPriority, TransportKind,
};
