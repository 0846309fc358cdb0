use hivemind_core::config::{BusConfig, TransportConfig};
use hivemind_core::{Agent, AgentRole, AgentStatus, Error, EventHub, HubEvent, Message, Result};
use hivemind_transport::{codec, TransportEvent, TransportRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};

use crate::links::LinkSlot;

/// Counts returned by [`MessageBus::health_check`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusHealth {
    pub local_agents: usize,
    pub remote_links: usize,
    pub connected_links: usize,
    pub queued_messages: usize,
}

/// Point-to-point and broadcast delivery between local agents and remote
/// links.
///
/// Owns the agent registry, one FIFO mailbox per local agent and the remote
/// link table. Transport I/O never happens while any of these locks is held.
pub struct MessageBus {
    pub(crate) agents: RwLock<HashMap<String, Agent>>,
    pub(crate) mailboxes: Mutex<HashMap<String, VecDeque<Message>>>,
    pub(crate) links: Mutex<HashMap<String, LinkSlot>>,
    pub(crate) transports: TransportRegistry,
    pub(crate) transport_config: TransportConfig,
    pub(crate) events: Arc<EventHub>,
    pub(crate) inbound_tx: mpsc::Sender<TransportEvent>,
    pub(crate) inbound_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

impl MessageBus {
    pub fn new(
        config: &BusConfig,
        transport_config: TransportConfig,
        transports: TransportRegistry,
        events: Arc<EventHub>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer.max(1));
        Self {
            agents: RwLock::new(HashMap::new()),
            mailboxes: Mutex::new(HashMap::new()),
            links: Mutex::new(HashMap::new()),
            transports,
            transport_config,
            events,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        }
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    /// Insert or overwrite an agent. An existing mailbox is kept.
    pub async fn register_agent(&self, agent: Agent) {
        let id = agent.id.clone();
        let role = agent.role;
        let replaced = self
            .agents
            .write()
            .await
            .insert(id.clone(), agent)
            .is_some();
        self.mailboxes.lock().await.entry(id.clone()).or_default();

        info!(agent = %id, role = %role, replaced, "Agent registered");
        self.events.publish(HubEvent::AgentRegistered { agent_id: id, role });
    }

    /// Remove an agent and drop its queued messages.
    pub async fn deregister_agent(&self, id: &str) -> Option<Agent> {
        let removed = self.agents.write().await.remove(id);
        let dropped = self
            .mailboxes
            .lock()
            .await
            .remove(id)
            .map(|q| q.len())
            .unwrap_or(0);
        if removed.is_some() {
            info!(agent = %id, dropped, "Agent deregistered");
        }
        removed
    }

    pub async fn set_agent_status(&self, id: &str, status: AgentStatus) -> Result<()> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("agent {}", id)))?;
        agent.status = status;
        debug!(agent = %id, status = %status, "Agent status changed");
        Ok(())
    }

    pub async fn agent(&self, id: &str) -> Option<Agent> {
        self.agents.read().await.get(id).cloned()
    }

    /// All registered agents, ordered by id.
    pub async fn agents(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub async fn agents_with_role(&self, role: AgentRole) -> Vec<Agent> {
        self.agents()
            .await
            .into_iter()
            .filter(|a| a.role == role)
            .collect()
    }

    /// Deliver `message` to a local agent or a remote link named `to`.
    ///
    /// Fails with `UnknownDestination` when `to` is neither; nothing is
    /// queued in that case.
    pub async fn send(&self, to: &str, mut message: Message) -> Result<()> {
        message.to = Some(to.to_string());

        {
            let mut boxes = self.mailboxes.lock().await;
            if let Some(queue) = boxes.get_mut(to) {
                let from = message.from.clone();
                let kind = message.kind;
                queue.push_back(message);
                drop(boxes);
                debug!(to = %to, "Message queued for local agent");
                self.events.publish(HubEvent::MessageRouted {
                    from,
                    to: to.to_string(),
                    kind,
                });
                return Ok(());
            }
        }

        let target = self.link_target(to).await;
        match target {
            None => Err(Error::UnknownDestination(to.to_string())),
            Some(target) => {
                let frame = codec::encode(&message)?;
                let from = message.from.clone();
                let kind = message.kind;
                self.send_to_link(to, target, frame).await?;
                self.events.publish(HubEvent::MessageRouted {
                    from,
                    to: to.to_string(),
                    kind,
                });
                Ok(())
            }
        }
    }

    /// Deliver a copy of `message` to every local mailbox. Returns the number
    /// of recipients.
    pub async fn broadcast(&self, mut message: Message) -> usize {
        message.to = None;
        let mut boxes = self.mailboxes.lock().await;
        for queue in boxes.values_mut() {
            queue.push_back(message.clone());
        }
        let delivered = boxes.len();
        debug!(method = %message.method, delivered, "Broadcast delivered");
        delivered
    }

    /// Pop the oldest queued message for `agent_id`.
    pub async fn receive(&self, agent_id: &str) -> Option<Message> {
        self.mailboxes
            .lock()
            .await
            .get_mut(agent_id)
            .and_then(|q| q.pop_front())
    }

    pub async fn drain(&self, agent_id: &str) -> Vec<Message> {
        self.mailboxes
            .lock()
            .await
            .get_mut(agent_id)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    pub async fn queue_length(&self) -> usize {
        self.mailboxes.lock().await.values().map(|q| q.len()).sum()
    }

    /// Read-only counts; never fails.
    pub async fn health_check(&self) -> BusHealth {
        let local_agents = self.agents.read().await.len();
        let queued_messages = self.queue_length().await;
        let links = self.links.lock().await;
        BusHealth {
            local_agents,
            remote_links: links.len(),
            connected_links: links.values().filter(|s| s.is_connected()).count(),
            queued_messages,
        }
    }

    /// Deliver a message that arrived from a remote link: to its addressee if
    /// local, otherwise to every local mailbox.
    pub(crate) async fn deliver_inbound(&self, link: &str, message: Message) {
        let to = message.to.clone();
        let from = message.from.clone().or_else(|| Some(link.to_string()));
        let kind = message.kind;

        let mut boxes = self.mailboxes.lock().await;
        if let Some((id, queue)) = to
            .as_deref()
            .and_then(|t| boxes.get_mut(t).map(|q| (t.to_string(), q)))
        {
            queue.push_back(message);
            drop(boxes);
            self.events
                .publish(HubEvent::MessageRouted { from, to: id, kind });
            return;
        }
        drop(boxes);

        let delivered = self.broadcast(message).await;
        debug!(link = %link, delivered, "Inbound message broadcast");
    }
}
