use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::message::MessageKind;
use crate::types::AgentRole;

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentRegistered,
    ServerConnected,
    ServerError,
    TaskCompleted,
    TaskFailed,
    CapabilityMastered,
    EmergentBehavior,
    LearningShared,
    /// Internal: a message was delivered between two endpoints.
    MessageRouted,
}

impl EventKind {
    /// Kinds exposed to outside collaborators.
    pub const PUBLIC: [EventKind; 8] = [
        EventKind::AgentRegistered,
        EventKind::ServerConnected,
        EventKind::ServerError,
        EventKind::TaskCompleted,
        EventKind::TaskFailed,
        EventKind::CapabilityMastered,
        EventKind::EmergentBehavior,
        EventKind::LearningShared,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HubEvent {
    AgentRegistered {
        agent_id: String,
        role: AgentRole,
    },
    ServerConnected {
        link: String,
    },
    ServerError {
        link: String,
        error: String,
    },
    TaskCompleted {
        task_id: String,
        agent_id: String,
        role: AgentRole,
    },
    TaskFailed {
        task_id: String,
        agent_id: Option<String>,
        role: AgentRole,
        error: String,
    },
    CapabilityMastered {
        agent_id: String,
        capability: String,
        attempts: u32,
    },
    EmergentBehavior {
        from: String,
        to: String,
        frequency: u64,
        description: String,
    },
    LearningShared {
        from_agent: String,
        topic: String,
    },
    MessageRouted {
        from: Option<String>,
        to: String,
        kind: MessageKind,
    },
}

impl HubEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            HubEvent::AgentRegistered { .. } => EventKind::AgentRegistered,
            HubEvent::ServerConnected { .. } => EventKind::ServerConnected,
            HubEvent::ServerError { .. } => EventKind::ServerError,
            HubEvent::TaskCompleted { .. } => EventKind::TaskCompleted,
            HubEvent::TaskFailed { .. } => EventKind::TaskFailed,
            HubEvent::CapabilityMastered { .. } => EventKind::CapabilityMastered,
            HubEvent::EmergentBehavior { .. } => EventKind::EmergentBehavior,
            HubEvent::LearningShared { .. } => EventKind::LearningShared,
            HubEvent::MessageRouted { .. } => EventKind::MessageRouted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// Receiving side of a subscription. Dropping it is equivalent to
/// unsubscribing; the hub prunes closed queues on the next publish.
#[derive(Debug)]
pub struct EventSubscription {
    pub id: SubscriptionId,
    rx: mpsc::Receiver<HubEvent>,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> Option<HubEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<HubEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything currently queued, without waiting.
    pub fn drain(&mut self) -> Vec<HubEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }
}

#[derive(Default)]
struct Registry {
    by_kind: HashMap<EventKind, Vec<SubscriptionId>>,
    senders: HashMap<SubscriptionId, mpsc::Sender<HubEvent>>,
}

impl Registry {
    fn remove(&mut self, id: SubscriptionId) -> bool {
        for ids in self.by_kind.values_mut() {
            ids.retain(|s| *s != id);
        }
        self.by_kind.retain(|_, ids| !ids.is_empty());
        self.senders.remove(&id).is_some()
    }
}

/// Typed publish/subscribe registry: event kind → subscriber handles, each
/// backed by a bounded queue. A full queue drops the event for that
/// subscriber only.
pub struct EventHub {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    capacity: usize,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to the given kinds. An empty slice subscribes to every kind.
    pub fn subscribe(&self, kinds: &[EventKind]) -> EventSubscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);

        let wanted: HashSet<EventKind> = if kinds.is_empty() {
            EventKind::PUBLIC
                .iter()
                .copied()
                .chain(std::iter::once(EventKind::MessageRouted))
                .collect()
        } else {
            kinds.iter().copied().collect()
        };

        if let Ok(mut reg) = self.registry.lock() {
            for kind in wanted {
                reg.by_kind.entry(kind).or_default().push(id);
            }
            reg.senders.insert(id, tx);
        }
        debug!(subscription = id.0, "Event subscriber added");
        EventSubscription { id, rx }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.registry.lock() {
            Ok(mut reg) => reg.remove(id),
            Err(_) => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .lock()
            .map(|reg| reg.senders.len())
            .unwrap_or(0)
    }

    pub fn publish(&self, event: HubEvent) {
        let kind = event.kind();
        let targets: Vec<(SubscriptionId, mpsc::Sender<HubEvent>)> = match self.registry.lock() {
            Ok(reg) => reg
                .by_kind
                .get(&kind)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| reg.senders.get(id).map(|tx| (*id, tx.clone())))
                        .collect()
                })
                .unwrap_or_default(),
            Err(_) => return,
        };

        let mut closed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscription = id.0, event = ?kind, "Subscriber queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            if let Ok(mut reg) = self.registry.lock() {
                for id in closed {
                    reg.remove(id);
                }
            }
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(topic: &str) -> HubEvent {
        HubEvent::LearningShared {
            from_agent: "a".to_string(),
            topic: topic.to_string(),
        }
    }

    #[test]
    fn test_delivers_only_subscribed_kinds() {
        let hub = EventHub::default();
        let mut learning = hub.subscribe(&[EventKind::LearningShared]);
        let mut errors = hub.subscribe(&[EventKind::ServerError]);

        hub.publish(shared("rust"));

        assert_eq!(learning.try_recv(), Some(shared("rust")));
        assert!(errors.try_recv().is_none());
    }

    #[test]
    fn test_full_queue_drops_for_that_subscriber() {
        let hub = EventHub::new(1);
        let mut slow = hub.subscribe(&[EventKind::LearningShared]);
        hub.publish(shared("one"));
        hub.publish(shared("two"));
        assert_eq!(slow.drain(), vec![shared("one")]);
    }

    #[test]
    fn test_unsubscribe_and_closed_pruning() {
        let hub = EventHub::default();
        let sub = hub.subscribe(&[]);
        let dropped = hub.subscribe(&[EventKind::ServerConnected]);
        assert_eq!(hub.subscriber_count(), 2);

        assert!(hub.unsubscribe(sub.id));
        assert!(!hub.unsubscribe(sub.id));

        drop(dropped);
        hub.publish(HubEvent::ServerConnected {
            link: "remote".to_string(),
        });
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_fifo_per_subscriber() {
        let hub = EventHub::default();
        let mut sub = hub.subscribe(&[]);
        for topic in ["a", "b", "c"] {
            hub.publish(shared(topic));
        }
        let topics: Vec<String> = sub
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                HubEvent::LearningShared { topic, .. } => Some(topic),
                _ => None,
            })
            .collect();
        assert_eq!(topics, vec!["a", "b", "c"]);
    }
}
