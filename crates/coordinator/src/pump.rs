use hivemind_core::{EventHub, EventKind, EventSubscription, HubEvent};
use hivemind_learning::LearningCore;
use tokio::sync::broadcast;
use tracing::info;

/// Feeds bus events into the learning core, so neither has to know about
/// the other: routed messages become pathway traversals and registered
/// agents become candidates for ingested knowledge.
pub struct EventPump {
    learning: LearningCore,
    subscription: EventSubscription,
}

impl EventPump {
    pub fn new(events: &EventHub, learning: LearningCore) -> Self {
        let subscription = events.subscribe(&[EventKind::MessageRouted, EventKind::AgentRegistered]);
        Self {
            learning,
            subscription,
        }
    }

    pub async fn handle(&self, event: HubEvent) {
        match event {
            HubEvent::MessageRouted {
                from: Some(from),
                to,
                kind,
            } => {
                self.learning
                    .record_interaction(&from, &to, &kind.to_string())
                    .await;
            }
            HubEvent::AgentRegistered { agent_id, .. } => {
                self.learning.register_agent(&agent_id).await;
            }
            _ => {}
        }
    }

    /// Handle everything already queued. Returns how many events were seen.
    pub async fn drain(&mut self) -> usize {
        let events = self.subscription.drain();
        let count = events.len();
        for event in events {
            self.handle(event).await;
        }
        count
    }

    pub async fn run_loop(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Event pump started");
        loop {
            tokio::select! {
                event = self.subscription.recv() => {
                    match event {
                        Some(event) => self.handle(event).await,
                        None => break,
                    }
                }
                _ = shutdown.recv() => {
                    // Catch up before stopping so a final save sees every event.
                    self.drain().await;
                    info!("Event pump shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivemind_bus::MessageBus;
    use hivemind_core::config::{BusConfig, LearningConfig, TransportConfig};
    use hivemind_core::{Agent, AgentRole, Message, Payload};
    use hivemind_transport::TransportRegistry;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_routed_messages_become_pathways() {
        let events = Arc::new(EventHub::default());
        let bus = MessageBus::new(
            &BusConfig::default(),
            TransportConfig::default(),
            TransportRegistry::new(),
            events.clone(),
        );
        let learning = LearningCore::new(LearningConfig::default(), events.clone());
        let mut pump = EventPump::new(&events, learning.clone());

        bus.register_agent(Agent::new("senior-1", "Senior", AgentRole::Senior))
            .await;
        bus.register_agent(Agent::new("junior-1", "Junior", AgentRole::Junior))
            .await;
        for _ in 0..3 {
            let msg = Message::notification("review.request", Payload::Empty).with_from("senior-1");
            bus.send("junior-1", msg).await.unwrap();
        }
        // No sender: nothing to traverse.
        bus.send("junior-1", Message::notification("ping", Payload::Empty))
            .await
            .unwrap();

        assert_eq!(pump.drain().await, 6);
        let pathways = learning.pathways().await;
        assert_eq!(pathways.len(), 1);
        assert_eq!(pathways[0].frequency, 3);
        assert_eq!(pathways[0].purpose, "notification");
        assert_eq!(learning.known_agents().await.len(), 2);
    }
}
