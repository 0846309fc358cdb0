//! Remote link table and the per-link state machine:
//! `disconnected → connecting → {connected | error}`, `connected →
//! disconnected` on close, `connected → error` on a transport error.
use chrono::Utc;
use hivemind_core::{Error, HubEvent, LinkConfig, LinkStatus, RemoteLink, Result, TransportKind};
use hivemind_transport::{
    codec, Frame, LinkContext, RateTrack, TransportEvent, TransportHandle, UsageSnapshot,
    UsageStats,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::bus::MessageBus;

pub(crate) struct LinkSlot {
    pub(crate) link: RemoteLink,
    pub(crate) handle: Option<Arc<dyn TransportHandle>>,
    pub(crate) usage: Arc<UsageStats>,
    pub(crate) rate: Arc<RateTrack>,
}

impl LinkSlot {
    pub(crate) fn is_connected(&self) -> bool {
        self.link.status == LinkStatus::Connected
    }
}

/// What `send` needs from a slot, copied out so the table lock is released
/// before any I/O.
pub(crate) struct LinkTarget {
    handle: Option<Arc<dyn TransportHandle>>,
    rate: Arc<RateTrack>,
}

impl MessageBus {
    /// Add a link in `disconnected` state. A link that is live cannot be
    /// replaced; disconnect it first.
    pub async fn register_link(
        &self,
        name: &str,
        transport: TransportKind,
        config: LinkConfig,
    ) -> Result<()> {
        let mut links = self.links.lock().await;
        if let Some(slot) = links.get_mut(name) {
            if slot.handle.is_some() || slot.link.status == LinkStatus::Connecting {
                return Err(Error::Validation(format!(
                    "link {} is live; disconnect before re-registering",
                    name
                )));
            }
            slot.link = RemoteLink::new(name, transport, config);
        } else {
            links.insert(
                name.to_string(),
                LinkSlot {
                    link: RemoteLink::new(name, transport, config),
                    handle: None,
                    usage: Arc::new(UsageStats::default()),
                    rate: Arc::new(RateTrack::new(
                        self.transport_config.rate_burst,
                        self.transport_config.rate_per_second,
                    )?),
                },
            );
        }
        info!(link = %name, transport = %transport, "Link registered");
        Ok(())
    }

    /// Open the link's transport.
    ///
    /// Only one caller can move a link into `connecting`; concurrent callers
    /// get `AlreadyConnecting`. Connecting a connected link is a no-op.
    pub async fn connect(&self, name: &str) -> Result<()> {
        let (link, usage) = {
            let mut links = self.links.lock().await;
            let slot = links
                .get_mut(name)
                .ok_or_else(|| Error::NotFound(format!("link {}", name)))?;
            match slot.link.status {
                LinkStatus::Connecting => return Err(Error::AlreadyConnecting(name.to_string())),
                LinkStatus::Connected if slot.handle.is_some() => return Ok(()),
                _ => {}
            }
            slot.link.status = LinkStatus::Connecting;
            slot.link.last_error = None;
            (slot.link.clone(), slot.usage.clone())
        };

        debug!(link = %name, transport = %link.transport, "Connecting link");
        let opened = match self.transports.get(link.transport) {
            Some(transport) => {
                let ctx = LinkContext::new(self.inbound_tx.clone()).with_usage(usage);
                transport.open(&link, ctx).await
            }
            None => Err(Error::Connect {
                link: name.to_string(),
                reason: format!("no transport registered for {}", link.transport),
            }),
        };

        match opened {
            Ok(handle) => {
                let stale = {
                    let mut links = self.links.lock().await;
                    match links.get_mut(name) {
                        Some(slot) if slot.link.status == LinkStatus::Connecting => {
                            slot.link.status = LinkStatus::Connected;
                            slot.link.last_ping = Some(Utc::now());
                            slot.handle = Some(handle.clone());
                            false
                        }
                        _ => true,
                    }
                };
                if stale {
                    // Disconnected or removed while the transport was opening.
                    handle.close().await;
                    return Err(Error::LinkClosed(name.to_string()));
                }
                info!(link = %name, "Link connected");
                self.events.publish(HubEvent::ServerConnected {
                    link: name.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                self.mark_link_error(name, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Close the link and release its handle. Later sends fail with
    /// `LinkClosed`.
    pub async fn disconnect(&self, name: &str) -> Result<()> {
        let handle = {
            let mut links = self.links.lock().await;
            let slot = links
                .get_mut(name)
                .ok_or_else(|| Error::NotFound(format!("link {}", name)))?;
            slot.link.status = LinkStatus::Disconnected;
            slot.handle.take()
        };
        if let Some(handle) = handle {
            handle.close().await;
        }
        info!(link = %name, "Link disconnected");
        Ok(())
    }

    /// Disconnect and forget a link.
    pub async fn remove_link(&self, name: &str) -> Result<()> {
        self.disconnect(name).await?;
        self.links.lock().await.remove(name);
        Ok(())
    }

    /// Disconnect every link. Used on shutdown.
    pub async fn close_all(&self) {
        let names: Vec<String> = self.links.lock().await.keys().cloned().collect();
        for name in names {
            let _ = self.disconnect(&name).await;
        }
    }

    pub async fn link(&self, name: &str) -> Option<RemoteLink> {
        self.links.lock().await.get(name).map(|s| s.link.clone())
    }

    /// All links, ordered by name.
    pub async fn links(&self) -> Vec<RemoteLink> {
        let mut links: Vec<RemoteLink> = self
            .links
            .lock()
            .await
            .values()
            .map(|s| s.link.clone())
            .collect();
        links.sort_by(|a, b| a.name.cmp(&b.name));
        links
    }

    pub async fn usage(&self, name: &str) -> Option<UsageSnapshot> {
        self.links
            .lock()
            .await
            .get(name)
            .map(|s| s.usage.snapshot())
    }

    pub(crate) async fn link_target(&self, name: &str) -> Option<LinkTarget> {
        self.links.lock().await.get(name).map(|slot| LinkTarget {
            handle: slot.handle.clone(),
            rate: slot.rate.clone(),
        })
    }

    pub(crate) async fn send_to_link(&self, name: &str, target: LinkTarget, frame: Frame) -> Result<()> {
        let handle = target
            .handle
            .filter(|h| h.is_open())
            .ok_or_else(|| Error::LinkClosed(name.to_string()))?;

        target.rate.acquire().await;
        // The link may have closed while waiting for a token.
        if !handle.is_open() {
            return Err(Error::LinkClosed(name.to_string()));
        }
        match handle.send(frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(link = %name, error = %e, "Send on link failed");
                if !handle.is_open() {
                    self.mark_link_error(name, &e.to_string()).await;
                } else {
                    self.events.publish(HubEvent::ServerError {
                        link: name.to_string(),
                        error: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    async fn mark_link_error(&self, name: &str, reason: &str) {
        let handle = {
            let mut links = self.links.lock().await;
            match links.get_mut(name) {
                Some(slot) => {
                    slot.link.status = LinkStatus::Error;
                    slot.link.last_error = Some(reason.to_string());
                    slot.handle.take()
                }
                None => return,
            }
        };
        if let Some(handle) = handle {
            handle.close().await;
        }
        error!(link = %name, error = %reason, "Link error");
        self.events.publish(HubEvent::ServerError {
            link: name.to_string(),
            error: reason.to_string(),
        });
    }

    /// Apply one transport callback to the link table and mailboxes.
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Frame { link, frame } => {
                let live = {
                    let mut links = self.links.lock().await;
                    match links.get_mut(&link) {
                        Some(slot) if slot.is_connected() => {
                            slot.link.last_ping = Some(Utc::now());
                            true
                        }
                        _ => false,
                    }
                };
                if !live {
                    debug!(link = %link, "Dropping frame from inactive link");
                    return;
                }
                match codec::decode(&link, &frame) {
                    Ok(message) => self.deliver_inbound(&link, message).await,
                    Err(e) => warn!(link = %link, error = %e, "Undecodable inbound frame"),
                }
            }
            TransportEvent::Error { link, error } => {
                let connected = self
                    .links
                    .lock()
                    .await
                    .get(&link)
                    .map(|s| s.is_connected())
                    .unwrap_or(false);
                if connected {
                    self.mark_link_error(&link, &error).await;
                } else {
                    debug!(link = %link, error = %error, "Ignoring error from inactive link");
                }
            }
            TransportEvent::Closed { link } => {
                let handle = {
                    let mut links = self.links.lock().await;
                    match links.get_mut(&link) {
                        Some(slot) if slot.is_connected() => {
                            slot.link.status = LinkStatus::Disconnected;
                            slot.handle.take()
                        }
                        _ => None,
                    }
                };
                if let Some(handle) = handle {
                    handle.close().await;
                    info!(link = %link, "Link closed by remote");
                }
            }
        }
    }

    /// Pump transport callbacks until shutdown. Can only be started once.
    pub async fn run_inbound_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let rx = self.inbound_rx.lock().await.take();
        let Some(mut rx) = rx else {
            warn!("Inbound loop already running");
            return;
        };
        info!("Bus inbound loop started");

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => self.handle_transport_event(event).await,
                        None => break,
                    }
                }
                _ = shutdown.recv() => {
                    info!("Bus inbound loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hivemind_core::config::{BusConfig, TransportConfig};
    use hivemind_core::{Agent, AgentRole, EventHub, EventKind, Message, Payload};
    use hivemind_transport::{Fetcher, PollTransport, Transport, TransportRegistry};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Transport whose `open` blocks until released, to hold a link in
    /// `connecting`.
    struct GatedTransport {
        gate: Arc<Notify>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    struct RecordingHandle {
        open: AtomicBool,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl TransportHandle for RecordingHandle {
        async fn send(&self, frame: Frame) -> Result<()> {
            self.sent.lock().unwrap().push(frame.text);
            Ok(())
        }

        async fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for GatedTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Socket
        }

        async fn open(&self, _link: &RemoteLink, _ctx: LinkContext) -> Result<Arc<dyn TransportHandle>> {
            self.gate.notified().await;
            Ok(Arc::new(RecordingHandle {
                open: AtomicBool::new(true),
                sent: self.sent.clone(),
            }))
        }
    }

    struct FailingFetcher {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Fetcher for FailingFetcher {
        async fn fetch(&self, link: &str, _config: &LinkConfig) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Connect {
                link: link.to_string(),
                reason: "refused".to_string(),
            })
        }

        async fn post(&self, _link: &str, _config: &LinkConfig, _frame: &Frame) -> Result<()> {
            Ok(())
        }
    }

    fn bus_with(transport: Arc<dyn Transport>) -> Arc<MessageBus> {
        bus_with_config(transport, TransportConfig::default())
    }

    fn bus_with_config(transport: Arc<dyn Transport>, config: TransportConfig) -> Arc<MessageBus> {
        let mut registry = TransportRegistry::new();
        registry.register(transport);
        Arc::new(MessageBus::new(
            &BusConfig::default(),
            config,
            registry,
            Arc::new(EventHub::default()),
        ))
    }

    #[tokio::test]
    async fn test_concurrent_connect_rejected() {
        let gate = Arc::new(Notify::new());
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let bus = bus_with(Arc::new(GatedTransport {
            gate: gate.clone(),
            sent: sent.clone(),
        }));
        bus.register_link("remote", TransportKind::Socket, LinkConfig::new("ws://x"))
            .await
            .unwrap();

        let first = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.connect("remote").await })
        };
        while bus.link("remote").await.unwrap().status != LinkStatus::Connecting {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            bus.connect("remote").await,
            Err(Error::AlreadyConnecting(ref n)) if n == "remote"
        ));

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(bus.link("remote").await.unwrap().status, LinkStatus::Connected);

        // Already connected: no second handle.
        bus.connect("remote").await.unwrap();
        assert_eq!(bus.health_check().await.connected_links, 1);
    }

    #[tokio::test]
    async fn test_send_to_remote_and_after_close() {
        let gate = Arc::new(Notify::new());
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let bus = bus_with(Arc::new(GatedTransport {
            gate: gate.clone(),
            sent: sent.clone(),
        }));
        let mut connected = bus.events().subscribe(&[EventKind::ServerConnected]);
        bus.register_link("remote", TransportKind::Socket, LinkConfig::new("ws://x"))
            .await
            .unwrap();
        gate.notify_one();
        bus.connect("remote").await.unwrap();
        assert!(connected.try_recv().is_some());

        bus.send("remote", Message::notification("ping", Payload::Empty))
            .await
            .unwrap();
        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(bus.queue_length().await, 0);

        bus.disconnect("remote").await.unwrap();
        assert!(matches!(
            bus.send("remote", Message::notification("ping", Payload::Empty))
                .await,
            Err(Error::LinkClosed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_while_throttled_fails_fast() {
        let gate = Arc::new(Notify::new());
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let config = TransportConfig {
            rate_burst: 1,
            rate_per_second: 0.5,
            ..TransportConfig::default()
        };
        let bus = bus_with_config(
            Arc::new(GatedTransport {
                gate: gate.clone(),
                sent: sent.clone(),
            }),
            config,
        );
        bus.register_link("remote", TransportKind::Socket, LinkConfig::new("ws://x"))
            .await
            .unwrap();
        gate.notify_one();
        bus.connect("remote").await.unwrap();

        bus.send("remote", Message::notification("ping", Payload::Empty))
            .await
            .unwrap();
        // The bucket is empty: the next send waits about two seconds.
        let throttled = {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.send("remote", Message::notification("ping", Payload::Empty))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        bus.disconnect("remote").await.unwrap();

        assert!(matches!(
            throttled.await.unwrap(),
            Err(Error::LinkClosed(_))
        ));
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_positive_rate_is_rejected_at_registration() {
        let config = TransportConfig {
            rate_per_second: 0.0,
            ..TransportConfig::default()
        };
        let bus = bus_with_config(
            Arc::new(GatedTransport {
                gate: Arc::new(Notify::new()),
                sent: Arc::new(StdMutex::new(Vec::new())),
            }),
            config,
        );
        assert!(matches!(
            bus.register_link("remote", TransportKind::Socket, LinkConfig::new("ws://x"))
                .await,
            Err(Error::Validation(_))
        ));
        assert!(bus.link("remote").await.is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_sets_error_status() {
        let bus = Arc::new(MessageBus::new(
            &BusConfig::default(),
            TransportConfig::default(),
            TransportRegistry::new(),
            Arc::new(EventHub::default()),
        ));
        let mut errors = bus.events().subscribe(&[EventKind::ServerError]);
        bus.register_link("remote", TransportKind::Poll, LinkConfig::new("http://x"))
            .await
            .unwrap();

        assert!(matches!(bus.connect("remote").await, Err(Error::Connect { .. })));
        let link = bus.link("remote").await.unwrap();
        assert_eq!(link.status, LinkStatus::Error);
        assert!(link.last_error.is_some());
        assert_eq!(errors.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_inbound_frame_delivered_to_addressee() {
        let gate = Arc::new(Notify::new());
        let bus = bus_with(Arc::new(GatedTransport {
            gate: gate.clone(),
            sent: Arc::new(StdMutex::new(Vec::new())),
        }));
        bus.register_agent(Agent::new("a1", "A", AgentRole::Junior)).await;
        bus.register_agent(Agent::new("a2", "B", AgentRole::Junior)).await;
        bus.register_link("remote", TransportKind::Socket, LinkConfig::new("ws://x"))
            .await
            .unwrap();
        gate.notify_one();
        bus.connect("remote").await.unwrap();

        let direct = Message::notification("direct", Payload::Empty).with_to("a2");
        bus.handle_transport_event(TransportEvent::Frame {
            link: "remote".to_string(),
            frame: codec::encode(&direct).unwrap(),
        })
        .await;
        let broadcast = Message::notification("everyone", Payload::Empty);
        bus.handle_transport_event(TransportEvent::Frame {
            link: "remote".to_string(),
            frame: codec::encode(&broadcast).unwrap(),
        })
        .await;

        assert_eq!(bus.drain("a1").await.len(), 1);
        let a2: Vec<String> = bus.drain("a2").await.into_iter().map(|m| m.method).collect();
        assert_eq!(a2, vec!["direct", "everyone"]);
        let received = bus.receive("a1").await;
        assert!(received.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failures_move_link_to_error_once() {
        let fetcher = Arc::new(FailingFetcher {
            calls: AtomicU32::new(0),
        });
        let bus = bus_with(Arc::new(PollTransport::new(fetcher.clone())));
        let mut errors = bus.events().subscribe(&[EventKind::ServerError]);
        let (shutdown_tx, _) = broadcast::channel(1);
        tokio::spawn(bus.clone().run_inbound_loop(shutdown_tx.subscribe()));

        let mut config = LinkConfig::new("http://127.0.0.1:9/poll");
        config.failure_threshold = 5;
        bus.register_link("remote", TransportKind::Poll, config)
            .await
            .unwrap();
        bus.connect("remote").await.unwrap();

        // Five failures (t = 0, 5, 10, 15, 20) stay within the threshold.
        tokio::time::sleep(Duration::from_secs(22)).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 5);
        assert_eq!(bus.link("remote").await.unwrap().status, LinkStatus::Connected);
        assert!(errors.try_recv().is_none());

        // The sixth exceeds it.
        let event = errors.recv().await.unwrap();
        assert!(matches!(event, HubEvent::ServerError { ref link, .. } if link == "remote"));
        assert_eq!(bus.link("remote").await.unwrap().status, LinkStatus::Error);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(errors.try_recv().is_none());
        assert_eq!(bus.usage("remote").await.unwrap().poll_failures, 6);
        let _ = shutdown_tx.send(());
    }
}
