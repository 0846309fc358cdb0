use hivemind_core::config::TransportConfig;
use hivemind_core::TransportKind;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::http::{Fetcher, HttpFetcher};
use crate::poll::PollTransport;
use crate::Transport;

/// Maps each transport kind to the implementation that opens it.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: HashMap<TransportKind, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in HTTP/SSE/WebSocket implementations.
    pub fn with_defaults(config: &TransportConfig) -> Self {
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(Duration::from_secs(
            config.request_timeout_secs,
        )));
        let mut registry = Self::new();
        registry.register(Arc::new(PollTransport::new(fetcher.clone())));

        #[cfg(feature = "sse")]
        registry.register(Arc::new(crate::sse::SseTransport::new(
            Duration::from_secs(config.connect_timeout_secs),
            fetcher.clone(),
        )));

        #[cfg(feature = "websocket")]
        registry.register(Arc::new(crate::websocket::WebSocketTransport::new(
            Duration::from_secs(config.connect_timeout_secs),
        )));

        registry
    }

    /// Register or replace the implementation for its kind.
    pub fn register(&mut self, transport: Arc<dyn Transport>) {
        self.transports.insert(transport.kind(), transport);
    }

    pub fn get(&self, kind: TransportKind) -> Option<Arc<dyn Transport>> {
        self.transports.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<TransportKind> {
        self.transports.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_kind() {
        let registry = TransportRegistry::with_defaults(&TransportConfig::default());
        assert!(registry.get(TransportKind::Poll).is_some());
        assert!(registry.get(TransportKind::StreamPush).is_some());
        assert!(registry.get(TransportKind::Socket).is_some());
    }

    #[test]
    fn test_empty_registry() {
        let registry = TransportRegistry::new();
        assert!(registry.get(TransportKind::Poll).is_none());
        assert!(registry.kinds().is_empty());
    }
}
