//! Uniform interface over the wire-level link kinds (push stream, duplex
//! socket, periodic poll).
//!
//! A transport opens a [`TransportHandle`] for a [`RemoteLink`]. Inbound
//! frames and state changes are delivered on the `events` channel handed to
//! `open`; outbound frames go through `handle.send`. Transports never
//! reconnect on their own: the bus decides retry policy.

pub mod codec;
pub mod http;
pub mod poll;
pub mod rate;
pub mod registry;

#[cfg(feature = "sse")]
pub mod sse;

#[cfg(feature = "websocket")]
pub mod websocket;

use async_trait::async_trait;
use hivemind_core::{RemoteLink, Result, TransportKind};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use codec::{decode, encode};
pub use http::{Fetcher, HttpFetcher};
pub use poll::PollTransport;
pub use rate::{RateTrack, UsageSnapshot, UsageStats};
pub use registry::TransportRegistry;

/// One serialized message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub text: String,
}

impl Frame {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame { link: String, frame: Frame },
    /// The link failed. The transport has stopped reading.
    Error { link: String, error: String },
    /// The remote side ended the stream.
    Closed { link: String },
}

impl TransportEvent {
    pub fn link(&self) -> &str {
        match self {
            TransportEvent::Frame { link, .. }
            | TransportEvent::Error { link, .. }
            | TransportEvent::Closed { link } => link,
        }
    }
}

/// Everything a transport needs besides the link description.
#[derive(Clone)]
pub struct LinkContext {
    pub events: mpsc::Sender<TransportEvent>,
    pub usage: Arc<UsageStats>,
}

impl LinkContext {
    pub fn new(events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            events,
            usage: Arc::new(UsageStats::default()),
        }
    }

    pub fn with_usage(mut self, usage: Arc<UsageStats>) -> Self {
        self.usage = usage;
        self
    }

    /// Forward an inbound frame. Returns false once the receiver is gone.
    pub(crate) async fn deliver(&self, link: &str, text: String) -> bool {
        self.usage.record_received(text.len());
        self.events
            .send(TransportEvent::Frame {
                link: link.to_string(),
                frame: Frame::new(text),
            })
            .await
            .is_ok()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Open the link. Fails with `Error::Connect` when the remote cannot be
    /// reached.
    async fn open(&self, link: &RemoteLink, ctx: LinkContext) -> Result<Arc<dyn TransportHandle>>;
}

/// A live link. `send` fails with `Error::LinkClosed` after `close`.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    async fn send(&self, frame: Frame) -> Result<()>;

    /// Stop background readers/timers and release the connection.
    async fn close(&self);

    fn is_open(&self) -> bool;
}
