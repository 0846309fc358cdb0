use async_trait::async_trait;
use hivemind_core::{Error, LinkConfig, RemoteLink, Result, TransportKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::http::Fetcher;
use crate::rate::UsageStats;
use crate::{Frame, LinkContext, Transport, TransportEvent, TransportHandle};

/// Server-sent events transport.
///
/// The event stream is receive-only. Outbound frames do not travel on it:
/// they are POSTed to the link's request channel (`outbound_url`, falling
/// back to `url`) through the injected [`Fetcher`].
pub struct SseTransport {
    client: reqwest::Client,
    connect_timeout: Duration,
    requests: Arc<dyn Fetcher>,
}

impl SseTransport {
    pub fn new(connect_timeout: Duration, requests: Arc<dyn Fetcher>) -> Self {
        Self {
            client: reqwest::Client::new(),
            connect_timeout,
            requests,
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamPush
    }

    async fn open(&self, link: &RemoteLink, ctx: LinkContext) -> Result<Arc<dyn TransportHandle>> {
        let connect_err = |reason: String| Error::Connect {
            link: link.name.clone(),
            reason,
        };

        let mut req = self
            .client
            .get(&link.config.url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache");
        for (k, v) in link.config.request_headers() {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = tokio::time::timeout(self.connect_timeout, req.send())
            .await
            .map_err(|_| connect_err("timed out".to_string()))?
            .map_err(|e| connect_err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(connect_err(format!("HTTP {}", response.status())));
        }

        let open = Arc::new(AtomicBool::new(true));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        tokio::spawn(read_event_stream(
            link.name.clone(),
            response,
            ctx.clone(),
            cancel_rx,
            open.clone(),
        ));
        info!(link = %link.name, "SSE link connected");

        Ok(Arc::new(SseHandle {
            link: link.name.clone(),
            config: link.config.clone(),
            requests: self.requests.clone(),
            usage: ctx.usage,
            open,
            cancel_tx,
        }))
    }
}

struct SseHandle {
    link: String,
    config: LinkConfig,
    requests: Arc<dyn Fetcher>,
    usage: Arc<UsageStats>,
    open: Arc<AtomicBool>,
    cancel_tx: watch::Sender<bool>,
}

#[async_trait]
impl TransportHandle for SseHandle {
    async fn send(&self, frame: Frame) -> Result<()> {
        if !self.is_open() {
            return Err(Error::LinkClosed(self.link.clone()));
        }
        match self.requests.post(&self.link, &self.config, &frame).await {
            Ok(()) => {
                self.usage.record_sent(frame.len());
                Ok(())
            }
            Err(e) => {
                self.usage.record_send_failure();
                Err(e)
            }
        }
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.cancel_tx.send(true);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

async fn read_event_stream(
    link: String,
    mut response: reqwest::Response,
    ctx: LinkContext,
    mut cancel_rx: watch::Receiver<bool>,
    open: Arc<AtomicBool>,
) {
    let mut parser = EventParser::default();

    let end = 'read: loop {
        tokio::select! {
            chunk = response.chunk() => {
                match chunk {
                    Ok(Some(bytes)) => {
                        for data in parser.push(&bytes) {
                            if !ctx.deliver(&link, data).await {
                                break 'read None;
                            }
                        }
                    }
                    Ok(None) => {
                        info!(link = %link, "SSE stream ended by server");
                        break Some(TransportEvent::Closed { link: link.clone() });
                    }
                    Err(e) => {
                        warn!(link = %link, error = %e, "SSE stream error");
                        break Some(TransportEvent::Error {
                            link: link.clone(),
                            error: format!("SSE error: {}", e),
                        });
                    }
                }
            }
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    debug!(link = %link, "SSE stream cancelled");
                    break None;
                }
            }
        }
    };

    open.store(false, Ordering::SeqCst);
    if let Some(event) = end {
        let _ = ctx.events.send(event).await;
    }
}

/// Incremental `text/event-stream` parser. Only `data:` fields matter;
/// multi-line data is joined with `\n` and a blank line ends an event.
///
/// Chunks are buffered as raw bytes and decoded one complete line at a
/// time, so a character split across chunks arrives intact.
#[derive(Default)]
struct EventParser {
    partial_line: Vec<u8>,
    event_data: String,
}

impl EventParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial_line.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.partial_line.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.partial_line.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw[..pos]);
            let line = text.trim_end_matches('\r');

            if line.is_empty() {
                if !self.event_data.is_empty() {
                    events.push(self.event_data.trim().to_string());
                    self.event_data.clear();
                }
            } else if let Some(data) = line.strip_prefix("data:") {
                if !self.event_data.is_empty() {
                    self.event_data.push('\n');
                }
                self.event_data.push_str(data.strip_prefix(' ').unwrap_or(data));
            }
        }
        events
    }
}
