use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use hivemind_core::{Error, RemoteLink, Result, TransportKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::rate::UsageStats;
use crate::{Frame, LinkContext, Transport, TransportEvent, TransportHandle};

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Duplex WebSocket transport. `send` fails with `LinkClosed` once the socket
/// is no longer open.
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn open(&self, link: &RemoteLink, ctx: LinkContext) -> Result<Arc<dyn TransportHandle>> {
        let connect_err = |reason: String| Error::Connect {
            link: link.name.clone(),
            reason,
        };

        let parsed = url::Url::parse(&link.config.url).map_err(|e| connect_err(e.to_string()))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(connect_err(format!("unsupported scheme {}", parsed.scheme())));
        }

        let uri = link
            .config
            .url
            .parse::<tokio_tungstenite::tungstenite::http::Uri>()
            .map_err(|e| connect_err(format!("invalid URL: {}", e)))?;
        let mut request = tokio_tungstenite::tungstenite::http::Request::builder()
            .uri(uri)
            .header("Host", parsed.host_str().unwrap_or_default())
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            );
        for (k, v) in link.config.request_headers() {
            request = request.header(k.as_str(), v.as_str());
        }
        let request = request
            .body(())
            .map_err(|e| connect_err(format!("failed to build request: {}", e)))?;

        let (stream, _) = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| connect_err("timed out".to_string()))?
        .map_err(|e| connect_err(e.to_string()))?;

        let (write, read) = stream.split();
        let writer = Arc::new(Mutex::new(Some(write)));
        let open = Arc::new(AtomicBool::new(true));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        tokio::spawn(read_socket(
            link.name.clone(),
            read,
            ctx.clone(),
            cancel_rx,
            open.clone(),
            writer.clone(),
        ));
        info!(link = %link.name, "WebSocket link connected");

        Ok(Arc::new(WebSocketHandle {
            link: link.name.clone(),
            writer,
            usage: ctx.usage,
            open,
            cancel_tx,
        }))
    }
}

struct WebSocketHandle {
    link: String,
    writer: Arc<Mutex<Option<WsWriter>>>,
    usage: Arc<UsageStats>,
    open: Arc<AtomicBool>,
    cancel_tx: watch::Sender<bool>,
}

#[async_trait]
impl TransportHandle for WebSocketHandle {
    async fn send(&self, frame: Frame) -> Result<()> {
        if !self.is_open() {
            return Err(Error::LinkClosed(self.link.clone()));
        }
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::LinkClosed(self.link.clone()))?;

        let len = frame.len();
        match writer.send(WsMessage::Text(frame.text)).await {
            Ok(()) => {
                self.usage.record_sent(len);
                Ok(())
            }
            Err(e) => {
                self.usage.record_send_failure();
                Err(Error::Send {
                    link: self.link.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.cancel_tx.send(true);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.close().await;
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

async fn read_socket(
    link: String,
    mut read: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    ctx: LinkContext,
    mut cancel_rx: watch::Receiver<bool>,
    open: Arc<AtomicBool>,
    writer: Arc<Mutex<Option<WsWriter>>>,
) {
    let end = 'read: loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if !ctx.deliver(&link, text).await {
                            break 'read None;
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        if let Ok(text) = String::from_utf8(data) {
                            if !ctx.deliver(&link, text).await {
                                break 'read None;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!(link = %link, "WebSocket closed by server");
                        break Some(TransportEvent::Closed { link: link.clone() });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(link = %link, error = %e, "WebSocket error");
                        break Some(TransportEvent::Error {
                            link: link.clone(),
                            error: format!("WebSocket error: {}", e),
                        });
                    }
                }
            }
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    debug!(link = %link, "WebSocket reader cancelled");
                    break None;
                }
            }
        }
    };

    open.store(false, Ordering::SeqCst);
    writer.lock().await.take();
    if let Some(event) = end {
        let _ = ctx.events.send(event).await;
    }
}
