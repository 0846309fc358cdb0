use async_trait::async_trait;
use hivemind_core::{Error, LinkConfig, RemoteLink, Result, TransportKind};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::http::Fetcher;
use crate::rate::UsageStats;
use crate::{Frame, LinkContext, Transport, TransportEvent, TransportHandle};

/// Fetches the link URL on a fixed interval and turns each successful
/// response into inbound frames. Outbound frames are POSTed.
///
/// Fetch failures are counted, not fatal. Only when the consecutive failure
/// count exceeds the link's `failure_threshold` does the transport emit a
/// single `TransportEvent::Error` and stop polling.
pub struct PollTransport {
    fetcher: Arc<dyn Fetcher>,
}

impl PollTransport {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Transport for PollTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Poll
    }

    async fn open(&self, link: &RemoteLink, ctx: LinkContext) -> Result<Arc<dyn TransportHandle>> {
        if link.config.url.trim().is_empty() {
            return Err(Error::Connect {
                link: link.name.clone(),
                reason: "poll link has no URL".to_string(),
            });
        }

        let open = Arc::new(AtomicBool::new(true));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        tokio::spawn(run_poll_loop(
            link.name.clone(),
            link.config.clone(),
            self.fetcher.clone(),
            ctx.clone(),
            cancel_rx,
            open.clone(),
        ));

        info!(
            link = %link.name,
            interval_secs = link.config.poll_interval_secs,
            threshold = link.config.failure_threshold,
            "Poll link opened"
        );

        Ok(Arc::new(PollHandle {
            link: link.name.clone(),
            config: link.config.clone(),
            fetcher: self.fetcher.clone(),
            usage: ctx.usage,
            open,
            cancel_tx,
        }))
    }
}

struct PollHandle {
    link: String,
    config: LinkConfig,
    fetcher: Arc<dyn Fetcher>,
    usage: Arc<UsageStats>,
    open: Arc<AtomicBool>,
    cancel_tx: watch::Sender<bool>,
}

#[async_trait]
impl TransportHandle for PollHandle {
    async fn send(&self, frame: Frame) -> Result<()> {
        if !self.is_open() {
            return Err(Error::LinkClosed(self.link.clone()));
        }
        match self.fetcher.post(&self.link, &self.config, &frame).await {
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

async fn run_poll_loop(
    link: String,
    config: LinkConfig,
    fetcher: Arc<dyn Fetcher>,
    ctx: LinkContext,
    mut cancel_rx: watch::Receiver<bool>,
    open: Arc<AtomicBool>,
) {
    let period = Duration::from_secs(config.poll_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break;
                }
                continue;
            }
        }
        if *cancel_rx.borrow() {
            break;
        }

        match fetcher.fetch(&link, &config).await {
            Ok(body) => {
                consecutive_failures = 0;
                for text in synthesize_frames(&body) {
                    if !ctx.deliver(&link, text).await {
                        debug!(link = %link, "Event receiver gone, stopping poll loop");
                        return;
                    }
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                ctx.usage.record_poll_failure();
                warn!(
                    link = %link,
                    error = %e,
                    failures = consecutive_failures,
                    threshold = config.failure_threshold,
                    "Poll fetch failed"
                );
                if consecutive_failures > config.failure_threshold {
                    open.store(false, Ordering::SeqCst);
                    let _ = ctx
                        .events
                        .send(TransportEvent::Error {
                            link: link.clone(),
                            error: format!(
                                "{} consecutive poll failures, last: {}",
                                consecutive_failures, e
                            ),
                        })
                        .await;
                    return;
                }
            }
        }
    }

    open.store(false, Ordering::SeqCst);
    debug!(link = %link, "Poll loop stopped");
}

/// A JSON array body yields one frame per element; anything else is a single
/// frame. Blank bodies yield nothing.
fn synthesize_frames(body: &str) -> Vec<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items.iter().map(|v| v.to_string()).collect(),
        _ => vec![trimmed.to_string()],
    }
}
