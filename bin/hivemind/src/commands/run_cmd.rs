use hivemind_coordinator::AppContext;
use hivemind_core::{Config, EventKind, HubEvent, Paths};
use tracing::{info, warn};

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    paths.ensure_dirs()?;

    let ctx = AppContext::build(config, paths)?;
    ctx.start().await?;

    let mut events = ctx.coordinator.subscribe(&EventKind::PUBLIC);
    info!("Press Ctrl-C to stop");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(HubEvent::ServerError { link, error }) => {
                        warn!(link = %link, error = %error, "Link error");
                    }
                    Some(event) => {
                        info!(event = ?event.kind(), "{}", serde_json::to_string(&event)?);
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    ctx.shutdown().await;
    Ok(())
}
