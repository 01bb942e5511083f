//! ride-feed entry point.
//!
//! Connects to the configured feed, relays every message into a
//! [`LatestMessage`] observable and logs each update until Ctrl-C.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use ride_feed::{FeedConfig, LatestMessage, SocketController, spawn_relay};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = FeedConfig::from_env()?;
    tracing::info!(endpoint = %config.endpoint, "starting ride-feed");

    let controller = SocketController::from_config(&config)?;
    let latest = Arc::new(LatestMessage::new());
    let mut updates = latest.subscribe();
    let relay = spawn_relay(controller, Arc::clone(&latest));

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(message) = updates.borrow_and_update().as_ref() {
                    tracing::info!(
                        kind = message.type_str(),
                        count = latest.published_count(),
                        ?message,
                        "feed update"
                    );
                }
            }
            () = relay.finished() => {
                tracing::warn!("feed ended; no reconnect is attempted");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received");
                break;
            }
        }
    }

    let exit = relay.shutdown().await;
    tracing::info!(?exit, "ride-feed stopped");
    Ok(())
}
