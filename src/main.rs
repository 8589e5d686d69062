//! Real-time feed multiplexer demo binary
//!
//! Connects to the providers configured in config.toml, subscribes to the
//! topics given on the command line, and prints every push until Ctrl-C.
//!
//! Usage: feed-mux <topic> [<topic>...]
//! Topic format: provider.channel.instrument

use anyhow::Context;
use feed_mux::infrastructure::{init_logging, Config};
use feed_mux::{ConnectionManager, Params};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guards = init_logging();

    let config = Config::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let topics: Vec<String> = std::env::args().skip(1).collect();
    if topics.is_empty() {
        anyhow::bail!("usage: feed-mux <provider.channel.instrument> [...]");
    }

    let manager = ConnectionManager::new(config);

    let mut handles = Vec::new();
    for topic in &topics {
        let handle = manager
            .subscribe(
                topic,
                |event| {
                    tracing::info!(topic = %event.topic, payload = %event.payload, "push");
                },
                Params::new(),
            )
            .with_context(|| format!("failed to subscribe to {}", topic))?;
        tracing::info!(topic = %topic, "subscribed");
        handles.push(handle);
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");

    for handle in &handles {
        manager.unsubscribe(handle);
    }
    manager.shutdown();

    Ok(())
}
