//! headless consumer of the bridge.
//!
//! runs a connection manager against the bridge and logs every status or
//! weight change. useful on the weighing-station pc to check the bridge is
//! reachable before opening the form.
//!
//! settings come from `$SCALE_CLIENT_SETTINGS` (default `scale-client.json`);
//! with `--test` it performs one connection test and exits.

use anyhow::{Context, Result};
use scale_bridge::client::{self, ClientConnectionManager, ClientSettings};
use scale_bridge::logging;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging("info");

    let path = std::env::var("SCALE_CLIENT_SETTINGS")
        .unwrap_or_else(|_| "scale-client.json".to_string());
    let settings = ClientSettings::load_or_default(&path);
    tracing::info!(
        "[MONITOR] bridge at {} / {} (settings: {})",
        settings.push_url(),
        settings.poll_url(),
        path
    );

    if std::env::args().any(|a| a == "--test") {
        let reading = client::test_connection(&settings)
            .await
            .context("connection test failed")?;
        tracing::info!("[MONITOR] OK: {} kg (last update {})", reading.weight, reading.last_update);
        return Ok(());
    }

    let manager = ClientConnectionManager::new(settings);
    let mut updates = manager.watch();
    manager.connect();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = updates.borrow_and_update().clone();
                match &status.message {
                    Some(message) => tracing::warn!(
                        "[MONITOR] {:?}/{:?}: {}", status.state, status.transport, message
                    ),
                    None => tracing::info!(
                        "[MONITOR] {:?}/{:?} weight={} kg", status.state, status.transport, status.weight
                    ),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.disconnect();
    Ok(())
}
