//! ==============================================================================
//! main.rs - scale bridge entry point
//! ==============================================================================
//!
//! purpose:
//!     the always-on service between the weighing scale and the browsers.
//!     browsers cannot open raw tcp sockets (and mixed-content / cors rules
//!     get in the way), so this process holds the tcp link to the scale and
//!     republishes its weight over websocket and http.
//!
//! responsibilities:
//!     - load configuration (bridge.toml + environment overrides)
//!     - keep a tcp client connected to the scale, reconnecting on a fixed delay
//!     - push every decoded weight to websocket subscribers (port 3001)
//!     - answer http polls for the current weight (port 3002)
//!
//! relationships:
//!     - uses: bridge.rs (assembly), config.rs (settings), logging.rs
//!
//! ==============================================================================

use anyhow::{Context, Result};
use scale_bridge::{logging, Bridge, BridgeConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration
    let config = BridgeConfig::load_or_default();
    logging::init_logging(&config.logging.level);

    tracing::info!("===========================================================");
    tracing::info!("  Scale Communication Bridge");
    tracing::info!("  TCP scale -> WebSocket push + HTTP poll");
    tracing::info!("===========================================================");
    config.print_summary();

    // step 2: bind listeners
    let bridge = Bridge::bind(&config)
        .await
        .context("failed to start bridge listeners")?;

    // step 3: run until a listener fails or we are interrupted
    tokio::select! {
        result = bridge.run() => result.context("bridge stopped")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("[SHUTDOWN] interrupt received, exiting");
        }
    }
    Ok(())
}
