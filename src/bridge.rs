//! ==============================================================================
//! bridge.rs - wires the bridge process together
//! ==============================================================================
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                         bridge process                        │
//!     │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐  │
//!     │  │ device link │    │ weight store│ <──│ poll listener    │  │
//!     │  │ (tcp client)│    └─────────────┘    │ (http, port 3002)│  │
//!     │  └──────┬──────┘           ^           └──────────────────┘  │
//!     │         │ publish          │ set / prime                     │
//!     │         v                  │                                 │
//!     │  ┌──────────────────────────┴───┐                            │
//!     │  │ broadcast hub (ws, port 3001)│                            │
//!     │  └──────────────────────────────┘                            │
//!     └──────────────────────────────────────────────────────────────┘
//!
//!     the three network roles run as independent tasks: a stalled scale
//!     connection never holds up websocket delivery or http responses.
//!
//! ==============================================================================

use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::config::BridgeConfig;
use crate::device::DeviceLink;
use crate::error::Result;
use crate::hub::{push_router, BroadcastHub};
use crate::poll::{poll_router, PollEndpoint, PollState};
use crate::store::WeightStore;

/// a bound, not yet running bridge
pub struct Bridge {
    store: WeightStore,
    hub: BroadcastHub,
    link: DeviceLink,
    poll_state: PollState,
    push_listener: TcpListener,
    poll_listener: TcpListener,
}

impl Bridge {
    /// build components and bind both listeners
    ///
    /// port 0 binds an ephemeral port; read it back with `push_addr` / `poll_addr`.
    pub async fn bind(config: &BridgeConfig) -> Result<Self> {
        config.validate()?;

        let store = WeightStore::new();
        let hub = BroadcastHub::new(store.clone());
        let link = DeviceLink::new(&config.device, &config.logging, hub.clone());

        let bind = config.server.bind_address.as_str();
        let push_listener = TcpListener::bind((bind, config.server.ws_port)).await?;
        let poll_listener = TcpListener::bind((bind, config.server.http_port)).await?;

        let poll_state = PollState {
            endpoint: PollEndpoint::new(store.clone()),
            link: link.clone(),
            hub: hub.clone(),
            probe: config.probe.clone(),
            http: reqwest::Client::new(),
        };

        Ok(Self {
            store,
            hub,
            link,
            poll_state,
            push_listener,
            poll_listener,
        })
    }

    pub fn push_addr(&self) -> Result<SocketAddr> {
        Ok(self.push_listener.local_addr()?)
    }

    pub fn poll_addr(&self) -> Result<SocketAddr> {
        Ok(self.poll_listener.local_addr()?)
    }

    pub fn store(&self) -> &WeightStore {
        &self.store
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn link(&self) -> &DeviceLink {
        &self.link
    }

    /// start the device link and serve both listeners until one fails
    pub async fn run(self) -> Result<()> {
        if let Ok(addr) = self.push_listener.local_addr() {
            tracing::info!("[STARTUP] WebSocket server started on ws://{}", addr);
        }
        if let Ok(addr) = self.poll_listener.local_addr() {
            tracing::info!("[STARTUP] HTTP fallback server started on http://{}", addr);
        }

        self.link.connect();

        let push = axum::serve(self.push_listener, push_router(self.hub.clone()));
        let poll = axum::serve(self.poll_listener, poll_router(self.poll_state));
        let result = tokio::try_join!(
            async { push.await },
            async { poll.await },
        );

        self.link.shutdown();
        result.map(|_| ()).map_err(Into::into)
    }
}
