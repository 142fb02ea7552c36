//! ==============================================================================
//! scale-bridge - tcp weighing scale to browser bridge
//! ==============================================================================
//!
//! the scale only speaks ascii telegrams over a raw tcp socket, which a
//! browser cannot open. this crate holds both halves of the bridge:
//!
//!     - the bridge service: device link, weight store, websocket push hub,
//!       http poll endpoint (`bridge`, `device`, `store`, `hub`, `poll`)
//!     - the consumer side: a connection manager that prefers push, falls
//!       back to polling and tears down cleanly (`client`)
//!
//! ==============================================================================

pub mod bridge;
pub mod client;
pub mod config;
pub mod device;
pub mod domain;
pub mod error;
pub mod hub;
pub mod logging;
pub mod poll;
pub mod probe;
pub mod store;
pub mod telegram;

pub use bridge::Bridge;
pub use client::{ClientConnectionManager, ClientSettings, ClientState, ClientStatus, TransportKind};
pub use config::BridgeConfig;
pub use device::DeviceLink;
pub use domain::{ConnectionState, PollResponse, ProbeResponse, WeightMessage, WeightReading};
pub use error::{Error, Result};
pub use hub::{BroadcastHub, Subscriber};
pub use poll::PollEndpoint;
pub use store::WeightStore;
