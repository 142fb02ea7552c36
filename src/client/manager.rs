//! ==============================================================================
//! manager.rs - consumer-side connection manager
//! ==============================================================================
//!
//! purpose:
//!     keeps one consumer (a browser tab, a kiosk, the monitor binary) fed with
//!     the current weight. it prefers the websocket push transport and falls
//!     back to http polling when push cannot be established.
//!
//! state machine:
//!
//!                 connect()
//!     disconnected ─────────> connecting ──(ws open)──────────> connected/push
//!          ^                      │  ^                               │
//!          │                      │  └──────(ws dropped)─────────────┘
//!          │            attempts exhausted
//!          │                      v
//!          │               connected/poll ──(poll fails)──> error
//!          │                                                   │
//!          └────────── disconnect() from anywhere              │
//!                      connect() from error re-enters connecting
//!
//! teardown:
//!     every session is tagged with a generation. disconnect() first bumps the
//!     generation (so nothing the old session does afterwards counts), then
//!     aborts the session task (which closes its socket and drops its timer).
//!     each state write and each network call checks the generation under the
//!     manager lock, so a callback already in flight at teardown is a no-op.
//!
//! ==============================================================================

use std::path::Path;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::settings::ClientSettings;
use super::fetch_weight;
use crate::domain::WeightMessage;
use crate::error::Result;

type PushStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    None,
    Push,
    Poll,
}

/// what the ui renders: status light plus the last delivered weight
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStatus {
    pub state: ClientState,
    pub transport: TransportKind,
    pub weight: f64,
    /// human-readable reason when `state` is `Error`
    pub message: Option<String>,
}

impl Default for ClientStatus {
    fn default() -> Self {
        Self {
            state: ClientState::Disconnected,
            transport: TransportKind::None,
            weight: 0.0,
            message: None,
        }
    }
}

#[derive(Debug)]
struct Shared {
    settings: ClientSettings,
    generation: u64,
    session: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct ManagerInner {
    shared: Mutex<Shared>,
    status: watch::Sender<ClientStatus>,
    http: reqwest::Client,
}

impl ManagerInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// apply a status change on behalf of a session, unless it went stale
    fn apply<F>(&self, generation: u64, change: F) -> bool
    where
        F: FnOnce(&mut ClientStatus),
    {
        let shared = self.lock();
        if shared.generation != generation {
            return false;
        }
        self.status.send_modify(change);
        drop(shared);
        true
    }
}

/// picks a transport, fails over, and cleans up after itself
///
/// `connect` spawns onto the current tokio runtime.
#[derive(Debug)]
pub struct ClientConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ClientConnectionManager {
    pub fn new(settings: ClientSettings) -> Self {
        let (status, _) = watch::channel(ClientStatus::default());
        Self {
            inner: Arc::new(ManagerInner {
                shared: Mutex::new(Shared {
                    settings,
                    generation: 0,
                    session: None,
                }),
                status,
                http: reqwest::Client::new(),
            }),
        }
    }

    /// start connecting; a no-op while already connecting or connected
    ///
    /// settings that fail validation put the manager in `Error` without
    /// touching the network.
    pub fn connect(&self) {
        let mut shared = self.inner.lock();
        let state = self.inner.status.borrow().state;
        if matches!(state, ClientState::Connecting | ClientState::Connected) {
            tracing::debug!("[CLIENT] connect ignored, already {:?}", state);
            return;
        }

        shared.generation += 1;
        let generation = shared.generation;
        if let Some(stale) = shared.session.take() {
            stale.abort();
        }
        if let Err(e) = shared.settings.validate() {
            tracing::warn!("[CLIENT] not connecting: {}", e);
            self.inner.status.send_modify(|s| {
                s.state = ClientState::Error;
                s.transport = TransportKind::None;
                s.message = Some(e.to_string());
            });
            return;
        }
        self.inner.status.send_modify(|s| {
            s.state = ClientState::Connecting;
            s.transport = TransportKind::None;
            s.message = None;
        });

        let session = Session {
            inner: Arc::clone(&self.inner),
            generation,
            settings: shared.settings.clone(),
        };
        tracing::info!("[CLIENT] connecting to {}", session.settings.push_url());
        shared.session = Some(tokio::spawn(session.run()));
    }

    /// tear down sockets and timers; idempotent
    pub fn disconnect(&self) {
        let mut shared = self.inner.lock();
        // detach first: the old session's callbacks are stale from here on
        shared.generation += 1;
        let session = shared.session.take();
        self.inner.status.send_modify(|s| {
            s.state = ClientState::Disconnected;
            s.transport = TransportKind::None;
            s.message = None;
        });
        drop(shared);

        if let Some(session) = session {
            session.abort();
            tracing::debug!("[CLIENT] disconnected");
        }
    }

    /// switch to new settings: always a full disconnect then connect
    pub fn reconfigure(&self, settings: ClientSettings) {
        self.disconnect();
        self.inner.lock().settings = settings;
        self.connect();
    }

    /// persist settings, then reconnect with them
    pub fn save_settings<P: AsRef<Path>>(&self, path: P, settings: ClientSettings) -> Result<()> {
        settings.save(path)?;
        self.reconfigure(settings);
        Ok(())
    }

    pub fn settings(&self) -> ClientSettings {
        self.inner.lock().settings.clone()
    }

    pub fn status(&self) -> ClientStatus {
        self.inner.status.borrow().clone()
    }

    pub fn weight(&self) -> f64 {
        self.inner.status.borrow().weight
    }

    /// observe status changes
    pub fn watch(&self) -> watch::Receiver<ClientStatus> {
        self.inner.status.subscribe()
    }
}

impl Drop for ClientConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ==============================================================================
// session - one connect() worth of work
// ==============================================================================

struct Session {
    inner: Arc<ManagerInner>,
    generation: u64,
    settings: ClientSettings,
}

impl Session {
    async fn run(self) {
        loop {
            let Some(stream) = self.open_push().await else {
                self.poll().await;
                return;
            };
            if !self.stream_push(stream).await {
                return;
            }
            tracing::info!("[CLIENT] push connection lost, retrying");
        }
    }

    /// bounded push attempts with a per-attempt timeout
    async fn open_push(&self) -> Option<PushStream> {
        let url = self.settings.push_url();
        let attempts = self.settings.push_attempts.max(1);
        for attempt in 1..=attempts {
            if !self.inner.is_current(self.generation) {
                return None;
            }
            match tokio::time::timeout(
                self.settings.attempt_timeout(),
                tokio_tungstenite::connect_async(url.as_str()),
            )
            .await
            {
                Ok(Ok((stream, _))) => return Some(stream),
                Ok(Err(e)) => {
                    tracing::debug!("[CLIENT] push attempt {}/{} failed: {}", attempt, attempts, e)
                }
                Err(_) => tracing::debug!("[CLIENT] push attempt {}/{} timed out", attempt, attempts),
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.retry_delay()).await;
            }
        }
        tracing::info!("[CLIENT] push unavailable after {} attempts, falling back to polling", attempts);
        None
    }

    /// deliver pushed readings; returns false once this session is stale
    async fn stream_push(&self, mut stream: PushStream) -> bool {
        let opened = self.inner.apply(self.generation, |s| {
            s.state = ClientState::Connected;
            s.transport = TransportKind::Push;
            s.message = None;
        });
        if !opened {
            return false;
        }
        tracing::info!("[CLIENT] connected via push");

        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let Ok(update) = serde_json::from_str::<WeightMessage>(&text) else {
                        tracing::debug!("[CLIENT] ignoring push message {:?}", text);
                        continue;
                    };
                    if !self.inner.apply(self.generation, |s| s.weight = update.weight) {
                        return false;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("[CLIENT] push transport error: {}", e);
                    break;
                }
            }
        }

        self.inner.apply(self.generation, |s| {
            s.state = ClientState::Connecting;
            s.transport = TransportKind::None;
        })
    }

    /// fixed-interval polling until a request fails or the session goes stale
    async fn poll(&self) {
        let url = self.settings.poll_url();
        let mut ticker = tokio::time::interval(self.settings.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !self.inner.is_current(self.generation) {
                return;
            }
            match fetch_weight(&self.inner.http, &url, self.settings.request_timeout()).await {
                Ok(response) => {
                    let fresh = self.inner.apply(self.generation, |s| {
                        s.state = ClientState::Connected;
                        s.transport = TransportKind::Poll;
                        s.weight = response.weight;
                        s.message = None;
                    });
                    if !fresh {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!("[CLIENT] polling {} failed: {}", url, e);
                    self.inner.apply(self.generation, |s| {
                        s.state = ClientState::Error;
                        s.transport = TransportKind::None;
                        s.message = Some(format!("scale bridge unreachable: {}", e));
                    });
                    return;
                }
            }
        }
    }
}
