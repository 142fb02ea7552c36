//! ==============================================================================
//! device.rs - tcp client link to the physical scale
//! ==============================================================================
//!
//! purpose:
//!     owns the one outbound tcp connection to the scale. bytes that arrive are
//!     framed and decoded, every decoded weight goes into the store and then
//!     out through the hub. when the socket drops, goes silent past the idle
//!     timeout, or an attempt fails, a single fixed-delay retry is scheduled.
//!     failures are logged, never raised.
//!
//! state machine:
//!
//!                    connect()                 socket opens
//!     Disconnected ─────────────> Connecting ─────────────────> Connected
//!          ^                          │                             │
//!          │      error / timeout     │   close / error / idle      │
//!          └──────────────────────────┴─────────────────────────────┘
//!                  (schedules one retry after reconnect_delay)
//!
//!     connect() while Connecting or Connected is a no-op, so at most one
//!     socket to the scale exists at any time.
//!
//! relationships:
//!     - uses: telegram.rs (TelegramStream), hub.rs (publish, which stores)
//!     - used by: bridge.rs (started once at process start)
//!
//! ==============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::config::{DeviceConfig, LoggingConfig};
use crate::domain::{ConnectionState, WeightReading};
use crate::hub::BroadcastHub;
use crate::telegram::TelegramStream;

const READ_BUFFER: usize = 1024;

/// quiet time after an unterminated chunk before it is decoded on its own
const UNFRAMED_SETTLE: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct LinkState {
    state: ConnectionState,
    /// the running connect/read task, if any
    session: Option<AbortHandle>,
    /// the pending reconnect timer, at most one
    retry: Option<AbortHandle>,
    retry_seq: u64,
    shut_down: bool,
}

#[derive(Debug)]
struct LinkInner {
    address: String,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
    show_weight_data: bool,
    hub: BroadcastHub,
    link: Mutex<LinkState>,
    state_tx: watch::Sender<ConnectionState>,
    attempts: AtomicU64,
}

/// resilient tcp client for the scale
#[derive(Debug, Clone)]
pub struct DeviceLink {
    inner: Arc<LinkInner>,
}

impl DeviceLink {
    pub fn new(device: &DeviceConfig, logging: &LoggingConfig, hub: BroadcastHub) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(LinkInner {
                address: device.address(),
                reconnect_delay: device.reconnect_delay(),
                connect_timeout: device.connect_timeout(),
                idle_timeout: device.idle_timeout(),
                show_weight_data: logging.show_weight_data,
                hub,
                link: Mutex::new(LinkState {
                    state: ConnectionState::Disconnected,
                    session: None,
                    retry: None,
                    retry_seq: 0,
                    shut_down: false,
                }),
                state_tx,
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// start a connection attempt unless one is already in flight or open
    ///
    /// must be called from within a tokio runtime.
    pub fn connect(&self) {
        self.inner.connect();
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// number of outbound sockets opened so far
    pub fn connection_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Relaxed)
    }

    /// whether a reconnect timer is pending
    pub fn retry_pending(&self) -> bool {
        self.inner.lock().retry.is_some()
    }

    /// stop the link: close the socket, cancel the retry, ignore later connects
    pub fn shutdown(&self) {
        let mut link = self.inner.lock();
        link.shut_down = true;
        if let Some(session) = link.session.take() {
            session.abort();
        }
        if let Some(retry) = link.retry.take() {
            retry.abort();
        }
        self.inner.set_state(&mut link, ConnectionState::Disconnected);
        tracing::info!("[SCALE] link to {} shut down", self.inner.address);
    }
}

impl LinkInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, link: &mut LinkState, state: ConnectionState) {
        link.state = state;
        self.state_tx.send_replace(state);
    }

    fn connect(self: &Arc<Self>) {
        let mut link = self.lock();
        if link.shut_down {
            return;
        }
        if link.state != ConnectionState::Disconnected {
            tracing::debug!("[SCALE] connect ignored, already {}", link.state);
            return;
        }
        self.set_state(&mut link, ConnectionState::Connecting);
        self.attempts.fetch_add(1, Ordering::Relaxed);
        tracing::info!("[SCALE] Attempting to connect to scale at {}...", self.address);

        let inner = Arc::clone(self);
        let session = tokio::spawn(async move { inner.run_session().await });
        link.session = Some(session.abort_handle());
    }

    async fn run_session(self: Arc<Self>) {
        let stream = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(&self.address),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                tracing::warn!(
                    "[SCALE] TCP connection error: {}. Retrying in {:?}...",
                    e,
                    self.reconnect_delay
                );
                self.on_disconnected();
                return;
            }
            Err(_) => {
                tracing::warn!(
                    "[SCALE] connect to {} timed out after {:?}. Retrying in {:?}...",
                    self.address,
                    self.connect_timeout,
                    self.reconnect_delay
                );
                self.on_disconnected();
                return;
            }
        };

        self.on_connected();
        self.read_telegrams(stream).await;
        tracing::info!(
            "[SCALE] Connection to scale closed. Reconnecting in {:?}...",
            self.reconnect_delay
        );
        self.on_disconnected();
    }

    async fn read_telegrams(&self, mut stream: TcpStream) {
        let mut telegrams = TelegramStream::new();
        let mut buf = [0u8; READ_BUFFER];
        loop {
            let settling = telegrams.has_held_chunk();
            let wait = if settling { Some(UNFRAMED_SETTLE) } else { self.idle_timeout };
            let read = stream.read(&mut buf);
            let outcome = match wait {
                Some(limit) => match tokio::time::timeout(limit, read).await {
                    Ok(outcome) => outcome,
                    Err(_) if settling => {
                        for value in telegrams.flush() {
                            self.deliver(value);
                        }
                        continue;
                    }
                    Err(_) => {
                        tracing::warn!("[SCALE] no data from scale for {:?}, dropping link", limit);
                        return;
                    }
                },
                None => read.await,
            };
            match outcome {
                Ok(0) => {
                    for value in telegrams.flush() {
                        self.deliver(value);
                    }
                    return;
                }
                Ok(n) => {
                    for value in telegrams.push(&buf[..n]) {
                        self.deliver(value);
                    }
                }
                Err(e) => {
                    tracing::warn!("[SCALE] read error: {}", e);
                    return;
                }
            }
        }
    }

    fn deliver(&self, value: f64) {
        let delivered = self.hub.publish(WeightReading::now(value));
        if self.show_weight_data {
            tracing::info!("[SCALE] weight {} kg -> {} subscriber(s)", value, delivered);
        } else {
            tracing::debug!("[SCALE] weight {} kg -> {} subscriber(s)", value, delivered);
        }
    }

    fn on_connected(&self) {
        let mut link = self.lock();
        if link.shut_down {
            return;
        }
        if let Some(retry) = link.retry.take() {
            retry.abort();
        }
        self.set_state(&mut link, ConnectionState::Connected);
        tracing::info!("[SCALE] Successfully connected to scale at {}", self.address);
    }

    fn on_disconnected(self: &Arc<Self>) {
        let mut link = self.lock();
        link.session = None;
        if link.shut_down {
            return;
        }
        self.set_state(&mut link, ConnectionState::Disconnected);
        self.schedule_retry(&mut link);
    }

    fn schedule_retry(self: &Arc<Self>, link: &mut LinkState) {
        if link.retry.is_some() {
            return;
        }
        link.retry_seq += 1;
        let seq = link.retry_seq;
        let inner = Arc::clone(self);
        let delay = self.reconnect_delay;
        let retry = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut link = inner.lock();
                if link.retry_seq == seq {
                    link.retry = None;
                }
            }
            inner.connect();
        });
        link.retry = Some(retry.abort_handle());
    }
}
