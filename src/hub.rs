//! ==============================================================================
//! hub.rs - websocket push transport
//! ==============================================================================
//!
//! purpose:
//!     fans every new weight reading out to all connected browsers.
//!     a browser that connects gets the current reading immediately, so the
//!     ui never starts blank.
//!
//! design:
//!     all subscribers share one bounded ring (a tokio broadcast channel).
//!     publish writes into the ring while holding the hub lock, then returns;
//!     the per-connection session task drains its receiver into the socket.
//!     a slow browser never stalls the device link or other browsers: when it
//!     falls a full ring behind it loses the oldest readings, never the newest,
//!     so the last thing it shows is always the current weight.
//!
//!     ┌────────────┐   publish   ┌──────────────┐   ring    ┌─────────────┐
//!     │ device.rs  │ ──────────> │ BroadcastHub │ ────────> │ ws session  │ ──> browser
//!     └────────────┘             └──────────────┘           └─────────────┘
//!
//! relationships:
//!     - writes: store.rs (every published reading lands in the store first)
//!     - reads: store.rs (primes new subscribers)
//!     - used by: device.rs (publish), bridge.rs (push listener)
//!
//! ==============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use crate::domain::{WeightMessage, WeightReading};
use crate::store::WeightStore;

/// readings buffered per subscriber; a subscriber further behind skips the oldest
pub const SUBSCRIBER_QUEUE: usize = 16;

pub type SubscriberId = u64;

/// one open push-transport peer
///
/// created by [`BroadcastHub::subscribe`]. dropping it (or handing it to
/// [`BroadcastHub::unsubscribe`]) removes the peer from the hub.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    primed: Option<WeightReading>,
    rx: broadcast::Receiver<WeightReading>,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// next reading for this peer, `None` once the hub is gone
    pub async fn recv(&mut self) -> Option<WeightReading> {
        if let Some(reading) = self.primed.take() {
            return Some(reading);
        }
        loop {
            match self.rx.recv().await {
                Ok(reading) => return Some(reading),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("[WS] subscriber {} lagging, skipped {} reading(s)", self.id, skipped);
                }
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<WeightReading> {
        if let Some(reading) = self.primed.take() {
            return Some(reading);
        }
        loop {
            match self.rx.try_recv() {
                Ok(reading) => return Some(reading),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::debug!("[WS] subscriber {} lagging, skipped {} reading(s)", self.id, skipped);
                }
                Err(_) => return None,
            }
        }
    }
}

#[derive(Debug)]
struct HubInner {
    store: WeightStore,
    /// the lock is the hub's critical section: subscribe, publish and
    /// unsubscribe all go through it
    sender: Mutex<broadcast::Sender<WeightReading>>,
    next_id: AtomicU64,
}

/// tracks push subscribers and delivers readings to them
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    pub fn new(store: WeightStore) -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIBER_QUEUE);
        Self {
            inner: Arc::new(HubInner {
                store,
                sender: Mutex::new(sender),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, broadcast::Sender<WeightReading>> {
        self.inner.sender.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// register a new peer, primed with the current reading
    pub fn subscribe(&self) -> Subscriber {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        // prime and attach in one critical section: the peer sees the stored
        // reading, then exactly the publishes that follow it
        let sender = self.lock();
        let primed = self.inner.store.get();
        let rx = sender.subscribe();
        drop(sender);

        Subscriber {
            id,
            primed: Some(primed),
            rx,
        }
    }

    /// store the reading, then deliver it to every live subscriber
    ///
    /// returns how many subscribers it was queued for.
    pub fn publish(&self, reading: WeightReading) -> usize {
        let sender = self.lock();
        let stored = self.inner.store.set(reading);
        // no receivers is not an error, just nobody listening
        sender.send(stored).unwrap_or(0)
    }

    pub fn unsubscribe(&self, subscriber: Subscriber) {
        let _guard = self.lock();
        drop(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().receiver_count()
    }
}

// ==============================================================================
// websocket listener
// ==============================================================================

/// router for the push listener; `/` and `/ws` both upgrade
pub fn push_router(hub: BroadcastHub) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(hub)
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<BroadcastHub>) -> Response {
    ws.on_upgrade(move |socket| serve_subscriber(socket, hub))
}

/// one browser connection: forward readings, ignore inbound messages
async fn serve_subscriber(socket: WebSocket, hub: BroadcastHub) {
    let mut subscriber = hub.subscribe();
    let id = subscriber.id();
    tracing::info!("[WS] client {} connected ({} total)", id, hub.subscriber_count());

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            reading = subscriber.recv() => {
                let Some(reading) = reading else { break };
                let text = match serde_json::to_string(&WeightMessage::from(reading)) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("[WS] failed to encode reading: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    hub.unsubscribe(subscriber);
    tracing::info!("[WS] client {} disconnected ({} total)", id, hub.subscriber_count());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub_with_store() -> (BroadcastHub, WeightStore) {
        let store = WeightStore::new();
        (BroadcastHub::new(store.clone()), store)
    }

    fn drain(sub: &mut Subscriber) -> Vec<f64> {
        std::iter::from_fn(|| sub.try_recv()).map(|r| r.value).collect()
    }

    #[test]
    fn subscribe_primes_with_current_reading() {
        let (hub, store) = hub_with_store();
        let mut sub = hub.subscribe();
        assert_eq!(sub.try_recv(), Some(store.get()));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn publish_stores_before_delivering() {
        let (hub, store) = hub_with_store();
        let mut sub = hub.subscribe();
        sub.try_recv();

        hub.publish(WeightReading::now(12.5));
        assert_eq!(store.get().value, 12.5);
        assert_eq!(sub.try_recv(), Some(store.get()));
    }

    #[test]
    fn late_subscriber_gets_most_recent_reading_first() {
        let (hub, _) = hub_with_store();
        for n in 1..=5 {
            hub.publish(WeightReading::now(n as f64));
        }
        let mut sub = hub.subscribe();
        assert_eq!(drain(&mut sub), vec![5.0]);
    }

    #[test]
    fn publish_reaches_every_subscriber() {
        let (hub, _) = hub_with_store();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        a.try_recv();
        b.try_recv();

        assert_eq!(hub.publish(WeightReading::now(70.0)), 2);
        assert_eq!(a.try_recv().map(|r| r.value), Some(70.0));
        assert_eq!(b.try_recv().map(|r| r.value), Some(70.0));
    }

    #[test]
    fn publish_without_subscribers_still_stores() {
        let (hub, store) = hub_with_store();
        assert_eq!(hub.publish(WeightReading::now(3.0)), 0);
        assert_eq!(store.get().value, 3.0);
    }

    #[test]
    fn dropped_subscriber_is_removed_without_affecting_others() {
        let (hub, _) = hub_with_store();
        let gone = hub.subscribe();
        let mut alive = hub.subscribe();
        alive.try_recv();
        drop(gone);

        assert_eq!(hub.publish(WeightReading::now(1.0)), 1);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(alive.try_recv().map(|r| r.value), Some(1.0));
    }

    #[test]
    fn lagging_subscriber_ends_on_the_latest_reading() {
        let (hub, store) = hub_with_store();
        let mut sub = hub.subscribe();
        let total = SUBSCRIBER_QUEUE + 4;
        for n in 1..=total {
            hub.publish(WeightReading::now(n as f64));
        }
        assert_eq!(hub.subscriber_count(), 1);

        let seen = drain(&mut sub);
        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&store.get().value));
        assert_eq!(store.get().value, total as f64);
        // only the oldest readings were skipped, the rest arrive in order
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.len(), 1 + SUBSCRIBER_QUEUE);
    }

    #[test]
    fn unsubscribe_releases_the_peer() {
        let (hub, _) = hub_with_store();
        let sub = hub.subscribe();
        let _other = hub.subscribe();
        hub.unsubscribe(sub);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.publish(WeightReading::now(2.0)), 1);
    }

    #[tokio::test]
    async fn recv_ends_when_hub_is_gone() {
        let (hub, _) = hub_with_store();
        let mut sub = hub.subscribe();
        drop(hub);
        assert!(sub.recv().await.is_some()); // priming reading
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn concurrent_churn_never_skips_or_duplicates_a_reading() {
        let (hub, _) = hub_with_store();
        let readings = SUBSCRIBER_QUEUE;
        let mut steady: Vec<Subscriber> = (0..4).map(|_| hub.subscribe()).collect();
        let hub = &hub;

        let joined: Vec<Subscriber> = std::thread::scope(|s| {
            let publisher = s.spawn(move || {
                for n in 1..=readings {
                    hub.publish(WeightReading::now(n as f64));
                    std::thread::yield_now();
                }
            });
            let churners: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(move || {
                        let mut kept = Vec::new();
                        for i in 0..50 {
                            let sub = hub.subscribe();
                            if i % 5 == 0 {
                                kept.push(sub);
                            } else {
                                hub.unsubscribe(sub);
                            }
                        }
                        kept
                    })
                })
                .collect();
            publisher.join().unwrap();
            churners.into_iter().flat_map(|c| c.join().unwrap()).collect()
        });

        assert_eq!(hub.subscriber_count(), steady.len() + joined.len());

        let full: Vec<f64> = (0..=readings).map(|n| n as f64).collect();
        for sub in steady.iter_mut() {
            assert_eq!(drain(sub), full);
        }
        // a peer that joined mid-stream sees its priming value, then every
        // later reading exactly once
        for mut sub in joined {
            let seen = drain(&mut sub);
            let primed = seen[0] as usize;
            assert_eq!(seen, full[primed..].to_vec());
        }
    }
}
