#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, routing::get, Json, Router};
use futures::StreamExt;
use scale_bridge::{Bridge, BridgeConfig, ClientStatus, DeviceLink};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const WAIT: Duration = Duration::from_secs(5);

/// a port nothing listens on
pub async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// running bridge on ephemeral ports, pointed at `scale_port`
pub struct TestBridge {
    pub push: SocketAddr,
    pub poll: SocketAddr,
    pub link: DeviceLink,
}

pub async fn start_bridge(scale_port: u16, reconnect_delay_ms: u64) -> TestBridge {
    scale_bridge::logging::init_logging("debug");

    let mut config = BridgeConfig::default();
    config.device.host = "127.0.0.1".into();
    config.device.port = scale_port;
    config.device.reconnect_delay_ms = reconnect_delay_ms;
    config.device.connect_timeout_ms = 1000;
    config.server.bind_address = "127.0.0.1".into();
    config.server.ws_port = 0;
    config.server.http_port = 0;

    let bridge = Bridge::bind(&config).await.unwrap();
    let test = TestBridge {
        push: bridge.push_addr().unwrap(),
        poll: bridge.poll_addr().unwrap(),
        link: bridge.link().clone(),
    };
    tokio::spawn(bridge.run());
    test
}

pub async fn ws_connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    ws
}

/// next weight pushed to `ws`, or `None` if nothing arrives within `within`
pub async fn next_weight(ws: &mut WsClient, within: Duration) -> Option<f64> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let message = tokio::time::timeout_at(deadline, ws.next()).await.ok()??.ok()?;
        if let Message::Text(text) = message {
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            return value["weight"].as_f64();
        }
    }
}

pub async fn wait_status<F>(rx: &mut watch::Receiver<ClientStatus>, pred: F) -> ClientStatus
where
    F: FnMut(&ClientStatus) -> bool,
{
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("status not reached in time")
        .expect("manager dropped")
        .clone()
}

/// fake poll endpoint answering `/weight` with `weight`, counting hits
pub struct FakePoll {
    pub port: u16,
    pub hits: Arc<AtomicUsize>,
}

impl FakePoll {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub async fn fake_poll(weight: f64, healthy: bool) -> FakePoll {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    let app = Router::new().route(
        "/weight",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if healthy {
                    Ok(Json(serde_json::json!({
                        "weight": weight,
                        "lastUpdate": "2024-05-01T10:00:00Z",
                    })))
                } else {
                    Err(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        }),
    );
    tokio::spawn(async move { axum::serve(listener, app).await });
    FakePoll { port, hits }
}
