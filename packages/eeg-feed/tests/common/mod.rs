// In-process EEG backend serving the snapshot and stream routes

#![allow(dead_code)]

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use eeg_feed::{BackoffConfig, EegRecord, FeedConfig};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

#[derive(Clone)]
pub struct Backend {
    records: Arc<Mutex<Vec<EegRecord>>>,
    frames: broadcast::Sender<String>,
    kick: Arc<watch::Sender<u64>>,
    latency: Arc<Mutex<Duration>>,
    greeting: Arc<Mutex<Option<String>>>,
    connections: Arc<AtomicUsize>,
}

impl Backend {
    pub fn new(records: Vec<EegRecord>) -> Self {
        let (frames, _) = broadcast::channel(256);
        let (kick, _) = watch::channel(0);
        Self {
            records: Arc::new(Mutex::new(records)),
            frames,
            kick: Arc::new(kick),
            latency: Arc::new(Mutex::new(Duration::ZERO)),
            greeting: Arc::new(Mutex::new(None)),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bind to an ephemeral port and serve; returns the base URL
    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/api/latest-eeg-record/", get(latest_record))
            .route("/api/all-eeg-records/", get(all_records))
            .route("/ws/eeg/", get(stream))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test backend");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test backend");
        });

        format!("http://{}", addr)
    }

    /// Store a record without broadcasting it
    pub fn store(&self, record: EegRecord) {
        self.records.lock().push(record);
    }

    /// Store a record and push it to connected clients
    pub fn publish(&self, record: EegRecord) {
        self.send_raw(&serde_json::to_string(&record).expect("record serializes"));
        self.store(record);
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.frames.send(text.to_string());
    }

    /// Drop every open stream connection
    pub fn kick(&self) {
        self.kick.send_modify(|n| *n += 1);
    }

    /// Send `record` first on every new stream connection
    pub fn greet_with(&self, record: &EegRecord) {
        *self.greeting.lock() = Some(serde_json::to_string(record).expect("record serializes"));
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub async fn wait_for_connections(&self, n: usize) {
        for _ in 0..500 {
            if self.connections() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("backend never saw {} stream connections", n);
    }
}

pub fn rec(id: u64, ts: i64, session: &str) -> EegRecord {
    EegRecord::new(id, ts, vec![id as f64, -(id as f64)], session)
}

/// Client configuration with short retry delays
pub fn test_config(base_url: &str) -> FeedConfig {
    FeedConfig {
        fetch_timeout: Duration::from_secs(2),
        backoff: BackoffConfig {
            base: Duration::from_millis(20),
            factor: 2.0,
            cap: Duration::from_millis(200),
            jitter: 0.0,
        },
        ..FeedConfig::with_base_url(base_url)
    }
}

async fn latest_record(State(backend): State<Backend>) -> Response {
    let latency = *backend.latency.lock();
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }

    let latest = backend.records.lock().iter().max_by_key(|r| r.key()).cloned();
    match latest {
        Some(record) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No records found"})),
        )
            .into_response(),
    }
}

async fn all_records(
    State(backend): State<Backend>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Vec<EegRecord>> {
    let records = backend.records.lock().clone();
    // Newest first, to make sure the client does its own ordering
    let mut records: Vec<EegRecord> = records
        .into_iter()
        .filter(|r| params.get("session").map_or(true, |s| &r.session_id == s))
        .collect();
    records.sort_by_key(|r| std::cmp::Reverse(r.key()));
    Json(records)
}

async fn stream(ws: WebSocketUpgrade, State(backend): State<Backend>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, backend))
}

async fn handle_socket(socket: WebSocket, backend: Backend) {
    let (mut sender, mut receiver) = socket.split();
    let mut frames = backend.frames.subscribe();
    let mut kick = backend.kick.subscribe();
    kick.borrow_and_update();

    let greeting = backend.greeting.lock().clone();
    if let Some(text) = greeting {
        if sender.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }
    backend.connections.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = kick.changed() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            message = receiver.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
