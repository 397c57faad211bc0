//! End-to-end tests against an in-process fake backend.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use misso_protocol::SyncPhase;
use misso_sync::{
    HttpSnapshotFetcher, SessionStateStore, SnapshotFetcher, StoreOptions, StreamClient,
    SyncError, SyncView,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;

const OP: &str = "Dr.Meril M";
const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
enum Frame {
    Text(String),
    HangUp,
}

struct Backend {
    records: Mutex<Vec<Value>>,
    queries: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(String, String)>>,
    frames: broadcast::Sender<Frame>,
    connections: AtomicUsize,
    closed: AtomicUsize,
}

impl Backend {
    fn set_records(&self, records: Vec<Value>) {
        *self.records.lock().unwrap() = records;
    }

    fn push(&self, frame: Frame) {
        let _ = self.frames.send(frame);
    }

    fn push_json(&self, value: Value) {
        self.push(Frame::Text(value.to_string()));
    }
}

async fn start_backend(records: Vec<Value>) -> (Arc<Backend>, SocketAddr) {
    let (frames, _) = broadcast::channel(32);
    let backend = Arc::new(Backend {
        records: Mutex::new(records),
        queries: Mutex::new(Vec::new()),
        uploads: Mutex::new(Vec::new()),
        frames,
        connections: AtomicUsize::new(0),
        closed: AtomicUsize::new(0),
    });

    let app = Router::new()
        .route("/config", get(config_handler))
        .route("/surgeries", get(surgeries_handler))
        .route("/upload/json", post(upload_handler))
        .route("/ws", get(ws_handler))
        .with_state(Arc::clone(&backend));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (backend, addr)
}

async fn config_handler() -> Json<Value> {
    Json(json!({ "surgeon_name": OP, "watch_folder": "/data/incoming" }))
}

async fn surgeries_handler(
    State(backend): State<Arc<Backend>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    if let Some(surgeon) = params.get("surgeon") {
        backend.queries.lock().unwrap().push(surgeon.clone());
    }
    Json(Value::Array(backend.records.lock().unwrap().clone()))
}

async fn upload_handler(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = String::from_utf8_lossy(&body).into_owned();
    backend.uploads.lock().unwrap().push((content_type, body));
    Json(json!({ "status": "ok" }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(backend): State<Arc<Backend>>,
) -> impl IntoResponse {
    // Subscribe before the handshake completes so no pushed frame is missed.
    let frames = backend.frames.subscribe();
    backend.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| handle_socket(socket, frames, backend))
}

async fn handle_socket(
    mut socket: WebSocket,
    mut frames: broadcast::Receiver<Frame>,
    backend: Arc<Backend>,
) {
    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            frame = frames.recv() => match frame {
                Ok(Frame::Text(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(Frame::HangUp) | Err(_) => break,
            },
        }
    }
    backend.closed.fetch_add(1, Ordering::SeqCst);
}

fn row(id: i64, time: &str) -> Value {
    json!({
        "id": id,
        "procedure_name": format!("procedure-{id}"),
        "date": "2026-02-11",
        "time": time,
        "duration": "42.5",
        "surgeon_name": OP,
        "instruments_names": "SynchroSeal,Cobra_Grasper",
        "instruments_durations": "12.5,30",
        "clutch_count": 4,
        "is_live": 0,
    })
}

fn update_envelope(procedure: &str) -> Value {
    json!({
        "type": "surgery_update",
        "surgeon_name": OP,
        "is_live": true,
        "surgery": {
            "procedure_name": procedure,
            "date": "2026-02-11",
            "time": "13:00",
            "duration": 5,
            "surgeon_name": OP,
            "instruments": {
                "SynchroSeal": { "duration": 3.5, "image": "synchroseal.png" },
                "Cobra_Grasper": 1.5
            },
            "clutch_count": 2
        }
    })
}

fn store_for(addr: SocketAddr, reconnect: Duration) -> SessionStateStore {
    let fetcher =
        HttpSnapshotFetcher::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
    SessionStateStore::spawn(
        fetcher,
        StoreOptions {
            stream: Some(StreamClient::new(format!("ws://{addr}/ws"))),
            reconnect_delay: reconnect,
        },
    )
}

async fn wait_for<P>(store: &SessionStateStore, predicate: P) -> Arc<SyncView>
where
    P: Fn(&SyncView) -> bool,
{
    tokio::time::timeout(WAIT, store.wait_for(predicate))
        .await
        .expect("view did not reach the expected state")
        .unwrap()
}

#[tokio::test]
async fn fetcher_reads_config_and_history() {
    let (backend, addr) = start_backend(vec![row(10, "08:00"), row(11, "10:30:15")]).await;
    let fetcher =
        HttpSnapshotFetcher::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();

    let config = fetcher.fetch_config().await.unwrap();
    assert_eq!(config.surgeon_name, OP);

    let sessions = fetcher.fetch_history(OP).await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(backend.queries.lock().unwrap().as_slice(), [OP.to_string()]);

    let first = &sessions[0];
    assert_eq!(first.id, Some(10));
    assert_eq!(first.duration_minutes, 42.5);
    assert_eq!(first.usage_entries.len(), 2);
    assert_eq!(first.usage_entries[1].name, "Cobra_Grasper");
    assert_eq!(first.usage_entries[1].duration_minutes, 30.0);
    assert_eq!(first.total_clutch_count(), 4);
    assert!(sessions[1].has_valid_timestamp());
}

#[tokio::test]
async fn fetcher_reports_http_status() {
    let (_backend, addr) = start_backend(Vec::new()).await;
    let fetcher = HttpSnapshotFetcher::new(&format!("http://{addr}/missing"), Duration::from_secs(2))
        .unwrap();

    let err = fetcher.fetch_history(OP).await.unwrap_err();
    match err {
        SyncError::Status { status, url } => {
            assert_eq!(status.as_u16(), 404);
            assert!(url.contains("/missing/surgeries"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn upload_sends_multipart_file() {
    let (backend, addr) = start_backend(Vec::new()).await;
    let fetcher =
        HttpSnapshotFetcher::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("case-0211.json");
    std::fs::write(&path, r#"{"procedure_name":"Hernia Repair"}"#).unwrap();

    fetcher.upload_json(&path).await.unwrap();

    let uploads = backend.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    let (content_type, body) = &uploads[0];
    assert!(content_type.starts_with("multipart/form-data"));
    assert!(body.contains(r#"name="file""#));
    assert!(body.contains("case-0211.json"));
    assert!(body.contains("Hernia Repair"));
}

#[tokio::test]
async fn store_follows_stream_and_refetches_on_complete() {
    let (backend, addr) = start_backend(vec![row(10, "08:00"), row(11, "10:00")]).await;
    let store = store_for(addr, Duration::from_millis(50));

    store.init(OP).await.unwrap();
    let view = wait_for(&store, |v| v.connected && v.phase == SyncPhase::Idle).await;
    assert_eq!(view.history_ids(), vec![Some(11), Some(10)]);

    backend.push(Frame::Text("{not json".to_string()));
    backend.push_json(json!({ "type": "heartbeat" }));
    backend.push_json(update_envelope("Nephrectomy"));

    let view = wait_for(&store, SyncView::is_live).await;
    let live = view.current_display.as_ref().unwrap();
    assert!(live.is_live);
    assert_eq!(live.procedure_name, "Nephrectomy");
    assert_eq!(live.usage_entries.len(), 2);
    assert_eq!(live.usage_entries[0].image_ref.as_deref(), Some("synchroseal.png"));
    assert_eq!(live.total_clutch_count(), 2);

    backend.set_records(vec![row(10, "08:00"), row(11, "10:00"), row(12, "13:00")]);
    backend.push_json(json!({ "type": "surgery_complete", "surgeon_name": OP }));

    let view = wait_for(&store, |v| v.phase == SyncPhase::Idle && v.history.len() == 3).await;
    assert!(view.live.is_none());
    assert_eq!(view.history_ids(), vec![Some(12), Some(11), Some(10)]);
    assert_eq!(view.current_display.as_ref().and_then(|s| s.id), Some(12));

    store.dispose().await;
}

#[tokio::test]
async fn store_reconnects_after_drop() {
    let (backend, addr) = start_backend(vec![row(10, "08:00")]).await;
    let store = store_for(addr, Duration::from_millis(50));

    store.init(OP).await.unwrap();
    wait_for(&store, |v| v.connected).await;
    assert_eq!(backend.connections.load(Ordering::SeqCst), 1);

    backend.push(Frame::HangUp);
    let probe = Arc::clone(&backend);
    wait_for(&store, move |v| {
        v.connected && probe.connections.load(Ordering::SeqCst) == 2
    })
    .await;

    // Frames on the new connection still reach the store.
    backend.push_json(update_envelope("After reconnect"));
    let view = wait_for(&store, SyncView::is_live).await;
    assert_eq!(
        view.live.as_ref().map(|s| s.procedure_name.as_str()),
        Some("After reconnect")
    );

    store.dispose().await;
}

#[tokio::test]
async fn dispose_closes_the_stream() {
    let (backend, addr) = start_backend(Vec::new()).await;
    let store = store_for(addr, Duration::from_millis(50));

    store.init(OP).await.unwrap();
    wait_for(&store, |v| v.connected).await;
    store.dispose().await;

    tokio::time::timeout(WAIT, async {
        while backend.closed.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server never saw the socket close");

    // No reconnect after disposal.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.connections.load(Ordering::SeqCst), 1);
    assert!(matches!(store.refresh().await, Err(SyncError::Closed)));
}
