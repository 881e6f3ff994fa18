//! Admin/control HTTP surface for one sensor's pipeline (§6): health,
//! parameter get/set, background and acceptance inspection, persisted track
//! history, and an SSE feed of completed frame bundles. Wired by `lidar-cli`
//! on top of the `lidar_core::PipelineHandle` the pipeline worker hands out.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use event_stream_types::{AcceptsEventStream, ConnectionKey, EventBroadcaster};
use lidar_core::pipeline::{Publisher, PipelineHandle};
use lidar_persistence::HistoryReader;
use lidar_types::{FrameBundle, Result, RuntimeParams, TimestampNs};

const EVENTS_PATH: &str = "/events";

/// Replay transport control (§6 Streaming RPC). Live capture accepts only
/// `GetCapabilities`; a replay session implements the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    Pause,
    Play,
    Seek {
        timestamp_ns: Option<i64>,
        frame_index: Option<u64>,
    },
    SetRate {
        rate: f32,
    },
    SetOverlayModes {
        flags: u32,
    },
    GetCapabilities,
    StartRecording,
    StopRecording,
}

/// Handles a `ControlMessage` and returns a JSON-serializable reply. Unlike
/// `Persistence`/`Publisher`, this sits off the pipeline hot path entirely,
/// so implementations are free to do blocking I/O.
pub trait ControlSink: Send + Sync {
    fn handle(&self, msg: ControlMessage) -> Result<serde_json::Value>;
}

struct LiveCapabilities;
impl ControlSink for LiveCapabilities {
    fn handle(&self, msg: ControlMessage) -> Result<serde_json::Value> {
        match msg {
            ControlMessage::GetCapabilities => Ok(serde_json::json!({
                "mode": "live",
                "supports_pause": false,
                "supports_seek": false,
                "supports_rate_control": false,
            })),
            other => Err(lidar_types::Error::ConfigInvalid(format!(
                "{other:?} is not supported against a live sensor"
            ))),
        }
    }
}

/// Fans a completed `FrameBundle` out to every connected SSE listener as a
/// single `event: frame` message. `publish` never blocks the pipeline worker
/// beyond a bounded per-listener channel offer: slow listeners simply miss
/// frames rather than applying backpressure.
pub struct SsePublisher {
    broadcaster: EventBroadcaster<ConnectionKey>,
    runtime: tokio::runtime::Handle,
}

impl SsePublisher {
    fn new(broadcaster: EventBroadcaster<ConnectionKey>, runtime: tokio::runtime::Handle) -> Self {
        Self { broadcaster, runtime }
    }
}

impl Publisher for SsePublisher {
    fn publish(&self, bundle: FrameBundle) {
        let body = match serde_json::to_string(&bundle) {
            Ok(json) => format!("event: frame\ndata: {json}\n\n"),
            Err(e) => {
                warn!(error = %e, "failed to serialize frame bundle for SSE, dropping");
                return;
            }
        };
        let broadcaster = self.broadcaster.clone();
        self.runtime.spawn(async move {
            broadcaster.broadcast_frame(body).await;
        });
    }
}

#[derive(Clone)]
struct AppState {
    handle: PipelineHandle,
    broadcaster: EventBroadcaster<ConnectionKey>,
    next_connection_id: Arc<AtomicU64>,
    history: Option<Arc<HistoryReader>>,
    control: Arc<dyn ControlSink>,
    sensor_id: String,
}

#[derive(Debug, Deserialize)]
struct SensorQuery {
    #[serde(default)]
    #[allow(dead_code)]
    sensor_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[allow(dead_code)]
    sensor_id: Option<String>,
    start_ns: i64,
    end_ns: i64,
}

fn wall_clock_now() -> TimestampNs {
    let dur = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    TimestampNs(dur.as_nanos() as i64)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": state.sensor_id,
        "timestamp": wall_clock_now(),
    }))
}

async fn get_snapshot_handler(
    State(state): State<AppState>,
    Query(_q): Query<SensorQuery>,
) -> impl IntoResponse {
    Json(state.handle.get_background_snapshot())
}

async fn get_acceptance_handler(
    State(state): State<AppState>,
    Query(_q): Query<SensorQuery>,
) -> impl IntoResponse {
    Json(state.handle.get_acceptance_snapshot())
}

async fn post_acceptance_reset_handler(
    State(state): State<AppState>,
    Query(_q): Query<SensorQuery>,
) -> impl IntoResponse {
    state.handle.reset_acceptance();
    StatusCode::NO_CONTENT
}

async fn post_grid_reset_handler(
    State(state): State<AppState>,
    Query(_q): Query<SensorQuery>,
) -> impl IntoResponse {
    state.handle.reset_grid();
    StatusCode::NO_CONTENT
}

async fn get_params_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.handle.get_params())
}

async fn post_params_handler(
    State(state): State<AppState>,
    Json(params): Json<RuntimeParams>,
) -> impl IntoResponse {
    match state.handle.set_params(params) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

#[derive(Serialize)]
struct GridStatusBody {
    background_count: usize,
    times_seen_dist: std::collections::BTreeMap<u32, usize>,
    settled: bool,
}

async fn get_grid_status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.handle.get_background_snapshot();
    let body = match snapshot {
        Some(s) => {
            let mut times_seen_dist = std::collections::BTreeMap::new();
            for cell in &s.cells {
                *times_seen_dist.entry(cell.times_seen).or_insert(0) += 1;
            }
            GridStatusBody {
                background_count: s.non_empty_cells,
                times_seen_dist,
                settled: s.settled,
            }
        }
        None => GridStatusBody {
            background_count: 0,
            times_seen_dist: Default::default(),
            settled: false,
        },
    };
    Json(body)
}

async fn get_tracks_history_handler(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> impl IntoResponse {
    let Some(history) = &state.history else {
        return (StatusCode::NOT_FOUND, "no persistence backend configured").into_response();
    };
    let sensor_id = q.sensor_id.as_deref().unwrap_or(&state.sensor_id);
    match history.query_track_history(sensor_id, q.start_ns, q.end_ns) {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn post_control_handler(
    State(state): State<AppState>,
    Json(msg): Json<ControlMessage>,
) -> impl IntoResponse {
    match state.control.handle(msg) {
        Ok(body) => Json(body).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn events_handler(
    State(state): State<AppState>,
    _: AcceptsEventStream,
) -> impl IntoResponse {
    let key = ConnectionKey(state.next_connection_id.fetch_add(1, Ordering::Relaxed));
    let (_tx, body) = state.broadcaster.new_connection(key);
    body
}

/// Everything the admin server needs beyond the pipeline handle itself.
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub sensor_id: String,
    pub db_path: Option<PathBuf>,
    pub control: Option<Arc<dyn ControlSink>>,
}

/// Builds the `Publisher` the pipeline should be spawned with, sharing its
/// broadcaster with the eventual `serve` call.
pub fn sse_publisher(runtime: tokio::runtime::Handle) -> (Arc<SsePublisher>, EventBroadcaster<ConnectionKey>) {
    let broadcaster = EventBroadcaster::default();
    (
        Arc::new(SsePublisher::new(broadcaster.clone(), runtime)),
        broadcaster,
    )
}

/// Serves the admin/control API until `cancel` fires, then shuts down within
/// a bounded deadline (§5 timeouts: HTTP shutdown 1s).
pub async fn serve(
    config: ServerConfig,
    handle: PipelineHandle,
    broadcaster: EventBroadcaster<ConnectionKey>,
    cancel: CancellationToken,
) -> Result<()> {
    let history = match &config.db_path {
        Some(path) => match HistoryReader::open(path) {
            Ok(reader) => Some(Arc::new(reader)),
            Err(e) => {
                warn!(error = %e, "could not open history reader, tracks/history endpoint disabled");
                None
            }
        },
        None => None,
    };

    let state = AppState {
        handle,
        broadcaster,
        next_connection_id: Arc::new(AtomicU64::new(0)),
        history,
        control: config.control.unwrap_or_else(|| Arc::new(LiveCapabilities)),
        sensor_id: config.sensor_id,
    };

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/api/lidar/snapshot", get(get_snapshot_handler))
        .route("/api/lidar/acceptance", get(get_acceptance_handler))
        .route("/api/lidar/acceptance/reset", post(post_acceptance_reset_handler))
        .route("/api/lidar/grid_reset", post(post_grid_reset_handler))
        .route("/api/lidar/params", get(get_params_handler).post(post_params_handler))
        .route("/api/lidar/grid_status", get(get_grid_status_handler))
        .route("/api/lidar/tracks/history", get(get_tracks_history_handler))
        .route("/api/lidar/control", post(post_control_handler))
        .route(EVENTS_PATH, get(events_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .map_err(|source| lidar_types::Error::SocketBindError { addr: config.addr, source })?;

    info!(addr = %config.addr, "admin server listening");

    let serve_future = axum::serve(listener, router).with_graceful_shutdown(async move {
        cancel.cancelled().await;
        debug!("admin server shutting down");
    });

    serve_future.await.map_err(lidar_types::Error::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_capabilities_rejects_seek() {
        let sink = LiveCapabilities;
        let result = sink.handle(ControlMessage::Seek { timestamp_ns: Some(0), frame_index: None });
        assert!(result.is_err());
    }

    #[test]
    fn live_capabilities_answers_get_capabilities() {
        let sink = LiveCapabilities;
        let result = sink.handle(ControlMessage::GetCapabilities).unwrap();
        assert_eq!(result["mode"], "live");
    }
}
