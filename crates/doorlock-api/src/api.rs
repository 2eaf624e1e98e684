//! HTTP routes over the lock manager

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use doorlock_core::{AttributeReport, DeviceHints, LockError, LockManager, PollGroup};
use doorlock_protocol::{DeviceAddress, DoorLockCommand, SoundVolume};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::websocket;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<LockManager>,
}

/// API response wrapper using serde_json::Value for flexibility
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: Some(serde_json::to_value(data).unwrap_or(serde_json::Value::Null)),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type Reply = (StatusCode, Json<ApiResponse>);

fn status_for(err: &LockError) -> StatusCode {
    match err {
        LockError::InvalidAddress(_)
        | LockError::InvalidValue(_)
        | LockError::UnknownAttribute { .. } => StatusCode::BAD_REQUEST,
        LockError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
        LockError::NoChannelAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        LockError::AllChannelsExhausted { .. } => StatusCode::BAD_GATEWAY,
        LockError::Io(_) | LockError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply<T: Serialize>(result: Result<T, LockError>) -> Reply {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                tracing::warn!("Request failed: {}", e);
            }
            // Exhaustion carries the per-channel failures
            let mut body = ApiResponse::error(e.to_string());
            if let LockError::AllChannelsExhausted { failures, .. } = &e {
                body.data = serde_json::to_value(failures).ok();
            }
            (status, Json(body))
        }
    }
}

/// Register lock request
#[derive(Deserialize)]
struct RegisterRequest {
    ieee: String,
    #[serde(default)]
    primary_endpoint: Option<u8>,
    /// Further endpoint hints, tried after the primary one
    #[serde(default)]
    endpoints: Vec<u8>,
    #[serde(default)]
    name: Option<String>,
}

/// Raw cluster command, by id or by name
#[derive(Deserialize)]
struct CommandRequest {
    command: CommandRef,
    #[serde(default)]
    params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CommandRef {
    Id(u8),
    Name(String),
}

#[derive(Deserialize)]
struct PollingRequest {
    group: PollGroup,
    #[serde(default)]
    interval_secs: Option<u64>,
}

#[derive(Deserialize)]
struct AutoRelockRequest {
    seconds: u32,
}

#[derive(Deserialize)]
struct SoundVolumeRequest {
    volume: String,
}

#[derive(Deserialize)]
struct PinRequest {
    user_id: u16,
    pin_code: String,
}

/// Attribute report pushed by the host
#[derive(Deserialize)]
struct ReportRequest {
    ieee: String,
    cluster_id: u16,
    attribute_id: u16,
    value: serde_json::Value,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

/// Lock details with its state snapshot
#[derive(Serialize)]
struct LockDetails {
    #[serde(flatten)]
    device: doorlock_core::LockDevice,
    state: std::collections::BTreeMap<doorlock_protocol::StateKey, doorlock_core::StateEntry>,
    polling: Vec<PollGroup>,
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(ApiResponse::success(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

async fn list_locks(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.manager.devices()))
}

async fn register_lock(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Reply {
    let mut endpoints: Vec<u8> = req.primary_endpoint.into_iter().collect();
    endpoints.extend(req.endpoints);
    let hints = DeviceHints {
        endpoints,
        name: req.name,
    };
    reply(state.manager.register_device(&req.ieee, hints))
}

async fn get_lock(State(state): State<AppState>, Path(ieee): Path<String>) -> Reply {
    let manager = &state.manager;
    reply(manager.device(&ieee).and_then(|device| {
        Ok(LockDetails {
            state: manager.state(&ieee)?,
            polling: manager.polling_groups(&ieee)?,
            device,
        })
    }))
}

async fn deregister_lock(State(state): State<AppState>, Path(ieee): Path<String>) -> Reply {
    reply(state.manager.deregister_device(&ieee))
}

async fn lock(State(state): State<AppState>, Path(ieee): Path<String>) -> Reply {
    reply(
        state
            .manager
            .lock(&ieee)
            .await
            .map(|()| serde_json::json!({ "lock_state": "locked" })),
    )
}

async fn unlock(State(state): State<AppState>, Path(ieee): Path<String>) -> Reply {
    reply(
        state
            .manager
            .unlock(&ieee)
            .await
            .map(|()| serde_json::json!({ "lock_state": "unlocked" })),
    )
}

async fn send_command(
    State(state): State<AppState>,
    Path(ieee): Path<String>,
    Json(req): Json<CommandRequest>,
) -> Reply {
    let command_id = match req.command {
        CommandRef::Id(id) => id,
        CommandRef::Name(name) => match name.parse::<DoorLockCommand>() {
            Ok(command) => command.id(),
            Err(e) => return reply::<()>(Err(e.into())),
        },
    };
    reply(state.manager.send_command(&ieee, command_id, req.params).await)
}

async fn refresh(State(state): State<AppState>, Path(ieee): Path<String>) -> Reply {
    reply(state.manager.refresh(&ieee).await)
}

async fn polling_groups(State(state): State<AppState>, Path(ieee): Path<String>) -> Reply {
    reply(state.manager.polling_groups(&ieee))
}

async fn start_polling(
    State(state): State<AppState>,
    Path(ieee): Path<String>,
    Json(req): Json<PollingRequest>,
) -> Reply {
    let manager = &state.manager;
    let interval_secs = req
        .interval_secs
        .unwrap_or_else(|| req.group.interval(&manager.config().poll).as_secs());
    reply(
        manager
            .start_polling(&ieee, req.group, interval_secs)
            .map(|()| serde_json::json!({ "group": req.group, "interval_secs": interval_secs })),
    )
}

async fn stop_polling(State(state): State<AppState>, Path(ieee): Path<String>) -> Reply {
    reply(
        state
            .manager
            .stop_polling(&ieee)
            .map(|stopped| serde_json::json!({ "stopped": stopped })),
    )
}

async fn get_auto_relock(State(state): State<AppState>, Path(ieee): Path<String>) -> Reply {
    reply(
        state
            .manager
            .auto_relock_time(&ieee)
            .await
            .map(|seconds| serde_json::json!({ "seconds": seconds })),
    )
}

async fn set_auto_relock(
    State(state): State<AppState>,
    Path(ieee): Path<String>,
    Json(req): Json<AutoRelockRequest>,
) -> Reply {
    reply(
        state
            .manager
            .set_auto_relock_time(&ieee, req.seconds)
            .await
            .map(|()| serde_json::json!({ "seconds": req.seconds })),
    )
}

async fn get_sound_volume(State(state): State<AppState>, Path(ieee): Path<String>) -> Reply {
    reply(
        state
            .manager
            .sound_volume(&ieee)
            .await
            .map(|volume| serde_json::json!({ "volume": volume })),
    )
}

async fn set_sound_volume(
    State(state): State<AppState>,
    Path(ieee): Path<String>,
    Json(req): Json<SoundVolumeRequest>,
) -> Reply {
    let volume = match req.volume.parse::<SoundVolume>() {
        Ok(volume) => volume,
        Err(e) => return reply::<()>(Err(e.into())),
    };
    reply(
        state
            .manager
            .set_sound_volume(&ieee, volume)
            .await
            .map(|()| serde_json::json!({ "volume": volume })),
    )
}

async fn set_pin(
    State(state): State<AppState>,
    Path(ieee): Path<String>,
    Json(req): Json<PinRequest>,
) -> Reply {
    reply(
        state
            .manager
            .set_pin_code(&ieee, req.user_id, &req.pin_code)
            .await
            .map(|()| serde_json::json!({ "user_id": req.user_id })),
    )
}

async fn clear_pin(
    State(state): State<AppState>,
    Path((ieee, user_id)): Path<(String, u16)>,
) -> Reply {
    reply(
        state
            .manager
            .clear_pin_code(&ieee, user_id)
            .await
            .map(|()| serde_json::json!({ "user_id": user_id })),
    )
}

async fn clear_all_pins(State(state): State<AppState>, Path(ieee): Path<String>) -> Reply {
    reply(state.manager.clear_all_pin_codes(&ieee).await)
}

async fn channels(State(state): State<AppState>, Path(ieee): Path<String>) -> Reply {
    reply(state.manager.channel_report(&ieee).await)
}

async fn report(State(state): State<AppState>, Json(req): Json<ReportRequest>) -> Reply {
    let address = match DeviceAddress::normalize(&req.ieee) {
        Ok(address) => address,
        Err(e) => return reply::<()>(Err(e.into())),
    };
    let report = AttributeReport {
        address,
        cluster_id: req.cluster_id,
        attribute_id: req.attribute_id,
        value: req.value,
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
    };
    reply(
        state
            .manager
            .on_attribute_report(&report)
            .map(|applied| serde_json::json!({ "applied": applied })),
    )
}

/// WebSocket handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket::handle_socket(socket, state))
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/locks", get(list_locks).post(register_lock))
        .route("/api/v1/locks/:ieee", get(get_lock).delete(deregister_lock))
        .route("/api/v1/locks/:ieee/lock", post(lock))
        .route("/api/v1/locks/:ieee/unlock", post(unlock))
        .route("/api/v1/locks/:ieee/command", post(send_command))
        .route("/api/v1/locks/:ieee/refresh", post(refresh))
        .route(
            "/api/v1/locks/:ieee/polling",
            get(polling_groups).post(start_polling).delete(stop_polling),
        )
        .route(
            "/api/v1/locks/:ieee/auto-relock",
            get(get_auto_relock).put(set_auto_relock),
        )
        .route(
            "/api/v1/locks/:ieee/sound-volume",
            get(get_sound_volume).put(set_sound_volume),
        )
        .route("/api/v1/locks/:ieee/pin", post(set_pin).delete(clear_all_pins))
        .route("/api/v1/locks/:ieee/pin/:user_id", delete(clear_pin))
        .route("/api/v1/locks/:ieee/channels", get(channels))
        .route("/api/v1/reports", post(report))
        // WebSocket
        .route("/ws", get(ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
