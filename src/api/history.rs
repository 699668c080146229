/// Run history and live replay endpoints
///
/// History is read back from the `replay_data` table; the live feed streams
/// replay records over a websocket as the engine emits them.

use crate::api::workflows::AppState;
use crate::runtime::audit::ReplayRecord;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub workflow_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveQuery {
    pub process_id: Option<String>,
}

pub fn create_history_routes() -> Router<AppState> {
    Router::new()
        .route("/api/history", get(list_history))
        .route("/api/history/{process_id}", get(get_history))
        .route("/api/runs/live", get(live_feed))
}

/// GET /api/history?workflowId=...
async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, StatusCode> {
    match state.storage.list_history(query.workflow_id.as_deref()).await {
        Ok(runs) => Ok(Json(json!({ "runs": runs }))),
        Err(e) => {
            tracing::error!("Failed to list run history: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/history/{process_id}
async fn get_history(
    State(state): State<AppState>,
    Path(process_id): Path<String>,
) -> Result<Json<Vec<ReplayRecord>>, StatusCode> {
    match state.storage.get_replay(&process_id).await {
        Ok(records) if records.is_empty() => Err(StatusCode::NOT_FOUND),
        Ok(records) => Ok(Json(records)),
        Err(e) => {
            tracing::error!("Failed to load replay for {}: {}", process_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/runs/live?processId=... (websocket)
async fn live_feed(
    State(state): State<AppState>,
    Query(query): Query<LiveQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| stream_records(socket, state, query.process_id))
}

async fn stream_records(mut socket: WebSocket, state: AppState, process_id: Option<String>) {
    let mut receiver = state.live.subscribe();
    tracing::debug!("🔌 Live replay subscriber connected");

    loop {
        let record = match receiver.recv().await {
            Ok(record) => record,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("⚠️ Live replay subscriber lagged, {} records skipped", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if process_id.as_deref().is_some_and(|id| id != record.process_id) {
            continue;
        }

        let payload = match serde_json::to_string(&record) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode replay record: {}", e);
                continue;
            }
        };
        if socket.send(Message::Text(payload.into())).await.is_err() {
            break;
        }
    }

    tracing::debug!("🔌 Live replay subscriber disconnected");
}
