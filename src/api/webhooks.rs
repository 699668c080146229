/// Webhook trigger endpoint
///
/// POST /api/webhook/{workflow_id} runs a workflow whose entry node is a
/// webhook node. The request body becomes the run's initial `input`.

use crate::api::workflows::{api_error, run_status, ApiError, AppState};
use crate::runtime::engine::RunResult;
use crate::workflow::types::ExecutionContext;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde_json::Value;

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new().route("/api/webhook/{workflow_id}", post(execute_webhook))
}

/// Execute a workflow via webhook trigger
///
/// Body: JSON payload or plain text
async fn execute_webhook(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    body: String,
) -> Result<(StatusCode, Json<RunResult>), ApiError> {
    tracing::info!("📥 Webhook request received for workflow {}", workflow_id);
    tracing::debug!("📄 Request body: {}", body);

    // Non-JSON bodies are passed through as text
    let payload = serde_json::from_str::<Value>(&body).unwrap_or_else(|_| {
        tracing::debug!("📄 Webhook body for {} is not JSON, using raw text", workflow_id);
        Value::String(body)
    });

    let compiled_workflow = match state.registry.get_workflow(&workflow_id) {
        Some(workflow) if workflow.is_webhook() => workflow,
        Some(_) => {
            tracing::warn!("❌ Workflow {} is not webhook-triggered", workflow_id);
            return Err(api_error(
                StatusCode::NOT_FOUND,
                format!("workflow '{}' has no webhook trigger", workflow_id),
            ));
        }
        None => {
            tracing::warn!("❌ Webhook called for unknown workflow: {}", workflow_id);
            return Err(api_error(
                StatusCode::NOT_FOUND,
                format!("workflow '{}' not found", workflow_id),
            ));
        }
    };

    let context = ExecutionContext::from_webhook_data(workflow_id.clone(), payload);
    let result = state.engine.run(&compiled_workflow, context).await;

    if let Some(error) = &result.error {
        tracing::error!(
            "❌ Webhook run of {} failed at node {}: {}",
            workflow_id,
            error.node_id,
            error.message
        );
    }

    Ok((run_status(&result), Json(result)))
}
