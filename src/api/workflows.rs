/// Workflow management and run REST API endpoints
///
/// CRUD operations for workflow definitions with hot-reload support, plus
/// synchronous run endpoints. Saving a workflow validates it, swaps it into
/// the registry and reschedules its interval trigger.

use crate::{
    runtime::{
        audit::BroadcastSink,
        engine::{ExecutionEngine, RunResult},
        scheduler::IntervalSchedulerService,
    },
    workflow::{
        registry::{CompiledWorkflow, WorkflowRegistry},
        storage::WorkflowStorage,
        types::{ExecutionContext, Workflow},
    },
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Workflow storage for persistence
    pub storage: WorkflowStorage,
    /// Hot-reload registry for in-memory workflows
    pub registry: Arc<WorkflowRegistry>,
    /// Interval scheduler for background runs
    pub scheduler: Arc<IntervalSchedulerService>,
    /// Execution engine for API and webhook runs
    pub engine: Arc<ExecutionEngine>,
    /// Live replay feed
    pub live: BroadcastSink,
}

/// JSON error body with a status code
pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Response for workflow creation/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

/// Request body for workflow creation
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub workflow: Workflow,
}

/// Optional body of the run endpoints
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    /// Variables seeded into the scope before the run starts
    #[serde(default)]
    pub variables: Map<String, Value>,
}

/// Body of the quick-run endpoint
#[derive(Debug, Deserialize)]
pub struct QuickRunRequest {
    pub workflow: Workflow,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{id}/run", post(run_workflow))
        .route("/api/run", post(quick_run))
}

/// HTTP status for a finished run
pub(crate) fn run_status(result: &RunResult) -> StatusCode {
    if result.is_success() {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    }
}

/// Validate, persist, hot-reload and reschedule a workflow
async fn store_and_activate(state: &AppState, workflow: Workflow) -> Result<Arc<CompiledWorkflow>, ApiError> {
    CompiledWorkflow::compile(workflow.clone())
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    state.storage.save_workflow(&workflow).await.map_err(|e| {
        tracing::error!("Failed to save workflow {}: {}", workflow.id, e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to save workflow")
    })?;

    let compiled = state.registry.reload_workflow(&workflow.id).await.map_err(|e| {
        tracing::error!("Failed to reload workflow {} into registry: {}", workflow.id, e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to load workflow")
    })?;

    if let Err(e) = state.scheduler.add_or_update_workflow_trigger(&compiled).await {
        tracing::error!("Failed to schedule workflow {}: {}", workflow.id, e);
        return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to schedule workflow"));
    }

    Ok(compiled)
}

/// Create a new workflow
///
/// POST /api/workflows
/// Body: { "workflow": { "id": "...", "name": "...", "nodes": [...], "edges": [...] } }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let workflow = payload.workflow;

    if workflow.id.is_empty() || workflow.name.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "workflow id and name are required"));
    }

    match state.storage.get_workflow(&workflow.id).await {
        Ok(Some(_)) => {
            return Err(api_error(
                StatusCode::CONFLICT,
                format!("workflow '{}' already exists", workflow.id),
            ))
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("Failed to look up workflow {}: {}", workflow.id, e);
            return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage error"));
        }
    }

    let compiled = store_and_activate(&state, workflow).await?;

    tracing::info!("🔥 Created workflow: {} ({})", compiled.id(), compiled.workflow.name);

    Ok(Json(WorkflowResponse {
        id: compiled.id().to_string(),
        message: format!("Workflow '{}' created successfully", compiled.workflow.name),
    }))
}

/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    match state.storage.list_workflows().await {
        Ok(workflows) => Ok(Json(json!({ "workflows": workflows }))),
        Err(e) => {
            tracing::error!("Failed to list workflows: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, StatusCode> {
    match state.storage.get_workflow(&id).await {
        Ok(Some(workflow)) => Ok(Json(workflow)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to get workflow {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Update an existing workflow
///
/// PUT /api/workflows/{id}
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let mut workflow = payload.workflow;
    workflow.id = id.clone();

    if workflow.name.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "workflow name is required"));
    }

    match state.storage.get_workflow(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(api_error(StatusCode::NOT_FOUND, format!("workflow '{}' not found", id))),
        Err(e) => {
            tracing::error!("Failed to look up workflow {}: {}", id, e);
            return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "storage error"));
        }
    }

    let compiled = store_and_activate(&state, workflow).await?;

    tracing::info!("🔥 Hot-reloaded workflow: {} ({})", compiled.id(), compiled.workflow.name);

    Ok(Json(WorkflowResponse {
        id: compiled.id().to_string(),
        message: format!("Workflow '{}' updated successfully", compiled.workflow.name),
    }))
}

/// DELETE /api/workflows/{id}
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    state.scheduler.remove_workflow_trigger(&id).await;
    state.registry.remove_workflow(&id);

    match state.storage.delete_workflow(&id).await {
        Ok(true) => {
            if let Err(e) = state.storage.clear_interval_marker(&id).await {
                tracing::warn!("⚠️ Failed to clear interval marker for {}: {}", id, e);
            }
            tracing::info!("Deleted workflow: {}", id);
            Ok(Json(json!({ "message": "Workflow deleted successfully" })))
        }
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to delete workflow: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Run a stored workflow and wait for it to finish
///
/// POST /api/workflows/{id}/run
/// Body (optional): { "variables": { "name": "value" } }
async fn run_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<RunRequest>>,
) -> Result<(StatusCode, Json<RunResult>), ApiError> {
    let Some(workflow) = state.registry.get_workflow(&id) else {
        return Err(api_error(StatusCode::NOT_FOUND, format!("workflow '{}' not found", id)));
    };
    let request = body.map(|Json(request)| request).unwrap_or_default();

    tracing::info!("📥 Manual run requested for workflow {}", id);
    let context = ExecutionContext::manual(id).with_variables(request.variables);
    let result = state.engine.run(&workflow, context).await;

    Ok((run_status(&result), Json(result)))
}

/// Run an unsaved workflow definition
///
/// POST /api/run
/// Body: { "workflow": { ... }, "variables": { ... } }
async fn quick_run(
    State(state): State<AppState>,
    Json(payload): Json<QuickRunRequest>,
) -> Result<(StatusCode, Json<RunResult>), ApiError> {
    let compiled = CompiledWorkflow::compile(payload.workflow)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    tracing::info!("📥 Quick run requested for workflow {}", compiled.id());
    let context = ExecutionContext::manual(compiled.id().to_string()).with_variables(payload.variables);
    let result = state.engine.run(&compiled, context).await;

    Ok((run_status(&result), Json(result)))
}
