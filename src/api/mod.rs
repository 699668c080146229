/// HTTP API Layer
///
/// This module provides the REST API endpoints. It handles:
/// - Workflow CRUD operations and synchronous runs
/// - Webhook-triggered runs
/// - Run history and the live replay feed

// Workflow management and run endpoints
pub mod workflows;

// Webhook trigger endpoint
pub mod webhooks;

// Replay history and live feed
pub mod history;

// Re-export router builders
pub use history::create_history_routes;
pub use webhooks::create_webhook_routes;
pub use workflows::{create_workflow_routes, AppState};
