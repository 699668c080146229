/// Workflow Management Layer
///
/// This module handles workflow definitions, persistence, and the hot-reload registry:
/// - Type definitions (Workflow, Node, Edge)
/// - SQLite persistence with sqlx
/// - Lock-free hot-reload registry using ArcSwap

// Core workflow type definitions
pub mod types;

// SQLite persistence for workflows, run history and interval markers
pub mod storage;

// Hot-reload registry of compiled workflow graphs
pub mod registry;

// Re-export commonly used types
pub use registry::{CompiledWorkflow, WorkflowRegistry, WorkflowSource};
pub use types::{Branch, Edge, ExecutionContext, Node, NodeKind, Workflow, WorkflowError};
