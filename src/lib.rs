/// Floowsynk: low-code workflow automation backend
///
/// This library provides the workflow graph engine with hot-reload registry,
/// a `{{ placeholder }}` template renderer, an embedded expression evaluator and
/// the node handlers behind the editor's node palette.

// Core configuration and setup
pub mod config;

// Arithmetic/boolean expression evaluator used by math, condition and while nodes
pub mod expression;

// Workflow management layer - definitions, storage and registry
pub mod workflow;

// Runtime execution engine - traversal, node handlers, audit and scheduling
pub mod runtime;

// HTTP API layer - workflow management, runs, webhooks and history
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use runtime::{ExecutionEngine, RunResult};
pub use server::start_server;
pub use workflow::{Edge, Node, NodeKind, Workflow};
