/// Runtime Execution Engine
///
/// This module executes workflows against a per-run variable scope:
/// - Depth-first graph traversal with branch selection
/// - Leaf node handlers (text, math, api, regex, ...)
/// - Template rendering and the variable scope
/// - Audit trail sinks and the interval scheduler

// Graph traversal and control-flow nodes
pub mod engine;

// Individual node execution handlers
pub mod executor;

// Node and run error types
pub mod error;

// Per-run variable scope
pub mod scope;

// {{ placeholder }} rendering
pub mod template;

// Replay records and their sinks
pub mod audit;

// Background scheduler for interval-triggered workflows
pub mod scheduler;

// Re-export main types
pub use audit::{AuditSink, ReplayRecord};
pub use engine::{ExecutionEngine, RunResult, RunStatus};
pub use error::{NodeError, RunError};
pub use executor::{NodeExecutor, NodeOutcome};
pub use scheduler::IntervalSchedulerService;
pub use scope::Scope;
