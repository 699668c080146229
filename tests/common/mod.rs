#![allow(dead_code)]

use floowsynk::runtime::audit::{AuditSink, MemorySink};
use floowsynk::runtime::{ExecutionEngine, NodeExecutor};
use floowsynk::workflow::{CompiledWorkflow, Workflow, WorkflowSource};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub fn compile(definition: Value) -> Arc<CompiledWorkflow> {
    let workflow: Workflow = serde_json::from_value(definition).expect("workflow json");
    Arc::new(CompiledWorkflow::compile(workflow).expect("valid workflow"))
}

/// Engine resolving sub-workflows from `library`, recording into a memory sink
pub fn engine_with(library: &[Arc<CompiledWorkflow>]) -> (ExecutionEngine, Arc<MemorySink>) {
    let source: HashMap<String, Arc<CompiledWorkflow>> = library
        .iter()
        .map(|w| (w.id().to_string(), Arc::clone(w)))
        .collect();
    let sink = Arc::new(MemorySink::new());
    let engine = ExecutionEngine::new(
        Arc::new(NodeExecutor::new().expect("http client")),
        Arc::new(source) as Arc<dyn WorkflowSource>,
        Arc::clone(&sink) as Arc<dyn AuditSink>,
    );
    (engine, sink)
}
