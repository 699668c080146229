/// Graph traversal engine
///
/// A run starts at node "0" and walks the graph depth-first: after a node
/// completes, each successor on its selected branch is processed in edge order,
/// and the whole subtree below one successor finishes before the next starts.
/// A node failure aborts the run and is reported with the id of the failing
/// node.
///
/// Control-flow nodes (loop, foreach, while, subprocess) are handled here since
/// they re-enter the traversal; every other node goes to `NodeExecutor`.

use crate::{
    expression::evaluate_boolean,
    runtime::{
        audit::{AuditSink, NodeStatus, ReplayRecord},
        error::{NodeError, RunError},
        executor::{NodeExecutor, NodeOutcome},
        template::render,
    },
    workflow::{
        registry::{CompiledWorkflow, WorkflowSource},
        types::{
            Branch, ExecutionContext, ForEachData, LoopData, Node, NodeKind, SubProcessData, TriggerKind,
            WhileData, ENTRY_NODE_ID,
        },
    },
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::{collections::BTreeMap, future::Future, pin::Pin, sync::Arc};

/// Boxed future used to make the traversal recursive
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Maximum nesting of sub-workflow calls
pub const MAX_SUBPROCESS_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    pub workflow_id: String,
    pub node_id: String,
    pub message: String,
}

/// Final state of a run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub process_id: String,
    pub workflow_id: String,
    pub trigger: TriggerKind,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunFailure>,
    /// Final scope in display form
    pub variables: BTreeMap<String, String>,
    /// Final scope as JSON values
    #[serde(skip)]
    pub values: BTreeMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    fn from_context(context: ExecutionContext, outcome: Result<(), RunError>) -> Self {
        let (status, error) = match outcome {
            Ok(()) => (RunStatus::Succeeded, None),
            Err(e) => (
                RunStatus::Failed,
                Some(RunFailure {
                    workflow_id: e.workflow_id,
                    node_id: e.node_id,
                    message: e.source.to_string(),
                }),
            ),
        };

        Self {
            variables: context.scope.to_string_map(),
            values: context
                .scope
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            process_id: context.process_id,
            workflow_id: context.workflow_id,
            trigger: context.trigger,
            status,
            error,
            started_at: context.started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// Why a node did not complete
enum Failure {
    /// The node itself failed
    Node(NodeError),
    /// A node further down (loop body, sub-workflow) failed
    Downstream(RunError),
}

impl From<NodeError> for Failure {
    fn from(error: NodeError) -> Self {
        Failure::Node(error)
    }
}

/// Workflow execution engine
pub struct ExecutionEngine {
    executor: Arc<NodeExecutor>,
    workflows: Arc<dyn WorkflowSource>,
    sink: Arc<dyn AuditSink>,
}

impl ExecutionEngine {
    pub fn new(executor: Arc<NodeExecutor>, workflows: Arc<dyn WorkflowSource>, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            executor,
            workflows,
            sink,
        }
    }

    /// Execute a workflow from its entry node
    pub async fn run(&self, workflow: &CompiledWorkflow, mut context: ExecutionContext) -> RunResult {
        tracing::info!(
            "🚀 Starting workflow execution: {} (process {}, trigger {:?})",
            workflow.id(),
            context.process_id,
            context.trigger
        );
        let start_time = std::time::Instant::now();

        let outcome = self.process(workflow, &mut context, ENTRY_NODE_ID).await;

        match &outcome {
            Ok(()) => tracing::info!(
                "✅ Workflow {} completed in {:?}",
                workflow.id(),
                start_time.elapsed()
            ),
            Err(e) => tracing::error!(
                "❌ Workflow {} failed in {:?}: {}",
                workflow.id(),
                start_time.elapsed(),
                e
            ),
        }

        RunResult::from_context(context, outcome)
    }

    /// Resolve a workflow by id and run it
    pub async fn run_by_id(&self, workflow_id: &str, context: ExecutionContext) -> anyhow::Result<RunResult> {
        let workflow = self
            .workflows
            .get_workflow(workflow_id)
            .ok_or_else(|| anyhow::anyhow!("Workflow not found: {}", workflow_id))?;
        Ok(self.run(&workflow, context).await)
    }

    /// Run one node and everything downstream of it
    fn process<'a>(
        &'a self,
        workflow: &'a CompiledWorkflow,
        context: &'a mut ExecutionContext,
        node_id: &'a str,
    ) -> BoxFuture<'a, Result<(), RunError>> {
        Box::pin(async move {
            let Some(node) = workflow.node_by_id(node_id) else {
                tracing::debug!("🔍 Node {} not found in {}, ending path", node_id, workflow.id());
                return Ok(());
            };

            context.scope.promote_output();
            self.record(
                context,
                workflow,
                node,
                NodeStatus::Running,
                format!("Running {} node", node.kind.type_name()),
                node.data_value(),
            );

            match self.dispatch(workflow, context, node).await {
                Ok(outcome) => {
                    if let Some(output) = outcome.output {
                        context.scope.set_output(output);
                    }
                    let snapshot = outcome.snapshot.unwrap_or_else(|| node.data_value());
                    self.record(context, workflow, node, NodeStatus::Completed, outcome.message, snapshot);

                    self.next_process(workflow, context, &node.id, &outcome.branch).await
                }
                Err(Failure::Node(error)) => {
                    tracing::error!("❌ Node {} failed: {}", node.id, error);
                    self.record(context, workflow, node, NodeStatus::Failed, error.to_string(), node.data_value());
                    Err(RunError {
                        workflow_id: workflow.id().to_string(),
                        node_id: node.id.clone(),
                        source: error,
                    })
                }
                Err(Failure::Downstream(error)) => {
                    self.record(
                        context,
                        workflow,
                        node,
                        NodeStatus::Failed,
                        format!("Aborted by node {}: {}", error.node_id, error.source),
                        node.data_value(),
                    );
                    Err(error)
                }
            }
        })
    }

    /// Process every successor on the selected branch, in edge order
    async fn next_process(
        &self,
        workflow: &CompiledWorkflow,
        context: &mut ExecutionContext,
        node_id: &str,
        branch: &Branch,
    ) -> Result<(), RunError> {
        let (targets, found) = workflow.next_nodes(node_id, branch);
        if !found {
            tracing::debug!("🏁 No {} edges leave node {}", branch, node_id);
            return Ok(());
        }

        for target in targets {
            self.process(workflow, context, &target.id).await?;
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        workflow: &CompiledWorkflow,
        context: &mut ExecutionContext,
        node: &Node,
    ) -> Result<NodeOutcome, Failure> {
        match &node.kind {
            NodeKind::Loop(data) => self.run_loop(workflow, context, node, data).await,
            NodeKind::ForEach(data) => self.run_foreach(workflow, context, node, data).await,
            NodeKind::While(data) => self.run_while(workflow, context, node, data).await,
            NodeKind::SubProcess(data) => self.run_subprocess(workflow, context, node, data).await,
            _ => Ok(self.executor.execute_node(node, &mut context.scope).await?),
        }
    }

    /// Run the body branch `iteration` times, then continue on the default branch
    async fn run_loop(
        &self,
        workflow: &CompiledWorkflow,
        context: &mut ExecutionContext,
        node: &Node,
        data: &LoopData,
    ) -> Result<NodeOutcome, Failure> {
        for iteration in 0..data.iteration {
            self.record(
                context,
                workflow,
                node,
                NodeStatus::Info,
                format!("Iteration {} of {}", iteration + 1, data.iteration),
                json!({ "iteration": iteration }),
            );
            self.next_process(workflow, context, &node.id, &Branch::body())
                .await
                .map_err(Failure::Downstream)?;
        }

        Ok(NodeOutcome::new(Branch::Default).with_message("Loop processed successfully"))
    }

    /// Run the body once per list item, exposing it as `<list>.item` and `output`
    async fn run_foreach(
        &self,
        workflow: &CompiledWorkflow,
        context: &mut ExecutionContext,
        node: &Node,
        data: &ForEachData,
    ) -> Result<NodeOutcome, Failure> {
        let items = context.scope.list(&data.list_variable)?.clone();
        let item_variable = format!("{}.item", data.list_variable);

        for (index, item) in items.iter().enumerate() {
            context.scope.set(&item_variable, item.clone())?;
            context.scope.set_output(item.clone());
            self.record(
                context,
                workflow,
                node,
                NodeStatus::Info,
                format!("Item {} of {}", index + 1, items.len()),
                json!({ "index": index, "item": item }),
            );
            self.next_process(workflow, context, &node.id, &Branch::body())
                .await
                .map_err(Failure::Downstream)?;
        }

        Ok(NodeOutcome::new(Branch::Default).with_message(format!("Processed {} items", items.len())))
    }

    /// Re-render and re-evaluate the condition before every pass, up to `limit` passes
    async fn run_while(
        &self,
        workflow: &CompiledWorkflow,
        context: &mut ExecutionContext,
        node: &Node,
        data: &WhileData,
    ) -> Result<NodeOutcome, Failure> {
        let mut iteration: u32 = 0;

        loop {
            let expression = render(&data.expression, &context.scope, None);
            let holds = evaluate_boolean(&expression).map_err(|e| NodeError::expression(&expression, e))?;
            if !holds || iteration >= data.limit {
                break;
            }

            self.record(
                context,
                workflow,
                node,
                NodeStatus::Info,
                format!("Iteration {} (limit {})", iteration + 1, data.limit),
                json!({ "iteration": iteration, "expression": expression }),
            );
            self.next_process(workflow, context, &node.id, &Branch::body())
                .await
                .map_err(Failure::Downstream)?;
            iteration += 1;
        }

        Ok(NodeOutcome::new(Branch::Default).with_message(format!("While loop ran {} iterations", iteration)))
    }

    /// Run another workflow against the same scope, then continue here
    async fn run_subprocess(
        &self,
        workflow: &CompiledWorkflow,
        context: &mut ExecutionContext,
        node: &Node,
        data: &SubProcessData,
    ) -> Result<NodeOutcome, Failure> {
        if context.depth >= MAX_SUBPROCESS_DEPTH {
            return Err(NodeError::SubProcessDepth(MAX_SUBPROCESS_DEPTH).into());
        }
        let child = self
            .workflows
            .get_workflow(&data.sub_process_id)
            .ok_or_else(|| NodeError::SubProcessNotFound(data.sub_process_id.clone()))?;

        self.record(
            context,
            workflow,
            node,
            NodeStatus::Info,
            format!("SubProcess {} is running", child.workflow.name),
            json!({ "subProcessId": data.sub_process_id }),
        );

        context.depth += 1;
        let outcome = self.process(&child, context, ENTRY_NODE_ID).await;
        context.depth -= 1;
        outcome.map_err(Failure::Downstream)?;

        Ok(NodeOutcome::pass().with_message(format!("SubProcess {} completed", child.workflow.name)))
    }

    fn record(
        &self,
        context: &mut ExecutionContext,
        workflow: &CompiledWorkflow,
        node: &Node,
        status: NodeStatus,
        message: String,
        data: Value,
    ) {
        let subprocess_id = (workflow.id() != context.workflow_id).then(|| workflow.id().to_string());
        let record = ReplayRecord {
            process_id: context.process_id.clone(),
            workflow_id: context.workflow_id.clone(),
            subprocess_id,
            sequence: context.next_sequence(),
            node_id: node.id.clone(),
            node_type: node.kind.type_name().to_string(),
            status,
            message,
            data,
            variables: context.scope.to_string_map(),
            created_at: Utc::now(),
        };
        self.sink.emit(&record);
    }
}
