/// Hot-reload workflow registry using ArcSwap
///
/// Workflows are compiled into a petgraph graph once, when they are loaded or
/// saved. Each update swaps the entire registry pointer, so runs in flight keep
/// the definition they started with while new runs pick up the new one.

use crate::workflow::{
    storage::WorkflowStorage,
    types::{Branch, IntervalData, Node, NodeKind, Workflow, WorkflowError, ENTRY_NODE_ID},
};
use anyhow::Result;
use arc_swap::ArcSwap;
use petgraph::{
    algo::is_cyclic_directed,
    graph::{DiGraph, NodeIndex},
    visit::{Bfs, EdgeRef},
    Direction,
};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

/// Anything the engine can resolve sub-workflows from
pub trait WorkflowSource: Send + Sync {
    fn get_workflow(&self, workflow_id: &str) -> Option<Arc<CompiledWorkflow>>;
}

/// Fixed in-memory set of workflows
impl WorkflowSource for HashMap<String, Arc<CompiledWorkflow>> {
    fn get_workflow(&self, workflow_id: &str) -> Option<Arc<CompiledWorkflow>> {
        self.get(workflow_id).cloned()
    }
}

/// Edge weight: declaration order plus the branch label
#[derive(Debug, Clone)]
struct EdgeRoute {
    order: usize,
    handle: String,
}

/// Workflow with its validated routing graph
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    /// Base workflow definition
    pub workflow: Workflow,

    /// Graph weights are indices into `workflow.nodes`
    graph: DiGraph<usize, EdgeRoute>,

    /// node id → graph index
    node_index: HashMap<String, NodeIndex>,
}

impl CompiledWorkflow {
    /// Validate a workflow and build its routing graph
    ///
    /// Requires a node "0", unique node ids and edges between existing nodes.
    /// Cycles are allowed; nodes unreachable from "0" are only reported.
    pub fn compile(workflow: Workflow) -> Result<Self, WorkflowError> {
        let mut graph = DiGraph::new();
        let mut node_index = HashMap::new();

        for (position, node) in workflow.nodes.iter().enumerate() {
            let index = graph.add_node(position);
            if node_index.insert(node.id.clone(), index).is_some() {
                return Err(WorkflowError::DuplicateNode {
                    workflow_id: workflow.id.clone(),
                    node_id: node.id.clone(),
                });
            }
        }

        if !node_index.contains_key(ENTRY_NODE_ID) {
            return Err(WorkflowError::MissingEntryNode(workflow.id.clone()));
        }

        for (order, edge) in workflow.edges.iter().enumerate() {
            let endpoint = |id: &str| {
                node_index.get(id).copied().ok_or_else(|| WorkflowError::DanglingEdge {
                    workflow_id: workflow.id.clone(),
                    edge_id: edge.id.clone(),
                    node_id: id.to_string(),
                })
            };
            let source = endpoint(&edge.source)?;
            let target = endpoint(&edge.target)?;
            graph.add_edge(
                source,
                target,
                EdgeRoute {
                    order,
                    handle: edge.source_handle.clone(),
                },
            );
        }

        let compiled = Self {
            workflow,
            graph,
            node_index,
        };
        compiled.report_shape();
        Ok(compiled)
    }

    fn report_shape(&self) {
        let reachable = self.reachable_from_entry();
        for node in &self.workflow.nodes {
            if !reachable.contains(node.id.as_str()) {
                tracing::warn!(
                    "⚠️ Node '{}' in workflow '{}' is unreachable from the entry node",
                    node.id,
                    self.workflow.id
                );
            }
        }

        if is_cyclic_directed(&self.graph) {
            tracing::debug!("🔁 Workflow '{}' contains cycles", self.workflow.id);
        }
    }

    pub fn id(&self) -> &str {
        &self.workflow.id
    }

    pub fn node_by_id(&self, node_id: &str) -> Option<&Node> {
        let index = self.node_index.get(node_id)?;
        self.workflow.nodes.get(self.graph[*index])
    }

    /// The node every run starts from
    pub fn entry_node(&self) -> Option<&Node> {
        self.node_by_id(ENTRY_NODE_ID)
    }

    /// Interval configuration when the entry node is an interval trigger
    pub fn interval_trigger(&self) -> Option<&IntervalData> {
        match &self.entry_node()?.kind {
            NodeKind::Interval(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_webhook(&self) -> bool {
        matches!(self.entry_node().map(|n| &n.kind), Some(NodeKind::Webhook))
    }

    /// Successors of `node_id` whose edge matches `branch`, in edge order
    ///
    /// The flag is false when no edge matched, which ends that path.
    pub fn next_nodes(&self, node_id: &str, branch: &Branch) -> (Vec<&Node>, bool) {
        let Some(&index) = self.node_index.get(node_id) else {
            return (Vec::new(), false);
        };

        let mut routes: Vec<(usize, NodeIndex)> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .filter(|edge| branch.accepts(&edge.weight().handle))
            .map(|edge| (edge.weight().order, edge.target()))
            .collect();
        routes.sort_by_key(|(order, _)| *order);

        let targets: Vec<&Node> = routes
            .into_iter()
            .filter_map(|(_, target)| self.workflow.nodes.get(self.graph[target]))
            .collect();
        let found = !targets.is_empty();
        (targets, found)
    }

    /// Ids of all nodes reachable from node "0"
    pub fn reachable_from_entry(&self) -> HashSet<&str> {
        let mut reachable = HashSet::new();
        let Some(&start) = self.node_index.get(ENTRY_NODE_ID) else {
            return reachable;
        };

        let mut bfs = Bfs::new(&self.graph, start);
        while let Some(index) = bfs.next(&self.graph) {
            if let Some(node) = self.workflow.nodes.get(self.graph[index]) {
                reachable.insert(node.id.as_str());
            }
        }
        reachable
    }
}

/// Lock-free workflow registry for hot-reload capabilities
#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Key: workflow_id, Value: compiled workflow definition
    workflows: ArcSwap<HashMap<String, Arc<CompiledWorkflow>>>,

    /// Reference to persistent storage for reload operations
    storage: WorkflowStorage,
}

impl WorkflowRegistry {
    pub fn new(storage: WorkflowStorage) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    /// Load and compile every stored workflow
    ///
    /// Workflows that fail validation are logged and skipped so one bad
    /// definition does not keep the server from starting.
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored_workflows = self.storage.load_all_workflows().await?;
        let mut compiled = HashMap::new();

        for (id, workflow) in stored_workflows {
            match CompiledWorkflow::compile(workflow) {
                Ok(workflow) => {
                    compiled.insert(id, Arc::new(workflow));
                }
                Err(e) => tracing::error!("❌ Skipping invalid workflow {}: {}", id, e),
            }
        }

        self.workflows.store(Arc::new(compiled));

        tracing::info!(
            "Initialized workflow registry with {} workflows",
            self.workflows.load().len()
        );

        Ok(())
    }

    /// Compile and swap in a single workflow
    pub fn insert(&self, workflow: Workflow) -> Result<Arc<CompiledWorkflow>, WorkflowError> {
        let compiled = Arc::new(CompiledWorkflow::compile(workflow)?);

        let current = self.workflows.load();
        let mut new_registry = (**current).clone();
        new_registry.insert(compiled.id().to_string(), compiled.clone());
        self.workflows.store(Arc::new(new_registry));

        Ok(compiled)
    }

    /// Hot-reload a single workflow from storage
    pub async fn reload_workflow(&self, workflow_id: &str) -> Result<Arc<CompiledWorkflow>> {
        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Workflow not found: {}", workflow_id))?;

        let compiled = self.insert(workflow)?;

        tracing::info!("Hot-reloaded workflow: {}", workflow_id);

        Ok(compiled)
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Option<Arc<CompiledWorkflow>> {
        self.workflows.load().get(workflow_id).cloned()
    }

    pub fn list_workflow_ids(&self) -> Vec<String> {
        self.workflows.load().keys().cloned().collect()
    }

    /// Workflows whose entry node is an interval trigger
    pub fn interval_workflows(&self) -> Vec<Arc<CompiledWorkflow>> {
        self.workflows
            .load()
            .values()
            .filter(|compiled| compiled.interval_trigger().is_some())
            .cloned()
            .collect()
    }

    pub fn remove_workflow(&self, workflow_id: &str) -> bool {
        let current = self.workflows.load();
        let mut new_registry = (**current).clone();

        let removed = new_registry.remove(workflow_id).is_some();
        if removed {
            self.workflows.store(Arc::new(new_registry));
            tracing::info!("Removed workflow from registry: {}", workflow_id);
        }
        removed
    }
}

impl WorkflowSource for WorkflowRegistry {
    fn get_workflow(&self, workflow_id: &str) -> Option<Arc<CompiledWorkflow>> {
        WorkflowRegistry::get_workflow(self, workflow_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workflow(value: serde_json::Value) -> Workflow {
        serde_json::from_value(value).unwrap()
    }

    fn ids(nodes: &[&Node]) -> Vec<String> {
        nodes.iter().map(|n| n.id.clone()).collect()
    }

    fn branching() -> CompiledWorkflow {
        CompiledWorkflow::compile(workflow(json!({
            "id": "wf",
            "name": "Branching",
            "nodes": [
                { "id": "0", "type": "defaultnode" },
                { "id": "1", "type": "condition", "data": { "expression": "1 > 0" } },
                { "id": "2", "type": "log", "data": { "message": "yes" } },
                { "id": "3", "type": "log", "data": { "message": "no" } },
                { "id": "4", "type": "log", "data": { "message": "also yes" } }
            ],
            "edges": [
                { "id": "a", "source": "0", "target": "1" },
                { "id": "c", "source": "1", "sourceHandle": "False", "target": "3" },
                { "id": "b", "source": "1", "sourceHandle": "True", "target": "2" },
                { "id": "d", "source": "1", "sourceHandle": "True", "target": "4" }
            ]
        })))
        .unwrap()
    }

    #[test]
    fn next_nodes_filters_by_handle_in_edge_order() {
        let compiled = branching();

        let (targets, found) = compiled.next_nodes("1", &Branch::handle("True"));
        assert!(found);
        assert_eq!(ids(&targets), vec!["2", "4"]);

        let (targets, _) = compiled.next_nodes("1", &Branch::All);
        assert_eq!(ids(&targets), vec!["3", "2", "4"]);

        let (targets, found) = compiled.next_nodes("1", &Branch::Default);
        assert!(!found);
        assert!(targets.is_empty());
    }

    #[test]
    fn missing_node_has_no_successors() {
        let compiled = branching();
        let (targets, found) = compiled.next_nodes("nope", &Branch::All);
        assert!(!found);
        assert!(targets.is_empty());
    }

    #[test]
    fn rejects_missing_entry_node() {
        let err = CompiledWorkflow::compile(workflow(json!({
            "id": "wf", "name": "x",
            "nodes": [{ "id": "1", "type": "defaultnode" }],
            "edges": []
        })))
        .unwrap_err();
        assert_eq!(err, WorkflowError::MissingEntryNode("wf".to_string()));
    }

    #[test]
    fn rejects_duplicate_ids_and_dangling_edges() {
        let duplicate = CompiledWorkflow::compile(workflow(json!({
            "id": "wf", "name": "x",
            "nodes": [{ "id": "0", "type": "defaultnode" }, { "id": "0", "type": "webhook" }],
            "edges": []
        })));
        assert!(matches!(duplicate, Err(WorkflowError::DuplicateNode { .. })));

        let dangling = CompiledWorkflow::compile(workflow(json!({
            "id": "wf", "name": "x",
            "nodes": [{ "id": "0", "type": "defaultnode" }],
            "edges": [{ "id": "e", "source": "0", "target": "9" }]
        })));
        assert_eq!(
            dangling.unwrap_err(),
            WorkflowError::DanglingEdge {
                workflow_id: "wf".to_string(),
                edge_id: "e".to_string(),
                node_id: "9".to_string()
            }
        );
    }

    #[test]
    fn reachability_and_trigger_detection() {
        let compiled = CompiledWorkflow::compile(workflow(json!({
            "id": "wf", "name": "x",
            "nodes": [
                { "id": "0", "type": "interval", "data": { "interval": 5, "intervalType": "seconds" } },
                { "id": "1", "type": "log", "data": { "message": "tick" } },
                { "id": "2", "type": "log", "data": { "message": "orphan" } }
            ],
            "edges": [{ "id": "e", "source": "0", "target": "1" }]
        })))
        .unwrap();

        let reachable = compiled.reachable_from_entry();
        assert!(reachable.contains("1"));
        assert!(!reachable.contains("2"));
        assert_eq!(compiled.interval_trigger().map(|i| i.interval), Some(5));
        assert!(!compiled.is_webhook());
    }
}
