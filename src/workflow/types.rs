/// Core workflow type definitions
///
/// Defines workflows, nodes and edges as they are exchanged with the editor and
/// persisted as JSON. Node configuration is decoded into a typed `NodeKind`
/// while deserializing, so a workflow with a malformed node never reaches the
/// engine.

use crate::runtime::scope::Scope;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Id of the node every run starts from
pub const ENTRY_NODE_ID: &str = "0";

/// Source handle of loop/foreach/while bodies
pub const BODY_HANDLE: &str = "output";

/// Source handles emitted by condition nodes
pub const TRUE_HANDLE: &str = "True";
pub const FALSE_HANDLE: &str = "False";

/// Structural problems detected while loading a workflow
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error("workflow '{0}' has no entry node \"0\"")]
    MissingEntryNode(String),

    #[error("workflow '{workflow_id}' declares node '{node_id}' more than once")]
    DuplicateNode { workflow_id: String, node_id: String },

    #[error("edge '{edge_id}' in workflow '{workflow_id}' references unknown node '{node_id}'")]
    DanglingEdge {
        workflow_id: String,
        edge_id: String,
        node_id: String,
    },

    #[error("node '{node_id}' ({node_type}) has invalid data: {message}")]
    InvalidNode {
        node_id: String,
        node_type: String,
        message: String,
    },
}

/// A complete workflow definition containing nodes and their connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// A single typed step of a workflow
///
/// On the wire a node is `{ "id", "type", "label", "data" }`; `data` is decoded
/// into the payload struct selected by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
}

/// Node behavior plus its configuration
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Plain entry/marker node
    Default,
    /// Periodic trigger entry point
    Interval(IntervalData),
    /// HTTP trigger entry point
    Webhook,
    /// Event trigger placeholder
    Events,
    SetVariable(SetVariableData),
    Text(TextData),
    Condition(ConditionData),
    List(ListData),
    Loop(LoopData),
    ForEach(ForEachData),
    While(WhileData),
    Api(ApiData),
    Log(LogData),
    GetGuid(GuidData),
    Math(MathData),
    Count(CountData),
    Map(MapData),
    Replace(ReplaceData),
    FindAll(FindAllData),
    SubProcess(SubProcessData),
    /// A type tag this server does not know; fails its branch when reached
    Unknown { type_name: String, data: Value },
}

impl NodeKind {
    /// Type tag as used on the wire
    pub fn type_name(&self) -> &str {
        match self {
            NodeKind::Default => "defaultnode",
            NodeKind::Interval(_) => "interval",
            NodeKind::Webhook => "webhook",
            NodeKind::Events => "events",
            NodeKind::SetVariable(_) => "setVariable",
            NodeKind::Text(_) => "text",
            NodeKind::Condition(_) => "condition",
            NodeKind::List(_) => "list",
            NodeKind::Loop(_) => "loop",
            NodeKind::ForEach(_) => "foreach",
            NodeKind::While(_) => "while",
            NodeKind::Api(_) => "api",
            NodeKind::Log(_) => "log",
            NodeKind::GetGuid(_) => "getGuid",
            NodeKind::Math(_) => "math",
            NodeKind::Count(_) => "count",
            NodeKind::Map(_) => "map",
            NodeKind::Replace(_) => "replace",
            NodeKind::FindAll(_) => "findAll",
            NodeKind::SubProcess(_) => "subprocess",
            NodeKind::Unknown { type_name, .. } => type_name,
        }
    }

    /// Configuration as JSON, used for audit snapshots and persistence
    pub fn data_value(&self) -> Value {
        match self {
            NodeKind::Default | NodeKind::Webhook | NodeKind::Events => Value::Object(Default::default()),
            NodeKind::Interval(d) => to_value(d),
            NodeKind::SetVariable(d) => to_value(d),
            NodeKind::Text(d) => to_value(d),
            NodeKind::Condition(d) => to_value(d),
            NodeKind::List(d) => to_value(d),
            NodeKind::Loop(d) => to_value(d),
            NodeKind::ForEach(d) => to_value(d),
            NodeKind::While(d) => to_value(d),
            NodeKind::Api(d) => to_value(d),
            NodeKind::Log(d) => to_value(d),
            NodeKind::GetGuid(d) => to_value(d),
            NodeKind::Math(d) => to_value(d),
            NodeKind::Count(d) => to_value(d),
            NodeKind::Map(d) => to_value(d),
            NodeKind::Replace(d) => to_value(d),
            NodeKind::FindAll(d) => to_value(d),
            NodeKind::SubProcess(d) => to_value(d),
            NodeKind::Unknown { data, .. } => data.clone(),
        }
    }
}

fn to_value<T: Serialize>(data: &T) -> Value {
    serde_json::to_value(data).unwrap_or(Value::Null)
}

impl Node {
    pub fn data_value(&self) -> Value {
        self.kind.data_value()
    }
}

/// Wire representation of a node
#[derive(Serialize, Deserialize)]
struct RawNode {
    id: String,
    #[serde(rename = "type", alias = "nodetype")]
    node_type: String,
    #[serde(default)]
    label: String,
    #[serde(default)]
    data: Value,
}

impl TryFrom<RawNode> for Node {
    type Error = WorkflowError;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let RawNode { id, node_type, label, data } = raw;
        let decode_err = |message: String| WorkflowError::InvalidNode {
            node_id: id.clone(),
            node_type: node_type.clone(),
            message,
        };

        let kind = match node_type.as_str() {
            "defaultnode" | "default" => NodeKind::Default,
            "webhook" => NodeKind::Webhook,
            "events" => NodeKind::Events,
            "interval" => NodeKind::Interval(decode(data).map_err(decode_err)?),
            "setVariable" => NodeKind::SetVariable(decode(data).map_err(decode_err)?),
            "text" => NodeKind::Text(decode(data).map_err(decode_err)?),
            "condition" => NodeKind::Condition(decode(data).map_err(decode_err)?),
            "list" => NodeKind::List(decode(data).map_err(decode_err)?),
            "loop" => NodeKind::Loop(decode(data).map_err(decode_err)?),
            "foreach" => NodeKind::ForEach(decode(data).map_err(decode_err)?),
            "while" => NodeKind::While(decode(data).map_err(decode_err)?),
            "api" => NodeKind::Api(decode(data).map_err(decode_err)?),
            "log" => NodeKind::Log(decode(data).map_err(decode_err)?),
            "getGuid" => NodeKind::GetGuid(decode(data).map_err(decode_err)?),
            "math" => NodeKind::Math(decode(data).map_err(decode_err)?),
            "count" => NodeKind::Count(decode(data).map_err(decode_err)?),
            "map" => NodeKind::Map(decode(data).map_err(decode_err)?),
            "replace" => NodeKind::Replace(decode(data).map_err(decode_err)?),
            "findAll" => NodeKind::FindAll(decode(data).map_err(decode_err)?),
            "subprocess" => NodeKind::SubProcess(decode(data).map_err(decode_err)?),
            _ => NodeKind::Unknown {
                type_name: node_type.clone(),
                data,
            },
        };

        Ok(Node { id, label, kind })
    }
}

fn decode<T: DeserializeOwned>(data: Value) -> Result<T, String> {
    // Marker-free nodes saved without a data object decode like an empty one
    let data = if data.is_null() { Value::Object(Default::default()) } else { data };
    serde_json::from_value(data).map_err(|e| e.to_string())
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        RawNode {
            node_type: node.kind.type_name().to_string(),
            data: node.kind.data_value(),
            id: node.id,
            label: node.label,
        }
    }
}

/// Directed, labeled connection between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    /// Branch label emitted by the source node; empty means the default branch
    #[serde(default, alias = "sourcehandle")]
    pub source_handle: String,
    pub target: String,
}

/// Which outgoing edges a node continues on after it completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Branch {
    /// Every outgoing edge, whatever its handle
    All,
    /// Only edges carrying exactly this handle
    Handle(String),
    /// Only edges with an empty handle
    Default,
}

impl Branch {
    pub fn handle(name: &str) -> Self {
        Branch::Handle(name.to_string())
    }

    /// Loop/foreach/while body edges
    pub fn body() -> Self {
        Branch::handle(BODY_HANDLE)
    }

    pub fn accepts(&self, source_handle: &str) -> bool {
        match self {
            Branch::All => true,
            Branch::Handle(name) => name == source_handle,
            Branch::Default => source_handle.is_empty(),
        }
    }
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Branch::All => write!(f, "*"),
            Branch::Handle(name) => write!(f, "{}", name),
            Branch::Default => write!(f, "default"),
        }
    }
}

/// Literal key/value pair (list items, API headers)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

/// Interval trigger configuration
/// Expected data: { "interval": 5, "intervalType": "minutes", "weeks": [true, ...] }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalData {
    pub interval: u64,
    #[serde(alias = "type")]
    pub interval_type: IntervalUnit,
    /// Days the trigger may fire, Sunday first
    #[serde(default = "all_week")]
    pub weeks: Vec<bool>,
}

fn all_week() -> Vec<bool> {
    vec![true; 7]
}

impl IntervalData {
    /// Length of one trigger window, `None` for a zero interval
    pub fn period(&self) -> Option<std::time::Duration> {
        if self.interval == 0 {
            return None;
        }
        let unit_secs = match self.interval_type {
            IntervalUnit::Seconds => 1,
            IntervalUnit::Minutes => 60,
            IntervalUnit::Hours => 60 * 60,
            IntervalUnit::Days => 24 * 60 * 60,
        };
        Some(std::time::Duration::from_secs(self.interval.saturating_mul(unit_secs)))
    }

    /// Whether the trigger is enabled on the given weekday (0 = Sunday)
    pub fn runs_on(&self, weekday_from_sunday: u32) -> bool {
        self.weeks
            .get(weekday_from_sunday as usize)
            .copied()
            .unwrap_or(true)
    }
}

/// Expected data: { "name": "total", "value": 10 }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetVariableData {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

/// Expected data: { "message": "Hello {{name}}", "variable": "greeting" }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextData {
    #[serde(default)]
    pub message: String,
    pub variable: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionData {
    #[serde(default)]
    pub expression: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListItemType {
    #[serde(rename = "string", alias = "STRING")]
    String,
    #[serde(rename = "int", alias = "INT")]
    Int,
    #[serde(rename = "bool", alias = "BOOL")]
    Bool,
    #[serde(rename = "keyValue", alias = "KEYVALUE")]
    KeyValue,
}

/// Typed literal list; only the items matching `type` are used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedList {
    #[serde(rename = "type")]
    pub item_type: ListItemType,
    #[serde(default)]
    pub string_items: Vec<String>,
    #[serde(default)]
    pub int_items: Vec<i64>,
    #[serde(default)]
    pub bool_items: Vec<bool>,
    #[serde(default)]
    pub key_value_items: Vec<KeyValue>,
}

impl TypedList {
    /// Materialize the literal items as scope values
    pub fn items(&self) -> Vec<Value> {
        match self.item_type {
            ListItemType::String => self.string_items.iter().cloned().map(Value::String).collect(),
            ListItemType::Int => self.int_items.iter().map(|n| Value::from(*n)).collect(),
            ListItemType::Bool => self.bool_items.iter().map(|b| Value::Bool(*b)).collect(),
            ListItemType::KeyValue => self
                .key_value_items
                .iter()
                .map(|kv| serde_json::json!({ "key": kv.key, "value": kv.value }))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListData {
    pub variable: String,
    pub list: TypedList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopData {
    pub iteration: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForEachData {
    #[serde(alias = "listvar")]
    pub list_variable: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhileData {
    pub expression: String,
    pub limit: u32,
}

/// Outbound HTTP call
/// Expected data: { "method": "POST", "url": "https://...", "headers": [{key, value}],
///                  "payload": "{\"id\": {{id}}}", "variable": "response" }
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiData {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<KeyValue>,
    #[serde(default)]
    pub payload: String,
    pub variable: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogData {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidData {
    pub variable: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MathData {
    pub expression: String,
    pub variable: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountData {
    pub list_variable: String,
    pub variable: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapData {
    pub list_variable: String,
    pub template: String,
    pub variable: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceData {
    pub text: String,
    pub pattern: String,
    #[serde(default)]
    pub replace_text: String,
    pub variable: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindAllData {
    pub text: String,
    pub pattern: String,
    pub variable: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubProcessData {
    pub sub_process_id: String,
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Manual,
    Webhook,
    Interval,
}

/// Per-run state handed down the traversal by `&mut`
///
/// Sub-process runs receive the same context, so every variable a child writes
/// is visible to the parent when the child returns.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Unique id of this run, shared by all its audit records
    pub process_id: String,
    /// Workflow the run was started for
    pub workflow_id: String,
    pub trigger: TriggerKind,
    pub scope: Scope,
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Number of audit records emitted so far
    pub(crate) sequence: u64,
    /// Current sub-process nesting depth
    pub(crate) depth: usize,
}

impl ExecutionContext {
    fn with_scope(workflow_id: String, trigger: TriggerKind, scope: Scope) -> Self {
        Self {
            process_id: uuid::Uuid::new_v4().to_string(),
            workflow_id,
            trigger,
            scope,
            started_at: chrono::Utc::now(),
            sequence: 0,
            depth: 0,
        }
    }

    /// Run started explicitly (API call or quick run)
    pub fn manual(workflow_id: String) -> Self {
        Self::with_scope(workflow_id, TriggerKind::Manual, Scope::new())
    }

    /// Run started from a webhook; the payload becomes the entry node's input
    pub fn from_webhook_data(workflow_id: String, payload: Value) -> Self {
        Self::with_scope(workflow_id, TriggerKind::Webhook, Scope::with_input(payload))
    }

    /// Run started by the interval scheduler
    pub fn from_interval_trigger(workflow_id: String) -> Self {
        Self::with_scope(workflow_id, TriggerKind::Interval, Scope::new())
    }

    /// Seed the scope with extra variables before the run starts
    pub fn with_variables(mut self, variables: impl IntoIterator<Item = (String, Value)>) -> Self {
        for (name, value) in variables {
            self.scope.insert(name, value);
        }
        self
    }

    pub(crate) fn next_sequence(&mut self) -> u64 {
        let current = self.sequence;
        self.sequence += 1;
        current
    }
}
