/// Node execution handlers
///
/// Leaf nodes (everything except loop, foreach, while and subprocess) run here.
/// A handler reads its configuration, renders templated fields against the
/// scope, writes its named variable and returns a `NodeOutcome`. Advancing to
/// the next nodes is left to the engine.

use crate::{
    expression::{evaluate_boolean, evaluate_numeric},
    runtime::{
        error::NodeError,
        scope::Scope,
        template::render,
    },
    workflow::types::{
        ApiData, Branch, ConditionData, CountData, FindAllData, GuidData, ListData, LogData, MapData,
        MathData, Node, NodeKind, ReplaceData, SetVariableData, TextData, FALSE_HANDLE, TRUE_HANDLE,
    },
};
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Value stored by `getGuid` when the OS random source fails
pub const FALLBACK_GUID: &str = "00000000-0000-0000-0000-000000000000";

/// Variables written by the `api` node besides its own target variable
pub const API_STATUS: &str = "api.status";
pub const API_HEADERS: &str = "api.headers";
pub const API_LENGTH: &str = "api.length";
pub const API_BODY: &str = "api.body";

/// Result of executing a single node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    /// Which outgoing edges to follow
    pub branch: Branch,
    /// New value for `output`; `None` leaves it untouched
    pub output: Option<Value>,
    /// Human-readable status line for the audit trail
    pub message: String,
    /// Node data with rendered fields; `None` means the raw configuration
    pub snapshot: Option<Value>,
}

impl NodeOutcome {
    pub fn new(branch: Branch) -> Self {
        Self {
            branch,
            output: None,
            message: String::new(),
            snapshot: None,
        }
    }

    /// Continue on every outgoing edge
    pub fn pass() -> Self {
        Self::new(Branch::All)
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_snapshot<T: Serialize>(mut self, data: &T) -> Self {
        self.snapshot = serde_json::to_value(data).ok();
        self
    }
}

/// Executes leaf nodes; owns the shared HTTP client
#[derive(Debug, Clone)]
pub struct NodeExecutor {
    http: reqwest::Client,
}

impl NodeExecutor {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("floowsynk/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Execute a single leaf node against the scope
    pub async fn execute_node(&self, node: &Node, scope: &mut Scope) -> Result<NodeOutcome, NodeError> {
        tracing::debug!("🚀 Executing node {} (type: {})", node.id, node.kind.type_name());

        match &node.kind {
            // Trigger and marker nodes only forward control
            NodeKind::Default | NodeKind::Webhook | NodeKind::Events => {
                Ok(NodeOutcome::pass().with_message(format!("{} node passed", node.kind.type_name())))
            }
            NodeKind::Interval(_) => Ok(NodeOutcome::pass().with_message("Interval trigger fired")),
            NodeKind::SetVariable(data) => self.set_variable(data, scope),
            NodeKind::Text(data) => self.text(data, scope),
            NodeKind::Condition(data) => self.condition(data, scope),
            NodeKind::List(data) => self.list(data, scope),
            NodeKind::Api(data) => self.api(data, scope).await,
            NodeKind::Log(data) => self.log(node, data, scope),
            NodeKind::GetGuid(data) => self.get_guid(data, scope),
            NodeKind::Math(data) => self.math(data, scope),
            NodeKind::Count(data) => self.count(data, scope),
            NodeKind::Map(data) => self.map(data, scope),
            NodeKind::Replace(data) => self.replace(data, scope),
            NodeKind::FindAll(data) => self.find_all(data, scope),
            NodeKind::Loop(_) | NodeKind::ForEach(_) | NodeKind::While(_) | NodeKind::SubProcess(_) => {
                tracing::error!("❌ {} node should not be executed directly: {}", node.kind.type_name(), node.id);
                Err(NodeError::NotExecutable(node.kind.type_name().to_string()))
            }
            NodeKind::Unknown { type_name, .. } => Err(NodeError::UnknownNodeType(type_name.clone())),
        }
    }

    fn set_variable(&self, data: &SetVariableData, scope: &mut Scope) -> Result<NodeOutcome, NodeError> {
        scope.set(&data.name, data.value.clone())?;
        Ok(NodeOutcome::pass()
            .with_output(data.value.clone())
            .with_message(format!("Variable {} set", data.name)))
    }

    fn text(&self, data: &TextData, scope: &mut Scope) -> Result<NodeOutcome, NodeError> {
        let message = render(&data.message, scope, None);
        scope.set(&data.variable, Value::String(message.clone()))?;

        let rendered = TextData {
            message: message.clone(),
            ..data.clone()
        };
        Ok(NodeOutcome::pass()
            .with_output(Value::String(message))
            .with_message(format!("Text stored in {}", data.variable))
            .with_snapshot(&rendered))
    }

    /// Evaluation errors select the "False" branch instead of aborting; an
    /// expression that renders to nothing fails the node
    fn condition(&self, data: &ConditionData, scope: &mut Scope) -> Result<NodeOutcome, NodeError> {
        let expression = render(&data.expression, scope, None);
        if expression.trim().is_empty() {
            return Err(NodeError::EmptyCondition);
        }

        let holds = match evaluate_boolean(&expression) {
            Ok(holds) => holds,
            Err(e) => {
                tracing::warn!("⚠️ Condition '{}' could not be evaluated: {}", expression, e);
                false
            }
        };
        let handle = if holds { TRUE_HANDLE } else { FALSE_HANDLE };

        Ok(NodeOutcome::new(Branch::handle(handle))
            .with_output(Value::Bool(holds))
            .with_message(format!("Condition evaluated to {}", handle))
            .with_snapshot(&ConditionData { expression }))
    }

    fn list(&self, data: &ListData, scope: &mut Scope) -> Result<NodeOutcome, NodeError> {
        let items = Value::Array(data.list.items());
        scope.set(&data.variable, items.clone())?;
        Ok(NodeOutcome::pass()
            .with_output(items)
            .with_message(format!("List stored in {}", data.variable)))
    }

    fn log(&self, node: &Node, data: &LogData, scope: &mut Scope) -> Result<NodeOutcome, NodeError> {
        let message = render(&data.message, scope, None);
        tracing::info!("📝 [{}] {}", node.id, message);

        Ok(NodeOutcome::pass()
            .with_message(message.clone())
            .with_snapshot(&LogData { message }))
    }

    fn get_guid(&self, data: &GuidData, scope: &mut Scope) -> Result<NodeOutcome, NodeError> {
        let guid = Value::String(generate_guid());
        scope.set(&data.variable, guid.clone())?;
        Ok(NodeOutcome::pass()
            .with_output(guid)
            .with_message(format!("GUID stored in {}", data.variable)))
    }

    fn math(&self, data: &MathData, scope: &mut Scope) -> Result<NodeOutcome, NodeError> {
        let expression = render(&data.expression, scope, None);
        let result = evaluate_numeric(&expression).map_err(|e| NodeError::expression(&expression, e))?;
        let value = serde_json::Number::from_f64(result)
            .map(Value::Number)
            .ok_or_else(|| NodeError::Type(format!("'{}' is not a representable number", result)))?;

        scope.set(&data.variable, value.clone())?;
        Ok(NodeOutcome::pass()
            .with_output(value)
            .with_message(format!("Result: {}", result))
            .with_snapshot(&MathData {
                expression,
                ..data.clone()
            }))
    }

    fn count(&self, data: &CountData, scope: &mut Scope) -> Result<NodeOutcome, NodeError> {
        let count = json!(scope.list(&data.list_variable)?.len());
        scope.set(&data.variable, count.clone())?;
        Ok(NodeOutcome::pass()
            .with_output(count.clone())
            .with_message(format!("{} has {} items", data.list_variable, count)))
    }

    /// Render the template once per item, with the item's fields on top of the scope
    fn map(&self, data: &MapData, scope: &mut Scope) -> Result<NodeOutcome, NodeError> {
        let items = scope.list(&data.list_variable)?;

        let mapped: Vec<Value> = items
            .iter()
            .map(|item| {
                let fields = item_fields(item);
                let rendered = render(&data.template, scope, Some(&fields));
                serde_json::from_str(&rendered).unwrap_or(Value::String(rendered))
            })
            .collect();

        let count = mapped.len();
        let mapped = Value::Array(mapped);
        scope.set(&data.variable, mapped.clone())?;
        Ok(NodeOutcome::pass()
            .with_output(mapped)
            .with_message(format!("Mapped {} items into {}", count, data.variable)))
    }

    fn replace(&self, data: &ReplaceData, scope: &mut Scope) -> Result<NodeOutcome, NodeError> {
        let text = render(&data.text, scope, None);
        let pattern = render(&data.pattern, scope, None);
        let replacement = render(&data.replace_text, scope, None);
        let re = compile_pattern(&pattern)?;

        let result = Value::String(re.replace_all(&text, replacement.as_str()).into_owned());
        scope.set(&data.variable, result.clone())?;
        Ok(NodeOutcome::pass()
            .with_output(result)
            .with_message(format!("Replaced matches of {} in {}", pattern, data.variable))
            .with_snapshot(&ReplaceData {
                text,
                pattern,
                replace_text: replacement,
                variable: data.variable.clone(),
            }))
    }

    fn find_all(&self, data: &FindAllData, scope: &mut Scope) -> Result<NodeOutcome, NodeError> {
        let text = render(&data.text, scope, None);
        let pattern = render(&data.pattern, scope, None);
        let re = compile_pattern(&pattern)?;

        let matches: Vec<Value> = re
            .find_iter(&text)
            .map(|m| Value::String(m.as_str().to_string()))
            .collect();
        let count = matches.len();
        let matches = Value::Array(matches);

        scope.set(&data.variable, matches.clone())?;
        Ok(NodeOutcome::pass()
            .with_output(matches)
            .with_message(format!("Found {} matches", count))
            .with_snapshot(&FindAllData {
                text,
                pattern,
                variable: data.variable.clone(),
            }))
    }

    /// Issue the configured HTTP request and store the decoded JSON response
    ///
    /// Status, headers and length are bound before the body is decoded, so a
    /// non-JSON response still leaves them in the scope.
    async fn api(&self, data: &ApiData, scope: &mut Scope) -> Result<NodeOutcome, NodeError> {
        let url = render(&data.url, scope, None);
        let payload = render(&data.payload, scope, None);
        let method_name = data.method.trim().to_uppercase();
        let http_err = |message: String| NodeError::Http {
            method: method_name.clone(),
            url: url.clone(),
            message,
        };

        let method = reqwest::Method::from_bytes(method_name.as_bytes())
            .map_err(|_| http_err(format!("invalid HTTP method '{}'", data.method)))?;

        tracing::debug!("🌐 {} {}", method, url);

        let mut request = self.http.request(method, &url);
        for header in &data.headers {
            request = request.header(header.key.as_str(), header.value.as_str());
        }
        if let Some(body) = serde_json::from_str::<Value>(&payload).ok().filter(|v| !v.is_null()) {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| http_err(e.to_string()))?;

        let status = response.status().as_u16();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()),
                )
            })
            .collect();
        let declared_length = response.content_length();

        scope.insert(API_STATUS, json!(status));
        scope.insert(API_HEADERS, Value::Object(headers));

        let bytes = response.bytes().await.map_err(|e| http_err(e.to_string()))?;
        let length = declared_length.unwrap_or(bytes.len() as u64);
        scope.insert(API_LENGTH, json!(length));

        let body: Value = serde_json::from_slice(&bytes)
            .map_err(|e| http_err(format!("response body is not valid JSON: {}", e)))?;

        scope.insert(API_BODY, body.clone());
        scope.set(&data.variable, body.clone())?;

        tracing::debug!("📥 {} responded with status {}", url, status);

        Ok(NodeOutcome::pass()
            .with_output(body)
            .with_message(format!("API call returned status {}", status))
            .with_snapshot(&ApiData {
                url,
                payload,
                ..data.clone()
            }))
    }
}

/// Fields exposed to a `map` template for one item
///
/// Objects contribute their own fields, strings holding a JSON object are
/// decoded first, and anything else is available as `value`.
fn item_fields(item: &Value) -> Map<String, Value> {
    match item {
        Value::Object(map) => map.clone(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => single_value(item),
        },
        _ => single_value(item),
    }
}

fn single_value(item: &Value) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("value".to_string(), item.clone());
    fields
}

fn compile_pattern(pattern: &str) -> Result<Regex, NodeError> {
    Regex::new(pattern).map_err(|source| NodeError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// 32 lowercase hex characters from the OS random source
pub fn generate_guid() -> String {
    let mut bytes = [0u8; 16];
    match OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
        Err(e) => {
            tracing::warn!("⚠️ OS random source unavailable, using fallback GUID: {}", e);
            FALLBACK_GUID.to_string()
        }
    }
}
