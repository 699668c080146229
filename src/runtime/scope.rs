/// Variable scope shared by every node of a run
///
/// Values are kept as JSON so lists, objects and API responses survive intact.
/// `input`, `output` and `current` are reserved: after each node completes its
/// result becomes `output`, and before the next node runs `output` is copied
/// into `input` and `current`.

use super::error::NodeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

pub const INPUT: &str = "input";
pub const OUTPUT: &str = "output";
pub const CURRENT: &str = "current";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    vars: HashMap<String, Value>,
}

impl Scope {
    /// Empty scope with blank `input` and `output`
    pub fn new() -> Self {
        Self::with_input(Value::String(String::new()))
    }

    /// Scope whose `input` and `output` start as the trigger payload
    pub fn with_input(payload: Value) -> Self {
        let mut vars = HashMap::new();
        vars.insert(INPUT.to_string(), payload.clone());
        vars.insert(OUTPUT.to_string(), payload);
        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Bind a variable for a node; the name must not be empty
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), NodeError> {
        if name.trim().is_empty() {
            return Err(NodeError::EmptyVariableName);
        }
        self.vars.insert(name.to_string(), value);
        Ok(())
    }

    /// Unchecked insert used for engine-owned names
    pub(crate) fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn input(&self) -> Option<&Value> {
        self.vars.get(INPUT)
    }

    pub fn output(&self) -> Option<&Value> {
        self.vars.get(OUTPUT)
    }

    pub fn set_output(&mut self, value: Value) {
        self.vars.insert(OUTPUT.to_string(), value);
    }

    /// Move the previous node's result into `input` and `current`
    pub fn promote_output(&mut self) {
        let output = self.vars.get(OUTPUT).cloned().unwrap_or(Value::String(String::new()));
        self.vars.insert(INPUT.to_string(), output.clone());
        self.vars.insert(CURRENT.to_string(), output);
    }

    /// Look up a variable that must hold a list
    pub fn list(&self, name: &str) -> Result<&Vec<Value>, NodeError> {
        match self.vars.get(name) {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(NodeError::Type(format!(
                "variable '{}' is {}, not a list",
                name,
                kind_of(other)
            ))),
            None => Err(NodeError::Type(format!("list variable '{}' not found", name))),
        }
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.vars
    }

    /// Display-form snapshot of every variable, sorted by name
    pub fn to_string_map(&self) -> BTreeMap<String, String> {
        self.vars
            .iter()
            .map(|(name, value)| (name.clone(), display_value(value)))
            .collect()
    }
}

/// Text form of a value as used by templates and audit snapshots
///
/// Strings are emitted raw, integral numbers without a fraction, `null` as the
/// empty string and containers as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                let f = n.as_f64().unwrap_or(0.0);
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{}", f as i64)
                } else {
                    f.to_string()
                }
            }
        }
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
