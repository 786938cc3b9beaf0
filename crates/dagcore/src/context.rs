use crate::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VariableScope {
    #[default]
    Global,
    Canvas,
    Session,
}

/// Metadata about who and what is running, merged into global snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionEnvironment {
    pub user_id: Option<String>,
    pub canvas_id: Option<String>,
    pub session_id: Option<String>,
    pub run_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GlobalVariable {
    pub value: Value,
    pub description: Option<String>,
    #[serde(default)]
    pub scope: VariableScope,
    #[serde(default)]
    pub read_only: bool,
}

impl GlobalVariable {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }
}

/// Run-scoped key/value store shared by every node of one execution.
///
/// Read-only flags are carried but not enforced here; callers decide.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GlobalVariableContext {
    #[serde(default)]
    pub env: ExecutionEnvironment,
    #[serde(default)]
    pub custom: IndexMap<String, GlobalVariable>,
}

impl GlobalVariableContext {
    pub fn new(env: ExecutionEnvironment) -> Self {
        Self {
            env,
            custom: IndexMap::new(),
        }
    }

    pub fn get(&self, key: &str, default: Value) -> Value {
        self.custom
            .get(key)
            .map(|v| v.value.clone())
            .unwrap_or(default)
    }

    /// Create or update a variable's value, keeping its other attributes.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.custom
            .entry(key.into())
            .and_modify(|v| v.value = value.clone())
            .or_insert_with(|| GlobalVariable::new(value));
    }

    /// Insert a fully described variable, replacing any previous one.
    pub fn define(&mut self, key: impl Into<String>, variable: GlobalVariable) {
        self.custom.insert(key.into(), variable);
    }

    /// Custom variable values only, as handed to isolated components.
    pub fn values(&self) -> HashMap<String, Value> {
        self.custom
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    /// Flattened view: custom values plus environment fields. Environment
    /// fields win on key collisions.
    pub fn snapshot(&self) -> serde_json::Map<String, Value> {
        let mut flat: serde_json::Map<String, Value> = self
            .custom
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect();
        if let Ok(Value::Object(env)) = serde_json::to_value(&self.env) {
            flat.extend(env);
        }
        flat
    }
}
