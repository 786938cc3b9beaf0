//! Component descriptors: the immutable schema of a pluggable unit.
//!
//! A descriptor names the unit (`category/name`), declares its ports and its
//! property schema. Parameters are validated against the schema before a
//! unit runs, producing a [`Params`] with defaults filled in and values
//! coerced to their declared types.

use crate::{NodeError, PortValues, Value, ValueExt};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

fn any_type() -> String {
    "any".to_string()
}

/// A named, typed input or output slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortSpec {
    pub name: String,
    #[serde(default)]
    pub label: String,
    /// Semantic type tag ("number", "csv", "image", ...). Informational.
    #[serde(rename = "type", default = "any_type")]
    pub ty: String,
    /// Multiple incoming connections accumulate into an array.
    #[serde(default)]
    pub multiple: bool,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            ty: any_type(),
            multiple: false,
        }
    }

    pub fn of_type(mut self, ty: impl Into<String>) -> Self {
        self.ty = ty.into();
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    #[default]
    Text,
    TextArea,
    Int,
    Float,
    Bool,
    Choice,
    File,
    Folder,
    Csv,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PropertySpec {
    #[serde(rename = "type", default)]
    pub ty: PropertyType,
    #[serde(default)]
    pub default: Value,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl PropertySpec {
    pub fn new(ty: PropertyType, default: impl Into<Value>) -> Self {
        Self {
            ty,
            default: default.into(),
            ..Self::default()
        }
    }

    pub fn text(default: &str) -> Self {
        Self::new(PropertyType::Text, default)
    }

    pub fn int(default: i64) -> Self {
        Self::new(PropertyType::Int, default)
    }

    pub fn float(default: f64) -> Self {
        Self::new(PropertyType::Float, default)
    }

    pub fn bool(default: bool) -> Self {
        Self::new(PropertyType::Bool, default)
    }

    pub fn choice(default: &str, choices: &[&str]) -> Self {
        let mut spec = Self::new(PropertyType::Choice, default);
        spec.choices = choices.iter().map(|c| c.to_string()).collect();
        spec
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Value used when neither the node nor the schema supplies one.
    fn fallback(&self) -> Value {
        if !self.default.is_blank() {
            return self.default.clone();
        }
        match self.ty {
            PropertyType::Int => Value::from(0),
            PropertyType::Float => Value::from(0.0),
            PropertyType::Bool => Value::Bool(false),
            _ => Value::String(String::new()),
        }
    }

    fn coerce(&self, name: &str, raw: &Value) -> Result<Value, NodeError> {
        let mismatch = |expected: &str| NodeError::InvalidInputType {
            field: name.to_string(),
            expected: expected.to_string(),
            actual: raw.type_name().to_string(),
        };

        let value = match self.ty {
            PropertyType::Int => match raw {
                Value::Number(n) if n.is_i64() => raw.clone(),
                Value::Number(n) => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 => Value::from(f as i64),
                    _ => return Err(mismatch("integer")),
                },
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| mismatch("integer"))?,
                _ => return Err(mismatch("integer")),
            },
            PropertyType::Float => match raw {
                Value::Number(n) => n
                    .as_f64()
                    .map(Value::from)
                    .ok_or_else(|| mismatch("number"))?,
                Value::String(s) => match s.trim().parse::<f64>() {
                    Ok(f) if f.is_finite() => Value::from(f),
                    _ => return Err(mismatch("number")),
                },
                _ => return Err(mismatch("number")),
            },
            PropertyType::Bool => match raw {
                Value::Bool(_) => raw.clone(),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => Value::Bool(true),
                    "false" | "0" | "no" => Value::Bool(false),
                    _ => return Err(mismatch("boolean")),
                },
                Value::Number(n) => Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0),
                _ => return Err(mismatch("boolean")),
            },
            PropertyType::Choice => {
                let s = raw.as_str().ok_or_else(|| mismatch("string"))?;
                if !self.choices.is_empty() && !self.choices.iter().any(|c| c == s) {
                    return Err(NodeError::Configuration(format!(
                        "'{}' must be one of {:?}, got '{}'",
                        name, self.choices, s
                    )));
                }
                raw.clone()
            }
            PropertyType::Text
            | PropertyType::TextArea
            | PropertyType::File
            | PropertyType::Folder
            | PropertyType::Csv => match raw {
                Value::String(_) => raw.clone(),
                Value::Number(_) | Value::Bool(_) => Value::String(raw.to_string()),
                _ => return Err(mismatch("string")),
            },
        };

        if let Some(n) = value.as_f64() {
            if self.min.is_some_and(|min| n < min) || self.max.is_some_and(|max| n > max) {
                return Err(NodeError::Configuration(format!(
                    "'{}' = {} is outside [{}, {}]",
                    name,
                    n,
                    self.min.map_or("-inf".to_string(), |v| v.to_string()),
                    self.max.map_or("inf".to_string(), |v| v.to_string()),
                )));
            }
        }

        Ok(value)
    }
}

/// Immutable schema of a pluggable unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentDescriptor {
    pub category: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<PortSpec>,
    #[serde(default)]
    pub outputs: Vec<PortSpec>,
    #[serde(default)]
    pub properties: IndexMap<String, PropertySpec>,
}

impl ComponentDescriptor {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            properties: IndexMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input(mut self, port: PortSpec) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn with_output(mut self, port: PortSpec) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, spec: PropertySpec) -> Self {
        self.properties.insert(name.into(), spec);
        self
    }

    /// Registry key: `"<category>/<name>"`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.category.trim(), self.name.trim())
    }

    pub fn input(&self, name: &str) -> Option<&PortSpec> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&PortSpec> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Validate raw parameter values against the property schema.
    ///
    /// Declared properties get defaults and type coercion; undeclared keys
    /// pass through untouched.
    pub fn validate_params(&self, raw: &PortValues) -> Result<Params, NodeError> {
        let mut values = raw.clone();
        for (name, spec) in &self.properties {
            let value = match raw.get(name) {
                Some(v) if !v.is_null() => spec.coerce(name, v)?,
                _ => spec.fallback(),
            };
            values.insert(name.clone(), value);
        }
        Ok(Params(values))
    }

    /// Check an output bag against the declared output ports.
    pub fn check_outputs(&self, outputs: &PortValues) -> Result<(), NodeError> {
        let mut undeclared: Vec<String> = outputs
            .keys()
            .filter(|k| self.output(k).is_none())
            .cloned()
            .collect();
        if undeclared.is_empty() {
            Ok(())
        } else {
            undeclared.sort();
            Err(NodeError::UndeclaredOutputs(undeclared))
        }
    }
}

/// Parameters validated against a [`ComponentDescriptor`]'s property schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(PortValues);

impl Params {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn str(&self, name: &str) -> Result<&str, NodeError> {
        self.require(name)?
            .as_str()
            .ok_or_else(|| self.mismatch(name, "string"))
    }

    pub fn i64(&self, name: &str) -> Result<i64, NodeError> {
        self.require(name)?
            .as_i64()
            .ok_or_else(|| self.mismatch(name, "integer"))
    }

    pub fn f64(&self, name: &str) -> Result<f64, NodeError> {
        self.require(name)?
            .as_f64()
            .ok_or_else(|| self.mismatch(name, "number"))
    }

    pub fn bool(&self, name: &str) -> Result<bool, NodeError> {
        self.require(name)?
            .as_bool()
            .ok_or_else(|| self.mismatch(name, "boolean"))
    }

    pub fn as_map(&self) -> &PortValues {
        &self.0
    }

    pub fn into_inner(self) -> PortValues {
        self.0
    }

    fn require(&self, name: &str) -> Result<&Value, NodeError> {
        self.0
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    fn mismatch(&self, name: &str, expected: &str) -> NodeError {
        NodeError::InvalidInputType {
            field: name.to_string(),
            expected: expected.to_string(),
            actual: self.0.get(name).map_or("missing", |v| v.type_name()).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::new("math", "Scale")
            .with_input(PortSpec::new("x", "X").of_type("number"))
            .with_output(PortSpec::new("x", "X").of_type("number"))
            .with_property("factor", PropertySpec::float(2.0).with_range(0.0, 10.0))
            .with_property("rounds", PropertySpec::int(1))
            .with_property("mode", PropertySpec::choice("fast", &["fast", "slow"]))
            .with_property("verbose", PropertySpec::new(PropertyType::Bool, Value::Null))
    }

    #[test]
    fn fills_defaults_and_coerces() {
        let raw: PortValues = [
            ("rounds".to_string(), json!("3")),
            ("extra".to_string(), json!("kept")),
        ]
        .into_iter()
        .collect();

        let params = descriptor().validate_params(&raw).unwrap();
        assert_eq!(params.f64("factor").unwrap(), 2.0);
        assert_eq!(params.i64("rounds").unwrap(), 3);
        assert_eq!(params.str("mode").unwrap(), "fast");
        assert!(!params.bool("verbose").unwrap());
        assert_eq!(params.get("extra"), Some(&json!("kept")));
    }

    #[test]
    fn rejects_out_of_range_and_bad_choice() {
        let raw: PortValues = [("factor".to_string(), json!(11.0))].into_iter().collect();
        assert!(matches!(
            descriptor().validate_params(&raw),
            Err(NodeError::Configuration(_))
        ));

        let raw: PortValues = [("mode".to_string(), json!("medium"))].into_iter().collect();
        assert!(matches!(
            descriptor().validate_params(&raw),
            Err(NodeError::Configuration(_))
        ));

        let raw: PortValues = [("rounds".to_string(), json!([1]))].into_iter().collect();
        assert!(matches!(
            descriptor().validate_params(&raw),
            Err(NodeError::InvalidInputType { .. })
        ));
    }

    #[test]
    fn non_finite_floats_are_rejected() {
        for text in ["inf", "-inf", "NaN", "infinity"] {
            let raw: PortValues = [("factor".to_string(), json!(text))].into_iter().collect();
            assert!(
                matches!(
                    descriptor().validate_params(&raw),
                    Err(NodeError::InvalidInputType { .. })
                ),
                "{} was accepted",
                text
            );
        }

        let raw: PortValues = [("factor".to_string(), json!(" 2.5 "))].into_iter().collect();
        assert_eq!(descriptor().validate_params(&raw).unwrap().f64("factor").unwrap(), 2.5);
    }

    #[test]
    fn undeclared_outputs_are_a_contract_error() {
        let d = descriptor();
        let ok: PortValues = [("x".to_string(), json!(1))].into_iter().collect();
        assert!(d.check_outputs(&ok).is_ok());

        let bad: PortValues = [("x".to_string(), json!(1)), ("y".to_string(), json!(2))]
            .into_iter()
            .collect();
        assert_eq!(
            d.check_outputs(&bad),
            Err(NodeError::UndeclaredOutputs(vec!["y".to_string()]))
        );
    }

    #[test]
    fn descriptor_parses_from_json() {
        let d: ComponentDescriptor = serde_json::from_value(json!({
            "category": "data",
            "name": "Merge",
            "inputs": [{"name": "tables", "label": "Tables", "type": "csv", "multiple": true}],
            "outputs": [{"name": "table"}],
            "properties": {"how": {"type": "choice", "default": "inner", "choices": ["inner", "outer"]}}
        }))
        .unwrap();

        assert_eq!(d.key(), "data/Merge");
        assert!(d.input("tables").unwrap().multiple);
        assert_eq!(d.output("table").unwrap().ty, "any");
        assert_eq!(d.properties["how"].ty, PropertyType::Choice);
    }
}
