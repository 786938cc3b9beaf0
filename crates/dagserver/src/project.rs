//! Named external inputs and outputs of an exported workflow.
//!
//! A project spec maps caller-facing keys onto node ports and properties.
//! Without one, every unconnected declared input port is exposed as
//! `<node_id>.<port>` and every output port of a sink node as an output.

use base64::prelude::*;
use dagcore::{ExternalInputError, FlowError, Value, ValueExt, WorkflowGraph};
use dagruntime::{ComponentRegistry, ExecutionResult, ExternalInputs};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Input formats delivered as staged files rather than inline values.
const UPLOAD_FORMATS: [&str; 3] = ["FILE", "FOLDER", "CSV"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSpec {
    #[serde(default)]
    pub inputs: IndexMap<String, InputBinding>,
    #[serde(default)]
    pub outputs: IndexMap<String, OutputBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputBinding {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_name: Option<String>,
    /// Set for hyperparameter inputs; wins over `port_name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_name: Option<String>,
    #[serde(default)]
    pub current_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputBinding {
    pub node_id: String,
    pub output_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Where an external input lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputTarget {
    Port,
    Param,
}

impl InputBinding {
    fn target(&self) -> Option<(InputTarget, &str)> {
        match (&self.param_name, &self.port_name) {
            (Some(param), _) => Some((InputTarget::Param, param.as_str())),
            (None, Some(port)) => Some((InputTarget::Port, port.as_str())),
            (None, None) => None,
        }
    }

    fn format(&self) -> Option<String> {
        self.format.as_deref().map(|f| f.trim().to_ascii_uppercase())
    }

    pub fn is_upload(&self) -> bool {
        self.format()
            .is_some_and(|f| UPLOAD_FORMATS.contains(&f.as_str()))
    }

    /// JSON type inferred from the current value; `any` when unset.
    pub fn value_type(&self) -> &'static str {
        match &self.current_value {
            Value::Null => "any",
            value => value.type_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InputSchema {
    pub key: String,
    pub node_id: String,
    pub target: InputTarget,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub upload: bool,
    pub default: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputSchema {
    pub key: String,
    pub node_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Schema {
    pub inputs: Vec<InputSchema>,
    pub outputs: Vec<OutputSchema>,
}

/// One uploaded file: `{"filename": "...", "content": "<base64>"}`
#[derive(Debug, Deserialize)]
struct Upload {
    filename: String,
    content: String,
}

impl ProjectSpec {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let text = std::fs::read_to_string(path)?;
        let spec: Self = serde_json::from_str(&text)?;
        spec.check()?;
        Ok(spec)
    }

    fn check(&self) -> Result<(), ExternalInputError> {
        match self.inputs.iter().find(|(_, b)| b.target().is_none()) {
            Some((key, _)) => Err(ExternalInputError::Malformed(format!(
                "input '{}' names neither a port nor a parameter",
                key
            ))),
            None => Ok(()),
        }
    }

    /// Interface derived from the graph when no project spec is supplied.
    pub fn derive(workflow: &WorkflowGraph, registry: &ComponentRegistry) -> Self {
        let mut spec = Self::default();
        for (node_id, node) in &workflow.nodes {
            let Some(descriptor) = registry.descriptor(&node.component) else {
                continue;
            };
            for port in &descriptor.inputs {
                let connected = workflow.incoming(node_id).any(|c| c.to_port == port.name);
                if connected {
                    continue;
                }
                spec.inputs.insert(
                    format!("{}.{}", node_id, port.name),
                    InputBinding {
                        node_id: node_id.clone(),
                        port_name: Some(port.name.clone()),
                        param_name: None,
                        current_value: node.inputs.get(&port.name).cloned().unwrap_or_default(),
                        format: None,
                    },
                );
            }

            let is_sink = !workflow.connections.iter().any(|c| &c.from_node == node_id);
            if is_sink {
                for port in &descriptor.outputs {
                    spec.outputs.insert(
                        format!("{}.{}", node_id, port.name),
                        OutputBinding {
                            node_id: node_id.clone(),
                            output_name: port.name.clone(),
                            format: None,
                        },
                    );
                }
            }
        }
        spec
    }

    pub fn schema(&self) -> Schema {
        let inputs = self
            .inputs
            .iter()
            .filter_map(|(key, binding)| {
                let (target, name) = binding.target()?;
                Some(InputSchema {
                    key: key.clone(),
                    node_id: binding.node_id.clone(),
                    target,
                    name: name.to_string(),
                    ty: binding.value_type(),
                    format: binding.format(),
                    upload: binding.is_upload(),
                    default: binding.current_value.clone(),
                })
            })
            .collect();
        let outputs = self
            .outputs
            .iter()
            .map(|(key, binding)| OutputSchema {
                key: key.clone(),
                node_id: binding.node_id.clone(),
                name: binding.output_name.clone(),
                format: binding.format.clone(),
            })
            .collect();
        Schema { inputs, outputs }
    }

    /// Turn a request's `inputs` object into engine overrides, staging
    /// uploads under `staging`.
    pub fn resolve(
        &self,
        request: &serde_json::Map<String, Value>,
        staging: &Path,
    ) -> Result<ExternalInputs, ExternalInputError> {
        let mut external = ExternalInputs::new();
        for (key, value) in request {
            let binding = self
                .inputs
                .get(key)
                .ok_or_else(|| ExternalInputError::UnknownInput(key.clone()))?;
            let (target, name) = binding
                .target()
                .ok_or_else(|| ExternalInputError::Malformed(format!("input '{}' has no target", key)))?;

            let value = if binding.is_upload() {
                stage_upload(key, binding, value, staging)?
            } else {
                check_type(key, binding.value_type(), value)?;
                value.clone()
            };

            external = match target {
                InputTarget::Port => external.with_input(binding.node_id.as_str(), name, value),
                InputTarget::Param => external.with_param(binding.node_id.as_str(), name, value),
            };
        }
        Ok(external)
    }

    /// Named outputs of a finished run; missing values read as null.
    pub fn collect_outputs(&self, result: &ExecutionResult) -> IndexMap<String, Value> {
        self.outputs
            .iter()
            .map(|(key, binding)| {
                let value = result
                    .output(&binding.node_id, &binding.output_name)
                    .cloned()
                    .unwrap_or_default();
                (key.clone(), value)
            })
            .collect()
    }
}

fn check_type(key: &str, expected: &'static str, value: &Value) -> Result<(), ExternalInputError> {
    let actual = value.type_name();
    let ok = match expected {
        "boolean" | "string" | "integer" => value.is_null() || actual == expected,
        "number" => value.is_null() || value.is_number(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(ExternalInputError::TypeMismatch {
            key: key.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// Write uploads into the staging area and return the path the node sees.
/// `FOLDER` inputs take one upload or an array of them and resolve to a
/// directory; the other upload formats take exactly one file.
fn stage_upload(
    key: &str,
    binding: &InputBinding,
    value: &Value,
    staging: &Path,
) -> Result<Value, ExternalInputError> {
    let invalid = |message: String| ExternalInputError::InvalidUpload {
        key: key.to_string(),
        message,
    };

    let dir = staging.join(sanitize(key).ok_or_else(|| invalid("unusable input key".to_string()))?);
    std::fs::create_dir_all(&dir).map_err(|e| invalid(e.to_string()))?;

    let folder = binding.format().as_deref() == Some("FOLDER");
    let uploads: Vec<Upload> = match value {
        Value::Array(items) if folder => items
            .iter()
            .map(|item| serde_json::from_value(item.clone()))
            .collect::<Result<_, _>>()
            .map_err(|e| invalid(e.to_string()))?,
        _ => vec![serde_json::from_value(value.clone()).map_err(|e| invalid(e.to_string()))?],
    };

    let mut last = None;
    for upload in uploads {
        let name = sanitize(&upload.filename)
            .ok_or_else(|| invalid(format!("bad filename '{}'", upload.filename)))?;
        let bytes = BASE64_STANDARD
            .decode(upload.content.as_bytes())
            .map_err(|e| invalid(format!("content is not base64: {}", e)))?;
        let path = dir.join(name);
        std::fs::write(&path, bytes).map_err(|e| invalid(e.to_string()))?;
        tracing::debug!(key = %key, path = %path.display(), "Staged upload");
        last = Some(path);
    }

    let staged = if folder { Some(dir) } else { last };
    let staged = staged.ok_or_else(|| invalid("no files".to_string()))?;
    Ok(Value::String(staged.to_string_lossy().into_owned()))
}

/// Keep only the final normal path component of a client-supplied name.
fn sanitize(name: &str) -> Option<PathBuf> {
    match Path::new(name).components().next_back()? {
        Component::Normal(part) => Some(PathBuf::from(part)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> ProjectSpec {
        serde_json::from_value(json!({
            "inputs": {
                "count": {"node_id": "n1", "param_name": "count", "current_value": 3},
                "label": {"node_id": "n1", "port_name": "label", "current_value": "x"},
                "data": {"node_id": "n2", "port_name": "path", "format": "csv"},
                "docs": {"node_id": "n2", "port_name": "dir", "format": "FOLDER"}
            },
            "outputs": {
                "total": {"node_id": "n2", "output_name": "sum"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn schema_infers_types_and_uploads() {
        let schema = spec().schema();
        let types: Vec<_> = schema.inputs.iter().map(|i| (i.key.as_str(), i.ty, i.upload)).collect();
        assert_eq!(
            types,
            vec![
                ("count", "integer", false),
                ("label", "string", false),
                ("data", "any", true),
                ("docs", "any", true),
            ]
        );
        assert_eq!(schema.inputs[0].target, InputTarget::Param);
        assert_eq!(schema.outputs[0].name, "sum");
    }

    #[test]
    fn resolve_routes_params_and_ports() {
        let dir = tempfile::tempdir().unwrap();
        let request = json!({"count": 5, "label": "y"});
        let external = spec()
            .resolve(request.as_object().unwrap(), dir.path())
            .unwrap();
        assert_eq!(external.params["n1"]["count"], json!(5));
        assert_eq!(external.inputs["n1"]["label"], json!("y"));
    }

    #[test]
    fn resolve_rejects_unknown_and_mistyped() {
        let dir = tempfile::tempdir().unwrap();
        let unknown = json!({"nope": 1});
        assert!(matches!(
            spec().resolve(unknown.as_object().unwrap(), dir.path()),
            Err(ExternalInputError::UnknownInput(k)) if k == "nope"
        ));
        let mistyped = json!({"count": "five"});
        assert!(matches!(
            spec().resolve(mistyped.as_object().unwrap(), dir.path()),
            Err(ExternalInputError::TypeMismatch { .. })
        ));
        let float_for_int = json!({"count": 1.5});
        assert!(spec().resolve(float_for_int.as_object().unwrap(), dir.path()).is_err());
    }

    #[test]
    fn uploads_are_staged_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let request = json!({
            "data": {"filename": "../../rows.csv", "content": BASE64_STANDARD.encode("a,b\n1,2\n")},
            "docs": [
                {"filename": "one.txt", "content": BASE64_STANDARD.encode("1")},
                {"filename": "two.txt", "content": BASE64_STANDARD.encode("2")}
            ]
        });
        let external = spec()
            .resolve(request.as_object().unwrap(), dir.path())
            .unwrap();

        let file = external.inputs["n2"]["path"].as_str().unwrap();
        assert!(file.starts_with(dir.path().to_str().unwrap()));
        assert!(file.ends_with("rows.csv"));
        assert_eq!(std::fs::read_to_string(file).unwrap(), "a,b\n1,2\n");

        let folder = PathBuf::from(external.inputs["n2"]["dir"].as_str().unwrap());
        assert_eq!(std::fs::read_to_string(folder.join("two.txt")).unwrap(), "2");
    }

    #[test]
    fn bad_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let request = json!({"data": {"filename": "x.csv", "content": "***"}});
        assert!(matches!(
            spec().resolve(request.as_object().unwrap(), dir.path()),
            Err(ExternalInputError::InvalidUpload { .. })
        ));
        let request = json!({"data": "just text"});
        assert!(spec().resolve(request.as_object().unwrap(), dir.path()).is_err());
    }

    #[test]
    fn binding_without_target_is_malformed() {
        let spec: ProjectSpec =
            serde_json::from_value(json!({"inputs": {"x": {"node_id": "n"}}})).unwrap();
        assert!(spec.check().is_err());
    }
}
