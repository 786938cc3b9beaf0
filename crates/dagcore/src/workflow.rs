use crate::{FlowError, NodeId, PortValues, Value, WorkflowError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Persisted workflow file: a graph section plus runtime state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub graph: GraphSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSection {
    #[serde(default)]
    pub nodes: IndexMap<NodeId, NodeEntry>,
    #[serde(default)]
    pub connections: Vec<ConnectionEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub custom: NodeCustom,
}

/// Editor-side extras; only the component path is of interest here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeCustom {
    #[serde(rename = "FULL_PATH", default, skip_serializing_if = "Option::is_none")]
    pub full_path: Option<String>,
}

/// `{source: [node, port], destination: [node, port]}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionEntry {
    #[serde(alias = "out")]
    pub source: (NodeId, String),
    #[serde(alias = "in")]
    pub destination: (NodeId, String),
}

/// Runtime state keyed by stable key (`"<category>/<name>||<suffix>"`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeSection {
    #[serde(default)]
    pub node_id2stable_key: HashMap<NodeId, String>,
    #[serde(default)]
    pub node_properties: HashMap<String, PortValues>,
    #[serde(default)]
    pub node_inputs: HashMap<String, PortValues>,
    #[serde(default)]
    pub column_select: HashMap<String, PortValues>,
    #[serde(default)]
    pub node_environments: HashMap<String, PathBuf>,
    #[serde(default)]
    pub environment_exe: Option<PathBuf>,
}

/// Component key embedded in a stable key.
pub fn component_key(stable_key: &str) -> &str {
    stable_key.split("||").next().unwrap_or(stable_key).trim()
}

impl WorkflowDocument {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Resolve the document into an executable graph.
    ///
    /// Nodes without a stable key or whose component `is_known` rejects are
    /// skipped with a warning, together with the connections touching them.
    /// A connection naming a node absent from the node table rejects the
    /// whole document.
    pub fn into_graph(
        self,
        is_known: impl Fn(&str) -> bool,
    ) -> Result<WorkflowGraph, WorkflowError> {
        for conn in &self.graph.connections {
            for (end, (node, _)) in [("source", &conn.source), ("destination", &conn.destination)] {
                if !self.graph.nodes.contains_key(node) {
                    return Err(WorkflowError::InvalidConnection(format!(
                        "{} node '{}' is not in the node table",
                        end, node
                    )));
                }
            }
        }

        let runtime = self.runtime;
        let mut workflow = WorkflowGraph::new();
        workflow.environment = runtime.environment_exe.clone();

        for (node_id, entry) in self.graph.nodes {
            let stable_key = runtime
                .node_id2stable_key
                .get(&node_id)
                .cloned()
                .or_else(|| entry.custom.full_path.clone());
            let Some(stable_key) = stable_key else {
                tracing::warn!(node_id = %node_id, "Node has no component key, skipping");
                continue;
            };
            let component = component_key(&stable_key).to_string();
            if !is_known(&component) {
                tracing::warn!(node_id = %node_id, component = %component, "Component not found, skipping node");
                continue;
            }

            let mut spec = NodeSpec::new(node_id, component);
            spec.name = entry.name;
            spec.params = runtime.node_properties.get(&stable_key).cloned().unwrap_or_default();
            spec.inputs = runtime.node_inputs.get(&stable_key).cloned().unwrap_or_default();
            spec.column_select = runtime.column_select.get(&stable_key).cloned().unwrap_or_default();
            spec.environment = runtime.node_environments.get(&stable_key).cloned();
            spec.stable_key = Some(stable_key);
            workflow.add_node(spec);
        }

        for conn in self.graph.connections {
            if workflow.nodes.contains_key(&conn.source.0)
                && workflow.nodes.contains_key(&conn.destination.0)
            {
                workflow.connect(conn.source.0, conn.source.1, conn.destination.0, conn.destination.1);
            } else {
                tracing::debug!(
                    from = %conn.source.0,
                    to = %conn.destination.0,
                    "Dropping connection to a skipped node"
                );
            }
        }

        Ok(workflow)
    }
}

/// Executable workflow: insertion-ordered nodes plus connections.
/// Read-only during a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub name: Option<String>,
    pub nodes: IndexMap<NodeId, NodeSpec>,
    pub connections: Vec<Connection>,
    /// Workflow-wide interpreter for script components.
    pub environment: Option<PathBuf>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.insert(id.clone(), node);
        id
    }

    pub fn connect(
        &mut self,
        from_node: impl Into<NodeId>,
        from_port: impl Into<String>,
        to_node: impl Into<NodeId>,
        to_port: impl Into<String>,
    ) {
        self.connections.push(Connection {
            from_node: from_node.into(),
            from_port: from_port.into(),
            to_node: to_node.into(),
            to_port: to_port.into(),
        });
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    /// Connections arriving at `node_id`, in declaration order.
    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.to_node == node_id)
    }

    /// Check that every connection endpoint names a node of this graph.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        for conn in &self.connections {
            for node in [&conn.from_node, &conn.to_node] {
                if !self.nodes.contains_key(node) {
                    return Err(WorkflowError::NodeNotFound(node.clone()));
                }
            }
        }
        Ok(())
    }
}

/// One configured instance of a component within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    /// Registry key, `"<category>/<name>"`
    pub component: String,
    pub stable_key: Option<String>,
    pub name: Option<String>,
    /// Configured property values
    pub params: PortValues,
    /// Recorded baseline input snapshot
    pub inputs: PortValues,
    /// Per-port column/field selection overrides
    pub column_select: PortValues,
    pub environment: Option<PathBuf>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, component: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            component: component.into(),
            stable_key: None,
            name: None,
            params: PortValues::new(),
            inputs: PortValues::new(),
            column_select: PortValues::new(),
            environment: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_input(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(port.into(), value.into());
        self
    }

    pub fn with_column_select(mut self, port: impl Into<String>, columns: impl Into<Value>) -> Self {
        self.column_select.insert(port.into(), columns.into());
        self
    }

    pub fn with_environment(mut self, program: impl Into<PathBuf>) -> Self {
        self.environment = Some(program.into());
        self
    }

    /// Display label: configured name, else the id.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Directed edge from one node's output port to another node's input port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Connection {
    pub from_node: NodeId,
    pub from_port: String,
    pub to_node: NodeId,
    pub to_port: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> WorkflowDocument {
        serde_json::from_value(json!({
            "graph": {
                "nodes": {
                    "n2": {"name": "Scale"},
                    "n1": {"name": "Source"},
                    "ghost": {"name": "Missing component"}
                },
                "connections": [
                    {"source": ["n1", "value"], "destination": ["n2", "x"]},
                    {"out": ["ghost", "value"], "in": ["n2", "y"]}
                ]
            },
            "runtime": {
                "node_id2stable_key": {
                    "n1": "input/Constant||a1",
                    "n2": "math/Arithmetic||b2",
                    "ghost": "nowhere/Nothing||c3"
                },
                "node_properties": {"math/Arithmetic||b2": {"op": "mul"}},
                "node_inputs": {"math/Arithmetic||b2": {"x": 3}},
                "column_select": {"math/Arithmetic||b2": {"x": ["a"]}},
                "environment_exe": "/opt/worker"
            }
        }))
        .unwrap()
    }

    #[test]
    fn resolves_nodes_in_document_order_and_skips_unknown() {
        let graph = document()
            .into_graph(|key| key != "nowhere/Nothing")
            .unwrap();

        assert_eq!(graph.node_ids(), vec!["n2".to_string(), "n1".to_string()]);
        assert_eq!(graph.connections.len(), 1);
        assert_eq!(graph.environment, Some(PathBuf::from("/opt/worker")));

        let n2 = graph.find_node("n2").unwrap();
        assert_eq!(n2.component, "math/Arithmetic");
        assert_eq!(n2.params["op"], json!("mul"));
        assert_eq!(n2.inputs["x"], json!(3));
        assert_eq!(n2.column_select["x"], json!(["a"]));
        assert_eq!(n2.label(), "Scale");
        graph.validate().unwrap();
    }

    #[test]
    fn rejects_connection_to_absent_node() {
        let mut doc = document();
        doc.graph.connections.push(ConnectionEntry {
            source: ("n1".into(), "value".into()),
            destination: ("nope".into(), "x".into()),
        });
        assert!(matches!(
            doc.into_graph(|_| true),
            Err(WorkflowError::InvalidConnection(_))
        ));
    }

    #[test]
    fn stable_key_strips_suffix() {
        assert_eq!(component_key("data/Select Columns||9f"), "data/Select Columns");
        assert_eq!(component_key("data/Plain"), "data/Plain");
    }
}
