use dagcore::{ComponentDescriptor, Connection, NodeId, NodeSpec, PortValues, Value, ValueExt};
use std::collections::HashMap;

/// Suffix under which a port's column selection is handed to the component.
pub const COLUMN_SELECT_SUFFIX: &str = "_column_select";

/// Build a node's effective input bag.
///
/// Layers, lowest priority first: the recorded baseline inputs, non-blank
/// column selections, non-null upstream outputs of already executed nodes,
/// then caller overrides. Ports declared `multiple` collect every upstream
/// value into an array in connection order.
pub fn merge_inputs<'a>(
    node: &NodeSpec,
    descriptor: &ComponentDescriptor,
    incoming: impl IntoIterator<Item = &'a Connection>,
    outputs: &HashMap<NodeId, PortValues>,
    overrides: Option<&PortValues>,
) -> PortValues {
    let mut inputs = node.inputs.clone();

    for (port, selection) in &node.column_select {
        if !selection.is_blank() {
            inputs.insert(format!("{}{}", port, COLUMN_SELECT_SUFFIX), selection.clone());
        }
    }

    let mut delivered: Vec<(&str, Vec<Value>)> = Vec::new();
    for conn in incoming {
        let Some(value) = outputs
            .get(&conn.from_node)
            .and_then(|bag| bag.get(&conn.from_port))
            .filter(|v| !v.is_null())
        else {
            continue;
        };
        match delivered.iter_mut().find(|(port, _)| *port == conn.to_port.as_str()) {
            Some((_, values)) => values.push(value.clone()),
            None => delivered.push((conn.to_port.as_str(), vec![value.clone()])),
        }
    }

    for (port, mut values) in delivered {
        let multiple = descriptor.input(port).is_some_and(|p| p.multiple);
        let value = if multiple {
            Value::Array(values)
        } else {
            if values.len() > 1 {
                tracing::warn!(
                    node_id = %node.id,
                    port = %port,
                    count = values.len(),
                    "Several upstream values for a single-valued port, keeping the last"
                );
            }
            match values.pop() {
                Some(last) => last,
                None => continue,
            }
        };
        inputs.insert(port.to_string(), value);
    }

    if let Some(overrides) = overrides {
        inputs.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagcore::PortSpec;
    use serde_json::json;

    fn conn(from: &str, port: &str, to_port: &str) -> Connection {
        Connection {
            from_node: from.into(),
            from_port: port.into(),
            to_node: "n".into(),
            to_port: to_port.into(),
        }
    }

    fn bag(pairs: &[(&str, Value)]) -> PortValues {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn layers_apply_in_priority_order() {
        let node = NodeSpec::new("n", "x/y")
            .with_input("a", 1)
            .with_input("b", 1)
            .with_input("c", 1)
            .with_column_select("a", json!(["col"]))
            .with_column_select("b", json!([]));
        let descriptor = ComponentDescriptor::new("x", "y");
        let outputs = HashMap::from([
            ("up".to_string(), bag(&[("out", json!(2)), ("none", Value::Null)])),
        ]);
        let conns = [conn("up", "out", "b"), conn("up", "none", "c"), conn("up", "out", "d")];

        let merged = merge_inputs(
            &node,
            &descriptor,
            &conns,
            &outputs,
            Some(&bag(&[("d", json!(3))])),
        );

        assert_eq!(merged["a"], json!(1));
        assert_eq!(merged["a_column_select"], json!(["col"]));
        assert!(!merged.contains_key("b_column_select"));
        assert_eq!(merged["b"], json!(2));
        assert_eq!(merged["c"], json!(1));
        assert_eq!(merged["d"], json!(3));
    }

    #[test]
    fn multiple_port_collects_in_connection_order() {
        let node = NodeSpec::new("n", "x/y");
        let descriptor =
            ComponentDescriptor::new("x", "y").with_input(PortSpec::new("items", "Items").multiple());
        let outputs = HashMap::from([
            ("p".to_string(), bag(&[("v", json!("p"))])),
            ("q".to_string(), bag(&[("v", json!("q"))])),
        ]);
        let conns = [conn("q", "v", "items"), conn("p", "v", "items"), conn("r", "v", "items")];

        let merged = merge_inputs(&node, &descriptor, &conns, &outputs, None);
        assert_eq!(merged["items"], json!(["q", "p"]));
    }

    #[test]
    fn single_port_keeps_last_delivery() {
        let node = NodeSpec::new("n", "x/y");
        let descriptor = ComponentDescriptor::new("x", "y");
        let outputs = HashMap::from([
            ("p".to_string(), bag(&[("v", json!(1))])),
            ("q".to_string(), bag(&[("v", json!(2))])),
        ]);
        let conns = [conn("p", "v", "x"), conn("q", "v", "x")];

        let merged = merge_inputs(&node, &descriptor, &conns, &outputs, None);
        assert_eq!(merged["x"], json!(2));
    }
}
