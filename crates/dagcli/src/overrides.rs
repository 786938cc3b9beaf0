//! `NODE.KEY=VALUE` command-line overrides.

use anyhow::{anyhow, Result};
use dagcore::Value;
use dagruntime::ExternalInputs;

/// Split `NODE.KEY=VALUE`. The value is read as JSON when it parses,
/// otherwise as a plain string.
pub fn parse_assignment(raw: &str) -> Result<(String, String, Value)> {
    let (target, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NODE.KEY=VALUE, got '{}'", raw))?;
    let (node, key) = target
        .rsplit_once('.')
        .filter(|(node, key)| !node.is_empty() && !key.is_empty())
        .ok_or_else(|| anyhow!("expected NODE.KEY before '=', got '{}'", target))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((node.to_string(), key.to_string(), value))
}

pub fn collect(inputs: &[String], params: &[String]) -> Result<ExternalInputs> {
    let mut external = ExternalInputs::new();
    for raw in inputs {
        let (node, port, value) = parse_assignment(raw)?;
        external = external.with_input(node, port, value);
    }
    for raw in params {
        let (node, key, value) = parse_assignment(raw)?;
        external = external.with_param(node, key, value);
    }
    Ok(external)
}
