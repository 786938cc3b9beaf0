use std::collections::HashMap;

/// Dynamic value carried on ports, parameters and global variables.
///
/// Plain JSON so that a bag crossing the process boundary reads back
/// value-equal to what the component produced.
pub type Value = serde_json::Value;

/// A port-name keyed bag of values (inputs, outputs, raw parameters).
pub type PortValues = HashMap<String, Value>;

pub trait ValueExt {
    /// JSON type name used in error messages and schema introspection.
    fn type_name(&self) -> &'static str;

    /// True for null, empty strings, empty arrays and empty objects.
    fn is_blank(&self) -> bool;
}

impl ValueExt for Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_names_distinguish_integers() {
        assert_eq!(json!(3).type_name(), "integer");
        assert_eq!(json!(3.5).type_name(), "number");
        assert_eq!(json!("a").type_name(), "string");
        assert_eq!(json!([1]).type_name(), "array");
    }

    #[test]
    fn blank_values() {
        assert!(Value::Null.is_blank());
        assert!(json!([]).is_blank());
        assert!(json!("").is_blank());
        assert!(!json!(["a"]).is_blank());
        assert!(!json!(0).is_blank());
    }
}
