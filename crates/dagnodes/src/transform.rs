use crate::expect_str;
use async_trait::async_trait;
use dagcore::{
    Component, ComponentContext, ComponentDescriptor, NodeError, Params, PortSpec, PortValues,
    PropertySpec, Value,
};
use dagruntime::ComponentFactory;

/// Parse JSON string to Value
pub struct JsonParseNode;

#[async_trait]
impl Component for JsonParseNode {
    async fn run(&self, ctx: ComponentContext) -> Result<PortValues, NodeError> {
        let input = expect_str(ctx.require_input("json")?, "json")?;

        let parsed: Value = serde_json::from_str(input)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        Ok(PortValues::from([("parsed".to_string(), parsed)]))
    }
}

pub struct JsonParseNodeFactory;

impl ComponentFactory for JsonParseNodeFactory {
    fn descriptor(&self) -> ComponentDescriptor {
        ComponentDescriptor::new("transform", "JSON Parse")
            .with_description("Parse JSON string")
            .with_input(PortSpec::new("json", "JSON text").of_type("string"))
            .with_output(PortSpec::new("parsed", "Parsed value"))
    }

    fn create(&self, _params: &Params) -> Result<Box<dyn Component>, NodeError> {
        Ok(Box::new(JsonParseNode))
    }
}

/// Stringify Value to JSON
pub struct JsonStringifyNode {
    pretty: bool,
}

#[async_trait]
impl Component for JsonStringifyNode {
    async fn run(&self, ctx: ComponentContext) -> Result<PortValues, NodeError> {
        let value = ctx.require_input("value")?;

        let json_str = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|e| NodeError::Serialization(format!("JSON stringify error: {}", e)))?;

        Ok(PortValues::from([("json".to_string(), Value::String(json_str))]))
    }
}

pub struct JsonStringifyNodeFactory;

impl ComponentFactory for JsonStringifyNodeFactory {
    fn descriptor(&self) -> ComponentDescriptor {
        ComponentDescriptor::new("transform", "JSON Stringify")
            .with_description("Convert value to JSON string")
            .with_input(PortSpec::new("value", "Value"))
            .with_output(PortSpec::new("json", "JSON text").of_type("string"))
            .with_property("pretty", PropertySpec::bool(true).with_label("Pretty print"))
    }

    fn create(&self, params: &Params) -> Result<Box<dyn Component>, NodeError> {
        Ok(Box::new(JsonStringifyNode {
            pretty: params.bool("pretty")?,
        }))
    }
}
