//! Access to the run's global variable context.

use async_trait::async_trait;
use dagcore::{
    Component, ComponentContext, ComponentDescriptor, NodeError, Params, PortSpec, PortValues,
    PropertySpec, Value,
};
use dagruntime::ComponentFactory;

fn key_property() -> PropertySpec {
    PropertySpec::text("").with_label("Variable name")
}

fn require_key(params: &Params) -> Result<String, NodeError> {
    let key = params.str("key")?.trim();
    if key.is_empty() {
        return Err(NodeError::Configuration("variable name is empty".to_string()));
    }
    Ok(key.to_string())
}

pub struct SetGlobalNode {
    key: String,
}

#[async_trait]
impl Component for SetGlobalNode {
    async fn run(&self, ctx: ComponentContext) -> Result<PortValues, NodeError> {
        let value = ctx.require_input("value")?.clone();
        ctx.services.set_global(&self.key, value.clone());
        Ok(PortValues::from([("value".to_string(), value)]))
    }
}

pub struct SetGlobalNodeFactory;

impl ComponentFactory for SetGlobalNodeFactory {
    fn descriptor(&self) -> ComponentDescriptor {
        ComponentDescriptor::new("variables", "Set Global")
            .with_description("Store the input in a global variable")
            .with_input(PortSpec::new("value", "Value"))
            .with_output(PortSpec::new("value", "Value"))
            .with_property("key", key_property())
    }

    fn create(&self, params: &Params) -> Result<Box<dyn Component>, NodeError> {
        Ok(Box::new(SetGlobalNode {
            key: require_key(params)?,
        }))
    }
}

pub struct GetGlobalNode {
    key: String,
    default: Value,
}

#[async_trait]
impl Component for GetGlobalNode {
    async fn run(&self, ctx: ComponentContext) -> Result<PortValues, NodeError> {
        let value = ctx
            .services
            .get_global(&self.key)
            .unwrap_or_else(|| self.default.clone());
        Ok(PortValues::from([("value".to_string(), value)]))
    }
}

pub struct GetGlobalNodeFactory;

impl ComponentFactory for GetGlobalNodeFactory {
    fn descriptor(&self) -> ComponentDescriptor {
        ComponentDescriptor::new("variables", "Get Global")
            .with_description("Read a global variable")
            .with_input(PortSpec::new("trigger", "Run after"))
            .with_output(PortSpec::new("value", "Value"))
            .with_property("key", key_property())
            .with_property("default", PropertySpec::text("").with_label("Default (JSON)"))
    }

    fn create(&self, params: &Params) -> Result<Box<dyn Component>, NodeError> {
        let default = match params.str("default")? {
            "" => Value::Null,
            text => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
        };
        Ok(Box::new(GetGlobalNode {
            key: require_key(params)?,
            default,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, context_with_globals, validated};
    use serde_json::json;

    #[tokio::test]
    async fn set_global_records_write() {
        let factory = SetGlobalNodeFactory;
        let params = validated(&factory, json!({"key": "threshold"}));
        let (ctx, services) = context(json!({"value": 0.75}), params.clone());

        let out = factory.create(&params).unwrap().run(ctx).await.unwrap();
        assert_eq!(out["value"], json!(0.75));
        assert_eq!(services.take_writes(), vec![("threshold".to_string(), json!(0.75))]);
    }

    #[tokio::test]
    async fn get_global_falls_back_to_default() {
        let factory = GetGlobalNodeFactory;
        let params = validated(&factory, json!({"key": "missing", "default": "[1]"}));
        let (ctx, _) = context(json!({}), params.clone());
        let out = factory.create(&params).unwrap().run(ctx).await.unwrap();
        assert_eq!(out["value"], json!([1]));

        let params = validated(&factory, json!({"key": "present"}));
        let (ctx, _) = context_with_globals(json!({}), params.clone(), json!({"present": "yes"}));
        let out = factory.create(&params).unwrap().run(ctx).await.unwrap();
        assert_eq!(out["value"], json!("yes"));
    }

    #[test]
    fn empty_key_is_rejected() {
        let factory = SetGlobalNodeFactory;
        let params = validated(&factory, json!({}));
        assert!(matches!(
            factory.create(&params),
            Err(NodeError::Configuration(_))
        ));
    }
}
