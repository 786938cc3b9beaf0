use async_trait::async_trait;
use dagcore::{
    Component, ComponentContext, ComponentDescriptor, LogLevel, NodeError, Params, PortSpec,
    PortValues, PropertySpec, Value,
};
use dagruntime::ComponentFactory;

/// Logs its `message` input (and, optionally, every other input)
pub struct LogNode {
    level: LogLevel,
    dump_inputs: bool,
}

#[async_trait]
impl Component for LogNode {
    async fn run(&self, ctx: ComponentContext) -> Result<PortValues, NodeError> {
        let message = match ctx.inputs.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "(no message)".to_string(),
            Some(other) => other.to_string(),
        };

        ctx.services.log(self.level, &format!("DEBUG: {}", message));

        if self.dump_inputs {
            let mut keys: Vec<&String> = ctx.inputs.keys().filter(|k| *k != "message").collect();
            keys.sort();
            for key in keys {
                ctx.services
                    .log(self.level, &format!("  {}: {}", key, ctx.inputs[key]));
            }
        }

        Ok(PortValues::from([("message".to_string(), Value::String(message))]))
    }
}

pub struct LogNodeFactory;

impl ComponentFactory for LogNodeFactory {
    fn descriptor(&self) -> ComponentDescriptor {
        ComponentDescriptor::new("debug", "Log")
            .with_description("Logs input values for debugging")
            .with_input(PortSpec::new("message", "Message"))
            .with_output(PortSpec::new("message", "Message").of_type("string"))
            .with_property(
                "level",
                PropertySpec::choice("info", &["debug", "info", "warn", "error"]).with_label("Level"),
            )
            .with_property(
                "dump_inputs",
                PropertySpec::bool(false).with_label("Log every input"),
            )
    }

    fn create(&self, params: &Params) -> Result<Box<dyn Component>, NodeError> {
        let level = match params.str("level")? {
            "debug" => LogLevel::Debug,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        };
        Ok(Box::new(LogNode {
            level,
            dump_inputs: params.bool("dump_inputs")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, validated};
    use serde_json::json;

    #[tokio::test]
    async fn logs_message_and_inputs() {
        let factory = LogNodeFactory;
        let params = validated(&factory, json!({"level": "warn", "dump_inputs": true}));
        let (ctx, services) = context(json!({"message": "hello", "extra": 3}), params.clone());

        let out = factory.create(&params).unwrap().run(ctx).await.unwrap();

        assert_eq!(out["message"], json!("hello"));
        let logs = services.take_logs();
        assert_eq!(logs[0], (LogLevel::Warn, "DEBUG: hello".to_string()));
        assert_eq!(logs[1].1, "  extra: 3");
    }

    #[tokio::test]
    async fn missing_message_has_placeholder() {
        let factory = LogNodeFactory;
        let params = validated(&factory, json!({}));
        let (ctx, _) = context(json!({}), params.clone());
        let out = factory.create(&params).unwrap().run(ctx).await.unwrap();
        assert_eq!(out["message"], json!("(no message)"));
    }
}
