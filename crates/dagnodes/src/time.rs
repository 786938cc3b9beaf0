use async_trait::async_trait;
use dagcore::{
    Component, ComponentContext, ComponentDescriptor, NodeError, Params, PortSpec, PortValues,
    PropertySpec, Value,
};
use dagruntime::ComponentFactory;
use tokio::time::{sleep, Duration};

/// Waits, then passes `value` through unchanged
pub struct DelayNode {
    delay: Duration,
}

#[async_trait]
impl Component for DelayNode {
    async fn run(&self, ctx: ComponentContext) -> Result<PortValues, NodeError> {
        ctx.info(format!("Delaying for {}ms", self.delay.as_millis()));

        tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
            _ = sleep(self.delay) => {}
        }

        let value = ctx.inputs.get("value").cloned().unwrap_or(Value::Null);
        Ok(PortValues::from([("value".to_string(), value)]))
    }
}

pub struct DelayNodeFactory;

impl ComponentFactory for DelayNodeFactory {
    fn descriptor(&self) -> ComponentDescriptor {
        ComponentDescriptor::new("time", "Delay")
            .with_description("Delay execution for specified milliseconds")
            .with_input(PortSpec::new("value", "Value"))
            .with_output(PortSpec::new("value", "Value"))
            .with_property(
                "delay_ms",
                PropertySpec::int(1000)
                    .with_label("Delay (ms)")
                    .with_range(0.0, 86_400_000.0),
            )
    }

    fn create(&self, params: &Params) -> Result<Box<dyn Component>, NodeError> {
        let delay_ms = params.i64("delay_ms")?.max(0) as u64;
        Ok(Box::new(DelayNode {
            delay: Duration::from_millis(delay_ms),
        }))
    }
}
