#![allow(dead_code)]

use async_trait::async_trait;
use dagcore::{
    Component, ComponentContext, ComponentDescriptor, NodeError, Params, PortSpec, PortValues,
    PropertySpec, Value,
};
use dagruntime::{
    ComponentFactory, ComponentRegistry, InProcessExecutor, Invocation, NodeExecutor, NodeOutcome,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type RunFn = Arc<dyn Fn(&ComponentContext) -> Result<PortValues, NodeError> + Send + Sync>;

struct TestFactory {
    descriptor: ComponentDescriptor,
    run: RunFn,
}

impl ComponentFactory for TestFactory {
    fn descriptor(&self) -> ComponentDescriptor {
        self.descriptor.clone()
    }

    fn create(&self, _params: &Params) -> Result<Box<dyn Component>, NodeError> {
        Ok(Box::new(TestComponent {
            run: self.run.clone(),
        }))
    }
}

struct TestComponent {
    run: RunFn,
}

#[async_trait]
impl Component for TestComponent {
    async fn run(&self, ctx: ComponentContext) -> Result<PortValues, NodeError> {
        (self.run)(&ctx)
    }
}

struct SleepFactory;

struct Sleep;

impl ComponentFactory for SleepFactory {
    fn descriptor(&self) -> ComponentDescriptor {
        ComponentDescriptor::new("test", "Sleep").with_output(PortSpec::new("done", "Done"))
    }

    fn create(&self, _params: &Params) -> Result<Box<dyn Component>, NodeError> {
        Ok(Box::new(Sleep))
    }
}

#[async_trait]
impl Component for Sleep {
    async fn run(&self, _ctx: ComponentContext) -> Result<PortValues, NodeError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(bag("done", json!(true)))
    }
}

pub fn bag(port: &str, value: Value) -> PortValues {
    PortValues::from([(port.to_string(), value)])
}

fn int_input(ctx: &ComponentContext, port: &str) -> Result<i64, NodeError> {
    let value = ctx.require_input(port)?;
    value.as_i64().ok_or_else(|| NodeError::InvalidInputType {
        field: port.to_string(),
        expected: "integer".to_string(),
        actual: value.to_string(),
    })
}

fn register(
    registry: &mut ComponentRegistry,
    descriptor: ComponentDescriptor,
    run: impl Fn(&ComponentContext) -> Result<PortValues, NodeError> + Send + Sync + 'static,
) {
    registry.register(Arc::new(TestFactory {
        descriptor,
        run: Arc::new(run),
    }));
}

fn x_port() -> PortSpec {
    PortSpec::new("x", "X").of_type("number")
}

/// Small component set used across the engine tests.
///
/// - `test/Source`: emits its `x` property
/// - `test/Double`, `test/AddTen`: arithmetic on input `x`
/// - `test/Fail`: always fails
/// - `test/Rogue`: emits an undeclared port
/// - `test/Remember`, `test/Recall`: write and read global `last`
/// - `test/Sleep`: sleeps for five seconds
pub fn registry() -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();

    register(
        &mut registry,
        ComponentDescriptor::new("test", "Source")
            .with_output(x_port())
            .with_property("x", PropertySpec::int(0)),
        |ctx| Ok(bag("x", json!(ctx.params.i64("x")?))),
    );
    register(
        &mut registry,
        ComponentDescriptor::new("test", "Double")
            .with_input(x_port())
            .with_output(x_port()),
        |ctx| Ok(bag("x", json!(int_input(ctx, "x")? * 2))),
    );
    register(
        &mut registry,
        ComponentDescriptor::new("test", "AddTen")
            .with_input(x_port())
            .with_output(x_port()),
        |ctx| Ok(bag("x", json!(int_input(ctx, "x")? + 10))),
    );
    register(
        &mut registry,
        ComponentDescriptor::new("test", "Fail").with_output(x_port()),
        |_| Err(NodeError::ExecutionFailed("boom".to_string())),
    );
    register(
        &mut registry,
        ComponentDescriptor::new("test", "Rogue").with_output(x_port()),
        |_| Ok(bag("surprise", json!(1))),
    );
    register(
        &mut registry,
        ComponentDescriptor::new("test", "Remember")
            .with_input(x_port())
            .with_output(x_port()),
        |ctx| {
            let x = ctx.require_input("x")?.clone();
            ctx.services.set_global("last", x.clone());
            Ok(bag("x", x))
        },
    );
    register(
        &mut registry,
        ComponentDescriptor::new("test", "Recall").with_output(x_port()),
        |ctx| Ok(bag("x", ctx.services.get_global("last").unwrap_or(Value::Null))),
    );
    registry.register(Arc::new(SleepFactory));

    registry
}

/// In-process executor that counts its invocations.
#[derive(Default)]
pub struct CountingExecutor {
    inner: InProcessExecutor,
    pub calls: AtomicUsize,
}

impl CountingExecutor {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: InProcessExecutor::default().with_timeout(Some(timeout)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeExecutor for CountingExecutor {
    async fn invoke(&self, invocation: Invocation) -> NodeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.invoke(invocation).await
    }
}
