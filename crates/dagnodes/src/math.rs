use async_trait::async_trait;
use dagcore::{
    Component, ComponentContext, ComponentDescriptor, NodeError, Params, PortSpec, PortValues,
    PropertySpec, Value, ValueExt,
};
use dagruntime::ComponentFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl Op {
    fn parse(s: &str) -> Result<Self, NodeError> {
        match s {
            "add" => Ok(Op::Add),
            "sub" => Ok(Op::Sub),
            "mul" => Ok(Op::Mul),
            "div" => Ok(Op::Div),
            "pow" => Ok(Op::Pow),
            other => Err(NodeError::Configuration(format!("unknown operation '{}'", other))),
        }
    }

    fn apply_int(self, a: i64, b: i64) -> Option<i64> {
        match self {
            Op::Add => a.checked_add(b),
            Op::Sub => a.checked_sub(b),
            Op::Mul => a.checked_mul(b),
            Op::Div | Op::Pow => None,
        }
    }

    fn apply_float(self, a: f64, b: f64) -> Result<f64, NodeError> {
        let result = match self {
            Op::Add => a + b,
            Op::Sub => a - b,
            Op::Mul => a * b,
            Op::Div if b == 0.0 => {
                return Err(NodeError::ExecutionFailed("division by zero".to_string()))
            }
            Op::Div => a / b,
            Op::Pow => a.powf(b),
        };
        if result.is_finite() {
            Ok(result)
        } else {
            Err(NodeError::ExecutionFailed(format!("{:?} produced a non-finite result", self)))
        }
    }
}

/// `result = a <op> b`; `b` falls back to the `operand` property
pub struct ArithmeticNode {
    op: Op,
    operand: Value,
}

fn number<'a>(value: &'a Value, field: &str) -> Result<&'a Value, NodeError> {
    if value.is_number() {
        Ok(value)
    } else {
        Err(NodeError::InvalidInputType {
            field: field.to_string(),
            expected: "number".to_string(),
            actual: value.type_name().to_string(),
        })
    }
}

#[async_trait]
impl Component for ArithmeticNode {
    async fn run(&self, ctx: ComponentContext) -> Result<PortValues, NodeError> {
        let a = number(ctx.require_input("a")?, "a")?;
        let b = match ctx.inputs.get("b").filter(|v| !v.is_null()) {
            Some(b) => number(b, "b")?,
            None => number(&self.operand, "operand")?,
        };

        // Integer operands stay integers where the operation allows it.
        let int_result = match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => self.op.apply_int(x, y),
            _ => None,
        };
        let result = match int_result {
            Some(n) => Value::from(n),
            None => {
                let x = a.as_f64().unwrap_or_default();
                let y = b.as_f64().unwrap_or_default();
                Value::from(self.op.apply_float(x, y)?)
            }
        };

        Ok(PortValues::from([("result".to_string(), result)]))
    }
}

pub struct ArithmeticNodeFactory;

impl ComponentFactory for ArithmeticNodeFactory {
    fn descriptor(&self) -> ComponentDescriptor {
        ComponentDescriptor::new("math", "Arithmetic")
            .with_description("Apply a binary arithmetic operation")
            .with_input(PortSpec::new("a", "A").of_type("number"))
            .with_input(PortSpec::new("b", "B").of_type("number"))
            .with_output(PortSpec::new("result", "Result").of_type("number"))
            .with_property(
                "op",
                PropertySpec::choice("add", &["add", "sub", "mul", "div", "pow"]).with_label("Operation"),
            )
            .with_property("operand", PropertySpec::float(0.0).with_label("B when unconnected"))
    }

    fn create(&self, params: &Params) -> Result<Box<dyn Component>, NodeError> {
        Ok(Box::new(ArithmeticNode {
            op: Op::parse(params.str("op")?)?,
            operand: params.get("operand").cloned().unwrap_or(Value::from(0.0)),
        }))
    }
}
