//! Standard component library
//!
//! Collection of built-in components for common operations

mod data;
mod debug;
mod input;
mod math;
mod time;
mod transform;
mod variables;

pub use data::{SelectColumnsNode, SelectColumnsNodeFactory};
pub use debug::{LogNode, LogNodeFactory};
pub use input::{ConstantNode, ConstantNodeFactory, FileNode, FileNodeFactory};
pub use math::{ArithmeticNode, ArithmeticNodeFactory};
pub use time::{DelayNode, DelayNodeFactory};
pub use transform::{JsonParseNode, JsonParseNodeFactory, JsonStringifyNode, JsonStringifyNodeFactory};
pub use variables::{GetGlobalNode, GetGlobalNodeFactory, SetGlobalNode, SetGlobalNodeFactory};

use dagcore::{NodeError, Value, ValueExt};
use dagruntime::ComponentRegistry;
use std::sync::Arc;

/// Register all standard components with a registry
pub fn register_all(registry: &mut ComponentRegistry) {
    registry.register(Arc::new(input::ConstantNodeFactory));
    registry.register(Arc::new(input::FileNodeFactory));
    registry.register(Arc::new(math::ArithmeticNodeFactory));
    registry.register(Arc::new(data::SelectColumnsNodeFactory));
    registry.register(Arc::new(transform::JsonParseNodeFactory));
    registry.register(Arc::new(transform::JsonStringifyNodeFactory));
    registry.register(Arc::new(time::DelayNodeFactory));
    registry.register(Arc::new(debug::LogNodeFactory));
    registry.register(Arc::new(variables::SetGlobalNodeFactory));
    registry.register(Arc::new(variables::GetGlobalNodeFactory));
}

pub(crate) fn expect_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, NodeError> {
    value.as_str().ok_or_else(|| NodeError::InvalidInputType {
        field: field.to_string(),
        expected: "string".to_string(),
        actual: value.type_name().to_string(),
    })
}
