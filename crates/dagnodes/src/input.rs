//! Source components: literal values and file contents.

use crate::expect_str;
use async_trait::async_trait;
use dagcore::{
    Component, ComponentContext, ComponentDescriptor, NodeError, Params, PortSpec, PortValues,
    PropertySpec, PropertyType, Value,
};
use dagruntime::ComponentFactory;

/// Emits a configured literal
pub struct ConstantNode {
    value: Value,
}

#[async_trait]
impl Component for ConstantNode {
    async fn run(&self, _ctx: ComponentContext) -> Result<PortValues, NodeError> {
        Ok(PortValues::from([("value".to_string(), self.value.clone())]))
    }
}

pub struct ConstantNodeFactory;

impl ComponentFactory for ConstantNodeFactory {
    fn descriptor(&self) -> ComponentDescriptor {
        ComponentDescriptor::new("input", "Constant")
            .with_description("Emit a constant value")
            .with_output(PortSpec::new("value", "Value"))
            .with_property(
                "value",
                PropertySpec::new(PropertyType::TextArea, "").with_label("Value"),
            )
            .with_property(
                "parse_json",
                PropertySpec::bool(true).with_label("Interpret value as JSON"),
            )
    }

    /// With `parse_json`, text that parses as JSON is emitted as the parsed
    /// value; anything else is emitted as a string.
    fn create(&self, params: &Params) -> Result<Box<dyn Component>, NodeError> {
        let text = params.str("value")?;
        let value = if params.bool("parse_json")? {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
        } else {
            Value::String(text.to_string())
        };
        Ok(Box::new(ConstantNode { value }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Text,
    Json,
    Lines,
}

/// Reads a file named by the `path` input or property
pub struct FileNode {
    path: String,
    format: FileFormat,
}

#[async_trait]
impl Component for FileNode {
    async fn run(&self, ctx: ComponentContext) -> Result<PortValues, NodeError> {
        let path = match ctx.inputs.get("path").filter(|v| !v.is_null()) {
            Some(value) => expect_str(value, "path")?.to_string(),
            None => self.path.clone(),
        };
        if path.trim().is_empty() {
            return Err(NodeError::MissingInput("path".to_string()));
        }

        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("failed to read {}: {}", path, e)))?;
        ctx.info(format!("Read {} bytes from {}", text.len(), path));

        let content = match self.format {
            FileFormat::Text => Value::String(text),
            FileFormat::Json => serde_json::from_str(&text)
                .map_err(|e| NodeError::ExecutionFailed(format!("{} is not JSON: {}", path, e)))?,
            FileFormat::Lines => Value::Array(
                text.lines()
                    .map(|line| Value::String(line.to_string()))
                    .collect(),
            ),
        };

        Ok(PortValues::from([
            ("content".to_string(), content),
            ("path".to_string(), Value::String(path)),
        ]))
    }
}

pub struct FileNodeFactory;

impl ComponentFactory for FileNodeFactory {
    fn descriptor(&self) -> ComponentDescriptor {
        ComponentDescriptor::new("input", "File")
            .with_description("Read a file from disk")
            .with_input(PortSpec::new("path", "Path").of_type("string"))
            .with_output(PortSpec::new("content", "Content"))
            .with_output(PortSpec::new("path", "Path").of_type("string"))
            .with_property("path", PropertySpec::new(PropertyType::File, "").with_label("File"))
            .with_property(
                "format",
                PropertySpec::choice("text", &["text", "json", "lines"]).with_label("Format"),
            )
    }

    fn create(&self, params: &Params) -> Result<Box<dyn Component>, NodeError> {
        let format = match params.str("format")? {
            "json" => FileFormat::Json,
            "lines" => FileFormat::Lines,
            _ => FileFormat::Text,
        };
        Ok(Box::new(FileNode {
            path: params.str("path")?.to_string(),
            format,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, validated};
    use serde_json::json;

    async fn constant(raw: Value) -> Value {
        let factory = ConstantNodeFactory;
        let params = validated(&factory, raw);
        let (ctx, _) = context(json!({}), params.clone());
        let out = factory.create(&params).unwrap().run(ctx).await.unwrap();
        out["value"].clone()
    }

    #[tokio::test]
    async fn constant_parses_json_when_asked() {
        assert_eq!(constant(json!({"value": "[1, 2]"})).await, json!([1, 2]));
        assert_eq!(constant(json!({"value": "plain words"})).await, json!("plain words"));
        assert_eq!(
            constant(json!({"value": "42", "parse_json": false})).await,
            json!("42")
        );
    }

    #[tokio::test]
    async fn file_reads_lines_from_input_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.txt");
        std::fs::write(&path, "a\nb\n").unwrap();

        let factory = FileNodeFactory;
        let params = validated(&factory, json!({"format": "lines"}));
        let (ctx, _) = context(json!({"path": path.to_str().unwrap()}), params.clone());
        let out = factory.create(&params).unwrap().run(ctx).await.unwrap();

        assert_eq!(out["content"], json!(["a", "b"]));
        assert_eq!(out["path"], json!(path.to_str().unwrap()));
    }

    #[tokio::test]
    async fn file_without_path_is_missing_input() {
        let factory = FileNodeFactory;
        let params = validated(&factory, json!({}));
        let (ctx, _) = context(json!({}), params.clone());
        let err = factory.create(&params).unwrap().run(ctx).await.unwrap_err();
        assert_eq!(err, NodeError::MissingInput("path".to_string()));
    }
}
