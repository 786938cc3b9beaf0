use async_trait::async_trait;
use dagcore::{
    Component, ComponentContext, ComponentDescriptor, NodeError, Params, PortSpec, PortValues,
    PropertySpec, Value, ValueExt,
};
use dagruntime::{ComponentFactory, COLUMN_SELECT_SUFFIX};
use serde_json::Map;

/// Keeps only the selected columns of a table.
///
/// A table is either a list of row objects or an object of column arrays.
/// The selection comes from the `table` port's column selection when the
/// workflow records one, else from the comma-separated `columns` property.
pub struct SelectColumnsNode {
    columns: Vec<String>,
}

fn selection_from(value: &Value) -> Result<Vec<String>, NodeError> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(NodeError::InvalidInputType {
                    field: format!("table{}", COLUMN_SELECT_SUFFIX),
                    expected: "list of column names".to_string(),
                    actual: other.type_name().to_string(),
                }),
            })
            .collect(),
        Value::String(s) => Ok(split_columns(s)),
        other => Err(NodeError::InvalidInputType {
            field: format!("table{}", COLUMN_SELECT_SUFFIX),
            expected: "list of column names".to_string(),
            actual: other.type_name().to_string(),
        }),
    }
}

fn split_columns(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn pick(object: &Map<String, Value>, columns: &[String]) -> Result<Map<String, Value>, NodeError> {
    columns
        .iter()
        .map(|c| {
            object
                .get(c)
                .map(|v| (c.clone(), v.clone()))
                .ok_or_else(|| NodeError::ExecutionFailed(format!("column '{}' not found", c)))
        })
        .collect()
}

#[async_trait]
impl Component for SelectColumnsNode {
    async fn run(&self, ctx: ComponentContext) -> Result<PortValues, NodeError> {
        let table = ctx.require_input("table")?;
        let selection_key = format!("table{}", COLUMN_SELECT_SUFFIX);
        let columns = match ctx.inputs.get(&selection_key).filter(|v| !v.is_blank()) {
            Some(selection) => selection_from(selection)?,
            None => self.columns.clone(),
        };
        if columns.is_empty() {
            return Err(NodeError::Configuration("no columns selected".to_string()));
        }

        let selected = match table {
            Value::Array(rows) => Value::Array(
                rows.iter()
                    .enumerate()
                    .map(|(i, row)| match row {
                        Value::Object(object) => pick(object, &columns).map(Value::Object),
                        other => Err(NodeError::InvalidInputType {
                            field: format!("table[{}]", i),
                            expected: "object".to_string(),
                            actual: other.type_name().to_string(),
                        }),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Value::Object(object) => Value::Object(pick(object, &columns)?),
            other => {
                return Err(NodeError::InvalidInputType {
                    field: "table".to_string(),
                    expected: "array or object".to_string(),
                    actual: other.type_name().to_string(),
                })
            }
        };

        ctx.info(format!("Selected {} column(s)", columns.len()));
        Ok(PortValues::from([("table".to_string(), selected)]))
    }
}

pub struct SelectColumnsNodeFactory;

impl ComponentFactory for SelectColumnsNodeFactory {
    fn descriptor(&self) -> ComponentDescriptor {
        ComponentDescriptor::new("data", "Select Columns")
            .with_description("Keep only the chosen columns of a table")
            .with_input(PortSpec::new("table", "Table").of_type("table"))
            .with_output(PortSpec::new("table", "Table").of_type("table"))
            .with_property(
                "columns",
                PropertySpec::text("").with_label("Columns (comma separated)"),
            )
    }

    fn create(&self, params: &Params) -> Result<Box<dyn Component>, NodeError> {
        Ok(Box::new(SelectColumnsNode {
            columns: split_columns(params.str("columns")?),
        }))
    }
}
