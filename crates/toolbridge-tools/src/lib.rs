//! Built-in tools for toolbridge.
//!
//! Each tool is a [`ToolHandler`](toolbridge_agent::ToolHandler) paired with
//! a descriptor carrying its JSON Schema. [`default_registry`] assembles the
//! set registered at startup:
//!
//! - [`calculator`] -- `add`.
//! - [`todo`] -- `todo_add`, `todo_list`, `todo_complete`, `todo_delete`,
//!   `todo_reorder`.

use serde_json::Value;

use toolbridge_agent::{ToolError, ToolRegistry};
use toolbridge_store::TodoStore;

pub mod calculator;
pub mod todo;

pub use calculator::{ADD_TOOL, AddTool, add_descriptor};
pub use todo::{TODO_OUTPUT_TEMPLATE, TODO_WIDGET_ID, TodoOp, TodoTool};

/// The registry the server and the CLI start with.
pub fn default_registry(todos: TodoStore) -> toolbridge_agent::Result<ToolRegistry> {
    let mut builder = ToolRegistry::builder().register(add_descriptor()?)?;
    for op in TodoOp::ALL {
        builder = builder.register(TodoTool::descriptor(op, todos.clone())?)?;
    }
    let registry = builder.build();
    tracing::info!(tool_count = registry.len(), "tool registry ready");
    Ok(registry)
}

/// Extract a required string field from tool arguments.
pub(crate) fn require_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid_params(format!("missing required string field `{field}`")))
}

/// Extract a required numeric field from tool arguments.
pub(crate) fn require_f64(args: &Value, field: &str) -> Result<f64, ToolError> {
    args.get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| ToolError::invalid_params(format!("missing required number field `{field}`")))
}
