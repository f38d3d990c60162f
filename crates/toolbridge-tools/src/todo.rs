//! Todo list tools.
//!
//! Five tools act on the caller's list, scoped by [`AuthContext::user_id`]:
//!
//! - `todo_add` -- append an item.
//! - `todo_list` -- show the list.
//! - `todo_complete` -- mark an item done (or open again).
//! - `todo_delete` -- remove an item.
//! - `todo_reorder` -- put the list in a new order.
//!
//! Every call answers with the whole list, both as text for the model and
//! as structured content rendered by the `todo-list` widget.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use toolbridge_agent::{AuthContext, ToolDescriptor, ToolError, ToolHandler, ToolResult};
use toolbridge_store::{Todo, TodoStore};

use crate::require_str;

pub const TODO_WIDGET_ID: &str = "todo-list";
pub const TODO_OUTPUT_TEMPLATE: &str = "ui://widget/todo-list.html";

/// The operation a todo tool performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TodoOp {
    Add,
    List,
    Complete,
    Delete,
    Reorder,
}

impl TodoOp {
    pub const ALL: [TodoOp; 5] = [
        TodoOp::Add,
        TodoOp::List,
        TodoOp::Complete,
        TodoOp::Delete,
        TodoOp::Reorder,
    ];

    pub fn tool_name(self) -> &'static str {
        match self {
            Self::Add => "todo_add",
            Self::List => "todo_list",
            Self::Complete => "todo_complete",
            Self::Delete => "todo_delete",
            Self::Reorder => "todo_reorder",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::Add => "Add an item to the user's todo list",
            Self::List => "Show the user's todo list",
            Self::Complete => "Mark a todo item as done, or as open again with completed=false",
            Self::Delete => "Delete an item from the user's todo list",
            Self::Reorder => "Reorder the user's todo list; ids must name every item exactly once",
        }
    }

    fn input_schema(self) -> Value {
        match self {
            Self::Add => json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "minLength": 1, "description": "What needs doing" }
                },
                "required": ["title"]
            }),
            Self::List => json!({ "type": "object", "properties": {} }),
            Self::Complete => json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Id of the todo item" },
                    "completed": { "type": "boolean", "description": "Defaults to true" }
                },
                "required": ["id"]
            }),
            Self::Delete => json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Id of the todo item" }
                },
                "required": ["id"]
            }),
            Self::Reorder => json!({
                "type": "object",
                "properties": {
                    "ids": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Every todo id, in the new order"
                    }
                },
                "required": ["ids"]
            }),
        }
    }

    fn invoking(self) -> &'static str {
        match self {
            Self::List => "Loading your list",
            _ => "Updating your list",
        }
    }

    fn invoked(self) -> &'static str {
        match self {
            Self::List => "List loaded",
            _ => "List updated",
        }
    }
}

/// Handler for one todo operation.
pub struct TodoTool {
    op: TodoOp,
    store: TodoStore,
}

impl TodoTool {
    pub fn new(op: TodoOp, store: TodoStore) -> Self {
        Self { op, store }
    }

    /// Descriptor with widget metadata attached.
    pub fn descriptor(op: TodoOp, store: TodoStore) -> toolbridge_agent::Result<ToolDescriptor> {
        Ok(ToolDescriptor::new(
            op.tool_name(),
            op.description(),
            op.input_schema(),
            Arc::new(Self::new(op, store)),
        )?
        .with_metadata("openai/outputTemplate", json!(TODO_OUTPUT_TEMPLATE))
        .with_metadata("openai/toolInvocation/invoking", json!(op.invoking()))
        .with_metadata("openai/toolInvocation/invoked", json!(op.invoked())))
    }

    // -- operations ----------------------------------------------------------

    async fn add(&self, user_id: &str, args: &Value) -> Result<String, ToolError> {
        let title = require_str(args, "title")?;
        let todo = self.store.add(user_id, title).await?;
        debug!(user_id, todo_id = %todo.id, "todo added");
        Ok(format!("Added \"{}\".", todo.title))
    }

    async fn complete(&self, user_id: &str, args: &Value) -> Result<String, ToolError> {
        let id = require_str(args, "id")?;
        let completed = args
            .get("completed")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let todo = self.store.set_completed(user_id, id, completed).await?;
        Ok(if completed {
            format!("Marked \"{}\" as done.", todo.title)
        } else {
            format!("Reopened \"{}\".", todo.title)
        })
    }

    async fn delete(&self, user_id: &str, args: &Value) -> Result<String, ToolError> {
        let id = require_str(args, "id")?;
        self.store.delete(user_id, id).await?;
        Ok("Deleted the item.".to_owned())
    }

    async fn reorder(&self, user_id: &str, args: &Value) -> Result<String, ToolError> {
        let ids = args
            .get("ids")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::invalid_params("missing required array field `ids`"))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| ToolError::invalid_params("`ids` must contain strings"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.store.reorder(user_id, &ids).await?;
        Ok("Reordered the list.".to_owned())
    }
}

#[async_trait]
impl ToolHandler for TodoTool {
    async fn call(&self, args: Value, auth: &AuthContext) -> Result<ToolResult, ToolError> {
        let user_id = auth.user_id.as_str();
        let summary = match self.op {
            TodoOp::Add => Some(self.add(user_id, &args).await?),
            TodoOp::List => None,
            TodoOp::Complete => Some(self.complete(user_id, &args).await?),
            TodoOp::Delete => Some(self.delete(user_id, &args).await?),
            TodoOp::Reorder => Some(self.reorder(user_id, &args).await?),
        };

        let todos = self.store.list(user_id).await?;
        Ok(list_result(summary, &todos))
    }
}

/// What the widget receives for each item.
#[derive(Debug, Serialize)]
struct TodoView<'a> {
    id: &'a str,
    title: &'a str,
    completed: bool,
    position: i64,
}

fn list_result(summary: Option<String>, todos: &[Todo]) -> ToolResult {
    let mut text = summary.map(|s| format!("{s}\n")).unwrap_or_default();
    if todos.is_empty() {
        text.push_str("The todo list is empty.");
    } else {
        text.push_str("Todo list:");
        for todo in todos {
            let mark = if todo.completed { "x" } else { " " };
            text.push_str(&format!("\n[{mark}] {} (id: {})", todo.title, todo.id));
        }
    }

    let views: Vec<TodoView<'_>> = todos
        .iter()
        .map(|t| TodoView {
            id: &t.id,
            title: &t.title,
            completed: t.completed,
            position: t.position,
        })
        .collect();

    ToolResult::text(text)
        .with_structured_content(json!({ "todos": views }))
        .with_widget_id(TODO_WIDGET_ID)
        .with_meta(json!({ "openai/outputTemplate": TODO_OUTPUT_TEMPLATE }))
}
