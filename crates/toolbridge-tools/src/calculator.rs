//! Calculator tool.
//!
//! `add` sums two numbers. It is the smallest tool that exercises the whole
//! round trip: argument validation, a text block for the model and
//! structured content for the host.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use toolbridge_agent::{AuthContext, ToolDescriptor, ToolError, ToolHandler, ToolResult};

use crate::require_f64;

pub const ADD_TOOL: &str = "add";

/// Handler behind the `add` tool.
pub struct AddTool;

#[async_trait]
impl ToolHandler for AddTool {
    async fn call(&self, args: Value, _auth: &AuthContext) -> Result<ToolResult, ToolError> {
        let a = require_f64(&args, "a")?;
        let b = require_f64(&args, "b")?;
        let sum = a + b;
        if !sum.is_finite() {
            return Err(ToolError::failed("sum is out of range"));
        }

        debug!(a, b, sum, "add");
        Ok(ToolResult::text(format_number(sum)).with_structured_content(json!({ "sum": sum })))
    }
}

/// Descriptor for `add`.
pub fn add_descriptor() -> toolbridge_agent::Result<ToolDescriptor> {
    ToolDescriptor::new(
        ADD_TOOL,
        "Add two numbers and return their sum",
        json!({
            "type": "object",
            "properties": {
                "a": { "type": "number", "description": "First addend" },
                "b": { "type": "number", "description": "Second addend" }
            },
            "required": ["a", "b"],
            "additionalProperties": false
        }),
        Arc::new(AddTool),
    )
}

/// Integral values print without a fractional part.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
