//! Single tool invocation.
//!
//! Whatever goes wrong (malformed arguments, schema violations, handler
//! errors, handler panics) the caller always receives a [`ToolResult`];
//! failures become the synthetic `{"error": "..."}` result.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::tools::registry::{AuthContext, ToolDescriptor, ToolRegistry};
use crate::tools::result::ToolResult;

/// Parse, validate and run one tool call.
pub async fn execute(
    descriptor: &ToolDescriptor,
    raw_arguments: &str,
    auth: &AuthContext,
) -> ToolResult {
    let tool = descriptor.name();

    let args = match parse_arguments(raw_arguments) {
        Ok(args) => args,
        Err(e) => {
            warn!(tool, error = %e, "tool arguments are not valid JSON");
            return ToolResult::error(format!("Invalid arguments for tool {tool}: {e}"));
        }
    };

    if let Err(violations) = descriptor.validate(&args) {
        warn!(tool, %violations, "tool arguments failed schema validation");
        return ToolResult::error(format!(
            "Invalid arguments for tool {tool}: {violations}"
        ));
    }

    debug!(tool, user_id = %auth.user_id, "executing tool");

    let call = descriptor.handler().call(args, auth);
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!(tool, error = %e, "tool execution failed");
            ToolResult::error(e.to_string())
        }
        Err(_) => {
            warn!(tool, "tool handler panicked");
            ToolResult::error(format!("Tool {tool} failed unexpectedly"))
        }
    }
}

/// Resolve `name` in `registry` and execute it.
///
/// An unknown name yields `{"error": "Tool <name> not found"}`.
pub async fn execute_named(
    registry: &ToolRegistry,
    name: &str,
    raw_arguments: &str,
    auth: &AuthContext,
) -> ToolResult {
    match registry.get(name) {
        Some(descriptor) => execute(descriptor, raw_arguments, auth).await,
        None => {
            warn!(tool = name, "model requested an unknown tool");
            ToolResult::error(format!("Tool {name} not found"))
        }
    }
}

/// Empty or whitespace-only arguments mean "no arguments".
fn parse_arguments(raw: &str) -> serde_json::Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw)
}
