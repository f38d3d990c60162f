//! MCP (Model Context Protocol) server implementation.
//!
//! Implements the MCP JSON-RPC 2.0 protocol over HTTP, exposing the tool
//! registry to an AI host. Supports the `initialize`, `tools/list`,
//! `tools/call`, and `ping` methods.
//!
//! Notifications (requests without an `id`) are never answered, as
//! JSON-RPC 2.0 requires. A single notification gets `202 Accepted` with an
//! empty body, and notifications are left out of batch replies.
//!
//! Tool calls run through the same executor as the chat loop, on behalf of
//! the authenticated caller, so argument validation and failure handling are
//! identical on both paths.
//!
//! The MCP specification version targeted is `2024-11-05`.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use toolbridge_agent::tools::execute_named;
use toolbridge_agent::{AuthContext, ToolRegistry};

use crate::auth::AuthUser;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// MCP protocol version
// ---------------------------------------------------------------------------

/// The MCP protocol version this server implements.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// The server name reported during initialization.
const SERVER_NAME: &str = "toolbridge";

/// The server version reported during initialization.
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// JSON-RPC types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be `"2.0"`.
    pub jsonrpc: String,
    /// Request identifier. May be a number, string, or null for
    /// notifications.
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    /// Method parameters (defaults to `null` if absent).
    #[serde(default)]
    pub params: Value,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Echoed from the request.
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// Standard JSON-RPC error codes.
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

impl JsonRpcResponse {
    /// Construct a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Construct an error response.
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Construct an error response with additional data.
    pub fn error_with_data(
        id: Option<Value>,
        code: i32,
        message: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: Some(data),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// MCP-specific types
// ---------------------------------------------------------------------------

/// An MCP tool definition returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    /// Host-facing metadata, such as the widget output template.
    #[serde(rename = "_meta", default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// McpServer
// ---------------------------------------------------------------------------

/// MCP protocol server exposing a tool registry on behalf of one caller.
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    auth: AuthContext,
}

impl McpServer {
    pub fn new(registry: Arc<ToolRegistry>, auth: AuthContext) -> Self {
        Self { registry, auth }
    }

    /// Handle one message. Notifications are consumed and produce no
    /// response.
    pub async fn handle_message(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.id.is_some() {
            return Some(self.handle_request(request).await);
        }

        if request.method.starts_with("notifications/") {
            tracing::debug!(method = %request.method, user_id = %self.auth.user_id, "MCP notification received");
        } else {
            tracing::warn!(method = %request.method, "ignoring MCP call sent without an id");
        }
        None
    }

    /// Handle a single JSON-RPC request and return a response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        tracing::debug!(method = %request.method, user_id = %self.auth.user_id, "MCP request received");

        if request.jsonrpc != "2.0" {
            return JsonRpcResponse::error_with_data(
                request.id,
                INVALID_REQUEST,
                "unsupported jsonrpc version",
                json!({ "jsonrpc": request.jsonrpc }),
            );
        }

        match request.method.as_str() {
            "initialize" => self.handle_initialize(request.id),
            "ping" => JsonRpcResponse::success(request.id, json!({})),
            "tools/list" => self.handle_tools_list(request.id),
            "tools/call" => self.handle_tools_call(request.id, request.params).await,
            other => {
                tracing::warn!(method = %other, "unknown MCP method");
                JsonRpcResponse::error(
                    request.id,
                    METHOD_NOT_FOUND,
                    format!("method not found: {other}"),
                )
            }
        }
    }

    /// Handle the `initialize` handshake.
    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": SERVER_VERSION
                }
            }),
        )
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        match serde_json::to_value(self.list_tools()) {
            Ok(tools) => JsonRpcResponse::success(id, json!({ "tools": tools })),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize tool list");
                JsonRpcResponse::error(id, INTERNAL_ERROR, "failed to serialize tool list")
            }
        }
    }

    /// Handle `tools/call` through the tool executor.
    ///
    /// Tool failures are not protocol errors: they come back as a successful
    /// response whose result has `isError: true`.
    async fn handle_tools_call(&self, id: Option<Value>, params: Value) -> JsonRpcResponse {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                "missing required field `name` in params",
            );
        };

        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => "{}".to_owned(),
            Some(args) => args.to_string(),
        };

        let result = execute_named(&self.registry, name, &arguments, &self.auth).await;
        match serde_json::to_value(&result) {
            Ok(v) => JsonRpcResponse::success(id, v),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize tool result");
                JsonRpcResponse::error(id, INTERNAL_ERROR, "failed to serialize tool result")
            }
        }
    }

    fn list_tools(&self) -> Vec<McpToolDefinition> {
        self.registry
            .iter()
            .map(|d| McpToolDefinition {
                name: d.name().to_owned(),
                description: d.description().to_owned(),
                input_schema: d.input_schema().clone(),
                meta: d.metadata().clone(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Axum handlers
// ---------------------------------------------------------------------------

/// Handle `POST /mcp`.
///
/// The body is either a single JSON-RPC request object or an array of
/// request objects (batch mode). When nothing in the body needs an answer
/// the reply is `202 Accepted` with no body.
pub async fn handle_mcp_request(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
    body: String,
) -> Response {
    let mcp = McpServer::new(Arc::clone(state.registry()), auth);

    // Try to parse as an array first (batch request), then as a single request.
    if let Ok(batch) = serde_json::from_str::<Vec<JsonRpcRequest>>(&body) {
        if batch.is_empty() {
            return Json(json!(JsonRpcResponse::error(
                None,
                INVALID_REQUEST,
                "empty batch request",
            )))
            .into_response();
        }
        let mut responses = Vec::with_capacity(batch.len());
        for req in batch {
            if let Some(resp) = mcp.handle_message(req).await {
                responses.push(resp);
            }
        }
        if responses.is_empty() {
            return StatusCode::ACCEPTED.into_response();
        }
        return Json(json!(responses)).into_response();
    }

    match serde_json::from_str::<JsonRpcRequest>(&body) {
        Ok(request) => match mcp.handle_message(request).await {
            Some(resp) => Json(json!(resp)).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        },
        Err(e) => Json(json!(JsonRpcResponse::error(
            None,
            PARSE_ERROR,
            format!("failed to parse JSON-RPC request: {e}"),
        )))
        .into_response(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use toolbridge_agent::{ToolDescriptor, ToolError, ToolResult, handler_fn};

    fn echo_registry() -> Arc<ToolRegistry> {
        let echo = ToolDescriptor::new(
            "echo",
            "Echoes input back",
            json!({
                "type": "object",
                "properties": { "input": { "type": "string" } },
                "required": ["input"]
            }),
            handler_fn(|args, auth| async move {
                Ok(ToolResult::text(format!(
                    "{} says {}",
                    auth.user_id,
                    args["input"].as_str().unwrap_or_default()
                ))
                .with_structured_content(json!({ "echoed": args["input"] })))
            }),
        )
        .unwrap()
        .with_metadata("openai/outputTemplate", json!("ui://widget/echo.html"));

        let fail = ToolDescriptor::new(
            "fail",
            "Always fails",
            json!({ "type": "object" }),
            handler_fn(|_args, _auth| async move {
                Err::<ToolResult, _>(ToolError::failed("intentional test failure"))
            }),
        )
        .unwrap();

        Arc::new(
            ToolRegistry::builder()
                .register(echo)
                .unwrap()
                .register(fail)
                .unwrap()
                .build(),
        )
    }

    fn server() -> McpServer {
        McpServer::new(echo_registry(), AuthContext::new("tok", "alice"))
    }

    fn make_request(id: Value, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    #[test]
    fn request_parses_without_params() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert_eq!(req.id, Some(json!(1)));
        assert!(req.params.is_null());
    }

    #[test]
    fn error_response_omits_result() {
        let resp = JsonRpcResponse::error(Some(json!(7)), METHOD_NOT_FOUND, "nope");
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["error"]["code"], -32601);
        assert!(v.get("result").is_none());
        assert!(v["error"].get("data").is_none());
    }

    #[tokio::test]
    async fn initialize_reports_protocol_version() {
        let resp = server()
            .handle_request(make_request(json!(1), "initialize", json!({})))
            .await;
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "toolbridge");
    }

    #[tokio::test]
    async fn tools_list_carries_schema_and_meta() {
        let resp = server()
            .handle_request(make_request(json!(2), "tools/list", Value::Null))
            .await;
        let tools = resp.result.unwrap()["tools"].clone();
        assert_eq!(tools.as_array().unwrap().len(), 2);
        assert_eq!(tools[0]["name"], "echo");
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["input"]));
        assert_eq!(
            tools[0]["_meta"]["openai/outputTemplate"],
            "ui://widget/echo.html"
        );
        assert!(tools[1].get("_meta").is_none());
    }

    #[tokio::test]
    async fn tools_call_runs_as_caller() {
        let resp = server()
            .handle_request(make_request(
                json!(3),
                "tools/call",
                json!({"name": "echo", "arguments": {"input": "hi"}}),
            ))
            .await;
        let result = resp.result.unwrap();
        assert_eq!(result["content"][0]["text"], "alice says hi");
        assert_eq!(result["structuredContent"], json!({"echoed": "hi"}));
        assert_eq!(result["isError"], false);
    }

    #[tokio::test]
    async fn tool_failures_are_results_not_protocol_errors() {
        let server = server();

        let failed = server
            .handle_request(make_request(json!(4), "tools/call", json!({"name": "fail"})))
            .await;
        assert!(failed.error.is_none());
        assert_eq!(failed.result.unwrap()["isError"], true);

        let invalid = server
            .handle_request(make_request(
                json!(5),
                "tools/call",
                json!({"name": "echo", "arguments": {}}),
            ))
            .await;
        assert_eq!(invalid.result.unwrap()["isError"], true);

        let unknown = server
            .handle_request(make_request(
                json!(6),
                "tools/call",
                json!({"name": "nope", "arguments": {}}),
            ))
            .await;
        let text = unknown.result.unwrap()["content"][0]["text"].clone();
        assert_eq!(text, r#"{"error":"Tool nope not found"}"#);
    }

    #[tokio::test]
    async fn tools_call_without_name_is_invalid_params() {
        let resp = server()
            .handle_request(make_request(json!(7), "tools/call", json!({})))
            .await;
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let server = server();
        let initialized: JsonRpcRequest = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .unwrap();
        assert!(server.handle_message(initialized).await.is_none());

        let ping = make_request(json!(10), "ping", json!({}));
        let resp = server.handle_message(ping).await.unwrap();
        assert_eq!(resp.id, Some(json!(10)));
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn unknown_method_and_version() {
        let server = server();
        let resp = server
            .handle_request(make_request(json!(8), "resources/list", json!({})))
            .await;
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);

        let mut old = make_request(json!(9), "ping", json!({}));
        old.jsonrpc = "1.0".into();
        let resp = server.handle_request(old).await;
        assert_eq!(resp.error.unwrap().code, INVALID_REQUEST);
    }
}
