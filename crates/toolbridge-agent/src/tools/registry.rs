//! Tool descriptors and the startup registry.
//!
//! Descriptors are registered once while the process starts and are
//! immutable afterwards, so the registry is shared as `Arc<ToolRegistry>`
//! and read without locking.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::{Draft, JSONSchema};
use serde_json::{Map, Value};

use crate::error::{AgentError, Result, ToolError};
use crate::llm::types::ToolDefinition;
use crate::tools::result::ToolResult;

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// Identity of the caller a tool runs on behalf of.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// The bearer credential the caller presented.
    pub token: String,
    pub user_id: String,
}

impl AuthContext {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Server-side implementation of a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with already parsed and schema-validated arguments.
    async fn call(
        &self,
        args: Value,
        auth: &AuthContext,
    ) -> std::result::Result<ToolResult, ToolError>;
}

/// Adapter turning an async closure into a [`ToolHandler`].
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value, AuthContext) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<ToolResult, ToolError>> + Send,
{
    async fn call(
        &self,
        args: Value,
        auth: &AuthContext,
    ) -> std::result::Result<ToolResult, ToolError> {
        (self.0)(args, auth.clone()).await
    }
}

/// Wrap an async closure as a tool handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value, AuthContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<ToolResult, ToolError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// A registered tool: its public contract plus the handler behind it.
#[derive(Clone)]
pub struct ToolDescriptor {
    name: String,
    description: String,
    input_schema: Value,
    metadata: Map<String, Value>,
    handler: Arc<dyn ToolHandler>,
    validator: Arc<JSONSchema>,
}

impl ToolDescriptor {
    /// Build a descriptor, compiling `input_schema` up front.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<Self> {
        let name = name.into();
        let validator = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&input_schema)
            .map_err(|e| AgentError::InvalidToolSchema {
                tool_name: name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name,
            description: description.into(),
            input_schema,
            metadata: Map::new(),
            handler,
            validator: Arc::new(validator),
        })
    }

    /// Attach a metadata entry (e.g. `openai/outputTemplate`).
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }

    /// Check `args` against the input schema.
    ///
    /// On failure returns every violation as `path: message`, joined.
    pub fn validate(&self, args: &Value) -> std::result::Result<(), String> {
        self.validator.validate(args).map_err(|errors| {
            errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect::<Vec<_>>()
                .join("; ")
        })
    }

    /// The definition sent to the model.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered, name-indexed set of tool descriptors.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Look a tool up by exact name.
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.by_name.get(name).map(|&i| &self.tools[i])
    }

    /// Descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    /// Tool definitions in registration order, for the model request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(ToolDescriptor::definition).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Collects descriptors, rejecting duplicate names.
#[derive(Debug, Default)]
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
}

impl ToolRegistryBuilder {
    pub fn register(mut self, descriptor: ToolDescriptor) -> Result<Self> {
        if self.registry.by_name.contains_key(descriptor.name()) {
            return Err(AgentError::DuplicateTool {
                tool_name: descriptor.name().to_owned(),
            });
        }
        let index = self.registry.tools.len();
        self.registry
            .by_name
            .insert(descriptor.name().to_owned(), index);
        self.registry.tools.push(descriptor);
        Ok(self)
    }

    pub fn build(self) -> ToolRegistry {
        tracing::debug!(tool_count = self.registry.len(), "tool registry built");
        self.registry
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn echo(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(
            name,
            format!("{name} tool"),
            json!({"type": "object", "properties": {"x": {"type": "integer"}}, "required": ["x"]}),
            handler_fn(|args, _auth| async move { Ok(ToolResult::text(args.to_string())) }),
        )
        .unwrap()
    }

    #[test]
    fn registry_keeps_order_and_looks_up_by_name() {
        let registry = ToolRegistry::builder()
            .register(echo("b"))
            .unwrap()
            .register(echo("a"))
            .unwrap()
            .build();

        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["b", "a"]);
        assert_eq!(registry.get("a").map(|d| d.name()), Some("a"));
        assert!(registry.get("A").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = ToolRegistry::builder()
            .register(echo("add"))
            .unwrap()
            .register(echo("add"))
            .unwrap_err();
        assert!(matches!(err, AgentError::DuplicateTool { tool_name } if tool_name == "add"));
    }

    #[test]
    fn invalid_schema_is_rejected() {
        let err = ToolDescriptor::new(
            "bad",
            "bad schema",
            json!({"type": "not-a-type"}),
            handler_fn(|_, _| async { Ok(ToolResult::text("")) }),
        )
        .unwrap_err();
        assert!(matches!(err, AgentError::InvalidToolSchema { .. }));
    }

    #[test]
    fn validate_reports_violations() {
        let tool = echo("v");
        assert!(tool.validate(&json!({"x": 1})).is_ok());

        let err = tool.validate(&json!({"x": "one"})).unwrap_err();
        assert!(err.contains("/x"), "unexpected message: {err}");

        assert!(tool.validate(&json!({})).is_err());
    }

    #[test]
    fn auth_context_debug_hides_token() {
        let auth = AuthContext::new("secret-token", "alice");
        let printed = format!("{auth:?}");
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("alice"));
    }

    #[test]
    fn metadata_is_attached() {
        let tool = echo("m").with_metadata("openai/outputTemplate", json!("ui://widget/m.html"));
        assert_eq!(
            tool.metadata().get("openai/outputTemplate"),
            Some(&json!("ui://widget/m.html"))
        );
    }
}
