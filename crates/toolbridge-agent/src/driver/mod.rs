//! The bounded tool-calling loop.
//!
//! A run alternates model rounds and tool batches:
//!
//! 1. Send the transcript plus every registered tool definition.
//! 2. No tool calls in the answer: the run is over.
//! 3. Otherwise append the assistant's tool-call batch, execute each call in
//!    the order the model listed them, append one tool message per call,
//!    and go back to 1.
//!
//! The run fails with [`AgentError::MaxIterationsExceeded`] once the model
//! has been called `max_iterations` times without settling. Tool failures
//! never fail the run; they are folded into the transcript.
//!
//! [`ToolLoop::complete`] drives non-streaming rounds; [`ToolLoop::stream`]
//! drives streaming rounds and pushes [`StreamChunk`]s to a consumer.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::llm::ChatModel;
use crate::llm::types::{ChatRequest, Message, ToolCall, ToolDefinition};
use crate::tools::{AuthContext, StickyFields, ToolRegistry, ToolResult, execute_named};

mod stream;

pub use stream::{MAX_TOOL_CALLS_PER_ROUND, StreamChunk, ToolCallAssembler};

/// Default cap on model calls per run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Per-loop model settings.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Model identifier. Empty means the client's default.
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Maximum number of model calls in one run.
    pub max_iterations: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: Some(0.7),
            max_tokens: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal state of a successful run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOutcome {
    /// Content of the final assistant message.
    pub content: String,
    pub meta: Option<Value>,
    pub structured_content: Option<Value>,
    pub widget_id: Option<String>,
    /// Full transcript, including every tool round and the final answer.
    pub messages: Vec<Message>,
    /// Number of model calls made.
    pub iterations: u32,
}

impl CompletionOutcome {
    fn new(content: String, sticky: StickyFields, messages: Vec<Message>, iterations: u32) -> Self {
        Self {
            content,
            meta: sticky.meta,
            structured_content: sticky.structured_content,
            widget_id: sticky.widget_id,
            messages,
            iterations,
        }
    }
}

// ---------------------------------------------------------------------------
// ToolLoop
// ---------------------------------------------------------------------------

/// Runs transcripts against a chat model and a tool registry.
#[derive(Clone)]
pub struct ToolLoop {
    model: Arc<dyn ChatModel>,
    registry: Arc<ToolRegistry>,
    config: LoopConfig,
}

impl ToolLoop {
    pub fn new(model: Arc<dyn ChatModel>, registry: Arc<ToolRegistry>, config: LoopConfig) -> Self {
        Self {
            model,
            registry,
            config,
        }
    }

    pub fn model(&self) -> &Arc<dyn ChatModel> {
        &self.model
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run to completion with non-streaming model calls.
    ///
    /// # Errors
    ///
    /// [`AgentError::MaxIterationsExceeded`] when the model is still asking
    /// for tools after `max_iterations` calls; model transport errors are
    /// propagated unchanged.
    pub async fn complete(
        &self,
        mut messages: Vec<Message>,
        auth: &AuthContext,
    ) -> Result<CompletionOutcome> {
        let run_id = Uuid::now_v7();
        let tools = self.registry.definitions();
        let mut sticky = StickyFields::default();

        info!(
            run_id = %run_id,
            max_iterations = self.config.max_iterations,
            tool_count = tools.len(),
            "starting tool loop"
        );

        for iteration in 1..=self.config.max_iterations {
            debug!(run_id = %run_id, iteration, "model round");

            let response = self.model.complete(&self.request(&messages, &tools)).await?;

            if response.tool_calls.is_empty() {
                info!(run_id = %run_id, iterations = iteration, "tool loop finished");
                messages.push(Message::assistant(response.content.clone()));
                return Ok(CompletionOutcome::new(
                    response.content,
                    sticky,
                    messages,
                    iteration,
                ));
            }

            messages.push(Message::assistant_tool_calls(
                response.content,
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                let result = self.run_tool(call, auth).await;
                sticky.absorb(&result);
                messages.push(Message::tool_result(
                    &call.id,
                    &call.name,
                    result.render_text(),
                ));
            }
        }

        Err(self.exhausted(run_id))
    }

    // -- shared helpers ------------------------------------------------------

    fn request(&self, messages: &[Message], tools: &[ToolDefinition]) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }

    async fn run_tool(&self, call: &ToolCall, auth: &AuthContext) -> ToolResult {
        debug!(tool = %call.name, call_id = %call.id, "dispatching tool call");
        execute_named(&self.registry, &call.name, &call.arguments, auth).await
    }

    fn exhausted(&self, run_id: Uuid) -> AgentError {
        warn!(
            run_id = %run_id,
            max_iterations = self.config.max_iterations,
            "tool loop exceeded max iterations"
        );
        AgentError::MaxIterationsExceeded {
            max_iterations: self.config.max_iterations,
        }
    }
}
