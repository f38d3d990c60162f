//! LLM integration layer.
//!
//! - [`types`] -- messages, tool calls, requests, responses and deltas.
//! - [`client`] -- HTTP client for OpenAI-compatible chat completions.
//! - [`streaming`] -- SSE parsing into incremental deltas.
//!
//! The drivers never talk to [`LlmClient`] directly; they hold an
//! `Arc<dyn ChatModel>` so tests and alternative providers can be injected.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;

pub mod client;
pub mod streaming;
pub mod types;

pub use client::{LlmClient, LlmClientConfig};
pub use streaming::{SseDeltaParser, sse_delta_stream};
pub use types::{
    ChatDelta, ChatRequest, ChatResponse, Message, Role, ToolCall, ToolCallDelta, ToolDefinition,
};

/// A finite, non-restartable stream of response fragments.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<ChatDelta>> + Send>>;

/// A chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send `request` and wait for the whole response.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Send `request` in streaming mode.
    ///
    /// Errors establishing the stream are returned directly; errors while
    /// reading it are yielded as stream items.
    async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream>;
}
