//! Tool-calling orchestration for toolbridge.
//!
//! This crate drives a chat model through bounded rounds of tool use: the
//! model asks for tools, the executor runs them against the caller's
//! identity, the results go back into the transcript, and the loop repeats
//! until the model answers in plain text.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────┐     ┌──────────────┐
//! │ Conversation │────>│ ToolLoop │────>│   Executor   │
//! │  (sessions)  │     │ (rounds) │     │ (+ registry) │
//! └──────┬───────┘     └────┬─────┘     └──────────────┘
//!        │                  │
//!  ┌─────┴─────┐      ┌─────┴─────┐
//!  │   Store   │      │ ChatModel │
//!  │ (sqlite)  │      │ (OpenAI)  │
//!  └───────────┘      └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`llm`] -- wire types, the `ChatModel` seam, HTTP client and SSE parsing.
//! - [`tools`] -- tool registry, executor and result types.
//! - [`driver`] -- completion and streaming drivers, delta reassembly.
//! - [`conversation`] -- session-level runs with persistence and titling.
//! - [`error`] -- agent error types.

pub mod conversation;
pub mod driver;
pub mod error;
pub mod llm;
pub mod tools;

// Re-export the most commonly used types at the crate root.
pub use conversation::{
    ConversationConfig, ConversationService, ConversationStore, DEFAULT_SESSION_NAME,
    RESET_MARKER,
};
pub use driver::{CompletionOutcome, LoopConfig, StreamChunk, ToolCallAssembler, ToolLoop};
pub use error::{AgentError, Result, ToolError};
pub use llm::{
    ChatDelta, ChatModel, ChatRequest, ChatResponse, DeltaStream, LlmClient, LlmClientConfig,
    Message, Role, ToolCall, ToolCallDelta, ToolDefinition,
};
pub use tools::{
    AuthContext, StickyFields, ToolContent, ToolDescriptor, ToolHandler, ToolRegistry,
    ToolResult, handler_fn,
};
