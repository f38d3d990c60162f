//! Agent error types.
//!
//! Run-level failures surface through [`AgentError`]. Failures of a single
//! tool call never do: tool handlers report [`ToolError`], which the
//! executor folds into the transcript as a synthetic error result.

use toolbridge_store::StoreError;

/// Unified error type for the orchestration runtime.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- LLM errors ----------------------------------------------------------
    /// An HTTP request to the LLM provider failed.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// The LLM response could not be parsed into the expected format.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    /// The streaming SSE connection was interrupted or produced invalid data.
    #[error("llm stream error: {reason}")]
    LlmStreamError { reason: String },

    /// The API key is missing for a provider that requires one.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    // -- Runtime errors ------------------------------------------------------
    /// The tool loop kept requesting tools past the iteration cap.
    #[error("max iterations exceeded ({max_iterations})")]
    MaxIterationsExceeded { max_iterations: u32 },

    /// The consumer of a chunk stream went away.
    #[error("stream consumer closed the channel")]
    ChannelClosed,

    /// The caller's request was rejected before any work started.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    // -- Registry errors -----------------------------------------------------
    /// A tool's input schema is not a valid JSON Schema.
    #[error("invalid input schema for tool `{tool_name}`: {reason}")]
    InvalidToolSchema { tool_name: String, reason: String },

    /// Two tools were registered under the same name.
    #[error("tool `{tool_name}` is already registered")]
    DuplicateTool { tool_name: String },

    // -- Configuration errors ------------------------------------------------
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    // -- Upstream crate errors -----------------------------------------------
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.
    #[error("internal agent error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}

/// Failure reported by a tool handler.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Arguments were well-formed JSON but semantically wrong.
    #[error("invalid params: {reason}")]
    InvalidParams { reason: String },

    /// The tool ran and failed.
    #[error("{reason}")]
    ExecutionFailed { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ToolError {
    pub fn invalid_params(reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            reason: reason.into(),
        }
    }
}
