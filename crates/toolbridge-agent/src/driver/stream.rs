//! Streaming rounds: delta reassembly and the chunk protocol.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CompletionOutcome, ToolLoop};
use crate::error::{AgentError, Result};
use crate::llm::types::{Message, ToolCall, ToolCallDelta};
use crate::tools::{AuthContext, StickyFields};

/// Tool-call indices at or above this are dropped.
pub const MAX_TOOL_CALLS_PER_ROUND: usize = 128;

const FINISH_TOOL_CALLS: &str = "tool_calls";

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// One element of the ordered stream a run pushes to its consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Incremental assistant text.
    Content { content: String },

    /// A finalized batch of tool calls about to execute.
    ToolCall { tool_calls: Vec<ToolCall> },

    /// Rendered output of one tool call.
    ToolResult {
        tool_call_id: String,
        name: String,
        result: String,
    },

    /// Sticky fields of the run, sent once before `done` when any is set.
    Metadata {
        #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
        meta: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        structured_content: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        widget_id: Option<String>,
    },

    /// Terminal marker. Carries the persisted message id when there is one.
    Done {
        #[serde(default)]
        message_id: Option<i64>,
    },

    /// Terminal failure. Nothing follows it.
    Error { message: String },
}

impl StreamChunk {
    fn metadata(sticky: &StickyFields) -> Self {
        Self::Metadata {
            meta: sticky.meta.clone(),
            structured_content: sticky.structured_content.clone(),
            widget_id: sticky.widget_id.clone(),
        }
    }

    /// Whether nothing may follow this chunk.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

// ---------------------------------------------------------------------------
// Reassembly
// ---------------------------------------------------------------------------

/// Rebuilds complete tool calls from index-tagged fragments.
///
/// `id` and `name` are overwritten by later fragments; `arguments` is always
/// appended.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: Vec<ToolCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment.
    pub fn apply(&mut self, fragment: &ToolCallDelta) {
        if fragment.index >= MAX_TOOL_CALLS_PER_ROUND {
            warn!(
                index = fragment.index,
                limit = MAX_TOOL_CALLS_PER_ROUND,
                "dropping tool call fragment with out-of-range index"
            );
            return;
        }

        if fragment.index >= self.calls.len() {
            self.calls.resize_with(fragment.index + 1, ToolCall::default);
        }
        let call = &mut self.calls[fragment.index];

        if let Some(id) = &fragment.id {
            call.id.clone_from(id);
        }
        if let Some(name) = &fragment.name {
            call.name.clone_from(name);
        }
        if let Some(arguments) = &fragment.arguments {
            call.arguments.push_str(arguments);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// The assembled calls in index order.
    ///
    /// Slots that never received any fragment (gaps in the index sequence)
    /// are skipped.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .filter(|c| !(c.id.is_empty() && c.name.is_empty() && c.arguments.is_empty()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Streaming driver
// ---------------------------------------------------------------------------

impl ToolLoop {
    /// Run to completion with streaming model calls, pushing chunks to
    /// `sender` as they are produced.
    ///
    /// On success the last chunk sent is `done` with no message id.
    ///
    /// # Errors
    ///
    /// [`AgentError::ChannelClosed`] as soon as a send finds the receiver
    /// gone; [`AgentError::MaxIterationsExceeded`] past the cap; model
    /// errors as they occur. No `done` chunk is sent on error.
    pub async fn stream(
        &self,
        mut messages: Vec<Message>,
        auth: &AuthContext,
        sender: &mpsc::Sender<StreamChunk>,
    ) -> Result<CompletionOutcome> {
        let run_id = Uuid::now_v7();
        let tools = self.registry.definitions();
        let mut sticky = StickyFields::default();

        info!(
            run_id = %run_id,
            max_iterations = self.config.max_iterations,
            tool_count = tools.len(),
            "starting streaming tool loop"
        );

        for iteration in 1..=self.config.max_iterations {
            debug!(run_id = %run_id, iteration, "streaming model round");

            let mut deltas = self.model.stream(&self.request(&messages, &tools)).await?;
            let mut content = String::new();
            let mut assembler = ToolCallAssembler::new();

            while let Some(delta) = deltas.next().await {
                let delta = delta?;

                if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                    content.push_str(&text);
                    emit(sender, StreamChunk::Content { content: text }).await?;
                }
                for fragment in &delta.tool_calls {
                    assembler.apply(fragment);
                }
                if delta.finish_reason.as_deref() == Some(FINISH_TOOL_CALLS) {
                    break;
                }
            }
            drop(deltas);

            let calls = assembler.finish();
            if calls.is_empty() {
                info!(run_id = %run_id, iterations = iteration, "streaming tool loop finished");
                messages.push(Message::assistant(content.clone()));
                if sticky.is_set() {
                    emit(sender, StreamChunk::metadata(&sticky)).await?;
                }
                emit(sender, StreamChunk::Done { message_id: None }).await?;
                return Ok(CompletionOutcome::new(content, sticky, messages, iteration));
            }

            emit(
                sender,
                StreamChunk::ToolCall {
                    tool_calls: calls.clone(),
                },
            )
            .await?;
            messages.push(Message::assistant_tool_calls(content, calls.clone()));

            for call in &calls {
                let result = self.run_tool(call, auth).await;
                sticky.absorb(&result);
                let text = result.render_text();
                emit(
                    sender,
                    StreamChunk::ToolResult {
                        tool_call_id: call.id.clone(),
                        name: call.name.clone(),
                        result: text.clone(),
                    },
                )
                .await?;
                messages.push(Message::tool_result(&call.id, &call.name, text));
            }
        }

        Err(self.exhausted(run_id))
    }

    /// Run [`ToolLoop::stream`] on a background task and hand back the
    /// receiving end of a bounded channel.
    ///
    /// A fatal error becomes a terminal [`StreamChunk::Error`]. Dropping the
    /// receiver stops the run at its next send.
    pub fn spawn_stream(
        &self,
        messages: Vec<Message>,
        auth: AuthContext,
        capacity: usize,
    ) -> mpsc::Receiver<StreamChunk> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let driver = self.clone();

        tokio::spawn(async move {
            match driver.stream(messages, &auth, &tx).await {
                Ok(_) => {}
                Err(AgentError::ChannelClosed) => {
                    debug!(user_id = %auth.user_id, "stream consumer went away, run stopped");
                }
                Err(e) => {
                    warn!(user_id = %auth.user_id, error = %e, "streaming run failed");
                    let _ = tx
                        .send(StreamChunk::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        });

        rx
    }
}

async fn emit(sender: &mpsc::Sender<StreamChunk>, chunk: StreamChunk) -> Result<()> {
    sender
        .send(chunk)
        .await
        .map_err(|_| AgentError::ChannelClosed)
}
