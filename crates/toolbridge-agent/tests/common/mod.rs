//! Shared fixtures: a scripted chat model and a small tool registry.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use toolbridge_agent::{
    AgentError, AuthContext, ChatDelta, ChatModel, ChatRequest, ChatResponse, DeltaStream,
    ToolCall, ToolCallDelta, ToolDescriptor, ToolRegistry, ToolResult, handler_fn,
};

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum Turn {
    /// A whole response. Streaming calls receive it cut into fragments.
    Reply(ChatResponse),
    /// Raw deltas, for streaming calls only.
    Deltas(Vec<ChatDelta>),
    /// The call fails with a request error.
    Fail(String),
}

/// A [`ChatModel`] that plays back queued turns and records every request.
#[derive(Default)]
pub struct ScriptedModel {
    turns: Mutex<VecDeque<Turn>>,
    repeat: Option<Turn>,
    requests: Mutex<Vec<ChatRequest>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(turns: impl IntoIterator<Item = Turn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into_iter().collect()),
            ..Self::default()
        })
    }

    /// Answers every call with `turn`, forever.
    pub fn repeating(turn: Turn) -> Arc<Self> {
        Arc::new(Self {
            repeat: Some(turn),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_turn(&self, request: &ChatRequest) -> Turn {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(turn) = &self.repeat {
            return turn.clone();
        }
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Turn::Fail("script exhausted".into()))
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: &ChatRequest) -> toolbridge_agent::Result<ChatResponse> {
        match self.next_turn(request) {
            Turn::Reply(response) => Ok(response),
            Turn::Deltas(_) => panic!("delta turn scripted for a non-streaming call"),
            Turn::Fail(reason) => Err(AgentError::LlmRequestFailed { reason }),
        }
    }

    async fn stream(&self, request: &ChatRequest) -> toolbridge_agent::Result<DeltaStream> {
        let deltas = match self.next_turn(request) {
            Turn::Reply(response) => fragment(&response),
            Turn::Deltas(deltas) => deltas,
            Turn::Fail(reason) => return Err(AgentError::LlmRequestFailed { reason }),
        };
        Ok(Box::pin(futures::stream::iter(deltas.into_iter().map(Ok))))
    }
}

/// Cut a response into the kind of fragments a provider streams.
pub fn fragment(response: &ChatResponse) -> Vec<ChatDelta> {
    let mut deltas = Vec::new();

    let chars: Vec<char> = response.content.chars().collect();
    for piece in chars.chunks(3) {
        deltas.push(ChatDelta::text(piece.iter().collect::<String>()));
    }

    for (index, call) in response.tool_calls.iter().enumerate() {
        deltas.push(ChatDelta {
            tool_calls: vec![ToolCallDelta {
                index,
                id: Some(call.id.clone()),
                name: Some(call.name.clone()),
                arguments: Some(String::new()),
            }],
            ..ChatDelta::default()
        });
        let mid = call
            .arguments
            .char_indices()
            .nth(call.arguments.chars().count() / 2)
            .map_or(call.arguments.len(), |(i, _)| i);
        for part in [&call.arguments[..mid], &call.arguments[mid..]] {
            deltas.push(ChatDelta {
                tool_calls: vec![ToolCallDelta {
                    index,
                    arguments: Some(part.to_owned()),
                    ..ToolCallDelta::default()
                }],
                ..ChatDelta::default()
            });
        }
    }

    let finish = if response.tool_calls.is_empty() {
        "stop"
    } else {
        "tool_calls"
    };
    deltas.push(ChatDelta::finish(finish));
    deltas
}

// -- builders -----------------------------------------------------------------

pub fn text(content: &str) -> Turn {
    Turn::Reply(ChatResponse {
        content: content.to_owned(),
        tool_calls: Vec::new(),
        finish_reason: Some("stop".into()),
    })
}

pub fn tool_calls(calls: &[(&str, &str, &str)]) -> Turn {
    Turn::Reply(ChatResponse {
        content: String::new(),
        tool_calls: calls
            .iter()
            .map(|(id, name, arguments)| ToolCall {
                id: (*id).to_owned(),
                name: (*name).to_owned(),
                arguments: (*arguments).to_owned(),
            })
            .collect(),
        finish_reason: Some("tool_calls".into()),
    })
}

pub fn auth() -> AuthContext {
    AuthContext::new("test-token", "alice")
}

/// `add` plus `stamp`, which counts its invocations into structured content.
pub fn registry(stamps: Arc<AtomicUsize>) -> Arc<ToolRegistry> {
    let add = ToolDescriptor::new(
        "add",
        "Add two numbers",
        json!({
            "type": "object",
            "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
            "required": ["a", "b"]
        }),
        handler_fn(|args, _auth| async move {
            let sum = args["a"].as_f64().unwrap_or_default() + args["b"].as_f64().unwrap_or_default();
            Ok(ToolResult::text(sum.to_string())
                .with_structured_content(json!({ "sum": sum }))
                .with_widget_id("calculator"))
        }),
    )
    .unwrap();

    let stamp = ToolDescriptor::new(
        "stamp",
        "Count invocations",
        json!({"type": "object"}),
        handler_fn(move |_args, _auth| {
            let stamps = Arc::clone(&stamps);
            async move {
                let n = stamps.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(ToolResult::text(format!("stamp {n}"))
                    .with_structured_content(json!({ "n": n }))
                    .with_meta(json!({ "stamp": n })))
            }
        }),
    )
    .unwrap();

    Arc::new(
        ToolRegistry::builder()
            .register(add)
            .unwrap()
            .register(stamp)
            .unwrap()
            .build(),
    )
}
