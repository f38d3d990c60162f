//! Completion and streaming drivers against a scripted model.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};
use tokio::sync::mpsc;

use toolbridge_agent::{
    AgentError, ChatDelta, LoopConfig, Message, Role, StreamChunk, ToolCallDelta, ToolLoop,
};

use common::{ScriptedModel, Turn, auth, registry, text, tool_calls};

fn driver(model: Arc<ScriptedModel>) -> ToolLoop {
    ToolLoop::new(
        model,
        registry(Arc::new(AtomicUsize::new(0))),
        LoopConfig::default(),
    )
}

async fn collect(mut rx: mpsc::Receiver<StreamChunk>) -> Vec<StreamChunk> {
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    chunks
}

// ---------------------------------------------------------------------------
// Completion driver
// ---------------------------------------------------------------------------

#[tokio::test]
async fn plain_answer_takes_one_round() {
    let model = ScriptedModel::new([text("4")]);
    let outcome = driver(model.clone())
        .complete(vec![Message::user("What's 2+2?")], &auth())
        .await
        .unwrap();

    assert_eq!(outcome.content, "4");
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.structured_content, None);
    assert_eq!(outcome.widget_id, None);
    assert!(outcome.messages.iter().all(|m| m.role != Role::Tool));
    assert_eq!(outcome.messages.len(), 2);
    assert_eq!(model.calls(), 1);

    let request = &model.requests()[0];
    let tools: Vec<_> = request.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(tools, ["add", "stamp"]);
}

#[tokio::test]
async fn add_round_trip_builds_full_transcript() {
    let model = ScriptedModel::new([
        tool_calls(&[("call_1", "add", r#"{"a":1,"b":2}"#)]),
        text("The sum is 3"),
    ]);
    let outcome = driver(model.clone())
        .complete(vec![Message::user("add 1 and 2")], &auth())
        .await
        .unwrap();

    let roles: Vec<Role> = outcome.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        [Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );

    let batch = &outcome.messages[1];
    assert_eq!(batch.tool_calls.len(), 1);
    assert_eq!(batch.tool_calls[0].name, "add");

    let tool = &outcome.messages[2];
    assert_eq!(tool.content, "3");
    assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(tool.name.as_deref(), Some("add"));

    assert_eq!(outcome.content, "The sum is 3");
    assert_eq!(outcome.structured_content, Some(json!({"sum": 3.0})));
    assert_eq!(outcome.widget_id.as_deref(), Some("calculator"));
    assert_eq!(outcome.iterations, 2);

    // The second request carries the tool round.
    let second = &model.requests()[1];
    assert_eq!(second.messages.len(), 3);
    assert_eq!(second.messages[2].role, Role::Tool);
}

#[tokio::test]
async fn unknown_tool_is_reported_and_loop_continues() {
    let model = ScriptedModel::new([tool_calls(&[("c1", "nope", "{}")]), text("sorry")]);
    let outcome = driver(model)
        .complete(vec![Message::user("hi")], &auth())
        .await
        .unwrap();

    let tool = outcome
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    let body: Value = serde_json::from_str(&tool.content).unwrap();
    assert_eq!(body, json!({"error": "Tool nope not found"}));
    assert_eq!(outcome.content, "sorry");
}

#[tokio::test]
async fn invalid_arguments_are_folded_into_transcript() {
    let model = ScriptedModel::new([
        tool_calls(&[("c1", "add", r#"{"a":"x"}"#)]),
        text("could not add"),
    ]);
    let outcome = driver(model)
        .complete(vec![Message::user("hi")], &auth())
        .await
        .unwrap();

    let tool = &outcome.messages[2];
    let body: Value = serde_json::from_str(&tool.content).unwrap();
    let message = body["error"].as_str().unwrap();
    assert!(message.starts_with("Invalid arguments for tool add"));
    assert_eq!(outcome.structured_content, None);
}

#[tokio::test]
async fn calls_in_a_batch_run_in_model_order() {
    let model = ScriptedModel::new([
        tool_calls(&[
            ("c1", "add", r#"{"a":1,"b":1}"#),
            ("c2", "add", r#"{"a":2,"b":2}"#),
        ]),
        text("done"),
    ]);
    let outcome = driver(model)
        .complete(vec![Message::user("hi")], &auth())
        .await
        .unwrap();

    let tool_messages: Vec<_> = outcome
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| (m.tool_call_id.clone().unwrap(), m.content.clone()))
        .collect();
    assert_eq!(
        tool_messages,
        [("c1".to_owned(), "2".to_owned()), ("c2".to_owned(), "4".to_owned())]
    );
    // First non-empty structured content wins.
    assert_eq!(outcome.structured_content, Some(json!({"sum": 2.0})));
}

#[tokio::test]
async fn sticky_fields_keep_first_value_across_rounds() {
    let stamps = Arc::new(AtomicUsize::new(0));
    let model = ScriptedModel::new([
        tool_calls(&[("c1", "stamp", "")]),
        tool_calls(&[("c2", "stamp", "{}")]),
        text("stamped twice"),
    ]);
    let outcome = ToolLoop::new(model, registry(stamps.clone()), LoopConfig::default())
        .complete(vec![Message::user("stamp")], &auth())
        .await
        .unwrap();

    assert_eq!(stamps.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.structured_content, Some(json!({"n": 1})));
    assert_eq!(outcome.meta, Some(json!({"stamp": 1})));
    assert_eq!(outcome.iterations, 3);
}

#[tokio::test]
async fn endless_tool_calls_stop_after_ten_rounds() {
    let model = ScriptedModel::repeating(tool_calls(&[("c", "stamp", "{}")]));
    let err = driver(model.clone())
        .complete(vec![Message::user("loop")], &auth())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AgentError::MaxIterationsExceeded { max_iterations: 10 }
    ));
    assert_eq!(model.calls(), 10);
}

#[tokio::test]
async fn iteration_cap_is_configurable() {
    let model = ScriptedModel::repeating(tool_calls(&[("c", "stamp", "{}")]));
    let config = LoopConfig {
        max_iterations: 3,
        ..LoopConfig::default()
    };
    let err = ToolLoop::new(model.clone(), registry(Arc::new(AtomicUsize::new(0))), config)
        .complete(vec![Message::user("loop")], &auth())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AgentError::MaxIterationsExceeded { max_iterations: 3 }
    ));
    assert_eq!(model.calls(), 3);
}

#[tokio::test]
async fn model_failure_is_fatal() {
    let model = ScriptedModel::new([Turn::Fail("connection reset".into())]);
    let err = driver(model)
        .complete(vec![Message::user("hi")], &auth())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::LlmRequestFailed { .. }));
}

// ---------------------------------------------------------------------------
// Streaming driver
// ---------------------------------------------------------------------------

#[tokio::test]
async fn streaming_emits_protocol_in_order() {
    let model = ScriptedModel::new([
        tool_calls(&[("call_1", "add", r#"{"a":1,"b":2}"#)]),
        text("The sum is 3"),
    ]);
    let chunks = collect(driver(model).spawn_stream(
        vec![Message::user("add 1 and 2")],
        auth(),
        8,
    ))
    .await;

    let kinds: Vec<&str> = chunks
        .iter()
        .map(|c| match c {
            StreamChunk::Content { .. } => "content",
            StreamChunk::ToolCall { .. } => "tool_call",
            StreamChunk::ToolResult { .. } => "tool_result",
            StreamChunk::Metadata { .. } => "metadata",
            StreamChunk::Done { .. } => "done",
            StreamChunk::Error { .. } => "error",
        })
        .collect();
    let first_content = kinds.iter().position(|k| *k == "content").unwrap();
    assert_eq!(&kinds[..first_content], ["tool_call", "tool_result"]);
    assert!(kinds[first_content..kinds.len() - 2].iter().all(|k| *k == "content"));
    assert_eq!(&kinds[kinds.len() - 2..], ["metadata", "done"]);

    let streamed: String = chunks
        .iter()
        .filter_map(|c| match c {
            StreamChunk::Content { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "The sum is 3");

    match &chunks[0] {
        StreamChunk::ToolCall { tool_calls } => {
            assert_eq!(tool_calls[0].id, "call_1");
            assert_eq!(tool_calls[0].arguments, r#"{"a":1,"b":2}"#);
        }
        other => panic!("unexpected first chunk: {other:?}"),
    }
    assert_eq!(
        chunks[1],
        StreamChunk::ToolResult {
            tool_call_id: "call_1".into(),
            name: "add".into(),
            result: "3".into(),
        }
    );
    assert_eq!(chunks.last(), Some(&StreamChunk::Done { message_id: None }));
}

#[tokio::test]
async fn streaming_without_tools_has_no_metadata() {
    let model = ScriptedModel::new([text("4")]);
    let chunks = collect(driver(model).spawn_stream(vec![Message::user("2+2?")], auth(), 8)).await;

    assert_eq!(
        chunks,
        [
            StreamChunk::Content {
                content: "4".into()
            },
            StreamChunk::Done { message_id: None },
        ]
    );
}

#[tokio::test]
async fn fragmented_deltas_are_reassembled() {
    let model = ScriptedModel::new([
        Turn::Deltas(vec![
            ChatDelta {
                tool_calls: vec![ToolCallDelta {
                    index: 0,
                    id: Some("a".into()),
                    name: Some("f".into()),
                    arguments: None,
                }],
                ..ChatDelta::default()
            },
            ChatDelta {
                tool_calls: vec![ToolCallDelta {
                    index: 0,
                    arguments: Some("{\"x\":".into()),
                    ..ToolCallDelta::default()
                }],
                ..ChatDelta::default()
            },
            ChatDelta {
                tool_calls: vec![ToolCallDelta {
                    index: 0,
                    arguments: Some("1}".into()),
                    ..ToolCallDelta::default()
                }],
                ..ChatDelta::default()
            },
        ]),
        text("ok"),
    ]);
    let chunks = collect(driver(model).spawn_stream(vec![Message::user("go")], auth(), 8)).await;

    match &chunks[0] {
        StreamChunk::ToolCall { tool_calls } => {
            assert_eq!(tool_calls.len(), 1);
            assert_eq!(tool_calls[0].id, "a");
            assert_eq!(tool_calls[0].name, "f");
            assert_eq!(tool_calls[0].arguments, r#"{"x":1}"#);
        }
        other => panic!("unexpected first chunk: {other:?}"),
    }
    // `f` is not registered; the failure is reported and the run goes on.
    match &chunks[1] {
        StreamChunk::ToolResult { result, .. } => {
            assert_eq!(
                serde_json::from_str::<Value>(result).unwrap(),
                json!({"error": "Tool f not found"})
            );
        }
        other => panic!("unexpected second chunk: {other:?}"),
    }
    assert_eq!(chunks.last(), Some(&StreamChunk::Done { message_id: None }));
}

#[tokio::test]
async fn deltas_after_tool_calls_finish_are_ignored() {
    let model = ScriptedModel::new([
        Turn::Deltas(vec![
            ChatDelta {
                tool_calls: vec![ToolCallDelta {
                    index: 0,
                    id: Some("c1".into()),
                    name: Some("add".into()),
                    arguments: Some(r#"{"a":2,"b":2}"#.into()),
                }],
                finish_reason: Some("tool_calls".into()),
                ..ChatDelta::default()
            },
            ChatDelta::text("never seen"),
        ]),
        text("4"),
    ]);
    let chunks = collect(driver(model).spawn_stream(vec![Message::user("2+2")], auth(), 64)).await;
    assert!(!chunks.iter().any(|c| matches!(
        c,
        StreamChunk::Content { content } if content == "never seen"
    )));
}

#[tokio::test]
async fn streaming_and_completion_agree() {
    let script = || {
        [
            tool_calls(&[("c1", "add", r#"{"a":20,"b":22}"#)]),
            tool_calls(&[("c2", "stamp", "{}")]),
            text("The answer is 42"),
        ]
    };

    let completed = driver(ScriptedModel::new(script()))
        .complete(vec![Message::user("sum")], &auth())
        .await
        .unwrap();

    let (tx, rx) = mpsc::channel(64);
    let streamed = driver(ScriptedModel::new(script()))
        .stream(vec![Message::user("sum")], &auth(), &tx)
        .await
        .unwrap();
    drop(tx);
    let chunks = collect(rx).await;

    assert_eq!(completed.content, streamed.content);
    assert_eq!(completed.structured_content, streamed.structured_content);
    assert_eq!(completed.widget_id, streamed.widget_id);
    assert_eq!(completed.meta, streamed.meta);
    assert_eq!(completed.messages, streamed.messages);

    assert!(chunks.contains(&StreamChunk::Metadata {
        meta: streamed.meta.clone(),
        structured_content: Some(json!({"sum": 42.0})),
        widget_id: Some("calculator".into()),
    }));
}

#[tokio::test]
async fn streaming_stops_after_ten_rounds() {
    let model = ScriptedModel::repeating(tool_calls(&[("c", "stamp", "{}")]));
    let chunks = collect(driver(model.clone()).spawn_stream(
        vec![Message::user("loop")],
        auth(),
        256,
    ))
    .await;

    assert_eq!(model.calls(), 10);
    assert!(!chunks.iter().any(|c| matches!(c, StreamChunk::Done { .. })));
    match chunks.last() {
        Some(StreamChunk::Error { message }) => assert!(message.contains("max iterations")),
        other => panic!("expected terminal error, got {other:?}"),
    }
}

#[tokio::test]
async fn dropped_consumer_stops_the_run_before_tools_execute() {
    let stamps = Arc::new(AtomicUsize::new(0));
    let model = ScriptedModel::new([tool_calls(&[("c1", "stamp", "{}")]), text("done")]);
    let driver = ToolLoop::new(model.clone(), registry(stamps.clone()), LoopConfig::default());

    let (tx, rx) = mpsc::channel(4);
    drop(rx);
    let err = driver
        .stream(vec![Message::user("stamp")], &auth(), &tx)
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::ChannelClosed));
    assert_eq!(stamps.load(Ordering::SeqCst), 0);
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn stream_setup_failure_becomes_error_chunk() {
    let model = ScriptedModel::new([Turn::Fail("upstream 502".into())]);
    let chunks = collect(driver(model).spawn_stream(vec![Message::user("hi")], auth(), 4)).await;

    assert_eq!(chunks.len(), 1);
    match &chunks[0] {
        StreamChunk::Error { message } => assert!(message.contains("upstream 502")),
        other => panic!("expected error chunk, got {other:?}"),
    }
}
