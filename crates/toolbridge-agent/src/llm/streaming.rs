//! SSE stream parser for the OpenAI Chat Completions API.
//!
//! The streaming format sends `data:` lines whose JSON payloads carry
//! `choices[0].delta` objects, terminated by a `data: [DONE]` sentinel.
//! [`SseDeltaParser`] turns single lines into [`ChatDelta`]s and
//! [`sse_delta_stream`] drives it over a raw byte stream.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::DeltaStream;
use crate::llm::types::{ChatDelta, ToolCallDelta};

// ---------------------------------------------------------------------------
// Line parser
// ---------------------------------------------------------------------------

/// Parses individual SSE lines into [`ChatDelta`]s.
#[derive(Debug, Default)]
pub struct SseDeltaParser {
    done: bool,
}

impl SseDeltaParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a single SSE line.
    ///
    /// Returns `Ok(None)` for blank lines, comments, non-data fields, the
    /// sentinel, and payloads without a usable delta.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<ChatDelta>> {
        let line = line.trim_end_matches(['\r', '\n']);

        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let v: Value = serde_json::from_str(data).map_err(|e| AgentError::LlmParseFailed {
            reason: format!("invalid JSON in SSE data: {e}"),
        })?;

        if let Some(err) = v.get("error").filter(|e| !e.is_null()) {
            let reason = err["message"]
                .as_str()
                .map(str::to_owned)
                .unwrap_or_else(|| err.to_string());
            return Err(AgentError::LlmStreamError { reason });
        }

        let choice = &v["choices"][0];
        if choice.is_null() {
            return Ok(None);
        }

        let delta = &choice["delta"];
        let content = delta["content"].as_str().map(str::to_owned);
        let tool_calls = delta["tool_calls"]
            .as_array()
            .map(|calls| calls.iter().map(parse_tool_call_delta).collect())
            .unwrap_or_default();
        let finish_reason = choice["finish_reason"].as_str().map(str::to_owned);

        let parsed = ChatDelta {
            content,
            tool_calls,
            finish_reason,
        };
        Ok((!parsed.is_empty()).then_some(parsed))
    }
}

fn parse_tool_call_delta(tc: &Value) -> ToolCallDelta {
    let func = &tc["function"];
    ToolCallDelta {
        index: tc["index"].as_u64().unwrap_or(0) as usize,
        id: tc["id"].as_str().map(str::to_owned),
        name: func["name"].as_str().map(str::to_owned),
        arguments: func["arguments"].as_str().map(str::to_owned),
    }
}

// ---------------------------------------------------------------------------
// Byte stream adapter
// ---------------------------------------------------------------------------

struct SseState<S> {
    bytes: Pin<Box<S>>,
    buffer: Vec<u8>,
    parser: SseDeltaParser,
    pending: VecDeque<ChatDelta>,
    error: Option<AgentError>,
    finished: bool,
}

impl<S> SseState<S> {
    /// Parse every complete line currently buffered.
    fn drain_lines(&mut self) -> Result<()> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.feed(&line)?;
            if self.parser.is_done() {
                self.finished = true;
                self.buffer.clear();
                break;
            }
        }
        Ok(())
    }

    /// Stop reading; already parsed deltas are still yielded first.
    fn fail(&mut self, err: AgentError) {
        self.finished = true;
        self.error = Some(err);
    }

    fn feed(&mut self, line: &[u8]) -> Result<()> {
        let line = std::str::from_utf8(line).map_err(|e| AgentError::LlmStreamError {
            reason: format!("invalid UTF-8 in stream: {e}"),
        })?;
        if let Some(delta) = self.parser.feed_line(line)? {
            self.pending.push_back(delta);
        }
        Ok(())
    }
}

/// Turn a raw SSE byte stream into a stream of [`ChatDelta`]s.
///
/// Lines may be split across chunks arbitrarily. The stream ends at the
/// `[DONE]` sentinel or when the underlying stream ends; the first error
/// is yielded and ends it too.
pub fn sse_delta_stream<S, B, E>(bytes: S) -> DeltaStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        buffer: Vec::new(),
        parser: SseDeltaParser::new(),
        pending: VecDeque::new(),
        error: None,
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(delta) = st.pending.pop_front() {
                return Some((Ok(delta), st));
            }
            if st.finished {
                let err = st.error.take()?;
                return Some((Err(err), st));
            }

            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    st.buffer.extend_from_slice(chunk.as_ref());
                    if let Err(e) = st.drain_lines() {
                        st.fail(e);
                    }
                }
                Some(Err(e)) => st.fail(AgentError::LlmStreamError {
                    reason: format!("stream read error: {e}"),
                }),
                None => {
                    st.finished = true;
                    let rest = std::mem::take(&mut st.buffer);
                    if let Err(e) = st.feed(&rest) {
                        st.fail(e);
                    }
                }
            }
        }
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    type Chunks = futures::stream::Iter<std::vec::IntoIter<std::result::Result<Vec<u8>, String>>>;

    fn chunks(parts: &[&str]) -> Chunks {
        let owned: Vec<_> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        futures::stream::iter(owned)
    }

    #[test]
    fn text_delta_is_parsed() {
        let mut parser = SseDeltaParser::new();
        let delta = parser
            .feed_line(r#"data: {"choices":[{"index":0,"delta":{"content":"Hello"}}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(delta.content.as_deref(), Some("Hello"));
        assert!(delta.tool_calls.is_empty());
    }

    #[test]
    fn blank_comment_and_event_lines_ignored() {
        let mut parser = SseDeltaParser::new();
        assert!(parser.feed_line("").unwrap().is_none());
        assert!(parser.feed_line(": keepalive").unwrap().is_none());
        assert!(parser.feed_line("event: message").unwrap().is_none());
        assert!(!parser.is_done());
    }

    #[test]
    fn done_sentinel_sets_flag() {
        let mut parser = SseDeltaParser::new();
        assert!(parser.feed_line("data: [DONE]").unwrap().is_none());
        assert!(parser.is_done());
    }

    #[test]
    fn tool_call_fragments_and_finish_reason() {
        let mut parser = SseDeltaParser::new();
        let delta = parser
            .feed_line(
                r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"add","arguments":"{\"a\""}}]},"finish_reason":null}]}"#,
            )
            .unwrap()
            .unwrap();
        assert_eq!(
            delta.tool_calls,
            vec![ToolCallDelta {
                index: 1,
                id: Some("call_b".into()),
                name: Some("add".into()),
                arguments: Some("{\"a\"".into()),
            }]
        );

        let finish = parser
            .feed_line(r#"data: {"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(finish.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn provider_error_payload_is_an_error() {
        let mut parser = SseDeltaParser::new();
        let err = parser
            .feed_line(r#"data: {"error":{"message":"rate limited"}}"#)
            .unwrap_err();
        assert!(matches!(err, AgentError::LlmStreamError { reason } if reason == "rate limited"));
    }

    #[test]
    fn invalid_json_returns_error() {
        let mut parser = SseDeltaParser::new();
        assert!(parser.feed_line("data: {invalid json}").is_err());
    }

    #[tokio::test]
    async fn stream_reassembles_lines_split_across_chunks() {
        let stream = sse_delta_stream(chunks(&[
            "data: {\"choices\":[{\"delta\":{\"con",
            "tent\":\"Hel\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n",
            "data: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
        ]));
        let deltas: Vec<_> = stream.collect().await;
        let texts: Vec<_> = deltas
            .into_iter()
            .map(|d| d.unwrap().content.unwrap())
            .collect();
        assert_eq!(texts, ["Hel", "lo"]);
    }

    #[tokio::test]
    async fn stream_flushes_trailing_line_without_newline() {
        let stream = sse_delta_stream(chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}",
        ]));
        let deltas: Vec<_> = stream.collect().await;
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].as_ref().unwrap().content.as_deref(), Some("tail"));
    }

    #[tokio::test]
    async fn transport_error_ends_stream() {
        let parts: Vec<std::result::Result<Vec<u8>, String>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n".to_vec()),
            Err("connection reset".into()),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n".to_vec()),
        ];
        let deltas: Vec<_> = sse_delta_stream(futures::stream::iter(parts)).collect().await;
        assert_eq!(deltas.len(), 2);
        assert!(deltas[0].is_ok());
        assert!(matches!(deltas[1], Err(AgentError::LlmStreamError { .. })));
    }
}
