//! Tool results and the sticky fields collected across a run.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One content block of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    /// An embedded resource, passed through untouched.
    Resource {
        resource: Value,
    },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Uniform outcome of a tool invocation.
///
/// Serializes to the MCP `tools/call` result shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ToolContent>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,

    /// Which UI widget should render `structured_content`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_id: Option<String>,

    #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,

    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// A successful result with a single text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            ..Self::default()
        }
    }

    /// The synthetic failure result: a text block holding `{"error": message}`.
    pub fn error(message: impl Into<String>) -> Self {
        let body = json!({ "error": message.into() });
        Self {
            content: vec![ToolContent::text(body.to_string())],
            is_error: true,
            ..Self::default()
        }
    }

    pub fn with_structured_content(mut self, value: Value) -> Self {
        self.structured_content = Some(value);
        self
    }

    pub fn with_widget_id(mut self, widget_id: impl Into<String>) -> Self {
        self.widget_id = Some(widget_id.into());
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Textual rendering fed back to the model as the tool message.
    ///
    /// Text blocks are joined with newlines; a result without any text
    /// block is rendered as its JSON-encoded content list.
    pub fn render_text(&self) -> String {
        let texts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                ToolContent::Resource { .. } => None,
            })
            .collect();

        if texts.is_empty() {
            serde_json::to_string(&self.content).unwrap_or_default()
        } else {
            texts.join("\n")
        }
    }
}

// ---------------------------------------------------------------------------
// Sticky fields
// ---------------------------------------------------------------------------

/// `meta`, `structured_content` and `widget_id` of a run.
///
/// Each field keeps the first non-empty value seen across all tool calls;
/// later values never overwrite it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickyFields {
    #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_id: Option<String>,
}

impl StickyFields {
    /// Capture whichever fields of `result` are still unset here.
    pub fn absorb(&mut self, result: &ToolResult) {
        self.absorb_parts(
            result.meta.as_ref(),
            result.structured_content.as_ref(),
            result.widget_id.as_deref(),
        );
    }

    /// Same as [`StickyFields::absorb`] for loose parts.
    pub fn absorb_parts(
        &mut self,
        meta: Option<&Value>,
        structured_content: Option<&Value>,
        widget_id: Option<&str>,
    ) {
        if self.meta.is_none() {
            self.meta = meta.filter(|v| is_present(v)).cloned();
        }
        if self.structured_content.is_none() {
            self.structured_content = structured_content.filter(|v| is_present(v)).cloned();
        }
        if self.widget_id.is_none() {
            self.widget_id = widget_id.filter(|w| !w.is_empty()).map(str::to_owned);
        }
    }

    /// Whether any field has been captured.
    pub fn is_set(&self) -> bool {
        self.meta.is_some() || self.structured_content.is_some() || self.widget_id.is_some()
    }
}

/// Null, `""`, `{}` and `[]` count as empty.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}
