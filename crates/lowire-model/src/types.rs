use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Content parts ────────────────────────────────────────────────────────────

/// A single content part inside an assistant message.
///
/// Every part is a discriminated variant on the `type` tag.  Unknown tags are
/// a shape error at the provider boundary, never silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
        /// Opaque `thoughtSignature` echoed by Gemini.  Round-tripped verbatim
        /// on the next request; never inspected.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
        /// Set when this text was extracted from a Copilot `_intent` argument.
        /// Keys the part back to its originating tool call so the next
        /// serialisation can reattach it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        copilot_tool_call_id: Option<String>,
    },
    ToolCall(ToolCallPart),
    /// Anthropic extended-thinking block.  The signature is an encrypted blob
    /// the server verifies on round-trip; it must be preserved byte-for-byte.
    Thinking { thinking: String, signature: String },
}

impl ContentPart {
    /// Convenience constructor for a plain text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into(), signature: None, copilot_tool_call_id: None }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallPart> {
        match self {
            Self::ToolCall(tc) => Some(tc),
            _ => None,
        }
    }
}

/// A model-emitted request to execute a named tool.
///
/// The loop driver attaches the tool's result onto `result` once the call has
/// been dispatched; provider adapters that need a separate tool-result wire
/// message synthesise it from the attached value during serialisation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallPart {
    pub name: String,
    pub arguments: Value,
    /// Unique within a conversation.  Synthesised (`call_<uuid>`) for Gemini,
    /// which omits ids on the wire.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
    /// OpenAI Responses opaque item id; round-tripped when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// OpenAI Responses opaque item status; round-tripped when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Gemini `thoughtSignature`, round-tripped verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ToolCallPart {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            id: id.into(),
            result: None,
            item_id: None,
            status: None,
            signature: None,
        }
    }
}

// ─── Tool results ─────────────────────────────────────────────────────────────

/// A single content part in a tool result.  Images appear only here, never in
/// assistant content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultPart {
    Text { text: String },
    Image {
        /// Base64-encoded image bytes (no data-URL prefix).
        data: String,
        mime_type: String,
    },
}

/// The outcome of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolResult {
    pub content: Vec<ToolResultPart>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    /// Out-of-band hints from the tool (`dev.lowire/history`,
    /// `dev.lowire/state`) consumed by the summariser.
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Map<String, Value>>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self { content: vec![ToolResultPart::Text { text: text.into() }], ..Default::default() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultPart::Text { text: text.into() }],
            is_error: true,
            meta: None,
        }
    }

    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultPart::Image {
                data: data.into(),
                mime_type: mime_type.into(),
            }],
            ..Default::default()
        }
    }

    /// All text parts joined with newlines (images are omitted).
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ToolResultPart::Text { text } => Some(text.as_str()),
                ToolResultPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_images(&self) -> bool {
        self.content.iter().any(|p| matches!(p, ToolResultPart::Image { .. }))
    }
}

// ─── Messages ─────────────────────────────────────────────────────────────────

/// An assistant completion: content parts plus the driver's tool-error nudge
/// and the opaque ids some providers require back on reuse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentPart>,
    /// Set by the driver when the message contained no tool call; surfaced to
    /// the provider as a synthetic user message on the next turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_error: Option<String>,
    /// OpenAI Responses opaque message item id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// OpenAI Responses opaque message item status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl AssistantMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self { content: vec![ContentPart::text(text)], ..Default::default() }
    }

    /// All text parts joined with newlines.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.content.iter().filter_map(ContentPart::as_tool_call)
    }
}

/// A single message in the conversation.
///
/// `ToolResult` is the legacy standalone representation; the current form
/// attaches results inline to the originating [`ToolCallPart`].  Adapters
/// accept both so recorded conversations keep replaying.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User { content: String },
    Assistant(AssistantMessage),
    ToolResult {
        tool_name: String,
        tool_call_id: String,
        result: ToolResult,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User { content: content.into() }
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Assistant(m) => Some(m),
            _ => None,
        }
    }
}

// ─── Tools and conversation ───────────────────────────────────────────────────

/// A tool schema offered to the model.  `input_schema` is a JSON-Schema
/// object fragment (`{type: "object", properties?, required?}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub input_schema: Value,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self { name: name.into(), description: description.into(), input_schema }
    }
}

/// The canonical conversation handed to a provider adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Conversation {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
}

impl Conversation {
    /// Iterate assistant messages in order.
    pub fn assistant_messages(&self) -> impl Iterator<Item = &AssistantMessage> {
        self.messages.iter().filter_map(Message::as_assistant)
    }
}

// ─── Usage and completion ─────────────────────────────────────────────────────

/// Token counts for one completion, accumulated across turns by the driver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Usage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input += other.input;
        self.output += other.output;
    }

    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

/// What a provider returns from one `complete` call.  This is also the exact
/// on-disk shape of one replay-cache entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Completion {
    pub result: AssistantMessage,
    #[serde(default)]
    pub usage: Usage,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
