// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI Chat Completions driver.
//!
//! The `pub(crate)` wire builders and parser here are shared with the GitHub
//! Copilot driver, which speaks the same format through a different endpoint.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    provider::api_error, AssistantMessage, Completion, CompleteOptions, ContentPart, Conversation,
    Message, Tool, ToolCallPart, ToolResult, ToolResultPart, Usage,
};

/// Appended to the system prompt whenever tools are offered.
pub(crate) const CHAT_TOOL_ADDENDUM: &str =
    "Use the provided tools to make progress. Respond with a tool call in every message.";

pub struct OpenAiChatProvider {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiChatProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".into()),
            client: reqwest::Client::new(),
        }
    }

    fn key(&self) -> anyhow::Result<String> {
        match &self.api_key {
            Some(k) => Ok(k.clone()),
            None => std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY not set"),
        }
    }
}

#[async_trait]
impl crate::Provider for OpenAiChatProvider {
    fn name(&self) -> &str {
        "openai-chat"
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        options: &CompleteOptions,
    ) -> anyhow::Result<Completion> {
        let key = self.key()?;
        let body = build_chat_body(conversation, options);

        debug!(model = %options.model, "sending openai chat request");
        if options.debug {
            debug!(request = %body, "openai chat request body");
        }

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .context("OpenAI request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(api_error(status, &text));
        }

        let v: Value = resp.json().await.context("OpenAI response was not JSON")?;
        if options.debug {
            debug!(response = %v, "openai chat response body");
        }
        parse_chat_completion(&v)
    }
}

/// Assemble the full Chat Completions request body.  Shared with Copilot,
/// which patches in its own mitigations afterwards.
pub(crate) fn build_chat_body(conversation: &Conversation, options: &CompleteOptions) -> Value {
    let mut body = json!({
        "model": options.model,
        "messages": build_chat_messages(conversation),
    });
    if let Some(mt) = options.max_tokens {
        body["max_tokens"] = json!(mt);
    }
    if let Some(t) = options.temperature {
        body["temperature"] = json!(t);
    }
    if !conversation.tools.is_empty() {
        body["tools"] = json!(build_chat_tools(&conversation.tools));
        body["tool_choice"] = json!("auto");
    }
    body
}

/// Serialise the canonical conversation into Chat Completions `messages`.
///
/// Assistant tool calls become one assistant message carrying `tool_calls`;
/// each attached result is emitted as a `tool` message immediately after.
/// A `tool_error` on the assistant message becomes a trailing user message.
pub(crate) fn build_chat_messages(conversation: &Conversation) -> Vec<Value> {
    let mut system_text = conversation.system_prompt.clone();
    if !conversation.tools.is_empty() {
        system_text = format!("{system_text}\n\n{CHAT_TOOL_ADDENDUM}");
    }
    let mut out: Vec<Value> = vec![json!({ "role": "system", "content": system_text })];

    for m in &conversation.messages {
        match m {
            Message::User { content } => {
                out.push(json!({ "role": "user", "content": content }));
            }
            Message::Assistant(am) => {
                let mut texts: Vec<&str> = Vec::new();
                let mut calls: Vec<Value> = Vec::new();
                let mut results: Vec<Value> = Vec::new();
                for part in &am.content {
                    match part {
                        ContentPart::Text { text, .. } => texts.push(text),
                        // Thinking blocks are an Anthropic concept; the Chat
                        // wire has no slot for them.
                        ContentPart::Thinking { .. } => {}
                        ContentPart::ToolCall(tc) => {
                            calls.push(json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments.to_string(),
                                }
                            }));
                            if let Some(r) = &tc.result {
                                results.push(tool_result_message(&tc.id, r));
                            }
                        }
                    }
                }
                let mut msg = json!({ "role": "assistant" });
                msg["content"] = if texts.is_empty() {
                    Value::Null
                } else {
                    json!(texts.join("\n"))
                };
                if !calls.is_empty() {
                    msg["tool_calls"] = json!(calls);
                }
                out.push(msg);
                out.extend(results);
                if let Some(err) = &am.tool_error {
                    out.push(json!({ "role": "user", "content": err }));
                }
            }
            Message::ToolResult { tool_call_id, result, .. } => {
                out.push(tool_result_message(tool_call_id, result));
            }
        }
    }
    out
}

fn tool_result_message(tool_call_id: &str, result: &ToolResult) -> Value {
    let content: Value = if result.has_images() {
        let parts: Vec<Value> = result
            .content
            .iter()
            .map(|p| match p {
                ToolResultPart::Text { text } => json!({ "type": "text", "text": text }),
                ToolResultPart::Image { data, mime_type } => json!({
                    "type": "image_url",
                    "image_url": { "url": format!("data:{mime_type};base64,{data}") },
                }),
            })
            .collect();
        json!(parts)
    } else {
        json!(result.text_content())
    };
    json!({ "role": "tool", "tool_call_id": tool_call_id, "content": content })
}

pub(crate) fn build_chat_tools(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect()
}

/// Parse a Chat Completions response body into a [`Completion`].
pub(crate) fn parse_chat_completion(v: &Value) -> anyhow::Result<Completion> {
    let choice = v["choices"]
        .get(0)
        .ok_or_else(|| anyhow::anyhow!("No choices in response"))?;
    let msg = &choice["message"];

    let mut result = AssistantMessage::default();
    if let Some(text) = msg["content"].as_str() {
        if !text.is_empty() {
            result.content.push(ContentPart::text(text));
        }
    }
    if let Some(calls) = msg["tool_calls"].as_array() {
        for c in calls {
            let id = c["id"].as_str().unwrap_or_default().to_string();
            let name = c["function"]["name"].as_str().unwrap_or_default().to_string();
            let raw = c["function"]["arguments"].as_str().unwrap_or("{}");
            let arguments = parse_arguments(raw, &name, &id);
            result
                .content
                .push(ContentPart::ToolCall(ToolCallPart::new(id, name, arguments)));
        }
    }

    let usage = Usage {
        input: v["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        output: v["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    };
    Ok(Completion { result, usage })
}

/// Parse a JSON-string argument payload, repairing invalid escape sequences
/// before falling back to `{}`.
pub(crate) fn parse_arguments(raw: &str, name: &str, id: &str) -> Value {
    if raw.is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(parse_err) => match serde_json::from_str(&fix_invalid_json_escapes(raw)) {
            Ok(v) => {
                warn!(
                    tool_name = %name,
                    tool_call_id = %id,
                    "repaired invalid JSON arguments from model"
                );
                v
            }
            Err(_) => {
                warn!(
                    tool_name = %name,
                    tool_call_id = %id,
                    error = %parse_err,
                    "model sent tool call with invalid JSON arguments; substituting {{}}"
                );
                Value::Object(Default::default())
            }
        },
    }
}

/// Walk through a JSON string and escape any invalid escape sequence inside
/// string values.  Valid JSON escapes are `"` `\` `/` `b` `f` `n` `r` `t` `u`;
/// anything else becomes `\\X` so serde_json can parse the result.
fn fix_invalid_json_escapes(json_str: &str) -> String {
    let mut result = String::with_capacity(json_str.len() + 16);
    let mut chars = json_str.chars();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => match chars.next() {
                    Some(next)
                        if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') =>
                    {
                        result.push('\\');
                        result.push(next);
                    }
                    Some(next) => {
                        result.push('\\');
                        result.push('\\');
                        result.push(next);
                    }
                    None => result.push('\\'),
                },
                '"' => {
                    in_string = false;
                    result.push('"');
                }
                _ => result.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            result.push(c);
        }
    }
    result
}
