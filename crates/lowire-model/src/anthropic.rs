// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    provider::api_error, AssistantMessage, Completion, CompleteOptions, ContentPart, Conversation,
    Message, ToolCallPart, ToolResult, ToolResultPart, Usage,
};

/// Appended to the system prompt whenever tools are offered.
const TOOL_ADDENDUM: &str =
    "Use the provided tools to make progress. Respond with a tool call in every message.";

/// `max_tokens` is mandatory on this API; used when the caller sets none.
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            client: reqwest::Client::new(),
        }
    }

    fn key(&self) -> anyhow::Result<String> {
        match &self.api_key {
            Some(k) => Ok(k.clone()),
            None => std::env::var("ANTHROPIC_API_KEY").context("ANTHROPIC_API_KEY not set"),
        }
    }
}

#[async_trait]
impl crate::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        options: &CompleteOptions,
    ) -> anyhow::Result<Completion> {
        let key = self.key()?;
        let body = build_anthropic_body(conversation, options);

        debug!(model = %options.model, reasoning = options.reasoning, "sending anthropic request");
        if options.debug {
            debug!(request = %body, "anthropic request body");
        }

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .context("Anthropic request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(api_error(status, &text));
        }

        let v: Value = resp.json().await.context("Anthropic response was not JSON")?;
        if options.debug {
            debug!(response = %v, "anthropic response body");
        }
        parse_anthropic_completion(&v)
    }
}

pub(crate) fn build_anthropic_body(conversation: &Conversation, options: &CompleteOptions) -> Value {
    let max_tokens = options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    let mut system_text = conversation.system_prompt.clone();
    if !conversation.tools.is_empty() {
        system_text = format!("{system_text}\n\n{TOOL_ADDENDUM}");
    }

    let mut body = json!({
        "model": options.model,
        "max_tokens": max_tokens,
        "messages": build_anthropic_messages(&conversation.messages),
    });
    if !system_text.is_empty() {
        body["system"] = json!(system_text);
    }
    if let Some(t) = options.temperature {
        body["temperature"] = json!(t);
    }
    if !conversation.tools.is_empty() {
        let tools: Vec<Value> = conversation
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }
    if options.reasoning {
        body["thinking"] = json!({
            "type": "enabled",
            "budget_tokens": max_tokens / 10,
        });
    }
    body
}

/// Convert the canonical messages into the Anthropic wire format.
///
/// Tool results live in a user-role message with `tool_result` blocks that
/// directly follows the assistant message carrying the `tool_use` blocks.
/// All results of one assistant turn are grouped into a single user message.
pub(crate) fn build_anthropic_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();

    for m in messages {
        match m {
            Message::User { content } => {
                out.push(json!({ "role": "user", "content": content }));
            }
            Message::Assistant(am) => {
                let mut blocks: Vec<Value> = Vec::new();
                let mut results: Vec<Value> = Vec::new();
                for part in &am.content {
                    match part {
                        ContentPart::Thinking { thinking, signature } => {
                            blocks.push(json!({
                                "type": "thinking",
                                "thinking": thinking,
                                "signature": signature,
                            }));
                        }
                        ContentPart::Text { text, .. } => {
                            blocks.push(json!({ "type": "text", "text": text }));
                        }
                        ContentPart::ToolCall(tc) => {
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": tc.id,
                                "name": tc.name,
                                "input": tc.arguments,
                            }));
                            if let Some(r) = &tc.result {
                                results.push(tool_result_block(&tc.id, r));
                            }
                        }
                    }
                }
                out.push(json!({ "role": "assistant", "content": blocks }));
                if !results.is_empty() {
                    out.push(json!({ "role": "user", "content": results }));
                }
                if let Some(err) = &am.tool_error {
                    out.push(json!({ "role": "user", "content": err }));
                }
            }
            Message::ToolResult { tool_call_id, result, .. } => {
                out.push(json!({
                    "role": "user",
                    "content": [tool_result_block(tool_call_id, result)],
                }));
            }
        }
    }
    out
}

fn tool_result_block(tool_call_id: &str, result: &ToolResult) -> Value {
    let wire_content: Value = if result.has_images() {
        let parts: Vec<Value> = result
            .content
            .iter()
            .map(|p| match p {
                ToolResultPart::Text { text } => json!({ "type": "text", "text": text }),
                ToolResultPart::Image { data, mime_type } => json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": mime_type,
                        "data": data,
                    }
                }),
            })
            .collect();
        json!(parts)
    } else {
        json!(result.text_content())
    };
    let mut block = json!({
        "type": "tool_result",
        "tool_use_id": tool_call_id,
        "content": wire_content,
    });
    if result.is_error {
        block["is_error"] = json!(true);
    }
    block
}

pub(crate) fn parse_anthropic_completion(v: &Value) -> anyhow::Result<Completion> {
    let blocks = v["content"]
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("No content in response"))?;

    let mut result = AssistantMessage::default();
    for block in blocks {
        match block["type"].as_str().unwrap_or("") {
            "text" => {
                if let Some(text) = block["text"].as_str() {
                    result.content.push(ContentPart::text(text));
                }
            }
            "tool_use" => {
                let id = block["id"].as_str().unwrap_or_default().to_string();
                let name = block["name"].as_str().unwrap_or_default().to_string();
                let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                result.content.push(ContentPart::ToolCall(ToolCallPart::new(id, name, input)));
            }
            "thinking" => {
                result.content.push(ContentPart::Thinking {
                    thinking: block["thinking"].as_str().unwrap_or_default().to_string(),
                    signature: block["signature"].as_str().unwrap_or_default().to_string(),
                });
            }
            other => bail!("Unsupported content part type: {other}"),
        }
    }

    let usage = Usage {
        input: v["usage"]["input_tokens"].as_u64().unwrap_or(0),
        output: v["usage"]["output_tokens"].as_u64().unwrap_or(0),
    };
    Ok(Completion { result, usage })
}
