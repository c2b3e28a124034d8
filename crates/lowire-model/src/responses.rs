// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI Responses driver.
//!
//! Unlike Chat Completions the Responses API takes a flat `input` item list
//! and a top-level `instructions` string.  Assistant message items and
//! function_call items carry opaque `id`/`status` fields that must be echoed
//! back verbatim when the conversation is resent.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    openai::{parse_arguments, CHAT_TOOL_ADDENDUM},
    provider::api_error,
    AssistantMessage, Completion, CompleteOptions, ContentPart, Conversation, Message,
    ToolCallPart, ToolResult, ToolResultPart, Usage,
};

pub struct OpenAiResponsesProvider {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiResponsesProvider {
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
impl crate::Provider for OpenAiResponsesProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        options: &CompleteOptions,
    ) -> anyhow::Result<Completion> {
        let key = self.key()?;
        let body = build_responses_body(conversation, options);

        debug!(model = %options.model, "sending openai responses request");
        if options.debug {
            debug!(request = %body, "openai responses request body");
        }

        let resp = self
            .client
            .post(format!("{}/responses", self.base_url.trim_end_matches('/')))
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
            debug!(response = %v, "openai responses response body");
        }
        parse_responses_completion(&v)
    }
}

pub(crate) fn build_responses_body(conversation: &Conversation, options: &CompleteOptions) -> Value {
    let mut instructions = conversation.system_prompt.clone();
    if !conversation.tools.is_empty() {
        instructions = format!("{instructions}\n\n{CHAT_TOOL_ADDENDUM}");
    }
    let mut body = json!({
        "model": options.model,
        "instructions": instructions,
        "input": build_input_items(conversation),
        "parallel_tool_calls": false,
    });
    if let Some(mt) = options.max_tokens {
        body["max_output_tokens"] = json!(mt);
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
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }
    body
}

/// Serialise the conversation as Responses `input` items.
fn build_input_items(conversation: &Conversation) -> Vec<Value> {
    let mut items: Vec<Value> = Vec::new();

    for m in &conversation.messages {
        match m {
            Message::User { content } => {
                items.push(json!({ "role": "user", "content": content }));
            }
            Message::Assistant(am) => {
                let mut text_parts: Vec<Value> = Vec::new();
                let mut calls: Vec<Value> = Vec::new();
                let mut outputs: Vec<Value> = Vec::new();
                for part in &am.content {
                    match part {
                        ContentPart::Text { text, .. } => {
                            text_parts.push(json!({ "type": "output_text", "text": text }));
                        }
                        ContentPart::Thinking { .. } => {}
                        ContentPart::ToolCall(tc) => {
                            let mut call = json!({
                                "type": "function_call",
                                "call_id": tc.id,
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            });
                            // Opaque item fields round-trip only when the
                            // provider actually sent them.
                            if let Some(item_id) = &tc.item_id {
                                call["id"] = json!(item_id);
                            }
                            if let Some(status) = &tc.status {
                                call["status"] = json!(status);
                            }
                            calls.push(call);
                            if let Some(r) = &tc.result {
                                outputs.extend(tool_output_items(&tc.id, r));
                            }
                        }
                    }
                }
                if !text_parts.is_empty() {
                    let mut msg = json!({
                        "type": "message",
                        "role": "assistant",
                        "content": text_parts,
                    });
                    if let Some(id) = &am.id {
                        msg["id"] = json!(id);
                    }
                    if let Some(status) = &am.status {
                        msg["status"] = json!(status);
                    }
                    items.push(msg);
                }
                items.extend(calls);
                items.extend(outputs);
                if let Some(err) = &am.tool_error {
                    items.push(json!({ "role": "user", "content": err }));
                }
            }
            Message::ToolResult { tool_call_id, result, .. } => {
                items.extend(tool_output_items(tool_call_id, result));
            }
        }
    }
    items
}

/// One `function_call_output` item for the text content, plus a user item
/// with `input_image` parts when the result carries images.
fn tool_output_items(call_id: &str, result: &ToolResult) -> Vec<Value> {
    let mut items = vec![json!({
        "type": "function_call_output",
        "call_id": call_id,
        "output": result.text_content(),
    })];
    let images: Vec<Value> = result
        .content
        .iter()
        .filter_map(|p| match p {
            ToolResultPart::Image { data, mime_type } => Some(json!({
                "type": "input_image",
                "image_url": format!("data:{mime_type};base64,{data}"),
            })),
            ToolResultPart::Text { .. } => None,
        })
        .collect();
    if !images.is_empty() {
        items.push(json!({ "role": "user", "content": images }));
    }
    items
}

pub(crate) fn parse_responses_completion(v: &Value) -> anyhow::Result<Completion> {
    let output = v["output"]
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("No output in response"))?;

    let mut result = AssistantMessage::default();
    for item in output {
        match item["type"].as_str().unwrap_or("") {
            "message" => {
                result.id = item["id"].as_str().map(String::from);
                result.status = item["status"].as_str().map(String::from);
                if let Some(parts) = item["content"].as_array() {
                    for part in parts {
                        if part["type"].as_str() == Some("output_text") {
                            if let Some(text) = part["text"].as_str() {
                                result.content.push(ContentPart::text(text));
                            }
                        }
                    }
                }
            }
            "function_call" => {
                let id = item["call_id"].as_str().unwrap_or_default().to_string();
                let name = item["name"].as_str().unwrap_or_default().to_string();
                let raw = item["arguments"].as_str().unwrap_or("{}");
                let mut tc = ToolCallPart::new(id.clone(), name.clone(), parse_arguments(raw, &name, &id));
                tc.item_id = item["id"].as_str().map(String::from);
                tc.status = item["status"].as_str().map(String::from);
                result.content.push(ContentPart::ToolCall(tc));
            }
            // Reasoning summaries and other auxiliary items carry no
            // conversation content.
            other => debug!(item_type = other, "skipping non-content response item"),
        }
    }

    let usage = Usage {
        input: v["usage"]["input_tokens"].as_u64().unwrap_or(0),
        output: v["usage"]["output_tokens"].as_u64().unwrap_or(0),
    };
    Ok(Completion { result, usage })
}
