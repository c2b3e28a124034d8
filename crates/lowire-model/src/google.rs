// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Google Gemini driver — native Generative Language API.
//!
//! Gemini has no tool-call ids on the wire, so ids are synthesised locally
//! (`call_<uuid>`) and matching on round-trip is by function name.  The opaque
//! `thoughtSignature` field sent on text and functionCall parts is echoed back
//! verbatim on the next request.
//!
//! # Auth
//! API key via the `x-goog-api-key` header.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::{
    provider::api_error, sanitize::strip_additional_properties, AssistantMessage, Completion,
    CompleteOptions, ContentPart, Conversation, Message, ToolCallPart, ToolResult, ToolResultPart,
    Usage,
};

/// Appended to the system instruction whenever tools are offered.
const TOOL_ADDENDUM: &str =
    "Use the provided tools to make progress. Respond with a function call in every message.";

pub struct GoogleProvider {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".into()),
            client: reqwest::Client::new(),
        }
    }

    fn key(&self) -> anyhow::Result<String> {
        match &self.api_key {
            Some(k) => Ok(k.clone()),
            None => std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY not set"),
        }
    }
}

#[async_trait]
impl crate::Provider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        options: &CompleteOptions,
    ) -> anyhow::Result<Completion> {
        let key = self.key()?;
        let body = build_gemini_body(conversation, options);

        debug!(model = %options.model, "sending google gemini request");
        if options.debug {
            debug!(request = %body, "gemini request body");
        }

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            options.model,
        );
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .await
            .context("Google Gemini request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(api_error(status, &text));
        }

        let v: Value = resp.json().await.context("Gemini response was not JSON")?;
        if options.debug {
            debug!(response = %v, "gemini response body");
        }
        parse_gemini_completion(&v)
    }
}

pub(crate) fn build_gemini_body(conversation: &Conversation, options: &CompleteOptions) -> Value {
    let mut system_text = conversation.system_prompt.clone();
    if !conversation.tools.is_empty() {
        system_text = format!("{system_text}\n\n{TOOL_ADDENDUM}");
    }

    let mut body = json!({ "contents": build_gemini_contents(&conversation.messages) });
    if !system_text.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": system_text }] });
    }

    let mut generation_config = json!({});
    if let Some(mt) = options.max_tokens {
        generation_config["maxOutputTokens"] = json!(mt);
    }
    if let Some(t) = options.temperature {
        generation_config["temperature"] = json!(t);
    }
    if generation_config.as_object().is_some_and(|m| !m.is_empty()) {
        body["generationConfig"] = generation_config;
    }

    if !conversation.tools.is_empty() {
        let function_declarations: Vec<Value> = conversation
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    // Gemini rejects schemas carrying additionalProperties.
                    "parameters": strip_additional_properties(&t.input_schema),
                })
            })
            .collect();
        body["tools"] = json!([{ "functionDeclarations": function_declarations }]);
    }
    body
}

/// Serialise messages with Gemini roles `user` / `model` / `function`.
///
/// Tool results become `functionResponse` parts in a `function` turn; any
/// images in the result follow as a separate `user` turn with `inline_data`
/// parts (functionResponse itself carries only the text output).
fn build_gemini_contents(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();

    for m in messages {
        match m {
            Message::User { content } => {
                out.push(json!({ "role": "user", "parts": [{ "text": content }] }));
            }
            Message::Assistant(am) => {
                let mut parts: Vec<Value> = Vec::new();
                let mut result_turns: Vec<Value> = Vec::new();
                for part in &am.content {
                    match part {
                        ContentPart::Text { text, signature, .. } => {
                            let mut p = json!({ "text": text });
                            if let Some(sig) = signature {
                                p["thoughtSignature"] = json!(sig);
                            }
                            parts.push(p);
                        }
                        ContentPart::Thinking { .. } => {}
                        ContentPart::ToolCall(tc) => {
                            let mut p = json!({
                                "functionCall": { "name": tc.name, "args": tc.arguments }
                            });
                            if let Some(sig) = &tc.signature {
                                p["thoughtSignature"] = json!(sig);
                            }
                            parts.push(p);
                            if let Some(r) = &tc.result {
                                result_turns.extend(tool_result_turns(&tc.name, r));
                            }
                        }
                    }
                }
                if !parts.is_empty() {
                    out.push(json!({ "role": "model", "parts": parts }));
                }
                out.extend(result_turns);
                if let Some(err) = &am.tool_error {
                    out.push(json!({ "role": "user", "parts": [{ "text": err }] }));
                }
            }
            Message::ToolResult { tool_name, result, .. } => {
                out.extend(tool_result_turns(tool_name, result));
            }
        }
    }
    out
}

fn tool_result_turns(function_name: &str, result: &ToolResult) -> Vec<Value> {
    let mut turns = vec![json!({
        "role": "function",
        "parts": [{
            "functionResponse": {
                "name": function_name,
                "response": { "output": result.text_content() },
            }
        }]
    })];
    let images: Vec<Value> = result
        .content
        .iter()
        .filter_map(|p| match p {
            ToolResultPart::Image { data, mime_type } => Some(json!({
                "inline_data": { "mime_type": mime_type, "data": data }
            })),
            ToolResultPart::Text { .. } => None,
        })
        .collect();
    if !images.is_empty() {
        turns.push(json!({ "role": "user", "parts": images }));
    }
    turns
}

pub(crate) fn parse_gemini_completion(v: &Value) -> anyhow::Result<Completion> {
    let candidate = match v["candidates"].get(0) {
        Some(c) => c,
        None => bail!("No candidates in response"),
    };

    let mut result = AssistantMessage::default();
    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            let signature = part["thoughtSignature"].as_str().map(String::from);
            if let Some(fc) = part.get("functionCall") {
                let name = fc["name"].as_str().unwrap_or_default().to_string();
                let args = fc.get("args").cloned().unwrap_or_else(|| json!({}));
                // Gemini omits call ids; synthesise one so the result can be
                // correlated within the conversation.
                let id = format!("call_{}", Uuid::new_v4().simple());
                let mut tc = ToolCallPart::new(id, name, args);
                tc.signature = signature;
                result.content.push(ContentPart::ToolCall(tc));
            } else if let Some(text) = part["text"].as_str() {
                result.content.push(ContentPart::Text {
                    text: text.to_string(),
                    signature,
                    copilot_tool_call_id: None,
                });
            } else {
                // Parts with neither text nor functionCall carry nothing we
                // can represent.
                debug!(part = %part, "dropping gemini part without text or functionCall");
            }
        }
    }

    let usage = Usage {
        input: v["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0),
        output: v["usageMetadata"]["candidatesTokenCount"].as_u64().unwrap_or(0),
    };
    Ok(Completion { result, usage })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Provider, Tool};

    #[test]
    fn provider_name() {
        let p = GoogleProvider::new(None, None);
        assert_eq!(p.name(), "google");
    }

    #[test]
    fn schema_is_sanitised_in_function_declarations() {
        let conv = Conversation {
            system_prompt: "s".into(),
            messages: vec![],
            tools: vec![Tool::new(
                "go",
                "navigates",
                json!({
                    "type": "object",
                    "additionalProperties": false,
                    "properties": { "url": { "type": "string" } }
                }),
            )],
        };
        let body = build_gemini_body(&conv, &CompleteOptions {
            model: "gemini-2.0-flash".into(),
            ..Default::default()
        });
        let text = serde_json::to_string(&body["tools"]).unwrap();
        assert!(!text.contains("additionalProperties"), "leaked: {text}");
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["parameters"]["properties"]["url"]["type"],
            "string"
        );
    }

    #[test]
    fn assistant_role_is_model() {
        let contents = build_gemini_contents(&[
            Message::user("hi"),
            Message::Assistant(AssistantMessage::text("hello")),
        ]);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "hello");
    }

    #[test]
    fn tool_result_becomes_function_response_turn() {
        let mut tc = ToolCallPart::new("call_abc", "counter", json!({}));
        tc.result = Some(ToolResult::text("Counter value is 43"));
        let contents = build_gemini_contents(&[Message::Assistant(AssistantMessage {
            content: vec![ContentPart::ToolCall(tc)],
            ..Default::default()
        })]);
        assert_eq!(contents[0]["parts"][0]["functionCall"]["name"], "counter");
        assert_eq!(contents[1]["role"], "function");
        let fr = &contents[1]["parts"][0]["functionResponse"];
        assert_eq!(fr["name"], "counter");
        assert_eq!(fr["response"]["output"], "Counter value is 43");
    }

    #[test]
    fn image_result_appends_inline_data_user_turn() {
        let mut tc = ToolCallPart::new("call_img", "capture_image", json!({}));
        tc.result = Some(ToolResult {
            content: vec![
                ToolResultPart::Text { text: "captured".into() },
                ToolResultPart::Image { data: "QUJD".into(), mime_type: "image/png".into() },
            ],
            ..Default::default()
        });
        let contents = build_gemini_contents(&[Message::Assistant(AssistantMessage {
            content: vec![ContentPart::ToolCall(tc)],
            ..Default::default()
        })]);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(contents[2]["parts"][0]["inline_data"]["mime_type"], "image/png");
        assert_eq!(contents[2]["parts"][0]["inline_data"]["data"], "QUJD");
    }

    #[test]
    fn thought_signature_round_trips_on_both_part_kinds() {
        let mut tc = ToolCallPart::new("call_s", "go", json!({}));
        tc.signature = Some("sig-call".into());
        let contents = build_gemini_contents(&[Message::Assistant(AssistantMessage {
            content: vec![
                ContentPart::Text {
                    text: "thinking aloud".into(),
                    signature: Some("sig-text".into()),
                    copilot_tool_call_id: None,
                },
                ContentPart::ToolCall(tc),
            ],
            ..Default::default()
        })]);
        assert_eq!(contents[0]["parts"][0]["thoughtSignature"], "sig-text");
        assert_eq!(contents[0]["parts"][1]["thoughtSignature"], "sig-call");
    }

    #[test]
    fn parse_synthesises_distinct_call_ids() {
        let v = json!({
            "candidates": [{
                "content": { "parts": [
                    { "functionCall": { "name": "go", "args": { "url": "a" } } },
                    { "functionCall": { "name": "go", "args": { "url": "b" } } }
                ]}
            }]
        });
        let c = parse_gemini_completion(&v).unwrap();
        let ids: Vec<&str> = c.result.tool_calls().map(|tc| tc.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids[0].starts_with("call_"));
        assert_ne!(ids[0], ids[1], "adjacent calls must stay distinguishable");
    }

    #[test]
    fn parse_preserves_thought_signature() {
        let v = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "ok", "thoughtSignature": "sigT" },
                    { "functionCall": { "name": "go", "args": {} }, "thoughtSignature": "sigC" }
                ]}
            }],
            "usageMetadata": { "promptTokenCount": 9, "candidatesTokenCount": 2 }
        });
        let c = parse_gemini_completion(&v).unwrap();
        assert!(matches!(
            &c.result.content[0],
            ContentPart::Text { signature: Some(s), .. } if s == "sigT"
        ));
        let tc = c.result.tool_calls().next().unwrap();
        assert_eq!(tc.signature.as_deref(), Some("sigC"));
        assert_eq!(c.usage, Usage { input: 9, output: 2 });
    }

    #[test]
    fn parse_drops_parts_without_text_or_function_call() {
        let v = json!({
            "candidates": [{
                "content": { "parts": [
                    { "executableCode": { "code": "1+1" } },
                    { "text": "two" }
                ]}
            }]
        });
        let c = parse_gemini_completion(&v).unwrap();
        assert_eq!(c.result.content.len(), 1);
        assert_eq!(c.result.text_content(), "two");
    }

    #[test]
    fn parse_no_candidates_is_an_error() {
        let v = json!({ "candidates": [] });
        let err = parse_gemini_completion(&v).unwrap_err();
        assert_eq!(err.to_string(), "No candidates in response");
    }
}
