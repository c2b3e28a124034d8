// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Wire-format tests: spin up a minimal HTTP/1.1 mock server, point each
//! driver at it, issue a completion, and assert both the HTTP request the
//! driver sent and the parsed [`Completion`].
//!
//! These tests run without API keys and without external network access.

use std::collections::HashMap;

use lowire_model::{
    AnthropicProvider, AssistantMessage, CompleteOptions, Completion, ContentPart, Conversation,
    CopilotProvider, GoogleProvider, Message, OpenAiChatProvider, OpenAiResponsesProvider,
    Provider, Tool, ToolCallPart,
};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

// ── Minimal HTTP/1.1 mock server ──────────────────────────────────────────────

#[derive(Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Value,
}

/// Bind a one-shot HTTP/1.1 mock server on a random loopback port.  It
/// accepts exactly one request, captures it, and replies with the given
/// status + JSON body.  Returns the port and a receiver for the captured
/// request.
async fn mock_server_once(
    status: u16,
    resp_body: impl Into<String> + Send + 'static,
) -> (u16, tokio::sync::oneshot::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = tokio::sync::oneshot::channel::<CapturedRequest>();

    tokio::spawn(async move {
        let resp_body: String = resp_body.into();
        let (stream, _) = listener.accept().await.expect("accept");
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        // Request line
        let mut request_line = String::new();
        reader.read_line(&mut request_line).await.unwrap();
        let request_line = request_line.trim().to_string();
        let mut parts = request_line.splitn(3, ' ');
        let method = parts.next().unwrap_or("").to_string();
        let path = parts.next().unwrap_or("").to_string();

        // Headers
        let mut headers: HashMap<String, String> = HashMap::new();
        let mut content_length: usize = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }
            if let Some((k, v)) = trimmed.split_once(": ") {
                let key = k.to_lowercase();
                if key == "content-length" {
                    content_length = v.parse().unwrap_or(0);
                }
                headers.insert(key, v.to_string());
            }
        }

        // Body (GET requests carry none)
        let mut body_bytes = vec![0u8; content_length];
        reader.read_exact(&mut body_bytes).await.unwrap();
        let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

        let _ = tx.send(CapturedRequest { method, path, headers, body });

        let http_resp = format!(
            "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            resp_body.len(),
            resp_body,
        );
        let _ = write_half.write_all(http_resp.as_bytes()).await;
    });

    (port, rx)
}

fn options(model: &str) -> CompleteOptions {
    CompleteOptions {
        model: model.into(),
        max_tokens: Some(64),
        temperature: Some(0.5),
        ..Default::default()
    }
}

fn task_conversation() -> Conversation {
    Conversation {
        system_prompt: "You are an agent.".into(),
        messages: vec![Message::user("hello")],
        tools: vec![Tool::new(
            "go",
            "navigates somewhere",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": { "url": { "type": "string" } },
                "required": ["url"],
            }),
        )],
    }
}

// ── OpenAI Chat ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn openai_chat_request_and_parse() {
    let resp = json!({
        "choices": [{ "message": { "role": "assistant", "content": "hi there" } }],
        "usage": { "prompt_tokens": 12, "completion_tokens": 4 }
    });
    let (port, req_rx) = mock_server_once(200, resp.to_string()).await;

    let p = OpenAiChatProvider::new(
        Some("sk-test".into()),
        Some(format!("http://127.0.0.1:{port}/v1")),
    );
    let c = p.complete(&task_conversation(), &options("gpt-4o-mini")).await.unwrap();

    let req = req_rx.await.unwrap();
    assert_eq!(req.method, "POST");
    assert_eq!(req.path, "/v1/chat/completions");
    assert_eq!(req.headers.get("authorization").unwrap(), "Bearer sk-test");
    assert_eq!(req.body["model"], "gpt-4o-mini");
    assert_eq!(req.body["max_tokens"], 64);
    assert_eq!(req.body["tool_choice"], "auto");
    assert_eq!(req.body["messages"][0]["role"], "system");
    assert_eq!(req.body["messages"][1]["role"], "user");
    assert_eq!(req.body["tools"][0]["function"]["name"], "go");

    assert_eq!(c.result.text_content(), "hi there");
    assert_eq!(c.usage.input, 12);
    assert_eq!(c.usage.output, 4);
}

#[tokio::test]
async fn openai_chat_non_2xx_is_api_error() {
    let (port, _req_rx) = mock_server_once(401, r#"{"error":"bad key"}"#).await;
    let p = OpenAiChatProvider::new(
        Some("sk-test".into()),
        Some(format!("http://127.0.0.1:{port}/v1")),
    );
    let err = p
        .complete(&task_conversation(), &options("gpt-4o-mini"))
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.starts_with("API error: 401"), "unexpected: {msg}");
    assert!(msg.contains("bad key"));
}

// ── OpenAI Responses ──────────────────────────────────────────────────────────

#[tokio::test]
async fn openai_responses_request_and_parse() {
    let resp = json!({
        "output": [
            {
                "type": "function_call",
                "id": "fc_1",
                "status": "completed",
                "call_id": "call_1",
                "name": "go",
                "arguments": "{\"url\":\"https://example.com\"}"
            }
        ],
        "usage": { "input_tokens": 30, "output_tokens": 6 }
    });
    let (port, req_rx) = mock_server_once(200, resp.to_string()).await;

    let p = OpenAiResponsesProvider::new(
        Some("sk-test".into()),
        Some(format!("http://127.0.0.1:{port}/v1")),
    );
    let c = p.complete(&task_conversation(), &options("gpt-4.1")).await.unwrap();

    let req = req_rx.await.unwrap();
    assert_eq!(req.path, "/v1/responses");
    assert_eq!(req.body["parallel_tool_calls"], false);
    assert_eq!(req.body["max_output_tokens"], 64);
    assert!(req.body["instructions"].as_str().unwrap().starts_with("You are an agent."));
    assert_eq!(req.body["input"][0]["role"], "user");
    assert_eq!(req.body["tools"][0]["name"], "go");

    let tc = c.result.tool_calls().next().unwrap();
    assert_eq!(tc.id, "call_1");
    assert_eq!(tc.item_id.as_deref(), Some("fc_1"));
    assert_eq!(tc.arguments["url"], "https://example.com");
    assert_eq!(c.usage.input, 30);
}

// ── Anthropic ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn anthropic_request_and_parse() {
    let resp = json!({
        "content": [
            { "type": "text", "text": "on it" },
            { "type": "tool_use", "id": "tu_1", "name": "go", "input": { "url": "x" } }
        ],
        "usage": { "input_tokens": 21, "output_tokens": 8 }
    });
    let (port, req_rx) = mock_server_once(200, resp.to_string()).await;

    let p = AnthropicProvider::new(
        Some("sk-ant".into()),
        Some(format!("http://127.0.0.1:{port}")),
    );
    let mut opts = options("claude-sonnet-4-5");
    opts.reasoning = true;
    let c = p.complete(&task_conversation(), &opts).await.unwrap();

    let req = req_rx.await.unwrap();
    assert_eq!(req.path, "/v1/messages");
    assert_eq!(req.headers.get("x-api-key").unwrap(), "sk-ant");
    assert_eq!(req.headers.get("anthropic-version").unwrap(), "2023-06-01");
    assert_eq!(req.body["max_tokens"], 64);
    assert_eq!(req.body["thinking"]["budget_tokens"], 6);
    assert_eq!(req.body["tools"][0]["input_schema"]["type"], "object");

    assert_eq!(c.result.text_content(), "on it");
    assert_eq!(c.result.tool_calls().next().unwrap().id, "tu_1");
    assert_eq!(c.usage.output, 8);
}

// ── Google Gemini ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn gemini_request_and_parse() {
    let resp = json!({
        "candidates": [{
            "content": { "parts": [
                { "functionCall": { "name": "go", "args": { "url": "x" } } }
            ]}
        }],
        "usageMetadata": { "promptTokenCount": 15, "candidatesTokenCount": 3 }
    });
    let (port, req_rx) = mock_server_once(200, resp.to_string()).await;

    let p = GoogleProvider::new(
        Some("g-key".into()),
        Some(format!("http://127.0.0.1:{port}")),
    );
    let c = p.complete(&task_conversation(), &options("gemini-2.0-flash")).await.unwrap();

    let req = req_rx.await.unwrap();
    assert_eq!(req.path, "/v1beta/models/gemini-2.0-flash:generateContent");
    assert_eq!(req.headers.get("x-goog-api-key").unwrap(), "g-key");
    assert_eq!(req.body["generationConfig"]["maxOutputTokens"], 64);
    // additionalProperties must never reach the wire.
    let tools_text = req.body["tools"].to_string();
    assert!(!tools_text.contains("additionalProperties"), "leaked: {tools_text}");

    let tc = c.result.tool_calls().next().unwrap();
    assert!(tc.id.starts_with("call_"));
    assert_eq!(tc.name, "go");
    assert_eq!(c.usage.input, 15);
}

// ── GitHub Copilot ────────────────────────────────────────────────────────────

#[tokio::test]
async fn copilot_fetches_token_then_completes_with_intent_extraction() {
    // Token endpoint and chat endpoint are separate one-shot servers.
    let expires = chrono::Utc::now().timestamp() + 3600;
    let (token_port, token_rx) = mock_server_once(
        200,
        json!({ "token": "bearer-xyz", "expires_at": expires }).to_string(),
    )
    .await;
    let chat_resp = json!({
        "choices": [{ "message": {
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_5",
                "type": "function",
                "function": {
                    "name": "go",
                    "arguments": "{\"url\":\"https://x\",\"_intent\":\"Navigating to X\"}"
                }
            }]
        }}],
        "usage": { "prompt_tokens": 40, "completion_tokens": 9 }
    });
    let (chat_port, chat_rx) = mock_server_once(200, chat_resp.to_string()).await;

    let p = CopilotProvider::new(
        Some("ghu_test".into()),
        Some(format!("http://127.0.0.1:{chat_port}")),
        Some(format!("http://127.0.0.1:{token_port}/copilot_internal/v2/token")),
    );
    let c = p.complete(&task_conversation(), &options("gpt-4o")).await.unwrap();

    let token_req = token_rx.await.unwrap();
    assert_eq!(token_req.method, "GET");
    assert_eq!(token_req.headers.get("authorization").unwrap(), "token ghu_test");

    let chat_req = chat_rx.await.unwrap();
    assert_eq!(chat_req.path, "/chat/completions");
    assert_eq!(chat_req.headers.get("authorization").unwrap(), "Bearer bearer-xyz");
    assert!(chat_req.headers.contains_key("editor-version"));
    assert!(chat_req.headers.contains_key("editor-plugin-version"));
    assert_eq!(chat_req.body["parallel_tool_calls"], false);
    // Every tool schema gains the injected _intent property.
    assert_eq!(
        chat_req.body["tools"][0]["function"]["parameters"]["properties"]["_intent"]["type"],
        "string"
    );

    // The narration was stripped from arguments and surfaced as a companion
    // text part keyed by the call id.
    assert!(matches!(
        &c.result.content[0],
        ContentPart::Text { text, copilot_tool_call_id: Some(id), .. }
            if text == "Navigating to X" && id == "call_5"
    ));
    let tc = c.result.tool_calls().next().unwrap();
    assert_eq!(tc.arguments, json!({ "url": "https://x" }));
}

// ── Round-trip: a completed tool call goes back out on the wire ──────────────

#[tokio::test]
async fn chat_round_trip_carries_attached_tool_result() {
    let resp = json!({
        "choices": [{ "message": { "role": "assistant", "content": "done" } }]
    });
    let (port, req_rx) = mock_server_once(200, resp.to_string()).await;

    let mut tc = ToolCallPart::new("call_1", "go", json!({ "url": "x" }));
    tc.result = Some(lowire_model::ToolResult::text("arrived"));
    let conv = Conversation {
        system_prompt: "s".into(),
        messages: vec![
            Message::user("go to x"),
            Message::Assistant(AssistantMessage {
                content: vec![ContentPart::ToolCall(tc)],
                ..Default::default()
            }),
        ],
        tools: vec![],
    };

    let p = OpenAiChatProvider::new(
        Some("sk".into()),
        Some(format!("http://127.0.0.1:{port}/v1")),
    );
    let _: Completion = p.complete(&conv, &options("gpt-4o-mini")).await.unwrap();

    let req = req_rx.await.unwrap();
    let msgs = req.body["messages"].as_array().unwrap();
    // system, user, assistant(tool_calls), tool
    assert_eq!(msgs.len(), 4);
    assert_eq!(msgs[2]["tool_calls"][0]["id"], "call_1");
    assert_eq!(msgs[3]["role"], "tool");
    assert_eq!(msgs[3]["tool_call_id"], "call_1");
    assert_eq!(msgs[3]["content"], "arrived");
}
