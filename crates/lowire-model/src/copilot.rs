// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! GitHub Copilot driver.
//!
//! Speaks the OpenAI Chat wire format (the builders in [`crate::openai`] are
//! reused by delegation) against `api.githubcopilot.com`, with three
//! mitigations for the endpoint's quirks:
//!
//! 1. An `_intent` string property is injected into every tool schema.  The
//!    endpoint tends to narrate ("Navigating to ...") instead of calling a
//!    tool; the injected property pulls that narration into the call's
//!    arguments, where it is stripped on the way back and re-materialised as
//!    a companion text part keyed by `copilot_tool_call_id`.
//! 2. `parallel_tool_calls` is forced off.
//! 3. Responses that arrive with zero `choices` are retried up to 3 times.
//!
//! Bearer tokens are fetched lazily from `api.github.com/copilot_internal/v2/token`
//! using `COPILOT_API_KEY` and cached until shortly before expiry.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    openai::{build_chat_body, parse_chat_completion},
    provider::api_error,
    sanitize::inject_intent_property,
    AssistantMessage, Completion, CompleteOptions, ContentPart, Conversation, Message,
};

const EDITOR_VERSION: &str = "vscode/1.99.0";
const EDITOR_PLUGIN_VERSION: &str = "copilot-chat/0.26.7";
const USER_AGENT: &str = "GitHubCopilotChat/0.26.7";

const MAX_EMPTY_CHOICES_RETRIES: u32 = 3;
/// Refresh the bearer this many seconds before the server-reported expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

struct CachedToken {
    token: String,
    expires_at: i64,
}

pub struct CopilotProvider {
    api_key: Option<String>,
    base_url: String,
    token_url: String,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl CopilotProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>, token_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.githubcopilot.com".into()),
            token_url: token_url
                .unwrap_or_else(|| "https://api.github.com/copilot_internal/v2/token".into()),
            client: reqwest::Client::new(),
            token: Mutex::new(None),
        }
    }

    /// Return a valid bearer, fetching a fresh one when the cached token is
    /// missing or about to expire.
    async fn bearer(&self) -> anyhow::Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(t) = cached.as_ref() {
            if chrono::Utc::now().timestamp() < t.expires_at - EXPIRY_MARGIN_SECS {
                return Ok(t.token.clone());
            }
        }
        let fresh = self
            .fetch_token()
            .await
            .context("Failed to get Copilot token")?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn fetch_token(&self) -> anyhow::Result<CachedToken> {
        let key = match &self.api_key {
            Some(k) => k.clone(),
            None => std::env::var("COPILOT_API_KEY").context("COPILOT_API_KEY not set")?,
        };
        debug!("fetching copilot bearer token");
        let resp = self
            .client
            .get(&self.token_url)
            .header("Authorization", format!("token {key}"))
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(api_error(status, &text));
        }
        let v: Value = resp.json().await?;
        let token = v["token"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("token missing from response"))?
            .to_string();
        let expires_at = v["expires_at"].as_i64().unwrap_or(0);
        Ok(CachedToken { token, expires_at })
    }
}

#[async_trait]
impl crate::Provider for CopilotProvider {
    fn name(&self) -> &str {
        "github"
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        options: &CompleteOptions,
    ) -> anyhow::Result<Completion> {
        let bearer = self.bearer().await?;
        let prepared = prepare_conversation(conversation);
        let mut body = build_chat_body(&prepared, options);
        body["parallel_tool_calls"] = json!(false);

        debug!(model = %options.model, "sending copilot request");
        if options.debug {
            debug!(request = %body, "copilot request body");
        }

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        for attempt in 1..=MAX_EMPTY_CHOICES_RETRIES {
            let resp = self
                .client
                .post(&url)
                .bearer_auth(&bearer)
                .header("Editor-Version", EDITOR_VERSION)
                .header("Editor-Plugin-Version", EDITOR_PLUGIN_VERSION)
                .header("User-Agent", USER_AGENT)
                .json(&body)
                .send()
                .await
                .context("Copilot request failed")?;

            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(api_error(status, &text));
            }

            let v: Value = resp.json().await.context("Copilot response was not JSON")?;
            if options.debug {
                debug!(response = %v, "copilot response body");
            }
            if v["choices"].as_array().is_none_or(|a| a.is_empty()) {
                warn!(attempt, "copilot response contained no choices; retrying");
                continue;
            }
            let mut completion = parse_chat_completion(&v)?;
            extract_intents(&mut completion.result);
            return Ok(completion);
        }
        anyhow::bail!("No choices in response")
    }
}

/// Copy the conversation with the Copilot mitigations applied on the way out:
/// every tool schema gains an `_intent` property, and intent text parts from
/// earlier turns are folded back into their tool call's arguments.
fn prepare_conversation(conversation: &Conversation) -> Conversation {
    let mut out = conversation.clone();
    for tool in &mut out.tools {
        tool.input_schema = inject_intent_property(&tool.input_schema);
    }
    for m in &mut out.messages {
        if let Message::Assistant(am) = m {
            reattach_intents(am);
        }
    }
    out
}

/// Fold companion intent text parts back into their tool call's arguments
/// and drop them from the content list.
fn reattach_intents(am: &mut AssistantMessage) {
    let intents: Vec<(String, String)> = am
        .content
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text, copilot_tool_call_id: Some(id), .. } => {
                Some((id.clone(), text.clone()))
            }
            _ => None,
        })
        .collect();
    if intents.is_empty() {
        return;
    }
    am.content.retain(|p| {
        !matches!(p, ContentPart::Text { copilot_tool_call_id: Some(_), .. })
    });
    for (id, text) in intents {
        for part in &mut am.content {
            if let ContentPart::ToolCall(tc) = part {
                if tc.id == id {
                    if let Some(args) = tc.arguments.as_object_mut() {
                        args.insert("_intent".into(), json!(text));
                    }
                }
            }
        }
    }
}

/// Strip `_intent` from every tool call's arguments, surfacing each as an
/// assistant text part placed before its call and keyed by the call id.
fn extract_intents(am: &mut AssistantMessage) {
    let mut content = Vec::with_capacity(am.content.len());
    for part in am.content.drain(..) {
        match part {
            ContentPart::ToolCall(mut tc) => {
                let intent = tc
                    .arguments
                    .as_object_mut()
                    .and_then(|args| args.remove("_intent"));
                if let Some(Value::String(text)) = intent {
                    if !text.is_empty() {
                        content.push(ContentPart::Text {
                            text,
                            signature: None,
                            copilot_tool_call_id: Some(tc.id.clone()),
                        });
                    }
                }
                content.push(ContentPart::ToolCall(tc));
            }
            other => content.push(other),
        }
    }
    am.content = content;
}
