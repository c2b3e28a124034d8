// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    AssistantMessage, Completion, CompleteOptions, ContentPart, Conversation, ToolCallPart, Usage,
};

/// A pre-scripted provider for tests.  Each `complete` call pops the next
/// canned [`Completion`] from the front of the queue and records the
/// conversation it was handed, so tests can assert exactly what was sent
/// without network access.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Completion>>>,
    /// Every conversation seen by this provider, in call order.
    pub requests: Arc<Mutex<Vec<Conversation>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Completion>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of `complete` calls made so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Canned completion: a plain text reply.
    pub fn text_reply(text: impl Into<String>) -> Completion {
        Completion {
            result: AssistantMessage::text(text),
            usage: Usage { input: 10, output: 5 },
        }
    }

    /// Canned completion: a single tool call.
    pub fn tool_call_reply(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Value,
    ) -> Completion {
        Completion {
            result: AssistantMessage {
                content: vec![ContentPart::ToolCall(ToolCallPart::new(id, name, arguments))],
                ..Default::default()
            },
            usage: Usage { input: 10, output: 5 },
        }
    }

    /// Canned completion: the distinguished `report_result` call.
    pub fn report_result_reply(arguments: Value) -> Completion {
        Self::tool_call_reply("call_report", "report_result", arguments)
    }
}

#[async_trait]
impl crate::Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        _options: &CompleteOptions,
    ) -> anyhow::Result<Completion> {
        self.requests.lock().unwrap().push(conversation.clone());
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            anyhow::bail!("scripted provider ran out of responses");
        }
        Ok(scripts.remove(0))
    }
}
