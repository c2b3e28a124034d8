// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use lowire_model::ToolResult;
use serde_json::Value;

/// `_meta` key carrying the model's narrated intent for a tool call.
pub const META_INTENT: &str = "dev.lowire/intent";
/// `_meta` key under which a tool reports `{category, content}[]` entries for
/// the summariser.
pub const META_HISTORY: &str = "dev.lowire/history";
/// `_meta` key under which a tool reports a `{name -> content}` state map for
/// the summariser.
pub const META_STATE: &str = "dev.lowire/state";

/// One tool invocation as handed to the dispatcher.  `arguments` is the
/// model's argument object, possibly extended with a `_meta` hint object.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: Value,
}

/// User-supplied tool executor.  The driver calls tools strictly in the
/// order the assistant emitted them; any error is captured and surfaced to
/// the model, never propagated out of the run.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn call_tool(&self, request: ToolCallRequest) -> anyhow::Result<ToolResult>;
}
