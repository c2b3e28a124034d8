// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use lowire_model::{AssistantMessage, Conversation, ToolCallPart, ToolResult, Usage};

/// Vote returned by the turn-level hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookAction {
    #[default]
    Continue,
    /// Terminate the run cleanly with `status: break`.
    Break,
}

/// Vote returned by the tool-call hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolVote {
    #[default]
    Continue,
    /// Replace the call's outcome with an error result and move on.
    Disallow,
    /// Terminate the run cleanly with `status: break`.
    Break,
}

/// Observation and veto points in the turn state machine.  All methods
/// default to `Continue`; implement only the ones you need.  Errors returned
/// from a hook propagate out of `run`.
#[async_trait]
pub trait Hooks: Send + Sync {
    /// Fired before each provider call with the conversation about to be
    /// sent, the usage accumulated so far, and the remaining token budget.
    async fn on_before_turn(
        &self,
        conversation: &Conversation,
        total_usage: &Usage,
        budget_tokens: Option<u64>,
    ) -> anyhow::Result<HookAction> {
        let _ = (conversation, total_usage, budget_tokens);
        Ok(HookAction::Continue)
    }

    /// Fired after the provider reply has been parsed and usage accumulated,
    /// before the assistant message is appended to the conversation.
    async fn on_after_turn(
        &self,
        message: &AssistantMessage,
        total_usage: &Usage,
    ) -> anyhow::Result<HookAction> {
        let _ = (message, total_usage);
        Ok(HookAction::Continue)
    }

    /// Fired before each tool invocation.
    async fn on_before_tool_call(&self, call: &ToolCallPart) -> anyhow::Result<ToolVote> {
        let _ = call;
        Ok(ToolVote::Continue)
    }

    /// Fired after a successful tool invocation, before the result is
    /// attached to the conversation.
    async fn on_after_tool_call(
        &self,
        call: &ToolCallPart,
        result: &ToolResult,
    ) -> anyhow::Result<ToolVote> {
        let _ = (call, result);
        Ok(ToolVote::Continue)
    }

    /// Fired when a tool invocation failed.  `Continue` lets the driver
    /// surface the error to the model and keep going.
    async fn on_tool_call_error(
        &self,
        call: &ToolCallPart,
        error: &anyhow::Error,
    ) -> anyhow::Result<HookAction> {
        let _ = (call, error);
        Ok(HookAction::Continue)
    }
}

/// The do-nothing hook set used when the caller supplies none.
pub struct NoHooks;

#[async_trait]
impl Hooks for NoHooks {}
