// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::{Completion, Conversation};

/// Per-call completion options.  The driver fills `max_tokens` with the
/// remaining token budget when one is configured.
#[derive(Debug, Clone, Default)]
pub struct CompleteOptions {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Request extended reasoning where the provider supports it
    /// (Anthropic thinking blocks).
    pub reasoning: bool,
    /// Log full request/response bodies at debug level.
    pub debug: bool,
}

/// A model provider adapter.
///
/// Implementations translate the canonical [`Conversation`] to their wire
/// format, POST it, and parse the reply back into an assistant message plus
/// token usage.  There is no shared base beyond this capability.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name used for registry lookup and cache file paths.
    fn name(&self) -> &str;

    /// Send one completion request and return the parsed reply.
    async fn complete(
        &self,
        conversation: &Conversation,
        options: &CompleteOptions,
    ) -> anyhow::Result<Completion>;
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("name", &self.name()).finish()
    }
}

/// The uniform transport error for a non-2xx provider reply.
pub(crate) fn api_error(status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    anyhow::anyhow!(
        "API error: {} {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        body
    )
}
