// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider registry: static metadata for every supported provider and the
//! single constructor that turns a name into a boxed [`crate::Provider`].

use anyhow::bail;

use crate::{
    anthropic::AnthropicProvider, copilot::CopilotProvider, google::GoogleProvider,
    openai::OpenAiChatProvider, responses::OpenAiResponsesProvider, Provider,
};

/// Metadata describing a registered provider.
#[derive(Debug, Clone)]
pub struct ProviderMeta {
    /// Unique provider id (e.g. `"openai"`).
    pub id: &'static str,
    /// Human-readable display name.
    pub name: &'static str,
    /// One-line description shown by `lowire list-providers`.
    pub description: &'static str,
    /// Environment variable that holds the API key.
    pub api_key_env: &'static str,
    /// Default endpoint base URL.
    pub base_url: &'static str,
}

/// Complete registry of supported providers.
pub static PROVIDERS: &[ProviderMeta] = &[
    ProviderMeta {
        id: "openai",
        name: "OpenAI",
        description: "OpenAI models via the Responses API",
        api_key_env: "OPENAI_API_KEY",
        base_url: "https://api.openai.com/v1",
    },
    ProviderMeta {
        id: "openai-chat",
        name: "OpenAI Chat",
        description: "OpenAI models via the legacy Chat Completions API",
        api_key_env: "OPENAI_API_KEY",
        base_url: "https://api.openai.com/v1",
    },
    ProviderMeta {
        id: "github",
        name: "GitHub Copilot",
        description: "Copilot chat endpoint (bearer derived from COPILOT_API_KEY)",
        api_key_env: "COPILOT_API_KEY",
        base_url: "https://api.githubcopilot.com",
    },
    ProviderMeta {
        id: "anthropic",
        name: "Anthropic",
        description: "Anthropic Claude models via the Messages API",
        api_key_env: "ANTHROPIC_API_KEY",
        base_url: "https://api.anthropic.com",
    },
    ProviderMeta {
        id: "google",
        name: "Google Gemini",
        description: "Google Gemini models via the Generative Language API",
        api_key_env: "GEMINI_API_KEY",
        base_url: "https://generativelanguage.googleapis.com",
    },
];

/// Returns all registered providers in declaration order.
pub fn list_providers() -> &'static [ProviderMeta] {
    PROVIDERS
}

/// Resolve legacy aliases to the canonical provider id.
fn canonical_id(name: &str) -> &str {
    match name {
        "copilot" => "github",
        "claude" => "anthropic",
        "gemini" => "google",
        other => other,
    }
}

/// Look up provider metadata by id or alias.
pub fn get_provider(name: &str) -> Option<&'static ProviderMeta> {
    let id = canonical_id(name);
    PROVIDERS.iter().find(|p| p.id == id)
}

/// Construct a boxed [`Provider`] by name.
///
/// Accepts the canonical ids plus the legacy aliases `copilot`, `claude`,
/// and `gemini`.  API keys are read lazily from the environment at request
/// time, so construction never fails on missing credentials.
pub fn from_name(name: &str) -> anyhow::Result<Box<dyn Provider>> {
    match canonical_id(name) {
        "openai" => Ok(Box::new(OpenAiResponsesProvider::new(None, None))),
        "openai-chat" => Ok(Box::new(OpenAiChatProvider::new(None, None))),
        "github" => Ok(Box::new(CopilotProvider::new(None, None, None))),
        "anthropic" => Ok(Box::new(AnthropicProvider::new(None, None))),
        "google" => Ok(Box::new(GoogleProvider::new(None, None))),
        _ => bail!("Unknown provider: {name}"),
    }
}
