// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod registry;
pub mod sanitize;
mod anthropic;
mod copilot;
mod google;
mod mock;
mod openai;
mod provider;
mod responses;
mod types;

pub use anthropic::AnthropicProvider;
pub use copilot::CopilotProvider;
pub use google::GoogleProvider;
pub use mock::ScriptedProvider;
pub use openai::OpenAiChatProvider;
pub use provider::{CompleteOptions, Provider};
pub use registry::{from_name, get_provider, list_providers, ProviderMeta};
pub use responses::OpenAiResponsesProvider;
pub use types::*;
