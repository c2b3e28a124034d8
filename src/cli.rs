// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Run a natural-language task against an LLM provider until it reports a
/// structured result.
#[derive(Parser, Debug)]
#[command(name = "lowire", version, about)]
pub struct Cli {
    /// The task to perform.
    pub task: Option<String>,

    /// Provider id: openai, openai-chat, github, anthropic, google
    /// (aliases: copilot, claude, gemini).
    #[arg(long, short = 'p')]
    pub provider: Option<String>,

    /// Model identifier passed to the provider.
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// Maximum output tokens per completion.
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Enable extended reasoning where the provider supports it.
    #[arg(long)]
    pub reasoning: bool,

    /// Maximum number of turns before the run fails.
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Hard token budget (input + output) for the whole run.
    #[arg(long)]
    pub budget_tokens: Option<u64>,

    /// Compress prior turns into a summary before each completion.
    #[arg(long)]
    pub summarize: bool,

    /// Record/replay cache file. Created on first use; replies are replayed
    /// from it on later runs with identical requests.
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Secret to redact from the cache, as NAME=VALUE. Repeatable.
    #[arg(long = "secret", value_name = "NAME=VALUE")]
    pub secrets: Vec<String>,

    /// Path to the YAML config file (default: ./lowire.yaml, then
    /// ~/.config/lowire/config.yaml).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Log full request/response bodies at debug level.
    #[arg(long)]
    pub debug: bool,

    /// Write tracing output to stderr (RUST_LOG still applies).
    #[arg(long, short = 'v')]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the registered providers and their key environment variables.
    ListProviders {
        /// Emit the list as JSON.
        #[arg(long)]
        json: bool,
    },
}
