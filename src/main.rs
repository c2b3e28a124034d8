// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod config;

use std::collections::BTreeMap;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use lowire_core::{load_cache, save_cache, Caches, Loop, LoopOptions, RunOptions, RunStatus};
use lowire_model::list_providers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(Commands::ListProviders { json }) = &cli.command {
        return list_providers_cmd(*json);
    }

    let config = config::load(cli.config.as_deref())?;

    let Some(task) = cli.task.clone() else {
        bail!("no task given; run `lowire --help` for usage");
    };
    let provider = cli
        .provider
        .clone()
        .or(config.provider.clone())
        .context("no provider configured; pass --provider or set it in lowire.yaml")?;
    let model = cli
        .model
        .clone()
        .or(config.model.clone())
        .context("no model configured; pass --model or set it in lowire.yaml")?;

    let options = LoopOptions {
        model,
        max_tokens: cli.max_tokens.or(config.max_tokens),
        temperature: cli.temperature.or(config.temperature),
        reasoning: cli.reasoning || config.reasoning.unwrap_or(false),
        debug: cli.debug,
    };

    let caches = match &cli.cache {
        Some(path) => {
            let input = load_cache(path)?;
            Some(Caches::new(input, parse_secrets(&cli.secrets)?))
        }
        None => None,
    };

    let mut run = RunOptions {
        summarize: cli.summarize,
        budget_tokens: cli.budget_tokens.or(config.budget_tokens),
        caches,
        ..Default::default()
    };
    if let Some(max_turns) = cli.max_turns.or(config.max_turns) {
        run.max_turns = max_turns;
    }

    let agent = Loop::new(&provider, options)?;
    let outcome = agent.run(&task, run).await?;

    if let (Some(path), Some(caches)) = (&cli.cache, &outcome.caches) {
        save_cache(path, &caches.output)?;
    }

    tracing::info!(
        turns = outcome.turns,
        input_tokens = outcome.usage.input,
        output_tokens = outcome.usage.output,
        "run finished"
    );
    match outcome.status {
        RunStatus::Break => {
            eprintln!("run stopped by hook after {} turns", outcome.turns);
        }
        RunStatus::Ok => {
            let result = outcome.result.unwrap_or(serde_json::Value::Null);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}

/// Parse repeated `NAME=VALUE` secret arguments.
fn parse_secrets(args: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    let mut secrets = BTreeMap::new();
    for arg in args {
        let Some((name, value)) = arg.split_once('=') else {
            bail!("invalid --secret {arg:?}; expected NAME=VALUE");
        };
        secrets.insert(name.to_string(), value.to_string());
    }
    Ok(secrets)
}

fn list_providers_cmd(json: bool) -> anyhow::Result<()> {
    if json {
        let entries: Vec<serde_json::Value> = list_providers()
            .iter()
            .map(|p| {
                serde_json::json!({
                    "id": p.id,
                    "name": p.name,
                    "description": p.description,
                    "api_key_env": p.api_key_env,
                    "base_url": p.base_url,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for p in list_providers() {
        println!("{:<12} {:<16} {} (key: {})", p.id, p.name, p.description, p.api_key_env);
    }
    Ok(())
}

/// Tracing goes to stderr only when asked for; `RUST_LOG` controls the
/// filter, defaulting to `lowire=info`.
fn init_logging(verbose: bool) {
    if !verbose && std::env::var("RUST_LOG").is_err() {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lowire=info,lowire_core=info,lowire_model=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_secrets_splits_on_first_equals() {
        let s = parse_secrets(&["TOKEN=abc=def".into()]).unwrap();
        assert_eq!(s.get("TOKEN").map(String::as_str), Some("abc=def"));
    }

    #[test]
    fn parse_secrets_rejects_missing_equals() {
        assert!(parse_secrets(&["TOKEN".into()]).is_err());
    }
}
