// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Request-granular replay cache with secret redaction.
//!
//! Every provider call is fingerprinted as the SHA-1 of the canonically
//! serialised, secret-redacted conversation.  Hits are served from the
//! previously recorded `input` set (or from the `output` set being built);
//! misses go to the provider and the redacted reply is recorded.  Secret
//! values never reach disk: entries are stored with each value replaced by
//! the literal `<NAME>` and reconstituted from the live secrets map on read.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use lowire_model::{CompleteOptions, Completion, Conversation, Provider};
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::error::LoopError;

/// Fingerprint → recorded reply.
pub type ReplayCache = BTreeMap<String, Completion>;

/// The cache pair threaded through a run: `input` is the previously recorded
/// set loaded from disk, `output` is the set being built.
#[derive(Debug, Default)]
pub struct Caches {
    pub input: ReplayCache,
    pub output: ReplayCache,
    /// Secret name → live value.  Values are redacted to `<name>` before
    /// hashing or recording and substituted back on replay.
    pub secrets: BTreeMap<String, String>,
}

impl Caches {
    pub fn new(input: ReplayCache, secrets: BTreeMap<String, String>) -> Self {
        Self { input, output: ReplayCache::new(), secrets }
    }
}

/// Look up `conversation` in the caches, or call the provider and record the
/// reply.  With no caches this is a plain provider call.
pub async fn cached_complete(
    provider: &dyn Provider,
    conversation: &Conversation,
    caches: Option<&mut Caches>,
    options: &CompleteOptions,
) -> anyhow::Result<Completion> {
    let Some(caches) = caches else {
        return provider.complete(conversation, options).await;
    };

    let key = fingerprint(conversation, &caches.secrets)?;
    if !env_flag("LOWIRE_NO_CACHE") {
        if let Some(entry) = caches.input.get(&key) {
            debug!(key = %key, "replay cache hit (recorded)");
            let entry = entry.clone();
            caches.output.insert(key, entry.clone());
            return unredact_completion(&entry, &caches.secrets);
        }
        if let Some(entry) = caches.output.get(&key) {
            debug!(key = %key, "replay cache hit (current run)");
            return unredact_completion(entry, &caches.secrets);
        }
    }
    if env_flag("LOWIRE_FORCE_CACHE") {
        return Err(LoopError::CacheMiss.into());
    }

    let completion = provider.complete(conversation, options).await?;
    let redacted = redact_completion(&completion, &caches.secrets)?;
    debug!(key = %key, "recording provider reply");
    caches.output.insert(key, redacted);
    Ok(completion)
}

/// Hex SHA-1 of the canonically serialised, secret-redacted conversation.
///
/// Serialising through `serde_json::Value` sorts object keys, so the
/// fingerprint is stable regardless of how the conversation was constructed.
pub fn fingerprint(
    conversation: &Conversation,
    secrets: &BTreeMap<String, String>,
) -> anyhow::Result<String> {
    let canonical = serde_json::to_value(conversation)
        .context("failed to serialise conversation for fingerprinting")?;
    let redacted = redact_text(&canonical.to_string(), secrets);
    let digest = Sha1::digest(redacted.as_bytes());
    Ok(hex::encode(digest))
}

/// Replace every secret value with the `<name>` literal.
fn redact_text(text: &str, secrets: &BTreeMap<String, String>) -> String {
    let mut out = text.to_string();
    for (name, value) in secrets {
        if !value.is_empty() {
            out = out.replace(value, &format!("<{name}>"));
        }
    }
    out
}

/// Replace every `<name>` literal with the live secret value.
fn unredact_text(text: &str, secrets: &BTreeMap<String, String>) -> String {
    let mut out = text.to_string();
    for (name, value) in secrets {
        out = out.replace(&format!("<{name}>"), value);
    }
    out
}

fn redact_completion(
    completion: &Completion,
    secrets: &BTreeMap<String, String>,
) -> anyhow::Result<Completion> {
    let text = serde_json::to_string(completion)?;
    serde_json::from_str(&redact_text(&text, secrets))
        .context("redacted completion no longer parses")
}

fn unredact_completion(
    completion: &Completion,
    secrets: &BTreeMap<String, String>,
) -> anyhow::Result<Completion> {
    let text = serde_json::to_string(completion)?;
    serde_json::from_str(&unredact_text(&text, secrets))
        .context("unredacted completion no longer parses")
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| !v.is_empty() && v != "0")
}

// ─── Cache files ──────────────────────────────────────────────────────────────

/// `<root>/__cache__/<provider>/<sanitized-name>.json`
pub fn cache_file_path(root: &Path, provider_name: &str, name: &str) -> PathBuf {
    root.join("__cache__")
        .join(provider_name)
        .join(format!("{}.json", sanitize_name(name)))
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Load a recorded cache.  A missing file is an empty cache.
pub fn load_cache(path: &Path) -> anyhow::Result<ReplayCache> {
    if !path.exists() {
        return Ok(ReplayCache::new());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read cache file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse cache file {}", path.display()))
}

/// Persist the recorded (already redacted) cache.
pub fn save_cache(path: &Path, cache: &ReplayCache) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(cache)?;
    std::fs::write(path, text)
        .with_context(|| format!("failed to write cache file {}", path.display()))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lowire_model::{Message, ScriptedProvider};
    use serde_json::json;

    fn secrets() -> BTreeMap<String, String> {
        BTreeMap::from([("API_TOKEN".to_string(), "tok-12345".to_string())])
    }

    fn conv(task: &str) -> Conversation {
        Conversation {
            system_prompt: "agent".into(),
            messages: vec![Message::user(task)],
            tools: vec![],
        }
    }

    #[test]
    fn redaction_round_trips() {
        let s = secrets();
        let original = r#"{"content":"authorization: tok-12345 for the run"}"#;
        let redacted = redact_text(original, &s);
        assert!(!redacted.contains("tok-12345"));
        assert!(redacted.contains("<API_TOKEN>"));
        assert_eq!(unredact_text(&redacted, &s), original);
    }

    #[test]
    fn fingerprint_is_stable_and_secret_independent() {
        let a = fingerprint(&conv("use tok-12345 here"), &secrets()).unwrap();
        let b = fingerprint(&conv("use tok-12345 here"), &secrets()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 40, "hex sha-1");

        // A rotated secret value yields the same fingerprint because the
        // value is replaced by its name before hashing.
        let rotated = BTreeMap::from([("API_TOKEN".to_string(), "tok-OTHER".to_string())]);
        let c = fingerprint(&conv("use tok-OTHER here"), &rotated).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn fingerprint_differs_for_different_conversations() {
        let a = fingerprint(&conv("one"), &secrets()).unwrap();
        let b = fingerprint(&conv("two"), &secrets()).unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn records_once_then_replays_without_calling_provider() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text_reply("the reply")]);
        let conversation = conv("task");
        let opts = CompleteOptions::default();

        let mut caches = Caches::default();
        let first = cached_complete(&provider, &conversation, Some(&mut caches), &opts)
            .await
            .unwrap();
        assert_eq!(first.result.text_content(), "the reply");
        assert_eq!(caches.output.len(), 1, "exactly one key recorded");

        // Second run: recorded output becomes the input set.  The provider
        // has no scripts left, so any call would error.
        let mut caches2 = Caches::new(caches.output.clone(), BTreeMap::new());
        let second = cached_complete(&provider, &conversation, Some(&mut caches2), &opts)
            .await
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(provider.calls(), 1, "provider must not be called on a hit");
        // The hit is copied into the new output set.
        assert_eq!(caches2.output.len(), 1);
    }

    #[tokio::test]
    async fn same_conversation_twice_in_one_run_hits_output_set() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text_reply("once")]);
        let conversation = conv("task");
        let opts = CompleteOptions::default();
        let mut caches = Caches::default();

        let a = cached_complete(&provider, &conversation, Some(&mut caches), &opts)
            .await
            .unwrap();
        let b = cached_complete(&provider, &conversation, Some(&mut caches), &opts)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn no_caches_delegates_straight_to_provider() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text_reply("direct")]);
        let c = cached_complete(&provider, &conv("t"), None, &CompleteOptions::default())
            .await
            .unwrap();
        assert_eq!(c.result.text_content(), "direct");
    }

    #[tokio::test]
    async fn recorded_entries_never_contain_secret_values() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text_reply(
            "the token is tok-12345, keep it safe",
        )]);
        let mut caches = Caches::new(ReplayCache::new(), secrets());
        let returned = cached_complete(&provider, &conv("t"), Some(&mut caches), &CompleteOptions::default())
            .await
            .unwrap();
        // Caller sees the live value...
        assert!(returned.result.text_content().contains("tok-12345"));
        // ...but what would be written to disk does not contain it.
        let on_disk = serde_json::to_string(&caches.output).unwrap();
        assert!(!on_disk.contains("tok-12345"), "secret leaked: {on_disk}");
        assert!(on_disk.contains("<API_TOKEN>"));
    }

    #[tokio::test]
    async fn replay_reconstitutes_secrets_from_live_map() {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::text_reply(
            "use tok-12345 to authenticate",
        )]);
        let conversation = conv("t");
        let opts = CompleteOptions::default();
        let mut record = Caches::new(ReplayCache::new(), secrets());
        cached_complete(&provider, &conversation, Some(&mut record), &opts)
            .await
            .unwrap();

        let mut replay = Caches::new(record.output.clone(), secrets());
        let c = cached_complete(&provider, &conversation, Some(&mut replay), &opts)
            .await
            .unwrap();
        assert!(c.result.text_content().contains("tok-12345"));
    }

    #[test]
    fn cache_file_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_file_path(dir.path(), "anthropic", "adds two numbers");
        assert!(path.to_string_lossy().contains("__cache__"));
        assert!(path.to_string_lossy().ends_with("adds_two_numbers.json"));

        let mut cache = ReplayCache::new();
        cache.insert(
            "abc123".into(),
            Completion {
                result: lowire_model::AssistantMessage::text("hi"),
                usage: Default::default(),
            },
        );
        save_cache(&path, &cache).unwrap();
        let loaded = load_cache(&path).unwrap();
        assert_eq!(loaded, cache);
    }

    #[test]
    fn missing_cache_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = load_cache(&dir.path().join("nope.json")).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn same_value_multiple_secrets_uses_name_literal() {
        let s = BTreeMap::from([
            ("A".to_string(), "xyz".to_string()),
            ("B".to_string(), "uvw".to_string()),
        ]);
        let out = redact_text("xyz and uvw", &s);
        assert_eq!(out, "<A> and <B>");
    }
}
