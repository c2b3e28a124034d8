// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Conversation summarisation: render every finished turn as an indented
//! text block and keep the most recent assistant message verbatim.
//!
//! The driver replaces the transcript with a two-message conversation
//! `[user(summary), last assistant message]`, bounding context growth while
//! the `dev.lowire/state` entries carried by tool results preserve the
//! agent-visible state across the compaction.

use std::collections::BTreeMap;

use lowire_model::{AssistantMessage, Conversation};
use serde_json::Value;

use crate::tools::{META_HISTORY, META_STATE};

/// Output of one summarisation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Summarized {
    pub summary: String,
    /// The last assistant message, untouched, to be resent verbatim.
    pub last_message: Option<AssistantMessage>,
}

/// Render all but the last assistant turn into the summary text.
pub fn summarize(task: &str, conversation: &Conversation) -> Summarized {
    let assistants: Vec<&AssistantMessage> = conversation.assistant_messages().collect();
    let n = assistants.len();

    let mut w = IndentWriter::default();
    w.entry(0, "task", task);

    for (i, am) in assistants.iter().take(n.saturating_sub(1)).enumerate() {
        w.line(0, &format!("step: (turn={})", i + 1));
        let title = am.text_content();
        if !title.is_empty() {
            w.entry(1, "title", &title);
        }
        for tc in am.tool_calls() {
            w.line(1, "tool-call:");
            w.entry(2, "name", &tc.name);
            if let Some(args) = tc.arguments.as_object() {
                if !args.is_empty() {
                    w.line(2, "arguments:");
                    for (k, v) in args {
                        w.entry(3, k, &v.to_string());
                    }
                }
            }
            if let Some(result) = &tc.result {
                for (category, content) in history_entries(result.meta.as_ref()) {
                    w.entry(1, &category, &content);
                }
            }
        }
        if let Some(err) = &am.tool_error {
            w.entry(1, "error", err);
        }
    }

    // Per-result state, merged in turn order.  State from the last assistant
    // message is excluded: that message is retained verbatim, so repeating
    // its state here would duplicate it.
    let mut combined: BTreeMap<String, String> = BTreeMap::new();
    for am in assistants.iter().take(n.saturating_sub(1)) {
        for tc in am.tool_calls() {
            if let Some(result) = &tc.result {
                for (name, content) in state_entries(result.meta.as_ref()) {
                    combined.insert(name, content);
                }
            }
        }
    }
    for (name, content) in &combined {
        if content.contains('\n') {
            w.line(0, &format!("state: (name={name})"));
            w.line(1, content);
        } else {
            w.line(0, &format!("state: (name={name}) {content}"));
        }
    }

    Summarized {
        summary: w.finish(),
        last_message: assistants.last().map(|am| (*am).clone()),
    }
}

fn history_entries(meta: Option<&serde_json::Map<String, Value>>) -> Vec<(String, String)> {
    let Some(entries) = meta.and_then(|m| m.get(META_HISTORY)).and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|e| {
            let category = e.get("category")?.as_str()?.to_string();
            let content = value_text(e.get("content")?);
            Some((category, content))
        })
        .collect()
}

fn state_entries(meta: Option<&serde_json::Map<String, Value>>) -> Vec<(String, String)> {
    let Some(state) = meta.and_then(|m| m.get(META_STATE)).and_then(Value::as_object) else {
        return Vec::new();
    };
    state.iter().map(|(k, v)| (k.clone(), value_text(v))).collect()
}

/// Strings render bare; everything else as compact JSON.
fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─── Indented markup ──────────────────────────────────────────────────────────

/// Two spaces per nesting level; multi-line values are indented uniformly
/// one level below their label.
#[derive(Default)]
struct IndentWriter {
    out: String,
}

impl IndentWriter {
    fn line(&mut self, depth: usize, text: &str) {
        for l in text.split('\n') {
            for _ in 0..depth {
                self.out.push_str("  ");
            }
            self.out.push_str(l);
            self.out.push('\n');
        }
    }

    fn entry(&mut self, depth: usize, label: &str, value: &str) {
        if value.contains('\n') {
            self.line(depth, &format!("{label}:"));
            self.line(depth + 1, value);
        } else {
            self.line(depth, &format!("{label}: {value}"));
        }
    }

    fn finish(self) -> String {
        self.out
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
