// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool-schema sanitisation applied before a request is built.
//!
//! [`strip_additional_properties`] removes every `additionalProperties` key at
//! any depth — Gemini rejects schemas that carry it.  [`inject_intent_property`]
//! adds the `_intent` string property the Copilot adapter uses to force the
//! model's narration into the tool call arguments.

use serde_json::Value;

/// Recursively copy `schema`, dropping any `additionalProperties` key.
pub fn strip_additional_properties(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let stripped = map
                .iter()
                .filter(|(k, _)| k.as_str() != "additionalProperties")
                .map(|(k, v)| (k.clone(), strip_additional_properties(v)))
                .collect();
            Value::Object(stripped)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(strip_additional_properties).collect())
        }
        other => other.clone(),
    }
}

/// Description attached to the injected `_intent` property.  Phrased so the
/// model narrates into the argument instead of emitting a bare text reply.
const INTENT_DESCRIPTION: &str =
    "One short sentence describing what you are doing and why you are calling this tool.";

/// Copy `schema` with an `_intent` string property added to `properties`.
///
/// The schema is assumed to be an object fragment; anything else is returned
/// unchanged.  An existing `_intent` property is left alone.
pub fn inject_intent_property(schema: &Value) -> Value {
    let mut out = schema.clone();
    if let Some(map) = out.as_object_mut() {
        let props = map
            .entry("properties")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(props) = props.as_object_mut() {
            props.entry("_intent").or_insert_with(|| {
                serde_json::json!({ "type": "string", "description": INTENT_DESCRIPTION })
            });
        }
    }
    out
}

// ─── Tests ────────────────────────────────────────────────────────────────────
