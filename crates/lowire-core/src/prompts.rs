// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use lowire_model::Tool;
use serde_json::{json, Value};

/// Fixed agent preamble used as the system prompt for every run.
pub const AGENT_PREAMBLE: &str = "\
You are an autonomous agent that completes the user's task by calling the \
provided tools. Work step by step: pick the single most useful tool call, \
inspect its result, and continue until the task is done. When the task is \
complete, call the \"report_result\" tool exactly once with the final answer \
matching its schema. Do not ask the user questions; recover from tool errors \
on your own whenever possible.";

/// Name of the distinguished tool whose arguments become the run's result.
pub const REPORT_RESULT: &str = "report_result";

/// Default `report_result` input schema when the caller supplies none.
pub fn default_result_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "result": { "type": "string" } },
        "required": ["result"],
    })
}

/// Build the `report_result` tool appended to the user's tool list.
pub fn report_result_tool(result_schema: Option<Value>) -> Tool {
    Tool::new(
        REPORT_RESULT,
        "Report the final result of the task. Call this exactly once, when the task is complete.",
        result_schema.unwrap_or_else(default_result_schema),
    )
}
