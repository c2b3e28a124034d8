// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use lowire_model::{
    CompleteOptions, ContentPart, Conversation, Message, Provider, Tool, ToolResult, Usage,
};

use crate::{
    error::LoopError,
    hooks::{HookAction, Hooks, NoHooks, ToolVote},
    prompts::{report_result_tool, AGENT_PREAMBLE, REPORT_RESULT},
    replay::{cached_complete, Caches},
    summary::summarize,
    tools::{ToolCallRequest, ToolDispatcher, META_INTENT},
};

/// Nudge attached to an assistant message that contained no tool call.
pub const TOOL_CALL_EXPECTED: &str = "Error: tool call is expected in every assistant message. \
     Call \"report_result\" when complete.";

const TOOL_CALL_DISALLOWED: &str = "Tool call is disallowed.";
const TOOL_RESULT_DISALLOWED: &str = "Tool result is disallowed to be reported.";

const DEFAULT_MAX_TURNS: u32 = 100;

/// Provider-level options fixed for the lifetime of a [`Loop`].
#[derive(Debug, Clone, Default)]
pub struct LoopOptions {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub reasoning: bool,
    pub debug: bool,
}

/// Per-run options.
pub struct RunOptions {
    /// User tools; `report_result` is appended automatically.
    pub tools: Vec<Tool>,
    pub dispatcher: Option<Arc<dyn ToolDispatcher>>,
    pub hooks: Option<Arc<dyn Hooks>>,
    pub max_turns: u32,
    /// Input schema for `report_result`; a `{result: string}` object when
    /// unset.
    pub result_schema: Option<Value>,
    /// Hard token budget for the whole run (input + output).
    pub budget_tokens: Option<u64>,
    /// Compress prior turns into a rendered summary before each provider
    /// call, keeping only the latest assistant message verbatim.
    pub summarize: bool,
    pub caches: Option<Caches>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            tools: Vec::new(),
            dispatcher: None,
            hooks: None,
            max_turns: DEFAULT_MAX_TURNS,
            result_schema: None,
            budget_tokens: None,
            summarize: false,
            caches: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Ok,
    /// A hook voted `Break`.
    Break,
}

/// Outcome of one `run`.  `caches` hands the (possibly grown) replay cache
/// back to the caller for persistence.
#[derive(Debug)]
pub struct RunOutcome {
    pub result: Option<Value>,
    pub status: RunStatus,
    pub usage: Usage,
    pub turns: u32,
    pub caches: Option<Caches>,
}

/// The agent loop driver: owns a provider and repeatedly asks it to pick a
/// tool, dispatches the call, feeds the result back, and terminates when the
/// model calls `report_result`.
pub struct Loop {
    provider: Box<dyn Provider>,
    options: LoopOptions,
}

impl Loop {
    /// Construct a loop over a registry provider name (or legacy alias).
    pub fn new(provider_name: &str, options: LoopOptions) -> anyhow::Result<Self> {
        Ok(Self { provider: lowire_model::from_name(provider_name)?, options })
    }

    /// Construct a loop over an explicit provider instance.
    pub fn with_provider(provider: Box<dyn Provider>, options: LoopOptions) -> Self {
        Self { provider, options }
    }

    /// Drive the task to completion.
    ///
    /// Returns `Ok` when the model reports a result or a hook votes `Break`;
    /// fails when the token budget or turn limit is exhausted (unless
    /// `summarize` is set, in which case the turn limit yields the rendered
    /// summary as the result).
    pub async fn run(&self, task: &str, mut run: RunOptions) -> anyhow::Result<RunOutcome> {
        let hooks: Arc<dyn Hooks> = run.hooks.clone().unwrap_or_else(|| Arc::new(NoHooks));
        let mut tools = run.tools.clone();
        tools.push(report_result_tool(run.result_schema.clone()));

        let mut conversation = Conversation {
            system_prompt: AGENT_PREAMBLE.to_string(),
            messages: vec![Message::user(task)],
            tools,
        };
        let mut caches = run.caches.take();
        let mut total = Usage::default();
        let mut remaining: Option<i64> = run.budget_tokens.map(|b| b as i64);

        for turn in 0..run.max_turns {
            if let (Some(budget), Some(rem)) = (run.budget_tokens, remaining) {
                if rem <= 0 {
                    return Err(LoopError::BudgetExhausted(budget).into());
                }
            }

            // Derive the compacted conversation for this call when enabled;
            // the original transcript keeps growing untouched either way.
            let derived;
            let call_conv: &Conversation = if run.summarize {
                let s = summarize(task, &conversation);
                let mut messages = vec![Message::user(s.summary)];
                if let Some(last) = s.last_message {
                    messages.push(Message::Assistant(last));
                }
                derived = Conversation {
                    system_prompt: conversation.system_prompt.clone(),
                    messages,
                    tools: conversation.tools.clone(),
                };
                &derived
            } else {
                &conversation
            };

            let budget_left = remaining.map(|r| r.max(0) as u64);
            if hooks.on_before_turn(call_conv, &total, budget_left).await? == HookAction::Break {
                return Ok(break_outcome(total, turn, caches));
            }

            let opts = CompleteOptions {
                model: self.options.model.clone(),
                max_tokens: match remaining {
                    Some(r) => Some(r.min(u32::MAX as i64) as u32),
                    None => self.options.max_tokens,
                },
                temperature: self.options.temperature,
                reasoning: self.options.reasoning,
                debug: self.options.debug,
            };
            let completion =
                cached_complete(self.provider.as_ref(), call_conv, caches.as_mut(), &opts).await?;

            total.add(completion.usage);
            if let Some(r) = &mut remaining {
                *r -= completion.usage.total() as i64;
            }
            debug!(
                turn,
                input = completion.usage.input,
                output = completion.usage.output,
                "assistant turn received"
            );

            if hooks.on_after_turn(&completion.result, &total).await? == HookAction::Break {
                return Ok(break_outcome(total, turn + 1, caches));
            }

            let mut assistant = completion.result;
            // Companion intent texts, keyed by the tool call they narrate.
            let intents: HashMap<String, String> = assistant
                .content
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text, copilot_tool_call_id: Some(id), .. } => {
                        Some((id.clone(), text.clone()))
                    }
                    _ => None,
                })
                .collect();

            if assistant.tool_calls().next().is_none() {
                warn!(turn, "assistant message contained no tool call");
                assistant.tool_error = Some(TOOL_CALL_EXPECTED.to_string());
                conversation.messages.push(Message::Assistant(assistant));
                continue;
            }
            conversation.messages.push(Message::Assistant(assistant));
            let msg_index = conversation.messages.len() - 1;

            for part_index in tool_call_positions(&conversation, msg_index) {
                let call = tool_call_at(&conversation, msg_index, part_index);

                if call.name == REPORT_RESULT {
                    debug!(turn, "report_result received");
                    return Ok(RunOutcome {
                        result: Some(call.arguments.clone()),
                        status: RunStatus::Ok,
                        usage: total,
                        turns: turn + 1,
                        caches,
                    });
                }

                match hooks.on_before_tool_call(&call).await? {
                    ToolVote::Break => return Ok(break_outcome(total, turn + 1, caches)),
                    ToolVote::Disallow => {
                        attach_result(
                            &mut conversation,
                            msg_index,
                            part_index,
                            ToolResult::error(TOOL_CALL_DISALLOWED),
                        );
                        continue;
                    }
                    ToolVote::Continue => {}
                }

                let mut arguments = call.arguments.clone();
                if let Some(intent) = intents.get(&call.id) {
                    if let Some(obj) = arguments.as_object_mut() {
                        obj.insert("_meta".into(), json!({ META_INTENT: intent }));
                    }
                }
                let request = ToolCallRequest { name: call.name.clone(), arguments };
                let outcome = match &run.dispatcher {
                    Some(d) => d.call_tool(request).await,
                    None => Err(anyhow::anyhow!("no tool callback configured")),
                };

                match outcome {
                    Ok(result) => match hooks.on_after_tool_call(&call, &result).await? {
                        ToolVote::Break => return Ok(break_outcome(total, turn + 1, caches)),
                        ToolVote::Disallow => attach_result(
                            &mut conversation,
                            msg_index,
                            part_index,
                            ToolResult::error(TOOL_RESULT_DISALLOWED),
                        ),
                        ToolVote::Continue => {
                            attach_result(&mut conversation, msg_index, part_index, result)
                        }
                    },
                    Err(err) => {
                        warn!(tool = %call.name, error = %err, "tool execution failed");
                        if hooks.on_tool_call_error(&call, &err).await? == HookAction::Break {
                            return Ok(break_outcome(total, turn + 1, caches));
                        }
                        attach_result(
                            &mut conversation,
                            msg_index,
                            part_index,
                            ToolResult::error(format!(
                                "Error while executing tool \"{}\": {}\n\nPlease try to recover and complete the task.",
                                call.name, err
                            )),
                        );
                    }
                }
            }
        }

        if run.summarize {
            // The rendered summary is the best available account of partial
            // progress; hand it back instead of failing the run.
            let s = summarize(task, &conversation);
            return Ok(RunOutcome {
                result: Some(Value::String(s.summary)),
                status: RunStatus::Ok,
                usage: total,
                turns: run.max_turns,
                caches,
            });
        }
        Err(LoopError::MaxAttemptsReached.into())
    }
}

fn break_outcome(usage: Usage, turns: u32, caches: Option<Caches>) -> RunOutcome {
    RunOutcome { result: None, status: RunStatus::Break, usage, turns, caches }
}

fn tool_call_positions(conversation: &Conversation, msg_index: usize) -> Vec<usize> {
    match &conversation.messages[msg_index] {
        Message::Assistant(am) => am
            .content
            .iter()
            .enumerate()
            .filter(|(_, p)| matches!(p, ContentPart::ToolCall(_)))
            .map(|(i, _)| i)
            .collect(),
        _ => Vec::new(),
    }
}

fn tool_call_at(
    conversation: &Conversation,
    msg_index: usize,
    part_index: usize,
) -> lowire_model::ToolCallPart {
    match &conversation.messages[msg_index] {
        Message::Assistant(am) => match &am.content[part_index] {
            ContentPart::ToolCall(tc) => tc.clone(),
            _ => unreachable!("position computed from tool_call parts"),
        },
        _ => unreachable!("msg_index points at the appended assistant message"),
    }
}

/// Attach the result onto the originating tool_call part.  The single
/// mutation a message undergoes after being appended.
fn attach_result(
    conversation: &mut Conversation,
    msg_index: usize,
    part_index: usize,
    result: ToolResult,
) {
    if let Some(Message::Assistant(am)) = conversation.messages.get_mut(msg_index) {
        if let Some(ContentPart::ToolCall(tc)) = am.content.get_mut(part_index) {
            tc.result = Some(result);
        }
    }
}
