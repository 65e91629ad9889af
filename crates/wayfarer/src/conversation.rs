//! The bounded requester/executor message loop.
//!
//! The requester is a model-backed [`Agent`]. The executor answers each requester
//! message: it dispatches tool calls through the [`ToolRegistry`], runs fenced code
//! blocks when a [`LocalCommandExecutor`] is attached, and otherwise sends the
//! configured default reply. The loop stops when the latest message carries the
//! termination sentinel or flag, or when the turn budget is spent.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::code_executor::{extract_code_blocks, LocalCommandExecutor};
use crate::errors::AgentError;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::prompt_template::load_prompt_file;
use crate::providers::base::Usage;
use crate::registry::ToolRegistry;

pub const TERMINATE: &str = "TERMINATE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Running,
    AwaitingTool,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMethod {
    LastMessage,
    ReflectionWithLlm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The latest message ended with the TERMINATE sentinel
    Sentinel,
    /// The latest message carried the structured termination flag
    Flag,
    TurnLimit,
}

#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub max_turns: usize,
    pub summary_method: SummaryMethod,
    pub default_auto_reply: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            summary_method: SummaryMethod::ReflectionWithLlm,
            default_auto_reply: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatResult {
    pub messages: Vec<Message>,
    /// Every state the controller entered, in order
    pub states: Vec<ConversationState>,
    pub summary: String,
    pub reason: TerminationReason,
    pub turns: usize,
    pub usage: Usage,
}

/// Why a message ends the conversation, if it does
pub fn termination_reason(message: &Message) -> Option<TerminationReason> {
    if message.terminate {
        Some(TerminationReason::Flag)
    } else if message.text().trim_end().ends_with(TERMINATE) {
        Some(TerminationReason::Sentinel)
    } else {
        None
    }
}

#[derive(Serialize)]
struct TranscriptEntry {
    speaker: String,
    text: String,
}

pub struct Conversation {
    requester: Agent,
    executor_name: String,
    registry: Arc<ToolRegistry>,
    code_executor: Option<Arc<LocalCommandExecutor>>,
    config: ConversationConfig,
    messages: Vec<Message>,
    turns: usize,
    states: Vec<ConversationState>,
    usage: Usage,
}

impl Conversation {
    pub fn new<E: Into<String>>(
        requester: Agent,
        executor_name: E,
        registry: Arc<ToolRegistry>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            requester,
            executor_name: executor_name.into(),
            registry,
            code_executor: None,
            config,
            messages: Vec::new(),
            turns: 0,
            states: Vec::new(),
            usage: Usage::default(),
        }
    }

    /// Let the executor run fenced code blocks found in requester replies
    pub fn with_code_executor(mut self, executor: Arc<LocalCommandExecutor>) -> Self {
        self.code_executor = Some(executor);
        self
    }

    /// Run the loop to completion starting from the executor's prompt
    pub async fn run(mut self, prompt: &str) -> Result<ChatResult> {
        info!(agent = %self.requester.name(), max_turns = self.config.max_turns, "starting conversation");
        self.messages.push(Message::executor().with_text(prompt));
        self.enter(ConversationState::Running);

        let tools = self.registry.tools_for(self.requester.name());
        let reason = loop {
            if let Some(reason) = self.messages.last().and_then(termination_reason) {
                break reason;
            }
            if self.turns >= self.config.max_turns {
                break TerminationReason::TurnLimit;
            }

            let (reply, usage) = self
                .requester
                .provider()
                .complete(self.requester.system_prompt(), &self.messages, &tools)
                .await?;
            self.turns += 1;
            self.usage.add(&usage);
            debug!(turn = self.turns, "requester replied");

            let has_tool_request = reply.has_tool_request();
            let terminating = termination_reason(&reply).is_some();
            self.messages.push(reply);

            if terminating {
                continue;
            }
            if has_tool_request {
                self.enter(ConversationState::AwaitingTool);
                let response = self.dispatch_tool_requests().await;
                self.messages.push(response);
                self.enter(ConversationState::Running);
            } else {
                let answer = self.auto_reply().await;
                self.messages.push(Message::executor().with_text(answer));
            }
        };

        self.enter(ConversationState::Terminated);
        info!(turns = self.turns, reason = ?reason, "conversation terminated");

        let summary = self.summarize().await;
        Ok(ChatResult {
            messages: self.messages,
            states: self.states,
            summary,
            reason,
            turns: self.turns,
            usage: self.usage,
        })
    }

    fn enter(&mut self, state: ConversationState) {
        debug!(state = ?state, turn = self.turns, "conversation state");
        self.states.push(state);
    }

    // Run every tool request of the latest message in order
    async fn dispatch_tool_requests(&self) -> Message {
        let mut response = Message::tool_result();
        let requests: Vec<_> = self
            .messages
            .last()
            .map(|m| m.tool_requests().into_iter().cloned().collect())
            .unwrap_or_default();

        for request in requests {
            let result = match &request.tool_call {
                Ok(call) => {
                    let allowed = self
                        .registry
                        .binding(&call.name)
                        .map(|b| b.caller == self.requester.name())
                        .unwrap_or(false);
                    if allowed {
                        self.registry.dispatch(call).await
                    } else {
                        Err(AgentError::ToolNotFound(call.name.clone()))
                    }
                }
                Err(e) => Err(e.clone()),
            };
            if let Err(e) = &result {
                warn!(id = %request.id, error = %e, "tool call failed");
            }
            response = response.with_tool_response(request.id.clone(), result);
        }
        response
    }

    async fn auto_reply(&self) -> String {
        let Some(executor) = &self.code_executor else {
            return self.config.default_auto_reply.clone();
        };
        let text = self.messages.last().map(Message::text).unwrap_or_default();
        let blocks = extract_code_blocks(&text);
        if blocks.is_empty() {
            return self.config.default_auto_reply.clone();
        }
        match executor.execute(&blocks).await {
            Ok(result) => result.reply(),
            Err(e) => format!("exitcode: 1 (execution failed)\nCode output: {}", e),
        }
    }

    async fn summarize(&self) -> String {
        match self.config.summary_method {
            SummaryMethod::LastMessage => self.last_message_summary(),
            SummaryMethod::ReflectionWithLlm => match self.reflect().await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(error = %e, "reflection failed, using the last message as summary");
                    self.last_message_summary()
                }
            },
        }
    }

    fn last_message_summary(&self) -> String {
        self.messages
            .iter()
            .rev()
            .map(Message::text)
            .find(|text| !text.trim().is_empty())
            .map(|text| text.replace(TERMINATE, "").trim().to_string())
            .unwrap_or_default()
    }

    async fn reflect(&self) -> Result<String> {
        let transcript: Vec<TranscriptEntry> = self
            .messages
            .iter()
            .flat_map(|m| self.transcript_entries(m))
            .collect();
        let prompt = load_prompt_file(
            "reflection.md",
            &serde_json::json!({ "transcript": transcript }),
        )?;

        let (reply, _) = self
            .requester
            .provider()
            .complete(
                self.requester.system_prompt(),
                &[Message::executor().with_text(prompt)],
                &[],
            )
            .await?;
        Ok(reply.text().replace(TERMINATE, "").trim().to_string())
    }

    fn transcript_entries(&self, message: &Message) -> Vec<TranscriptEntry> {
        let speaker = match message.role {
            Role::Requester => self.requester.name().to_string(),
            Role::Executor => self.executor_name.clone(),
            Role::ToolResult => "tool".to_string(),
        };
        message
            .content
            .iter()
            .filter_map(|content| {
                let text = match content {
                    MessageContent::Text(t) if !t.text.trim().is_empty() => t.text.clone(),
                    MessageContent::Text(_) => return None,
                    MessageContent::ToolRequest(request) => match &request.tool_call {
                        Ok(call) => format!("calls {}({})", call.name, call.arguments),
                        Err(e) => format!("invalid tool call: {}", e),
                    },
                    MessageContent::ToolResponse(response) => response.observation(),
                };
                Some(TranscriptEntry {
                    speaker: speaker.clone(),
                    text,
                })
            })
            .collect()
    }
}
