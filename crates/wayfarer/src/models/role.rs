use serde::{Deserialize, Serialize};

/// The speaker of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Proposes actions and tool calls, backed by the language model
    Requester,
    /// Runs tool calls and code, and replies on behalf of the user
    Executor,
    /// Carries the outputs of dispatched tool calls
    ToolResult,
}
