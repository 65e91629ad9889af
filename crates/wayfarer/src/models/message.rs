use super::content::{join_text, Content, TextContent};
use super::role::Role;
use super::tool::ToolCall;
use crate::errors::AgentResult;
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub tool_call: AgentResult<ToolCall>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub tool_result: AgentResult<Vec<Content>>,
}

impl ToolResponse {
    /// The text the requester sees for this response, including errors
    pub fn observation(&self) -> String {
        match &self.tool_result {
            Ok(contents) => join_text(contents),
            Err(e) => format!("The tool call returned the following error:\n{}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
/// Content passed inside a message, which can be both simple content and tool content
pub enum MessageContent {
    Text(TextContent),
    ToolRequest(ToolRequest),
    ToolResponse(ToolResponse),
}

impl MessageContent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        MessageContent::Text(TextContent { text: text.into() })
    }

    pub fn tool_request<S: Into<String>>(id: S, tool_call: AgentResult<ToolCall>) -> Self {
        MessageContent::ToolRequest(ToolRequest {
            id: id.into(),
            tool_call,
        })
    }

    pub fn tool_response<S: Into<String>>(id: S, tool_result: AgentResult<Vec<Content>>) -> Self {
        MessageContent::ToolResponse(ToolResponse {
            id: id.into(),
            tool_result,
        })
    }

    pub fn as_tool_request(&self) -> Option<&ToolRequest> {
        if let MessageContent::ToolRequest(ref tool_request) = self {
            Some(tool_request)
        } else {
            None
        }
    }

    pub fn as_tool_response(&self) -> Option<&ToolResponse> {
        if let MessageContent::ToolResponse(ref tool_response) = self {
            Some(tool_response)
        } else {
            None
        }
    }

    /// Get the text content if this is a TextContent variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(&text.text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
/// A message in a conversation, to or from an LLM
pub struct Message {
    pub role: Role,
    pub created: i64,
    pub content: Vec<MessageContent>,
    /// Structured end-of-conversation signal, checked alongside the text sentinel
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub terminate: bool,
}

impl Message {
    fn new(role: Role) -> Self {
        Message {
            role,
            created: Utc::now().timestamp(),
            content: Vec::new(),
            terminate: false,
        }
    }

    /// Create a new requester message with the current timestamp
    pub fn requester() -> Self {
        Self::new(Role::Requester)
    }

    /// Create a new executor message with the current timestamp
    pub fn executor() -> Self {
        Self::new(Role::Executor)
    }

    /// Create a new tool result message with the current timestamp
    pub fn tool_result() -> Self {
        Self::new(Role::ToolResult)
    }

    /// Add any MessageContent to the message
    pub fn with_content(mut self, content: MessageContent) -> Self {
        self.content.push(content);
        self
    }

    /// Add text content to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(MessageContent::text(text))
    }

    /// Add a tool request to the message
    pub fn with_tool_request<S: Into<String>>(
        self,
        id: S,
        tool_call: AgentResult<ToolCall>,
    ) -> Self {
        self.with_content(MessageContent::tool_request(id, tool_call))
    }

    /// Add a tool response to the message
    pub fn with_tool_response<S: Into<String>>(
        self,
        id: S,
        result: AgentResult<Vec<Content>>,
    ) -> Self {
        self.with_content(MessageContent::tool_response(id, result))
    }

    /// Mark the message as the last one of the conversation
    pub fn with_termination(mut self) -> Self {
        self.terminate = true;
        self
    }

    /// All the text content of the message joined by newlines
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(MessageContent::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_requests(&self) -> Vec<&ToolRequest> {
        self.content
            .iter()
            .filter_map(MessageContent::as_tool_request)
            .collect()
    }

    pub fn tool_responses(&self) -> Vec<&ToolResponse> {
        self.content
            .iter()
            .filter_map(MessageContent::as_tool_response)
            .collect()
    }

    pub fn has_tool_request(&self) -> bool {
        self.content
            .iter()
            .any(|c| matches!(c, MessageContent::ToolRequest(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AgentError;
    use serde_json::json;

    #[test]
    fn test_text_joins_all_text_content() {
        let message = Message::requester()
            .with_text("Thought: check the weather")
            .with_tool_request(
                "1",
                Ok(ToolCall::new("get_weather_info", json!({"destination": "Goa"}))),
            )
            .with_text("Action: get_weather_info");

        assert_eq!(
            message.text(),
            "Thought: check the weather\nAction: get_weather_info"
        );
        assert!(message.has_tool_request());
        assert_eq!(message.tool_requests().len(), 1);
    }

    #[test]
    fn test_error_observation_is_visible() {
        let message = Message::tool_result().with_tool_response(
            "1",
            Err(AgentError::ExecutionError("connection refused".into())),
        );

        let responses = message.tool_responses();
        assert_eq!(responses.len(), 1);
        assert!(responses[0].observation().contains("connection refused"));
    }

    #[test]
    fn test_terminate_flag_skipped_when_unset() -> serde_json::Result<()> {
        let plain = serde_json::to_value(Message::executor().with_text("hi"))?;
        assert!(plain.get("terminate").is_none());

        let flagged = serde_json::to_value(Message::requester().with_termination())?;
        assert_eq!(flagged["terminate"], json!(true));

        let back: Message = serde_json::from_value(plain)?;
        assert!(!back.terminate);
        Ok(())
    }
}
