use anyhow::{anyhow, Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Response, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

use crate::errors::AgentError;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

use super::base::Usage;

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    static ref VALID_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Convert internal Message format to OpenAI's API message specification
///
/// Requester messages become `assistant` turns, executor messages become `user`
/// turns, and every tool response becomes its own `tool` message. Requests that
/// could not be parsed never reach the API as tool calls, so their responses are
/// sent back as plain user text.
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();
    let mut sent_call_ids: HashSet<String> = HashSet::new();

    for message in messages {
        match message.role {
            Role::Requester | Role::Executor => {
                let role = if message.role == Role::Requester {
                    "assistant"
                } else {
                    "user"
                };
                let mut converted = Map::new();
                converted.insert("role".to_string(), json!(role));

                let text = message.text();
                if !text.is_empty() {
                    converted.insert("content".to_string(), json!(text));
                }

                let mut tool_calls = Vec::new();
                for content in &message.content {
                    if let MessageContent::ToolRequest(request) = content {
                        if let Ok(tool_call) = &request.tool_call {
                            sent_call_ids.insert(request.id.clone());
                            tool_calls.push(json!({
                                "id": request.id,
                                "type": "function",
                                "function": {
                                    "name": sanitize_function_name(&tool_call.name),
                                    "arguments": tool_call.arguments.to_string(),
                                }
                            }));
                        }
                    }
                }
                if !tool_calls.is_empty() {
                    converted.insert("tool_calls".to_string(), json!(tool_calls));
                }

                if converted.contains_key("content") || converted.contains_key("tool_calls") {
                    messages_spec.push(Value::Object(converted));
                }
            }
            Role::ToolResult => {
                for response in message.tool_responses() {
                    if sent_call_ids.contains(&response.id) {
                        messages_spec.push(json!({
                            "role": "tool",
                            "content": response.observation(),
                            "tool_call_id": response.id
                        }));
                    } else {
                        messages_spec.push(json!({
                            "role": "user",
                            "content": response.observation(),
                        }));
                    }
                }
            }
        }
    }

    messages_spec
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema(),
            }
        }));
    }

    Ok(result)
}

/// Build a chat completions payload shared by the OpenAI-compatible backends
pub fn create_request(
    model: Option<&str>,
    system: &str,
    messages: &[Message],
    tools: &[Tool],
    temperature: Option<f32>,
    max_tokens: Option<i32>,
) -> Result<Value> {
    let mut messages_array = vec![json!({
        "role": "system",
        "content": system
    })];
    messages_array.extend(messages_to_openai_spec(messages));

    let mut payload = Map::new();
    if let Some(model) = model {
        payload.insert("model".to_string(), json!(model));
    }
    payload.insert("messages".to_string(), json!(messages_array));

    if !tools.is_empty() {
        payload.insert("tools".to_string(), json!(tools_to_openai_spec(tools)?));
    }
    if let Some(temp) = temperature {
        payload.insert("temperature".to_string(), json!(temp));
    }
    if let Some(tokens) = max_tokens {
        payload.insert("max_tokens".to_string(), json!(tokens));
    }

    Ok(Value::Object(payload))
}

/// Convert OpenAI's API response to internal Message format
pub fn openai_response_to_message(response: Value) -> Result<Message> {
    let original = response["choices"][0]["message"].clone();
    if original.is_null() {
        return Err(anyhow!("Response contained no choices: {}", response));
    }
    let mut message = Message::requester();

    if let Some(text) = original.get("content").and_then(|t| t.as_str()) {
        message = message.with_text(text);
    }

    if let Some(tool_calls_array) = original.get("tool_calls").and_then(|t| t.as_array()) {
        for tool_call in tool_calls_array {
            let id = tool_call["id"].as_str().unwrap_or_default().to_string();
            let function_name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default()
                .to_string();

            if !is_valid_function_name(&function_name) {
                let error = AgentError::ToolNotFound(format!(
                    "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
                    function_name
                ));
                message = message.with_tool_request(id, Err(error));
                continue;
            }

            // Some deployments send an empty string for calls without arguments
            let parsed = if arguments.trim().is_empty() {
                Ok(json!({}))
            } else {
                serde_json::from_str::<Value>(&arguments)
            };
            match parsed {
                Ok(params) => {
                    message =
                        message.with_tool_request(id, Ok(ToolCall::new(&function_name, params)));
                }
                Err(e) => {
                    let error = AgentError::InvalidParameters(format!(
                        "Could not interpret tool use parameters for id {}: {}",
                        id, e
                    ));
                    message = message.with_tool_request(id, Err(error));
                }
            }
        }
    }

    Ok(message)
}

pub fn get_openai_usage(data: &Value) -> Result<Usage> {
    let usage = data
        .get("usage")
        .ok_or_else(|| anyhow!("No usage data in response"))?;

    let input_tokens = usage
        .get("prompt_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);

    let output_tokens = usage
        .get("completion_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);

    let total_tokens = usage
        .get("total_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32)
        .or_else(|| match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });

    Ok(Usage::new(input_tokens, output_tokens, total_tokens))
}

/// Turn a chat completions HTTP response into its JSON body or a descriptive error
pub async fn handle_response(payload: &Value, response: Response) -> Result<Value> {
    match response.status() {
        StatusCode::OK => Ok(response.json().await?),
        status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
            Err(anyhow!("Server error: {}", status))
        }
        status => {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            if let Some(error) = body.get("error") {
                if let Some(err) = check_openai_context_length_error(error) {
                    return Err(err.into());
                }
            }
            Err(anyhow!(
                "Request failed: {}\nResponse: {}\nPayload: {}",
                status,
                body,
                payload
            ))
        }
    }
}

/// Parse the `data[].embedding` arrays of an embeddings response
pub fn openai_embeddings(response: &Value) -> Result<Vec<Vec<f32>>> {
    let data = response
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("No data in embeddings response"))?;

    data.iter()
        .map(|item| {
            item.get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| anyhow!("Embedding item without vector"))
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_f64())
                        .map(|v| v as f32)
                        .collect()
                })
        })
        .collect()
}

fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

fn is_valid_function_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_openai_context_length_error(error: &Value) -> Option<Error> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message).into())
    } else {
        None
    }
}
