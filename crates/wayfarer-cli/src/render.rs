use anyhow::Result;
use bat::WrappingMode;
use console::style;
use serde_json::Value;

use wayfarer::conversation::{ChatResult, TerminationReason};
use wayfarer::models::message::{Message, MessageContent, ToolRequest, ToolResponse};
use wayfarer::models::role::Role;

const MAX_STRING_LENGTH: usize = 60;
const MAX_OBSERVATION_LENGTH: usize = 1200;
const INDENT: &str = "    ";

/// Print one message of the transcript with its speaker
pub fn render_message(message: &Message, requester: &str, executor: &str) {
    let speaker = match message.role {
        Role::Requester => style(requester).cyan().bold(),
        Role::Executor => style(executor).green().bold(),
        Role::ToolResult => style("tool").magenta().bold(),
    };

    for content in &message.content {
        match content {
            MessageContent::Text(text) if text.text.trim().is_empty() => {}
            MessageContent::Text(text) => {
                println!("{} {}", speaker, style("›").dim());
                println!("{}\n", text.text.trim_end());
            }
            MessageContent::ToolRequest(request) => render_request(request),
            MessageContent::ToolResponse(response) => render_response(response),
        }
    }
}

fn render_request(request: &ToolRequest) {
    match &request.tool_call {
        Ok(call) => {
            println!(
                "─── {} | {} ──────────────────────────",
                style(&call.name),
                style(&request.id).magenta().dim(),
            );
            print_params(&call.arguments, 0);
            println!();
        }
        Err(e) => println!("{} {}\n", style("invalid tool call:").red(), e),
    }
}

fn render_response(response: &ToolResponse) {
    let observation = response.observation();
    let shown = truncate(&observation, MAX_OBSERVATION_LENGTH);
    match &response.tool_result {
        Ok(_) => println!("{}\n{}\n", style("observation").dim(), shown),
        Err(_) => println!("{}\n{}\n", style("observation").red(), style(shown).red()),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{}… [{} chars]", head, text.chars().count())
    }
}

/// Format and print parameters recursively with indentation and colors
fn print_params(value: &Value, depth: usize) {
    let indent = INDENT.repeat(depth);

    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::Object(_) | Value::Array(_) => {
                        println!("{}{}:", indent, style(key).dim());
                        print_params(val, depth + 1);
                    }
                    Value::String(s) => println!(
                        "{}{}: {}",
                        indent,
                        style(key).dim(),
                        style(truncate(s, MAX_STRING_LENGTH)).green()
                    ),
                    other => println!("{}{}: {}", indent, style(key).dim(), style(other).blue()),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(s) => {
                        println!("{}- {}", indent, style(truncate(s, MAX_STRING_LENGTH)).green())
                    }
                    other => {
                        println!("{}-", indent);
                        print_params(other, depth + 1);
                    }
                }
            }
        }
        Value::String(s) => println!("{}{}", indent, style(truncate(s, MAX_STRING_LENGTH)).green()),
        other => println!("{}{}", indent, style(other).yellow()),
    }
}

pub fn render_outcome(result: &ChatResult) {
    let reason = match result.reason {
        TerminationReason::Sentinel => "the planner replied TERMINATE",
        TerminationReason::Flag => "the planner ended the conversation",
        TerminationReason::TurnLimit => "the turn limit was reached",
    };
    println!(
        "{}",
        style(format!(
            "Conversation ended after {} turns: {}",
            result.turns, reason
        ))
        .dim()
    );
    if let Some(total) = result.usage.total_tokens {
        println!("{}", style(format!("Tokens used: {}", total)).dim());
    }
    println!();
}

pub fn print_markdown(content: &str) -> Result<()> {
    bat::PrettyPrinter::new()
        .input(bat::Input::from_bytes(content.as_bytes()))
        .language("Markdown")
        .wrapping_mode(WrappingMode::Character)
        .print()?;
    println!();
    Ok(())
}
