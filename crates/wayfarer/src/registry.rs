use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

lazy_static! {
    static ref TOOL_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// The implementation behind a registered tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with arguments that already passed the registry's required-parameter check
    async fn call(&self, arguments: Value) -> AgentResult<Vec<Content>>;
}

/// Which agent may request a tool and which agent runs it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBinding {
    pub caller: String,
    pub executor: String,
}

impl ToolBinding {
    pub fn new<C: Into<String>, E: Into<String>>(caller: C, executor: E) -> Self {
        Self {
            caller: caller.into(),
            executor: executor.into(),
        }
    }
}

struct RegisteredTool {
    tool: Tool,
    handler: Arc<dyn ToolHandler>,
    binding: ToolBinding,
}

/// Maps tool names to their handlers. Built once at startup, read-only afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<RegisteredTool>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, failing if the name is already taken
    pub fn register(
        &mut self,
        tool: Tool,
        handler: Arc<dyn ToolHandler>,
        binding: ToolBinding,
    ) -> AgentResult<()> {
        if !TOOL_NAME.is_match(&tool.name) {
            return Err(AgentError::InvalidParameters(format!(
                "The tool name '{}' must match [a-zA-Z0-9_-]+",
                tool.name
            )));
        }
        if self.by_name.contains_key(&tool.name) {
            return Err(AgentError::DuplicateTool(tool.name));
        }

        debug!(
            tool = %tool.name,
            caller = %binding.caller,
            executor = %binding.executor,
            "registered tool"
        );
        self.by_name.insert(tool.name.clone(), self.entries.len());
        self.entries.push(RegisteredTool {
            tool,
            handler,
            binding,
        });
        Ok(())
    }

    /// Tool definitions in registration order
    pub fn tools(&self) -> Vec<Tool> {
        self.entries.iter().map(|e| e.tool.clone()).collect()
    }

    /// Tool definitions a given caller is allowed to request
    pub fn tools_for(&self, caller: &str) -> Vec<Tool> {
        self.entries
            .iter()
            .filter(|e| e.binding.caller == caller)
            .map(|e| e.tool.clone())
            .collect()
    }

    pub fn binding(&self, name: &str) -> Option<&ToolBinding> {
        self.by_name.get(name).map(|&i| &self.entries[i].binding)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Route a tool call to its handler
    pub async fn dispatch(&self, call: &ToolCall) -> AgentResult<Vec<Content>> {
        let entry = self
            .by_name
            .get(&call.name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;

        check_arguments(&entry.tool, &call.arguments)?;

        info!(tool = %call.name, executor = %entry.binding.executor, "dispatching tool call");
        entry.handler.call(call.arguments.clone()).await
    }
}

fn check_arguments(tool: &Tool, arguments: &Value) -> AgentResult<()> {
    let object = arguments.as_object().ok_or_else(|| {
        AgentError::InvalidParameters(format!(
            "Arguments for '{}' must be a JSON object",
            tool.name
        ))
    })?;

    for parameter in tool.parameters.iter().filter(|p| p.required) {
        match object.get(&parameter.name) {
            None | Some(Value::Null) => {
                return Err(AgentError::InvalidParameters(format!(
                    "Missing required parameter '{}' for '{}'",
                    parameter.name, tool.name
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}
