//! Runs fenced code blocks from requester messages in a local working directory.

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use crate::errors::{AgentError, AgentResult};

lazy_static! {
    static ref CODE_BLOCK: Regex =
        Regex::new(r"(?s)```[ \t]*([\w+-]*)[ \t]*\r?\n(.*?)\r?\n[ \t]*```").unwrap();
}

const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: String,
    pub code: String,
}

impl CodeBlock {
    pub fn new<L: Into<String>, C: Into<String>>(language: L, code: C) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
        }
    }
}

/// Fenced code blocks in order of appearance. Unlabelled blocks are treated as python.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    CODE_BLOCK
        .captures_iter(text)
        .map(|caps| {
            let language = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let language = if language.is_empty() {
                "python".to_string()
            } else {
                language.to_lowercase()
            };
            CodeBlock::new(language, &caps[2])
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeResult {
    pub exit_code: i32,
    pub output: String,
}

impl CodeResult {
    /// The reply the executor sends back to the requester
    pub fn reply(&self) -> String {
        let status = if self.exit_code == 0 {
            "execution succeeded"
        } else {
            "execution failed"
        };
        format!(
            "exitcode: {} ({})\nCode output: {}",
            self.exit_code, status, self.output
        )
    }
}

pub struct LocalCommandExecutor {
    work_dir: PathBuf,
    timeout: Duration,
}

impl LocalCommandExecutor {
    pub fn new<P: Into<PathBuf>>(work_dir: P, timeout: Duration) -> Self {
        Self {
            work_dir: work_dir.into(),
            timeout,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Run the blocks in order, stopping at the first one that fails
    pub async fn execute(&self, blocks: &[CodeBlock]) -> AgentResult<CodeResult> {
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let mut outputs = Vec::new();
        for block in blocks {
            let Some((program, extension)) = interpreter(&block.language) else {
                outputs.push(format!("unknown language {}", block.language));
                return Ok(CodeResult {
                    exit_code: 1,
                    output: outputs.join("\n"),
                });
            };

            let digest = Sha256::digest(block.code.as_bytes());
            let file_name = format!("tmp_code_{:x}.{}", digest, extension);
            tokio::fs::write(self.work_dir.join(&file_name), &block.code).await?;

            info!(language = %block.language, file = %file_name, "executing code block");
            let (exit_code, output) = self.run(program, &file_name).await?;
            outputs.push(output);
            if exit_code != 0 {
                return Ok(CodeResult {
                    exit_code,
                    output: outputs.join("\n"),
                });
            }
        }

        Ok(CodeResult {
            exit_code: 0,
            output: outputs.join("\n"),
        })
    }

    async fn run(&self, program: &str, file_name: &str) -> AgentResult<(i32, String)> {
        let child = Command::new(program)
            .arg(file_name)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AgentError::ExecutionError(format!("Failed to start {}: {}", program, e))
            })?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => {
                let output = result?;
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                Ok((output.status.code().unwrap_or(1), text))
            }
            Err(_) => {
                warn!(file = %file_name, "code execution timed out");
                Ok((TIMEOUT_EXIT_CODE, "Timeout".to_string()))
            }
        }
    }
}

fn interpreter(language: &str) -> Option<(&'static str, &'static str)> {
    match language {
        "python" | "py" | "python3" => Some(("python3", "py")),
        "sh" | "bash" | "shell" | "console" => Some(("sh", "sh")),
        _ => None,
    }
}
