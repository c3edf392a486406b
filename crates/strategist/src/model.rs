// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The model seam.
//!
//! Providers are out of scope; the orchestrator sees only this trait. One
//! [`LanguageModel::step`] call is one generate round — the provider may
//! stream internally, but the orchestrator acts on complete rounds. Every
//! step honours the cancellation token rooted at the owning player.

use std::ops::AddAssign;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::StrategistError;

/// One message in a model conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ModelMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        call_id: String,
        tool: String,
        content: Value,
    },
}

/// A tool invocation the model asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool: String,
    pub arguments: Value,
}

/// A tool the model may call, schema already stripped of auto-complete
/// fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    Required,
    None,
}

/// Token counts for one step; accumulated on the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Input to one generate round.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: ToolChoice,
}

/// Output of one generate round: text, optional reasoning, and the tool
/// calls to run before the next round.
#[derive(Debug, Clone, Default)]
pub struct ModelStep {
    pub text: String,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn step(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<ModelStep, StrategistError>;
}

/// Adapter for an external model runner: the request goes to the
/// configured command as JSON on stdin, one [`ModelStep`]-shaped JSON
/// object comes back on stdout. Provider SDKs stay outside this
/// repository; anything that can speak this envelope can drive the
/// orchestrator.
pub struct CommandModel {
    command: String,
    args: Vec<String>,
}

impl CommandModel {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    messages: &'a [ModelMessage],
    tools: &'a [ToolSpec],
    tool_choice: ToolChoice,
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    text: String,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallRequest>,
    #[serde(default)]
    usage: TokenUsage,
}

#[async_trait]
impl LanguageModel for CommandModel {
    fn name(&self) -> &str {
        &self.command
    }

    async fn step(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<ModelStep, StrategistError> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut child = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .spawn()
            .map_err(|e| StrategistError::Model(format!("could not spawn model runner: {e}")))?;

        let payload = serde_json::to_vec(&CommandRequest {
            messages: &request.messages,
            tools: &request.tools,
            tool_choice: request.tool_choice,
        })
        .map_err(|e| StrategistError::Model(e.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| StrategistError::Model("model runner has no stdin".to_string()))?;
        stdin
            .write_all(&payload)
            .await
            .map_err(|e| StrategistError::Model(e.to_string()))?;
        drop(stdin);

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| StrategistError::Model("model runner has no stdout".to_string()))?;

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                return Err(StrategistError::Cancelled);
            }
            status = child.wait() => {
                status.map_err(|e| StrategistError::Model(e.to_string()))?
            }
        };
        let mut stdout_buf = Vec::new();
        stdout
            .read_to_end(&mut stdout_buf)
            .await
            .map_err(|e| StrategistError::Model(e.to_string()))?;
        if !status.success() {
            return Err(StrategistError::Model(format!(
                "model runner exited with {status}"
            )));
        }
        let reply: CommandReply = serde_json::from_slice(&stdout_buf)
            .map_err(|e| StrategistError::Model(format!("bad model reply: {e}")))?;
        Ok(ModelStep {
            text: reply.text,
            reasoning: reply.reasoning,
            tool_calls: reply.tool_calls,
            usage: reply.usage,
        })
    }
}

pub mod testing {
    //! A scripted model for tests: plays back a fixed sequence of steps and
    //! records every request it saw.

    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    pub enum ScriptedStep {
        /// Emit one tool call.
        CallTool { tool: String, arguments: Value },
        /// Emit final text, no tool calls.
        Say(String),
    }

    #[derive(Default)]
    pub struct MockModel {
        script: Mutex<Vec<ScriptedStep>>,
        pub requests: Mutex<Vec<ModelRequest>>,
    }

    impl MockModel {
        pub fn scripted(steps: Vec<ScriptedStep>) -> Self {
            Self {
                script: Mutex::new(steps),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for MockModel {
        fn name(&self) -> &str {
            "mock-model"
        }

        async fn step(
            &self,
            request: ModelRequest,
            cancel: &CancellationToken,
        ) -> Result<ModelStep, StrategistError> {
            if cancel.is_cancelled() {
                return Err(StrategistError::Cancelled);
            }
            self.requests.lock().unwrap().push(request);

            let next = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() {
                    None
                } else {
                    Some(script.remove(0))
                }
            };
            let usage = TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            };
            Ok(match next {
                Some(ScriptedStep::CallTool { tool, arguments }) => ModelStep {
                    text: String::new(),
                    reasoning: None,
                    tool_calls: vec![ToolCallRequest {
                        call_id: format!("call-{tool}"),
                        tool,
                        arguments,
                    }],
                    usage,
                },
                Some(ScriptedStep::Say(text)) => ModelStep {
                    text,
                    reasoning: None,
                    tool_calls: vec![],
                    usage,
                },
                None => ModelStep {
                    text: "done".to_string(),
                    reasoning: None,
                    tool_calls: vec![],
                    usage,
                },
            })
        }
    }
}
