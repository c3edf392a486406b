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

//! Per-game orchestration runtime.
//!
//! Owns the MCP client and its cached tool list, the agent registry, and
//! cumulative token counts, and drives the generate/tool-call loop for every
//! agent execution. Agents may also be wrapped as tools: a tool call whose
//! name matches a registered agent becomes a nested execution, optionally
//! fire-and-forget.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vox_mcp::types::{Tool, ToolCallResult, ToolContent};

use crate::StrategistError;
use crate::agent::{StepPlan, StrategistParameters, VoxAgent};
use crate::mcp_client::McpClient;
use crate::model::{
    LanguageModel, ModelMessage, ModelRequest, ModelStep, TokenUsage, ToolCallRequest, ToolSpec,
};

struct ContextInner {
    mcp: McpClient,
    model: Arc<dyn LanguageModel>,
    agents: StdMutex<HashMap<String, Arc<dyn VoxAgent>>>,
    usage: StdMutex<TokenUsage>,
    tool_timeout: Duration,
}

#[derive(Clone)]
pub struct VoxContext {
    inner: Arc<ContextInner>,
}

impl VoxContext {
    pub fn new(mcp: McpClient, model: Arc<dyn LanguageModel>, tool_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                mcp,
                model,
                agents: StdMutex::new(HashMap::new()),
                usage: StdMutex::new(TokenUsage::default()),
                tool_timeout,
            }),
        }
    }

    pub fn register_agent(&self, agent: Arc<dyn VoxAgent>) {
        self.inner
            .agents
            .lock()
            .unwrap()
            .insert(agent.name().to_string(), agent);
    }

    pub fn agent(&self, name: &str) -> Result<Arc<dyn VoxAgent>, StrategistError> {
        self.inner
            .agents
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| StrategistError::AgentNotFound(name.to_string()))
    }

    pub fn usage(&self) -> TokenUsage {
        *self.inner.usage.lock().unwrap()
    }

    pub fn mcp(&self) -> &McpClient {
        &self.inner.mcp
    }

    pub async fn shutdown(&self) {
        self.inner.mcp.disconnect().await;
    }

    /// Run one agent to completion: assemble tools and messages, loop
    /// generate rounds and tool calls until the agent's stop check (or the
    /// step cap) fires, then distill the output.
    pub fn execute<'a>(
        &'a self,
        name: &'a str,
        params: &'a mut StrategistParameters,
        input: Value,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Value, StrategistError>> {
        Box::pin(self.execute_inner(name, params, input, cancel))
    }

    async fn execute_inner(
        &self,
        name: &str,
        params: &mut StrategistParameters,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, StrategistError> {
        let agent = self.agent(name)?;
        let flags = agent.flags();
        let mcp_tools = self.inner.mcp.list_tools().await?;

        let mut active = agent.active_tools(params);
        active.extend(agent.extra_tools(params));

        let mut messages = vec![ModelMessage::System {
            content: agent.system_prompt(params),
        }];
        messages.extend(agent.initial_messages(params, &input));

        let mut steps: Vec<ModelStep> = Vec::new();
        let mut used: HashSet<String> = HashSet::new();
        let mut model = self.inner.model.clone();
        let mut final_text = String::new();

        info!(agent = name, player = params.player_id, turn = params.turn, "agent run starting");

        for step_index in 0..flags.max_steps {
            if cancel.is_cancelled() {
                return Err(StrategistError::Cancelled);
            }

            let tool_names: Vec<String> = active
                .iter()
                .filter(|t| !flags.remove_used_tools || !used.contains(*t))
                .cloned()
                .collect();
            let plan_messages = if flags.only_last_round {
                compress_to_last_round(&messages)
            } else {
                messages.clone()
            };
            let mut plan = StepPlan {
                tools: tool_names,
                messages: plan_messages,
                model: None,
            };
            agent
                .prepare_step(&mut plan, params, &input, &steps, self)
                .await;
            if let Some(swapped) = plan.model.take() {
                model = swapped;
            }

            let request = ModelRequest {
                messages: plan.messages,
                tools: self.tool_specs(&plan.tools, &mcp_tools),
                tool_choice: flags.tool_choice,
            };
            let step = model.step(request, cancel).await?;
            *self.inner.usage.lock().unwrap() += step.usage;
            debug!(agent = name, step_index, tool_calls = step.tool_calls.len(), "step complete");

            if !step.text.is_empty() {
                final_text = step.text.clone();
            }
            messages.push(ModelMessage::Assistant {
                content: step.text.clone(),
                reasoning: step.reasoning.clone(),
                tool_calls: step.tool_calls.clone(),
            });

            for call in &step.tool_calls {
                used.insert(call.tool.clone());
                let content = match self.dispatch_tool_call(call, params, cancel).await {
                    Ok(content) => content,
                    Err(StrategistError::Cancelled) => return Err(StrategistError::Cancelled),
                    Err(e) => json!({"isError": true, "error": e.to_string()}),
                };
                messages.push(ModelMessage::Tool {
                    call_id: call.call_id.clone(),
                    tool: call.tool.clone(),
                    content,
                });
            }

            steps.push(step);
            let last = steps.last().expect("just pushed");
            if agent.stop_check(last, &steps, params) {
                break;
            }
        }

        let output = agent.output(&final_text, &steps);
        Ok(agent.postprocess_output(output, params))
    }

    /// Route a tool call: registered agents become nested executions,
    /// everything else goes to the MCP server with auto-complete fields
    /// injected from the execution context.
    fn dispatch_tool_call<'a>(
        &'a self,
        call: &'a ToolCallRequest,
        params: &'a StrategistParameters,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Value, StrategistError>> {
        Box::pin(self.dispatch_tool_call_inner(call, params, cancel))
    }

    async fn dispatch_tool_call_inner(
        &self,
        call: &ToolCallRequest,
        params: &StrategistParameters,
        cancel: &CancellationToken,
    ) -> Result<Value, StrategistError> {
        if let Ok(agent) = self.agent(&call.tool) {
            let context = self.clone();
            let mut sub_params = params.clone();
            sub_params.running = None;
            let input = call.arguments.clone();
            if agent.flags().fire_and_forget {
                let name = call.tool.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        Box::pin(context.execute(&name, &mut sub_params, input, &cancel)).await
                    {
                        warn!(agent = name, "fire-and-forget agent failed: {e}");
                    }
                });
                return Ok(json!({"started": true}));
            }
            return Box::pin(context.execute(&call.tool, &mut sub_params, input, cancel)).await;
        }

        let arguments = inject_auto_complete(&call.tool, &call.arguments, params, self).await;
        let result = self
            .inner
            .mcp
            .call_tool(&call.tool, arguments, self.inner.tool_timeout, cancel)
            .await?;
        unwrap_tool_result(result)
    }

    /// Resolve tool names into the specs handed to the model, stripping
    /// auto-complete fields from MCP schemas and synthesizing specs for
    /// agent-tools.
    fn tool_specs(&self, names: &[String], mcp_tools: &[Tool]) -> Vec<ToolSpec> {
        let agents = self.inner.agents.lock().unwrap();
        names
            .iter()
            .filter_map(|name| {
                if let Some(tool) = mcp_tools.iter().find(|t| &t.name == name) {
                    Some(ToolSpec {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        input_schema: strip_auto_complete(&tool.input_schema, &tool.auto_complete),
                    })
                } else if agents.contains_key(name) {
                    Some(ToolSpec {
                        name: name.clone(),
                        description: format!("Delegate to the '{name}' agent and return its output."),
                        input_schema: json!({
                            "type": "object",
                            "properties": {
                                "input": {"type": "string", "description": "Task for the agent"}
                            }
                        }),
                    })
                } else {
                    warn!(tool = name, "active tool not found on server or in registry");
                    None
                }
            })
            .collect()
    }
}

/// Remove auto-complete fields from a JSON Schema's `properties` and
/// `required` before the model sees it.
fn strip_auto_complete(schema: &Value, auto_complete: &[String]) -> Value {
    let mut schema = schema.clone();
    if let Some(properties) = schema.get_mut("properties").and_then(|p| p.as_object_mut()) {
        for field in auto_complete {
            properties.remove(field);
        }
    }
    if let Some(required) = schema.get_mut("required").and_then(|r| r.as_array_mut()) {
        required.retain(|f| {
            f.as_str()
                .map(|f| !auto_complete.iter().any(|a| a == f))
                .unwrap_or(true)
        });
    }
    schema
}

/// Fill a tool call's auto-complete fields from the execution context,
/// overriding anything the model supplied.
async fn inject_auto_complete(
    tool_name: &str,
    arguments: &Value,
    params: &StrategistParameters,
    context: &VoxContext,
) -> Value {
    let mut object = arguments.as_object().cloned().unwrap_or_default();
    let Ok(tools) = context.inner.mcp.list_tools().await else {
        return Value::Object(object);
    };
    if let Some(tool) = tools.iter().find(|t| t.name == tool_name) {
        for field in &tool.auto_complete {
            let value = match field.as_str() {
                "PlayerID" => Some(Value::from(params.player_id)),
                "GameID" => Some(Value::String(params.game_id.clone())),
                "Turn" => Some(Value::from(params.turn)),
                other => params.metadata.get(other).map(|v| Value::String(v.clone())),
            };
            if let Some(value) = value {
                object.insert(field.clone(), value);
            }
        }
    }
    Value::Object(object)
}

/// Unwrap the MCP result shape into the value handed back to the model.
/// `isError` results become errors; JSON content is parsed.
fn unwrap_tool_result(result: ToolCallResult) -> Result<Value, StrategistError> {
    let text = result
        .content
        .first()
        .map(|ToolContent::Text { text, .. }| text.clone())
        .unwrap_or_default();
    if result.is_error == Some(true) {
        return Err(StrategistError::Mcp(text));
    }
    let is_json = result
        .content
        .first()
        .map(|ToolContent::Text { mime_type, .. }| {
            mime_type.as_deref() == Some("application/json")
        })
        .unwrap_or(false);
    if is_json {
        serde_json::from_str(&text).map_err(|e| StrategistError::Mcp(format!("bad JSON result: {e}")))
    } else {
        Ok(Value::String(text))
    }
}

/// Keep the system prompt and everything from the last assistant round on.
fn compress_to_last_round(messages: &[ModelMessage]) -> Vec<ModelMessage> {
    let last_assistant = messages
        .iter()
        .rposition(|m| matches!(m, ModelMessage::Assistant { .. }));
    match last_assistant {
        Some(index) => {
            let mut compressed: Vec<ModelMessage> = messages
                .iter()
                .filter(|m| matches!(m, ModelMessage::System { .. }))
                .cloned()
                .collect();
            compressed.extend(messages[index..].iter().cloned());
            compressed
        }
        None => messages.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_removes_properties_and_required() {
        let schema = json!({
            "type": "object",
            "properties": {"PlayerID": {"type": "integer"}, "Strategy": {"type": "string"}},
            "required": ["PlayerID", "Strategy"]
        });
        let stripped = strip_auto_complete(&schema, &["PlayerID".to_string()]);
        assert!(stripped["properties"].get("PlayerID").is_none());
        assert_eq!(stripped["required"], json!(["Strategy"]));
    }

    #[test]
    fn compress_keeps_system_and_last_round() {
        let messages = vec![
            ModelMessage::System { content: "s".into() },
            ModelMessage::User { content: "u".into() },
            ModelMessage::Assistant {
                content: "first".into(),
                reasoning: None,
                tool_calls: vec![],
            },
            ModelMessage::Assistant {
                content: "second".into(),
                reasoning: None,
                tool_calls: vec![],
            },
            ModelMessage::Tool {
                call_id: "c".into(),
                tool: "t".into(),
                content: json!({}),
            },
        ];
        let compressed = compress_to_last_round(&messages);
        assert_eq!(compressed.len(), 3);
        assert!(matches!(&compressed[0], ModelMessage::System { .. }));
        assert!(
            matches!(&compressed[1], ModelMessage::Assistant { content, .. } if content == "second")
        );
    }

    #[test]
    fn unwrap_parses_json_content() {
        let result = ToolCallResult::json(&json!({"cities": [1, 2]}));
        let value = unwrap_tool_result(result).unwrap();
        assert_eq!(value["cities"], json!([1, 2]));
    }

    #[test]
    fn unwrap_surfaces_is_error() {
        let result = ToolCallResult::error("boom");
        assert!(matches!(
            unwrap_tool_result(result),
            Err(StrategistError::Mcp(message)) if message == "boom"
        ));
    }
}
