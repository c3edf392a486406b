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

//! The agent abstraction: prompts, tool sets, and step control combined.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use vox_common::{GameState, PlayerId, TurnNumber};

use crate::context::VoxContext;
use crate::model::{LanguageModel, ModelMessage, ModelStep, ToolChoice};

/// Execution parameters every agent run carries. The event-id window
/// `(after, before]` scopes `get-events` to exactly what led to this turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategistParameters {
    #[serde(rename = "playerID")]
    pub player_id: PlayerId,
    #[serde(rename = "gameID")]
    pub game_id: String,
    pub turn: TurnNumber,
    /// Name of the agent currently executing for this player, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<String>,
    /// Exclusive lower event-id bound: the watermark of the last completed
    /// turn.
    #[serde(default)]
    pub after: i64,
    /// Inclusive upper event-id bound: the watermark of the pending turn.
    #[serde(default)]
    pub before: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Per-turn snapshots accumulated across the game.
    #[serde(default)]
    pub game_states: HashMap<TurnNumber, GameState>,
}

impl StrategistParameters {
    pub fn new(player_id: PlayerId, game_id: impl Into<String>) -> Self {
        Self {
            player_id,
            game_id: game_id.into(),
            ..Default::default()
        }
    }
}

/// Behaviour switches an agent can set without overriding the loop.
#[derive(Debug, Clone)]
pub struct AgentFlags {
    /// Drop tools from the active set once called.
    pub remove_used_tools: bool,
    pub tool_choice: ToolChoice,
    /// Compress the message list to just the last round on each step.
    pub only_last_round: bool,
    /// When wrapped as an agent-tool, invoke without awaiting the result.
    pub fire_and_forget: bool,
    /// Fallback stop when `stop_check` never fires.
    pub max_steps: usize,
}

impl Default for AgentFlags {
    fn default() -> Self {
        Self {
            remove_used_tools: false,
            tool_choice: ToolChoice::Auto,
            only_last_round: false,
            fire_and_forget: false,
            max_steps: 10,
        }
    }
}

/// What the next step will see; `prepare_step` may trim the tool set,
/// rewrite the messages, or swap the model.
pub struct StepPlan {
    pub tools: Vec<String>,
    pub messages: Vec<ModelMessage>,
    pub model: Option<Arc<dyn LanguageModel>>,
}

/// An agent: prompt assembly, tool selection, and step control. The
/// context drives the generate/tool-call loop; the agent steers it.
#[async_trait]
pub trait VoxAgent: Send + Sync {
    fn name(&self) -> &str;

    fn system_prompt(&self, params: &StrategistParameters) -> String;

    /// Names of the MCP tools this run may call.
    fn active_tools(&self, params: &StrategistParameters) -> Vec<String>;

    /// Additional tools beyond the MCP set — typically other agents wrapped
    /// as tools, referenced by their registered names.
    fn extra_tools(&self, _params: &StrategistParameters) -> Vec<String> {
        vec![]
    }

    fn flags(&self) -> AgentFlags {
        AgentFlags::default()
    }

    /// Messages seeded after the system prompt.
    fn initial_messages(&self, _params: &StrategistParameters, input: &Value) -> Vec<ModelMessage> {
        match input {
            Value::Null => vec![],
            other => vec![ModelMessage::User {
                content: other.to_string(),
            }],
        }
    }

    /// Called before every step with the plan the loop intends to run.
    async fn prepare_step(
        &self,
        _plan: &mut StepPlan,
        _params: &StrategistParameters,
        _input: &Value,
        _steps: &[ModelStep],
        _context: &VoxContext,
    ) {
    }

    /// Return true to end the run after `last_step`.
    fn stop_check(
        &self,
        last_step: &ModelStep,
        _steps: &[ModelStep],
        _params: &StrategistParameters,
    ) -> bool {
        last_step.tool_calls.is_empty()
    }

    /// Distill the run into its output value. Defaults to the final text.
    fn output(&self, final_text: &str, _steps: &[ModelStep]) -> Value {
        Value::String(final_text.to_string())
    }

    /// Post-process the output, with mutable access to the parameters so
    /// agents can record state for future turns.
    fn postprocess_output(&self, output: Value, _params: &mut StrategistParameters) -> Value {
        output
    }
}
