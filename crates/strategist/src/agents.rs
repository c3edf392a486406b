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

//! The stock strategist agent: one execution per turn, full tool access,
//! reports recorded into the per-turn game state.

use serde_json::Value;

use vox_common::GameState;

use crate::agent::{AgentFlags, StrategistParameters, VoxAgent};
use crate::model::ModelMessage;

pub struct StrategistAgent;

const KNOWLEDGE_TOOLS: &[&str] = &[
    "get-players",
    "get-events",
    "get-cities",
    "get-options",
    "get-victory-progress",
    "get-military-report",
    "get-opinions",
    "get-metadata",
    "get-combat-preview",
    "get-espionage",
    "get-world-congress",
];

const ACTION_TOOLS: &[&str] = &[
    "set-strategy",
    "set-persona",
    "set-flavors",
    "set-policy",
    "set-research",
    "declare-war",
    "make-peace",
    "denounce",
    "set-city-production",
    "unit-command",
    "build-improvement",
    "assign-trade-route",
    "sell-building",
    "use-great-person",
    "relay-diplomatic-message",
    "set-metadata",
];

const DATABASE_TOOLS: &[&str] = &["get-building", "get-policy", "get-unit", "get-technology"];

#[async_trait::async_trait]
impl VoxAgent for StrategistAgent {
    fn name(&self) -> &str {
        "strategist"
    }

    fn system_prompt(&self, params: &StrategistParameters) -> String {
        format!(
            "You are the grand strategist for player {player} in a game of Civilization V. \
             It is turn {turn}. Each turn you review what happened since your last decision, \
             reassess the strategic situation, and issue orders through your tools.\n\n\
             Work in this order: first read the events since your last turn (get-events), \
             then consult whatever state matters for the decisions at hand (cities, military, \
             opinions, victory progress). Then act: adjust strategy, research, policies, \
             production, and diplomacy as needed. Make only the changes the situation calls \
             for. When your orders are issued, summarize your reasoning in two or three \
             sentences and stop calling tools.",
            player = params.player_id,
            turn = params.turn,
        )
    }

    fn active_tools(&self, _params: &StrategistParameters) -> Vec<String> {
        KNOWLEDGE_TOOLS
            .iter()
            .chain(ACTION_TOOLS)
            .chain(DATABASE_TOOLS)
            .map(|t| t.to_string())
            .collect()
    }

    fn flags(&self) -> AgentFlags {
        AgentFlags {
            max_steps: 10,
            ..Default::default()
        }
    }

    fn initial_messages(&self, params: &StrategistParameters, _input: &Value) -> Vec<ModelMessage> {
        vec![ModelMessage::User {
            content: format!(
                "Turn {turn} has begun. Events {after}..{before} cover what happened since \
                 your last decision. Review, decide, and act.",
                turn = params.turn,
                after = params.after,
                before = params.before,
            ),
        }]
    }

    /// The final summary becomes the turn's report in the game state.
    fn postprocess_output(&self, output: Value, params: &mut StrategistParameters) -> Value {
        if let Some(report) = output.as_str() {
            let state = params.game_states.entry(params.turn).or_insert_with(GameState::default);
            state
                .reports
                .insert(self.name().to_string(), report.to_string());
        }
        output
    }
}
