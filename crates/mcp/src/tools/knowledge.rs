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

//! Knowledge tools: visibility-scoped reads from the per-game store.

use serde_json::{Value, json};

use vox_common::PlayerId;

use crate::McpError;
use crate::types::{Tool, ToolCallResult};

use super::{ToolContext, optional_i64, require_i64};

fn player_scoped_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "PlayerID": {
                "type": "integer",
                "description": description
            }
        },
        "required": ["PlayerID"]
    })
}

// ============================================================================
// Tool Definitions
// ============================================================================

pub fn tool_get_players() -> Tool {
    Tool {
        name: "get-players".to_string(),
        description: "List every major civilization in the game: civilization, leader, team, \
            and whether a human is driving it. Public knowledge, no visibility filter."
            .to_string(),
        input_schema: json!({"type": "object", "properties": {}}),
        auto_complete: vec![],
    }
}

pub fn tool_get_events() -> Tool {
    Tool {
        name: "get-events".to_string(),
        description: "Game events visible to the player, in the event-id window (After, Before]. \
            Use the latestID from the turn notification as Before to read exactly the events \
            that led to this turn."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "PlayerID": {"type": "integer"},
                "After": {"type": "integer", "description": "Exclusive lower event id bound"},
                "Before": {"type": "integer", "description": "Inclusive upper event id bound"}
            },
            "required": ["PlayerID"]
        }),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_get_cities() -> Tool {
    Tool {
        name: "get-cities".to_string(),
        description: "Cities as the player currently knows them. Unmet civs' cities are absent; \
            met-but-unscouted cities carry only name, owner, and position."
            .to_string(),
        input_schema: player_scoped_schema("Player whose view of the map to use"),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_get_options() -> Tool {
    Tool {
        name: "get-options".to_string(),
        description: "Strategic options currently available to the player: adoptable policy \
            branches, researchable techs, and viable grand strategies (blacklisted strategies \
            are filtered out)."
            .to_string(),
        input_schema: player_scoped_schema("Player whose options to list"),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_get_victory_progress() -> Tool {
    Tool {
        name: "get-victory-progress".to_string(),
        description: "Progress of every known civilization toward each victory condition, as \
            visible to the player."
            .to_string(),
        input_schema: player_scoped_schema("Viewing player"),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_get_military_report() -> Tool {
    Tool {
        name: "get-military-report".to_string(),
        description: "Recent military intelligence visible to the player: unit counts, army \
            compositions, and threat assessments."
            .to_string(),
        input_schema: player_scoped_schema("Viewing player"),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_get_opinions() -> Tool {
    Tool {
        name: "get-opinions".to_string(),
        description: "Diplomatic opinions other leaders hold of the player, and the player's \
            standing with them."
            .to_string(),
        input_schema: player_scoped_schema("Player whose diplomatic standing to read"),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_get_metadata() -> Tool {
    Tool {
        name: "get-metadata".to_string(),
        description: "Read a key from the game's metadata table, or the whole table when no key \
            is given. Agents use this for notes that must survive between turns."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "Key": {"type": "string"}
            }
        }),
        auto_complete: vec![],
    }
}

pub fn tool_get_combat_preview() -> Tool {
    Tool {
        name: "get-combat-preview".to_string(),
        description: "Predicted combat outcomes recorded for the player's recent engagements."
            .to_string(),
        input_schema: player_scoped_schema("Viewing player"),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_get_espionage() -> Tool {
    Tool {
        name: "get-espionage".to_string(),
        description: "Espionage reports visible to the player: spy assignments and intercepted \
            intrigue."
            .to_string(),
        input_schema: player_scoped_schema("Viewing player"),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_get_world_congress() -> Tool {
    Tool {
        name: "get-world-congress".to_string(),
        description: "Current World Congress session: active resolutions, proposals, and \
            delegate counts."
            .to_string(),
        input_schema: json!({"type": "object", "properties": {}}),
        auto_complete: vec![],
    }
}

// ============================================================================
// Tool Implementations
// ============================================================================

pub async fn execute_get_players(
    ctx: &ToolContext,
    _args: &Value,
) -> Result<ToolCallResult, McpError> {
    let players = ctx
        .knowledge
        .with_store(|db| db.get_all_public_knowledge("PlayerInformations"))
        .await?;
    Ok(ToolCallResult::json(&json!({"players": players})))
}

pub async fn execute_get_events(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")? as PlayerId;
    let after = optional_i64(args, "After").unwrap_or(0);
    let before = optional_i64(args, "Before");
    let events = ctx
        .knowledge
        .with_store(|db| db.read_events_window(player, after, before))
        .await?;
    let events: Vec<Value> = events
        .into_iter()
        .map(|e| json!({"id": e.id, "turn": e.turn, "event": e.event, "payload": e.payload}))
        .collect();
    Ok(ToolCallResult::json(&json!({"events": events})))
}

pub async fn execute_get_cities(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")? as PlayerId;
    let cities = ctx
        .knowledge
        .with_store(|db| db.read_player_knowledge_all(player, "CityInformations"))
        .await?;
    Ok(ToolCallResult::json(&json!({"cities": cities})))
}

pub async fn execute_get_options(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let options = ctx
        .knowledge
        .with_store(|db| db.get_mutable_knowledge("PlayerOptions", player))
        .await?;
    let Some(mut options) = options else {
        return Ok(ToolCallResult::json(&json!({"options": null})));
    };
    // The blacklist is a config input; strategies on it are never offered.
    if let Some(strategies) = options
        .get_mut("Strategies")
        .and_then(|s| s.as_array_mut())
    {
        strategies.retain(|s| {
            s.as_str()
                .map(|name| !ctx.strategy_blacklist.iter().any(|b| b == name))
                .unwrap_or(true)
        });
    }
    Ok(ToolCallResult::json(&json!({"options": options})))
}

pub async fn execute_get_victory_progress(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")? as PlayerId;
    let progress = ctx
        .knowledge
        .with_store(|db| db.read_player_knowledge_all(player, "VictoryProgress"))
        .await?;
    Ok(ToolCallResult::json(&json!({"victoryProgress": progress})))
}

pub async fn execute_get_military_report(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")? as PlayerId;
    let reports = ctx
        .knowledge
        .with_store(|db| db.read_player_knowledge_all(player, "MilitaryReports"))
        .await?;
    Ok(ToolCallResult::json(&json!({"reports": reports})))
}

pub async fn execute_get_opinions(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let opinions = ctx
        .knowledge
        .with_store(|db| db.read_player_knowledge(player as PlayerId, "PlayerOpinions", player))
        .await?;
    Ok(ToolCallResult::json(&json!({"opinions": opinions})))
}

pub async fn execute_get_metadata(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    match args.get("Key").and_then(|k| k.as_str()) {
        Some(key) => {
            let value = ctx
                .knowledge
                .with_store(|db| db.metadata_get(key))
                .await?;
            Ok(ToolCallResult::json(&json!({"key": key, "value": value})))
        }
        None => {
            let identity = ctx.knowledge.identity().await;
            Ok(ToolCallResult::json(&json!({"identity": identity})))
        }
    }
}

pub async fn execute_get_combat_preview(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")? as PlayerId;
    let previews = ctx
        .knowledge
        .with_store(|db| db.read_player_knowledge_all(player, "CombatPreviews"))
        .await?;
    Ok(ToolCallResult::json(&json!({"previews": previews})))
}

pub async fn execute_get_espionage(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")? as PlayerId;
    let reports = ctx
        .knowledge
        .with_store(|db| db.read_player_knowledge_all(player, "EspionageReports"))
        .await?;
    Ok(ToolCallResult::json(&json!({"espionage": reports})))
}

pub async fn execute_get_world_congress(
    ctx: &ToolContext,
    _args: &Value,
) -> Result<ToolCallResult, McpError> {
    let congress = ctx
        .knowledge
        .with_store(|db| db.get_mutable_knowledge("WorldCongress", 0))
        .await?;
    Ok(ToolCallResult::json(&json!({"congress": congress})))
}

