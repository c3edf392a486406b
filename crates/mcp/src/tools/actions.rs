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

//! Action tools: game mutations issued through the bridge.
//!
//! Most of these are thin shims over a named Lua function; the Lua side
//! answers `{Success, Message}` and that answer goes back to the agent
//! verbatim — "not at war" is information, not an error.

use serde_json::{Value, json};

use vox_common::{MessageRole, PlayerId};

use crate::McpError;
use crate::types::{Tool, ToolCallResult};

use super::{ToolContext, require_i64, require_str};

// ============================================================================
// Tool Definitions
// ============================================================================

fn action_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

pub fn tool_set_strategy() -> Tool {
    Tool {
        name: "set-strategy".to_string(),
        description: "Set the player's grand strategy (e.g. conquest, culture, science). The \
            AI layers below will reprioritize accordingly."
            .to_string(),
        input_schema: action_schema(
            json!({
                "PlayerID": {"type": "integer"},
                "Strategy": {"type": "string"}
            }),
            &["PlayerID", "Strategy"],
        ),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_set_persona() -> Tool {
    Tool {
        name: "set-persona".to_string(),
        description: "Adjust the leader's diplomatic persona values (boldness, loyalty, ...)."
            .to_string(),
        input_schema: action_schema(
            json!({
                "PlayerID": {"type": "integer"},
                "Persona": {"type": "object", "description": "Persona value overrides"}
            }),
            &["PlayerID", "Persona"],
        ),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_set_flavors() -> Tool {
    Tool {
        name: "set-flavors".to_string(),
        description: "Override the player's AI flavor weights (growth, expansion, gold, ...)."
            .to_string(),
        input_schema: action_schema(
            json!({
                "PlayerID": {"type": "integer"},
                "Flavors": {"type": "object", "description": "Flavor name to weight"}
            }),
            &["PlayerID", "Flavors"],
        ),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_set_policy() -> Tool {
    Tool {
        name: "set-policy".to_string(),
        description: "Adopt a social policy or open a policy branch.".to_string(),
        input_schema: action_schema(
            json!({
                "PlayerID": {"type": "integer"},
                "Policy": {"type": "string", "description": "Policy or branch type key"}
            }),
            &["PlayerID", "Policy"],
        ),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_set_research() -> Tool {
    Tool {
        name: "set-research".to_string(),
        description: "Set the player's current research target.".to_string(),
        input_schema: action_schema(
            json!({
                "PlayerID": {"type": "integer"},
                "Tech": {"type": "string", "description": "Technology type key"}
            }),
            &["PlayerID", "Tech"],
        ),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_declare_war() -> Tool {
    Tool {
        name: "declare-war".to_string(),
        description: "Declare war on another major civilization.".to_string(),
        input_schema: action_schema(
            json!({
                "PlayerID": {"type": "integer"},
                "TargetPlayerID": {"type": "integer"}
            }),
            &["PlayerID", "TargetPlayerID"],
        ),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_make_peace() -> Tool {
    Tool {
        name: "make-peace".to_string(),
        description: "Negotiate peace with a civilization the player is at war with."
            .to_string(),
        input_schema: action_schema(
            json!({
                "PlayerID": {"type": "integer"},
                "TargetPlayerID": {"type": "integer"}
            }),
            &["PlayerID", "TargetPlayerID"],
        ),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_denounce() -> Tool {
    Tool {
        name: "denounce".to_string(),
        description: "Publicly denounce another civilization.".to_string(),
        input_schema: action_schema(
            json!({
                "PlayerID": {"type": "integer"},
                "TargetPlayerID": {"type": "integer"}
            }),
            &["PlayerID", "TargetPlayerID"],
        ),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_set_city_production() -> Tool {
    Tool {
        name: "set-city-production".to_string(),
        description: "Set what a city is producing: a unit, building, or project type key."
            .to_string(),
        input_schema: action_schema(
            json!({
                "PlayerID": {"type": "integer"},
                "CityID": {"type": "integer"},
                "Production": {"type": "string"}
            }),
            &["PlayerID", "CityID", "Production"],
        ),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_unit_command() -> Tool {
    Tool {
        name: "unit-command".to_string(),
        description: "Issue a command to a unit: move, attack, fortify, found a city, and so \
            on. Coordinates are required for movement and attacks."
            .to_string(),
        input_schema: action_schema(
            json!({
                "PlayerID": {"type": "integer"},
                "UnitID": {"type": "integer"},
                "Command": {"type": "string"},
                "X": {"type": "integer"},
                "Y": {"type": "integer"}
            }),
            &["PlayerID", "UnitID", "Command"],
        ),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_build_improvement() -> Tool {
    Tool {
        name: "build-improvement".to_string(),
        description: "Order a worker to build an improvement on its tile.".to_string(),
        input_schema: action_schema(
            json!({
                "PlayerID": {"type": "integer"},
                "UnitID": {"type": "integer"},
                "Improvement": {"type": "string"}
            }),
            &["PlayerID", "UnitID", "Improvement"],
        ),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_assign_trade_route() -> Tool {
    Tool {
        name: "assign-trade-route".to_string(),
        description: "Assign an idle trade unit to a route between two cities.".to_string(),
        input_schema: action_schema(
            json!({
                "PlayerID": {"type": "integer"},
                "OriginCityID": {"type": "integer"},
                "TargetCityID": {"type": "integer"}
            }),
            &["PlayerID", "OriginCityID", "TargetCityID"],
        ),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_sell_building() -> Tool {
    Tool {
        name: "sell-building".to_string(),
        description: "Sell a building in one of the player's cities.".to_string(),
        input_schema: action_schema(
            json!({
                "PlayerID": {"type": "integer"},
                "CityID": {"type": "integer"},
                "Building": {"type": "string"}
            }),
            &["PlayerID", "CityID", "Building"],
        ),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_use_great_person() -> Tool {
    Tool {
        name: "use-great-person".to_string(),
        description: "Expend a great person on one of their special abilities.".to_string(),
        input_schema: action_schema(
            json!({
                "PlayerID": {"type": "integer"},
                "UnitID": {"type": "integer"},
                "Ability": {"type": "string"}
            }),
            &["PlayerID", "UnitID", "Ability"],
        ),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_relay_diplomatic_message() -> Tool {
    Tool {
        name: "relay-diplomatic-message".to_string(),
        description: "Send an in-character diplomatic message to another leader. The message \
            is also recorded on the envoy thread between the two players."
            .to_string(),
        input_schema: action_schema(
            json!({
                "PlayerID": {"type": "integer"},
                "TargetPlayerID": {"type": "integer"},
                "Message": {"type": "string"}
            }),
            &["PlayerID", "TargetPlayerID", "Message"],
        ),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_pause_game() -> Tool {
    Tool {
        name: "pause-game".to_string(),
        description: "Pause the game for the player so the agent can think and act. Always \
            paired with resume-game."
            .to_string(),
        input_schema: action_schema(json!({"PlayerID": {"type": "integer"}}), &["PlayerID"]),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_resume_game() -> Tool {
    Tool {
        name: "resume-game".to_string(),
        description: "Resume the game for the player after the agent has finished its turn."
            .to_string(),
        input_schema: action_schema(json!({"PlayerID": {"type": "integer"}}), &["PlayerID"]),
        auto_complete: vec!["PlayerID".to_string()],
    }
}

pub fn tool_lua_executor() -> Tool {
    Tool {
        name: "lua-executor".to_string(),
        description: "Execute arbitrary Lua in the game's script context and return the \
            result. Powerful and unguarded; prefer the purpose-built tools."
            .to_string(),
        input_schema: action_schema(json!({"Script": {"type": "string"}}), &["Script"]),
        auto_complete: vec![],
    }
}

pub fn tool_set_metadata() -> Tool {
    Tool {
        name: "set-metadata".to_string(),
        description: "Write a key into the game's metadata table. Agents use this for notes \
            that must survive between turns."
            .to_string(),
        input_schema: action_schema(
            json!({
                "Key": {"type": "string"},
                "Value": {"type": "string"}
            }),
            &["Key", "Value"],
        ),
        auto_complete: vec![],
    }
}

// ============================================================================
// Tool Implementations
// ============================================================================

/// Call a Lua function and hand its result (domain success or failure)
/// back to the agent.
async fn lua_action(
    ctx: &ToolContext,
    function: &str,
    args: Vec<Value>,
) -> Result<ToolCallResult, McpError> {
    let result = ctx.bridge.lua_call(function, args).await?;
    Ok(ToolCallResult::json(&result))
}

pub async fn execute_set_strategy(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let strategy = require_str(args, "Strategy")?;
    lua_action(ctx, "SetGrandStrategy", vec![json!(player), json!(strategy)]).await
}

pub async fn execute_set_persona(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let persona = args
        .get("Persona")
        .cloned()
        .ok_or_else(|| McpError::InvalidArguments("missing 'Persona'".into()))?;
    lua_action(ctx, "SetPersona", vec![json!(player), persona]).await
}

pub async fn execute_set_flavors(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let flavors = args
        .get("Flavors")
        .cloned()
        .ok_or_else(|| McpError::InvalidArguments("missing 'Flavors'".into()))?;
    lua_action(ctx, "SetFlavors", vec![json!(player), flavors]).await
}

pub async fn execute_set_policy(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let policy = require_str(args, "Policy")?;
    lua_action(ctx, "AdoptPolicy", vec![json!(player), json!(policy)]).await
}

pub async fn execute_set_research(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let tech = require_str(args, "Tech")?;
    lua_action(ctx, "SetResearch", vec![json!(player), json!(tech)]).await
}

pub async fn execute_declare_war(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let target = require_i64(args, "TargetPlayerID")?;
    lua_action(ctx, "DeclareWar", vec![json!(player), json!(target)]).await
}

pub async fn execute_make_peace(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let target = require_i64(args, "TargetPlayerID")?;
    lua_action(ctx, "MakePeace", vec![json!(player), json!(target)]).await
}

pub async fn execute_denounce(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let target = require_i64(args, "TargetPlayerID")?;
    lua_action(ctx, "Denounce", vec![json!(player), json!(target)]).await
}

pub async fn execute_set_city_production(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let city = require_i64(args, "CityID")?;
    let production = require_str(args, "Production")?;
    lua_action(
        ctx,
        "SetCityProduction",
        vec![json!(player), json!(city), json!(production)],
    )
    .await
}

pub async fn execute_unit_command(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let unit = require_i64(args, "UnitID")?;
    let command = require_str(args, "Command")?;
    let x = args.get("X").cloned().unwrap_or(Value::Null);
    let y = args.get("Y").cloned().unwrap_or(Value::Null);
    lua_action(
        ctx,
        "UnitCommand",
        vec![json!(player), json!(unit), json!(command), x, y],
    )
    .await
}

pub async fn execute_build_improvement(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let unit = require_i64(args, "UnitID")?;
    let improvement = require_str(args, "Improvement")?;
    lua_action(
        ctx,
        "BuildImprovement",
        vec![json!(player), json!(unit), json!(improvement)],
    )
    .await
}

pub async fn execute_assign_trade_route(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let origin = require_i64(args, "OriginCityID")?;
    let target = require_i64(args, "TargetCityID")?;
    lua_action(
        ctx,
        "AssignTradeRoute",
        vec![json!(player), json!(origin), json!(target)],
    )
    .await
}

pub async fn execute_sell_building(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let city = require_i64(args, "CityID")?;
    let building = require_str(args, "Building")?;
    lua_action(
        ctx,
        "SellBuilding",
        vec![json!(player), json!(city), json!(building)],
    )
    .await
}

pub async fn execute_use_great_person(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let unit = require_i64(args, "UnitID")?;
    let ability = require_str(args, "Ability")?;
    lua_action(
        ctx,
        "UseGreatPerson",
        vec![json!(player), json!(unit), json!(ability)],
    )
    .await
}

pub async fn execute_relay_diplomatic_message(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")?;
    let target = require_i64(args, "TargetPlayerID")?;
    let message = require_str(args, "Message")?;

    let result = ctx
        .bridge
        .lua_call(
            "RelayDiplomaticMessage",
            vec![json!(player), json!(target), json!(message)],
        )
        .await?;

    // Record the exchange on the envoy thread between the two players.
    let identity = ctx.knowledge.identity().await;
    if let Some(identity) = identity {
        let thread_id = format!("envoy-{player}-{target}");
        let message = message.to_string();
        let turn = identity.turn;
        let game_id = identity.game_id.clone();
        let stored = ctx
            .knowledge
            .with_store(move |db| {
                if db.get_envoy_thread(&thread_id)?.is_none() {
                    let thread = vox_common::EnvoyThread::new(
                        thread_id.clone(),
                        "envoy",
                        game_id,
                        player as PlayerId,
                        turn,
                    );
                    db.create_envoy_thread(&thread)?;
                }
                db.append_envoy_message(&thread_id, MessageRole::Assistant, &message, turn)
            })
            .await;
        if let Err(e) = stored {
            tracing::warn!("could not record envoy message: {e}");
        }
    }

    Ok(ToolCallResult::json(&result))
}

pub async fn execute_pause_game(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")? as PlayerId;
    ctx.bridge.pause_player(player).await?;
    Ok(ToolCallResult::json(&json!({"Success": true})))
}

pub async fn execute_resume_game(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let player = require_i64(args, "PlayerID")? as PlayerId;
    ctx.bridge.resume_player(player).await?;
    Ok(ToolCallResult::json(&json!({"Success": true})))
}

pub async fn execute_lua_executor(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let script = require_str(args, "Script")?;
    let result = ctx.bridge.lua_execute(script).await?;
    Ok(ToolCallResult::json(&result))
}

pub async fn execute_set_metadata(
    ctx: &ToolContext,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let key = require_str(args, "Key")?.to_string();
    let value = require_str(args, "Value")?.to_string();
    ctx.knowledge
        .with_store(move |db| db.metadata_set(&key, &value))
        .await?;
    Ok(ToolCallResult::json(&json!({"Success": true})))
}
