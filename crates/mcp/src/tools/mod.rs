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

//! MCP tools for playing the game.
//!
//! Organized by category:
//!
//! - `knowledge`: visibility-scoped reads from the per-game store
//! - `actions`: game mutations issued through the bridge's Lua surface
//! - `database`: static game-database lookups (buildings, policies, ...)
//!
//! Tool inputs declare `autoComplete` fields; [`execute_tool`] fills any
//! the caller omitted from the session context before dispatch. Domain
//! failures (`{Success: false, Message}`) are ordinary results, never MCP
//! errors.

pub mod actions;
pub mod database;
pub mod knowledge;

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use vox_knowledge::KnowledgeManager;

use crate::McpError;
use crate::bridge_client::BridgeClient;
use crate::server::SessionContext;
use crate::types::{Tool, ToolCallResult};

/// Everything a tool execution may touch.
#[derive(Clone)]
pub struct ToolContext {
    pub knowledge: KnowledgeManager,
    pub bridge: BridgeClient,
    pub session: SessionContext,
    /// Strategies `get-options` must never offer.
    pub strategy_blacklist: Vec<String>,
    pub tool_timeout: Duration,
}

/// Get all available tools
pub fn get_tools() -> Vec<Tool> {
    let mut tools = vec![
        // Knowledge tools
        knowledge::tool_get_players(),
        knowledge::tool_get_events(),
        knowledge::tool_get_cities(),
        knowledge::tool_get_options(),
        knowledge::tool_get_victory_progress(),
        knowledge::tool_get_military_report(),
        knowledge::tool_get_opinions(),
        knowledge::tool_get_metadata(),
        knowledge::tool_get_combat_preview(),
        knowledge::tool_get_espionage(),
        knowledge::tool_get_world_congress(),
        // Action tools
        actions::tool_set_strategy(),
        actions::tool_set_persona(),
        actions::tool_set_flavors(),
        actions::tool_set_policy(),
        actions::tool_set_research(),
        actions::tool_declare_war(),
        actions::tool_make_peace(),
        actions::tool_denounce(),
        actions::tool_set_city_production(),
        actions::tool_unit_command(),
        actions::tool_build_improvement(),
        actions::tool_assign_trade_route(),
        actions::tool_sell_building(),
        actions::tool_use_great_person(),
        actions::tool_relay_diplomatic_message(),
        actions::tool_pause_game(),
        actions::tool_resume_game(),
        actions::tool_lua_executor(),
        actions::tool_set_metadata(),
    ];
    tools.extend(database::get_tools());
    tools
}

/// Execute a tool call, enforcing the per-tool timeout.
pub async fn execute_tool(
    ctx: &ToolContext,
    name: &str,
    arguments: &Value,
) -> Result<ToolCallResult, McpError> {
    debug!("executing tool {name} with args {arguments}");

    let tool = get_tools()
        .into_iter()
        .find(|t| t.name == name)
        .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;
    let arguments = inject_auto_complete(ctx, &tool, arguments).await;

    let execution = dispatch(ctx, name, &arguments);
    match tokio::time::timeout(ctx.tool_timeout, execution).await {
        Ok(result) => result,
        Err(_elapsed) => Err(McpError::Timeout),
    }
}

async fn dispatch(
    ctx: &ToolContext,
    name: &str,
    arguments: &Value,
) -> Result<ToolCallResult, McpError> {
    match name {
        // Knowledge tools
        "get-players" => knowledge::execute_get_players(ctx, arguments).await,
        "get-events" => knowledge::execute_get_events(ctx, arguments).await,
        "get-cities" => knowledge::execute_get_cities(ctx, arguments).await,
        "get-options" => knowledge::execute_get_options(ctx, arguments).await,
        "get-victory-progress" => knowledge::execute_get_victory_progress(ctx, arguments).await,
        "get-military-report" => knowledge::execute_get_military_report(ctx, arguments).await,
        "get-opinions" => knowledge::execute_get_opinions(ctx, arguments).await,
        "get-metadata" => knowledge::execute_get_metadata(ctx, arguments).await,
        "get-combat-preview" => knowledge::execute_get_combat_preview(ctx, arguments).await,
        "get-espionage" => knowledge::execute_get_espionage(ctx, arguments).await,
        "get-world-congress" => knowledge::execute_get_world_congress(ctx, arguments).await,
        // Action tools
        "set-strategy" => actions::execute_set_strategy(ctx, arguments).await,
        "set-persona" => actions::execute_set_persona(ctx, arguments).await,
        "set-flavors" => actions::execute_set_flavors(ctx, arguments).await,
        "set-policy" => actions::execute_set_policy(ctx, arguments).await,
        "set-research" => actions::execute_set_research(ctx, arguments).await,
        "declare-war" => actions::execute_declare_war(ctx, arguments).await,
        "make-peace" => actions::execute_make_peace(ctx, arguments).await,
        "denounce" => actions::execute_denounce(ctx, arguments).await,
        "set-city-production" => actions::execute_set_city_production(ctx, arguments).await,
        "unit-command" => actions::execute_unit_command(ctx, arguments).await,
        "build-improvement" => actions::execute_build_improvement(ctx, arguments).await,
        "assign-trade-route" => actions::execute_assign_trade_route(ctx, arguments).await,
        "sell-building" => actions::execute_sell_building(ctx, arguments).await,
        "use-great-person" => actions::execute_use_great_person(ctx, arguments).await,
        "relay-diplomatic-message" => {
            actions::execute_relay_diplomatic_message(ctx, arguments).await
        }
        "pause-game" => actions::execute_pause_game(ctx, arguments).await,
        "resume-game" => actions::execute_resume_game(ctx, arguments).await,
        "lua-executor" => actions::execute_lua_executor(ctx, arguments).await,
        "set-metadata" => actions::execute_set_metadata(ctx, arguments).await,
        // Database tools
        "get-building" => database::execute_lookup(ctx, "Buildings", arguments).await,
        "get-policy" => database::execute_lookup(ctx, "Policies", arguments).await,
        "get-unit" => database::execute_lookup(ctx, "Units", arguments).await,
        "get-technology" => database::execute_lookup(ctx, "Technologies", arguments).await,
        _ => Err(McpError::UnknownTool(name.to_string())),
    }
}

/// Fill declared auto-complete fields the caller did not supply from the
/// session context (and the live game identity for `GameID`/`Turn`).
async fn inject_auto_complete(ctx: &ToolContext, tool: &Tool, arguments: &Value) -> Value {
    let mut object = arguments.as_object().cloned().unwrap_or_default();
    for field in &tool.auto_complete {
        if object.contains_key(field) {
            continue;
        }
        let value = match field.as_str() {
            "GameID" => ctx
                .knowledge
                .identity()
                .await
                .map(|i| Value::String(i.game_id)),
            "Turn" => ctx.knowledge.identity().await.map(|i| Value::from(i.turn)),
            other => ctx.session.get(other),
        };
        if let Some(value) = value {
            object.insert(field.clone(), value);
        }
    }
    Value::Object(object)
}

// ----------------------------------------------------------------------
// Shared argument helpers
// ----------------------------------------------------------------------

pub(crate) fn require_i64(args: &Value, field: &str) -> Result<i64, McpError> {
    args.get(field)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| McpError::InvalidArguments(format!("missing '{field}'")))
}

pub(crate) fn require_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, McpError> {
    args.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| McpError::InvalidArguments(format!("missing '{field}'")))
}

pub(crate) fn optional_i64(args: &Value, field: &str) -> Option<i64> {
    args.get(field).and_then(|v| v.as_i64())
}
