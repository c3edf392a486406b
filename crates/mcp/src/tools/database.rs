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

//! Database tools: lookups into the static game database tables mirrored
//! as public knowledge (buildings, policies, units, technologies).

use serde_json::{Value, json};

use crate::McpError;
use crate::types::{Tool, ToolCallResult};

use super::{ToolContext, require_str};

fn lookup_tool(name: &str, what: &str) -> Tool {
    Tool {
        name: name.to_string(),
        description: format!(
            "Look up a {what} in the game database by its type key, returning its stats and \
             effects."
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "Type": {
                    "type": "string",
                    "description": "Database type key, e.g. 'BUILDING_GRANARY'"
                }
            },
            "required": ["Type"]
        }),
        auto_complete: vec![],
    }
}

pub fn get_tools() -> Vec<Tool> {
    vec![
        lookup_tool("get-building", "building"),
        lookup_tool("get-policy", "social policy"),
        lookup_tool("get-unit", "unit"),
        lookup_tool("get-technology", "technology"),
    ]
}

pub async fn execute_lookup(
    ctx: &ToolContext,
    table: &'static str,
    args: &Value,
) -> Result<ToolCallResult, McpError> {
    let key = require_str(args, "Type")?.to_string();
    let entry = ctx
        .knowledge
        .with_store(move |db| db.get_public_knowledge(table, &key))
        .await?;
    match entry {
        Some(entry) => Ok(ToolCallResult::json(&entry)),
        None => Ok(ToolCallResult::json(
            &json!({"Success": false, "Message": "no such entry"}),
        )),
    }
}
