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

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vox_common::{GameEvent, PlayerId};

/// One call inside a `lua_batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LuaCall {
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Registration record forwarded to the DLL so in-game Lua can call out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRegistration {
    pub name: String,
    pub url: String,
    #[serde(rename = "async")]
    pub is_async: bool,
    /// Milliseconds the DLL should wait for a synchronous reply.
    pub timeout: u64,
}

/// Body of a client-to-DLL request. The connector assigns the `id` and
/// merges it into the serialized object; the body itself never carries one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestBody {
    LuaCall {
        function: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    LuaBatch {
        calls: Vec<LuaCall>,
    },
    LuaExecute {
        script: String,
    },
    GetLuaFunctions {},
    RegisterExternal {
        #[serde(flatten)]
        registration: ExternalRegistration,
    },
    UnregisterExternal {
        name: String,
    },
    PausePlayer {
        #[serde(rename = "playerID")]
        player_id: PlayerId,
    },
    ResumePlayer {
        #[serde(rename = "playerID")]
        player_id: PlayerId,
    },
    /// Reply to an `ExternalCall` event, correlated by the DLL's `callID`.
    ExternalResponse {
        #[serde(rename = "callID")]
        call_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// A response frame from the DLL, correlated to exactly one prior request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Every frame the DLL can send us.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Response(ResponseMessage),
    GameEvent(GameEvent),
}

/// Serialize a request body with its assigned id merged into the top-level
/// object, as the wire format requires: `{type, id, ...args}`.
pub fn request_frame(body: &RequestBody, id: u64) -> serde_json::Result<String> {
    let mut value = serde_json::to_value(body)?;
    if let Value::Object(map) = &mut value {
        map.insert("id".to_string(), Value::from(id));
    }
    serde_json::to_string(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn request_frame_merges_id() {
        let body = RequestBody::LuaCall {
            function: "GetPlayerName".into(),
            args: vec![],
        };
        let frame = request_frame(&body, 7).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "lua_call");
        assert_eq!(value["id"], 7);
        assert_eq!(value["function"], "GetPlayerName");
    }

    #[test]
    fn register_external_flattens_registration() {
        let body = RequestBody::RegisterExternal {
            registration: ExternalRegistration {
                name: "advisor".into(),
                url: "http://localhost:9000/advisor".into(),
                is_async: true,
                timeout: 5000,
            },
        };
        let frame = request_frame(&body, 1).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "register_external");
        assert_eq!(value["name"], "advisor");
        assert_eq!(value["async"], true);
    }

    #[test]
    fn server_message_dispatches_on_type_tag() {
        let response: ServerMessage = serde_json::from_value(json!({
            "type": "response", "id": 3, "success": true, "result": "ok"
        }))
        .unwrap();
        assert!(matches!(
            response,
            ServerMessage::Response(ResponseMessage { id: 3, success: true, .. })
        ));

        let event: ServerMessage = serde_json::from_value(json!({
            "type": "game_event", "event": "CityFounded", "payload": [1, 2, "Rome", 5, 5]
        }))
        .unwrap();
        assert!(matches!(event, ServerMessage::GameEvent(_)));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let result: Result<ServerMessage, _> =
            serde_json::from_value(json!({"type": "mystery", "id": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn pause_player_uses_wire_casing() {
        let frame = request_frame(&RequestBody::PausePlayer { player_id: 4 }, 9).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "pause_player");
        assert_eq!(value["playerID"], 4);
    }
}
