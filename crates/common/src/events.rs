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

use crate::game::{PlayerId, TurnNumber};

/// A game event as it arrives off the pipe. Fire-and-forget from the DLL;
/// never correlated with a request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub event: String,
    /// Positional payload; decoded into named fields via the event's
    /// registered schema.
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "gameID", default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<TurnNumber>,
    #[serde(rename = "playerID", default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
}

impl GameEvent {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
            game_id: None,
            turn: None,
            player_id: None,
        }
    }
}

/// Well-known event names the control plane itself reacts to. Everything
/// else flows through on its schema alone.
pub mod events {
    /// A player's turn processing is complete and an agent may act.
    pub const PLAYER_DONE_TURN: &str = "PlayerDoneTurn";
    /// The engine has started end-of-turn processing for a player.
    pub const PLAYER_END_TURN_INITIATED: &str = "PlayerEndTurnInitiated";
    /// A player has met a victory condition.
    pub const PLAYER_VICTORY: &str = "PlayerVictory";
    /// The DLL wants an external (registered) function invoked.
    pub const EXTERNAL_CALL: &str = "ExternalCall";
    /// Emitted by the bridge itself when the pipe connection is established.
    pub const DLL_CONNECTED: &str = "DLLConnected";
    /// Emitted by the bridge itself when the pipe connection is lost.
    pub const DLL_DISCONNECTED: &str = "DLLDisconnected";
    /// The active game identity changed (save load or new game).
    pub const GAME_SWITCHED: &str = "GameSwitched";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_round_trips_wire_field_names() {
        let event = GameEvent {
            event: "PlayerDoneTurn".into(),
            payload: json!([3]),
            game_id: Some("g-1".into()),
            turn: Some(42),
            player_id: Some(3),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["gameID"], "g-1");
        assert_eq!(value["playerID"], 3);
        let back: GameEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn optional_envelope_fields_default() {
        let event: GameEvent =
            serde_json::from_value(json!({"event": "CityFounded", "payload": [1, "Rome"]}))
                .unwrap();
        assert_eq!(event.game_id, None);
        assert_eq!(event.turn, None);
        assert_eq!(event.player_id, None);
    }
}
