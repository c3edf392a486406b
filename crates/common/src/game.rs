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
use std::collections::HashMap;

/// A major-civ slot index as the game DLL reports it.
pub type PlayerId = i32;

/// Turn counter as reported by the game.
pub type TurnNumber = i64;

/// Which game, which turn. A change in `game_id` means the player loaded a
/// save or started a new game, and every per-game resource (knowledge store,
/// agent runners) must be torn down and rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameIdentity {
    #[serde(rename = "gameID")]
    pub game_id: String,
    pub turn: TurnNumber,
}

impl GameIdentity {
    pub fn new(game_id: impl Into<String>, turn: TurnNumber) -> Self {
        Self {
            game_id: game_id.into(),
            turn,
        }
    }

    /// True when `other` refers to a different game altogether, as opposed to
    /// a later turn of the same one.
    pub fn is_context_switch(&self, other: &GameIdentity) -> bool {
        self.game_id != other.game_id
    }
}

/// Orchestrator-side snapshot of everything an agent saw for one turn.
/// Indexed by turn number inside `StrategistParameters`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameState {
    #[serde(default)]
    pub players: Value,
    #[serde(default)]
    pub events: Value,
    #[serde(default)]
    pub cities: Value,
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub military: Value,
    #[serde(default)]
    pub victory: Value,
    /// Free-form per-agent reports, keyed by agent name.
    #[serde(default)]
    pub reports: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_switch_is_game_id_only() {
        let a = GameIdentity::new("alpha", 10);
        let b = GameIdentity::new("alpha", 11);
        let c = GameIdentity::new("beta", 10);
        assert!(!a.is_context_switch(&b));
        assert!(a.is_context_switch(&c));
    }
}
