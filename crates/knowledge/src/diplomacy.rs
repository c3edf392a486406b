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

//! Visibility derived from diplomatic state.

use serde::{Deserialize, Serialize};

use vox_common::{PlayerId, Visibility};

/// The slice of a player's diplomatic state visibility derivation needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    #[serde(rename = "PlayerID")]
    pub player_id: PlayerId,
    #[serde(rename = "TeamID")]
    pub team_id: i32,
    #[serde(rename = "MetPlayers", default)]
    pub met_players: Vec<PlayerId>,
}

/// How much of `target`'s state `viewer` may see: everything of their own
/// (and their team's), partial knowledge of civs they have met, nothing of
/// civs they have not.
pub fn player_visibility(
    summaries: &[PlayerSummary],
    viewer: PlayerId,
    target: PlayerId,
) -> Visibility {
    if viewer == target {
        return Visibility::Full;
    }
    let Some(viewer_summary) = summaries.iter().find(|s| s.player_id == viewer) else {
        return Visibility::Invisible;
    };
    if let Some(target_summary) = summaries.iter().find(|s| s.player_id == target)
        && target_summary.team_id == viewer_summary.team_id
    {
        return Visibility::Full;
    }
    if viewer_summary.met_players.contains(&target) {
        Visibility::Partial
    } else {
        Visibility::Invisible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summaries() -> Vec<PlayerSummary> {
        vec![
            PlayerSummary {
                player_id: 0,
                team_id: 0,
                met_players: vec![1],
            },
            PlayerSummary {
                player_id: 1,
                team_id: 1,
                met_players: vec![0],
            },
            PlayerSummary {
                player_id: 2,
                team_id: 0,
                met_players: vec![],
            },
            PlayerSummary {
                player_id: 3,
                team_id: 3,
                met_players: vec![],
            },
        ]
    }

    #[test]
    fn self_and_teammates_see_everything() {
        let s = summaries();
        assert_eq!(player_visibility(&s, 0, 0), Visibility::Full);
        assert_eq!(player_visibility(&s, 0, 2), Visibility::Full);
    }

    #[test]
    fn met_players_see_partially() {
        let s = summaries();
        assert_eq!(player_visibility(&s, 0, 1), Visibility::Partial);
    }

    #[test]
    fn unmet_players_see_nothing() {
        let s = summaries();
        assert_eq!(player_visibility(&s, 0, 3), Visibility::Invisible);
        assert_eq!(player_visibility(&s, 3, 0), Visibility::Invisible);
    }
}
