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

//! Per-player read visibility for knowledge rows.
//!
//! Every timed or mutable knowledge row carries one small integer per major
//! civ slot. On the wire and in SQL these are the named columns
//! `Player0`..`Player21`; in memory they are a fixed-width vector.

use serde::{Deserialize, Serialize};

use crate::game::PlayerId;

/// Number of major civ slots Civ V supports; fixes the width of the
/// visibility vector and the set of `Player{i}` columns.
pub const MAX_MAJOR_CIVS: usize = 22;

/// How much of a row a given player may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Visibility {
    Invisible = 0,
    /// The row exists for this player but only projected fields are returned.
    Partial = 1,
    Full = 2,
}

impl Visibility {
    pub fn from_flag(flag: i64) -> Self {
        match flag {
            0 => Visibility::Invisible,
            1 => Visibility::Partial,
            _ => Visibility::Full,
        }
    }

    pub fn as_flag(&self) -> i64 {
        *self as i64
    }
}

/// Fixed-width visibility vector, one flag per major civ slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityFlags([u8; MAX_MAJOR_CIVS]);

impl Default for VisibilityFlags {
    /// No visibility for anyone.
    fn default() -> Self {
        Self([0; MAX_MAJOR_CIVS])
    }
}

impl VisibilityFlags {
    /// Full visibility for every slot.
    pub fn everyone() -> Self {
        Self([Visibility::Full as u8; MAX_MAJOR_CIVS])
    }

    /// Full visibility for exactly the given players, invisible otherwise.
    pub fn compose(players: &[PlayerId]) -> Self {
        let mut flags = Self::default();
        for &player in players {
            flags.set(player, Visibility::Full);
        }
        flags
    }

    pub fn get(&self, player: PlayerId) -> Visibility {
        if player < 0 || player as usize >= MAX_MAJOR_CIVS {
            return Visibility::Invisible;
        }
        Visibility::from_flag(self.0[player as usize] as i64)
    }

    pub fn set(&mut self, player: PlayerId, visibility: Visibility) {
        if player >= 0 && (player as usize) < MAX_MAJOR_CIVS {
            self.0[player as usize] = visibility as u8;
        }
    }

    pub fn is_visible_to(&self, player: PlayerId) -> bool {
        self.get(player) != Visibility::Invisible
    }

    /// Iterate `(column_name, flag)` pairs in slot order, for SQL binding.
    pub fn columns(&self) -> impl Iterator<Item = (String, i64)> + '_ {
        self.0
            .iter()
            .enumerate()
            .map(|(i, &flag)| (player_column(i), flag as i64))
    }
}

/// The SQL column name for a given slot index.
pub fn player_column(slot: usize) -> String {
    format!("Player{slot}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_grants_only_listed_players() {
        let flags = VisibilityFlags::compose(&[3, 7]);
        assert_eq!(flags.get(3), Visibility::Full);
        assert_eq!(flags.get(7), Visibility::Full);
        assert_eq!(flags.get(4), Visibility::Invisible);
        assert!(!flags.is_visible_to(0));
    }

    #[test]
    fn out_of_range_players_are_invisible() {
        let flags = VisibilityFlags::everyone();
        assert_eq!(flags.get(-1), Visibility::Invisible);
        assert_eq!(flags.get(MAX_MAJOR_CIVS as i32), Visibility::Invisible);
    }

    #[test]
    fn column_iteration_covers_all_slots() {
        let flags = VisibilityFlags::compose(&[0]);
        let cols: Vec<_> = flags.columns().collect();
        assert_eq!(cols.len(), MAX_MAJOR_CIVS);
        assert_eq!(cols[0], ("Player0".to_string(), 2));
        assert_eq!(cols[1], ("Player1".to_string(), 0));
    }
}
