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

//! Persisted chat sessions between a user and a dialogue agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::{PlayerId, TurnNumber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvoyMessage {
    pub role: MessageRole,
    pub content: String,
    pub datetime: DateTime<Utc>,
    pub turn: TurnNumber,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turn: TurnNumber,
}

/// A chat session: which agent, which game, which player, and the message
/// transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvoyThread {
    pub id: String,
    pub agent_name: String,
    pub game_id: String,
    pub player_id: PlayerId,
    pub messages: Vec<EnvoyMessage>,
    pub metadata: ThreadMetadata,
}

impl EnvoyThread {
    pub fn new(
        id: impl Into<String>,
        agent_name: impl Into<String>,
        game_id: impl Into<String>,
        player_id: PlayerId,
        turn: TurnNumber,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_name: agent_name.into(),
            game_id: game_id.into(),
            player_id,
            messages: Vec::new(),
            metadata: ThreadMetadata {
                created_at: now,
                updated_at: now,
                turn,
            },
        }
    }

    pub fn push_message(&mut self, role: MessageRole, content: impl Into<String>, turn: TurnNumber) {
        let now = Utc::now();
        self.messages.push(EnvoyMessage {
            role,
            content: content.into(),
            datetime: now,
            turn,
        });
        self.metadata.updated_at = now;
        self.metadata.turn = turn;
    }
}
