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

//! Envoy thread persistence: chat transcripts between users and dialogue
//! agents, stored alongside the rest of the game's knowledge.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use vox_common::{EnvoyMessage, EnvoyThread, MessageRole, PlayerId, ThreadMetadata, TurnNumber};

use crate::KnowledgeError;
use crate::database::Database;

impl Database {
    pub fn create_envoy_thread(&self, thread: &EnvoyThread) -> Result<(), KnowledgeError> {
        self.connection().execute(
            "INSERT INTO EnvoyThreads (Id, AgentName, GameId, PlayerId, Messages, CreatedAt, UpdatedAt, Turn) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                thread.id,
                thread.agent_name,
                thread.game_id,
                thread.player_id,
                serde_json::to_string(&thread.messages)?,
                thread.metadata.created_at.to_rfc3339(),
                thread.metadata.updated_at.to_rfc3339(),
                thread.metadata.turn,
            ],
        )?;
        Ok(())
    }

    pub fn get_envoy_thread(&self, id: &str) -> Result<Option<EnvoyThread>, KnowledgeError> {
        let row = self
            .connection()
            .query_row(
                "SELECT Id, AgentName, GameId, PlayerId, Messages, CreatedAt, UpdatedAt, Turn \
                 FROM EnvoyThreads WHERE Id = ?1",
                params![id],
                map_thread_row,
            )
            .optional()?;
        row.map(parse_thread).transpose()
    }

    /// Append one message, bumping the thread's `updated_at` and turn.
    pub fn append_envoy_message(
        &self,
        id: &str,
        role: MessageRole,
        content: &str,
        turn: TurnNumber,
    ) -> Result<(), KnowledgeError> {
        let Some(mut thread) = self.get_envoy_thread(id)? else {
            return Err(KnowledgeError::UnknownTable(format!("envoy thread {id}")));
        };
        thread.push_message(role, content, turn);
        self.connection().execute(
            "UPDATE EnvoyThreads SET Messages = ?1, UpdatedAt = ?2, Turn = ?3 WHERE Id = ?4",
            params![
                serde_json::to_string(&thread.messages)?,
                Utc::now().to_rfc3339(),
                turn,
                id,
            ],
        )?;
        Ok(())
    }

    pub fn list_envoy_threads(
        &self,
        player: PlayerId,
    ) -> Result<Vec<EnvoyThread>, KnowledgeError> {
        let mut stmt = self.connection().prepare(
            "SELECT Id, AgentName, GameId, PlayerId, Messages, CreatedAt, UpdatedAt, Turn \
             FROM EnvoyThreads WHERE PlayerId = ?1 ORDER BY UpdatedAt DESC",
        )?;
        let rows = stmt.query_map(params![player], map_thread_row)?;
        let mut threads = Vec::new();
        for row in rows {
            threads.push(parse_thread(row?)?);
        }
        Ok(threads)
    }
}

type ThreadRow = (String, String, String, i64, String, String, String, i64);

fn map_thread_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn parse_thread(row: ThreadRow) -> Result<EnvoyThread, KnowledgeError> {
    let (id, agent_name, game_id, player_id, messages, created_at, updated_at, turn) = row;
    let messages: Vec<EnvoyMessage> = serde_json::from_str(&messages)?;
    Ok(EnvoyThread {
        id,
        agent_name,
        game_id,
        player_id: player_id as PlayerId,
        messages,
        metadata: ThreadMetadata {
            created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
            updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
            turn,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::TableRegistry;

    #[test]
    fn thread_round_trip_with_messages() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(
            dir.path().join("envoy.db"),
            "envoy-test",
            TableRegistry::with_defaults(),
        )
        .unwrap();

        let thread = EnvoyThread::new("t-1", "envoy", "envoy-test", 3, 10);
        db.create_envoy_thread(&thread).unwrap();
        db.append_envoy_message("t-1", MessageRole::User, "Will you ally with me?", 10)
            .unwrap();
        db.append_envoy_message("t-1", MessageRole::Assistant, "Perhaps.", 10)
            .unwrap();

        let read = db.get_envoy_thread("t-1").unwrap().unwrap();
        assert_eq!(read.messages.len(), 2);
        assert_eq!(read.messages[0].role, MessageRole::User);
        assert_eq!(read.metadata.turn, 10);

        let listed = db.list_envoy_threads(3).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(db.list_envoy_threads(4).unwrap().is_empty());
    }
}
