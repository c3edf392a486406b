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

//! The per-game knowledge store and its event ingestion pipeline.
//!
//! One SQLite file per game id, holding three knowledge kinds: public facts
//! everyone can read, turn-stamped timed records with per-player visibility
//! flags, and mutable records that version themselves with field-wise diffs.
//! Game events arrive as positional arrays, are decoded and validated
//! against their registered schemas, and land in the `Events` table; the
//! event row id is the `latestID` watermark the orchestrator gates turns on.

mod database;
mod diplomacy;
mod envoy;
mod manager;
mod pipeline;
mod tables;

pub use database::{Database, MutableWrite, StoredEvent, TimedItem};
pub use diplomacy::{PlayerSummary, player_visibility};
pub use manager::{KnowledgeManager, KnowledgeManagerConfig};
pub use pipeline::{EventPipeline, IngestOutcome};
pub use tables::{KnowledgeKind, TableRegistry, TableSpec};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("table {table} is not {expected} knowledge")]
    WrongKind {
        table: String,
        expected: &'static str,
    },
    #[error("payload for {table}/{key} must be a JSON object")]
    PayloadNotObject { table: String, key: String },
    #[error("no active store")]
    NoActiveStore,
    #[error("io error: {0}")]
    Io(std::io::Error),
    #[error("archive failed: {0}")]
    Archive(std::io::Error),
}
