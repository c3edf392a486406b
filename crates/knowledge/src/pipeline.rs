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

//! Schema-validated event ingestion.
//!
//! Each incoming `game_event` is checked against the registry: unknown
//! events are dropped with a log line, payloads that fail positional
//! decoding are dropped with a structured diagnostic carrying both forms,
//! and everything else lands in the `Events` table.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use vox_common::{GameEvent, SchemaRegistry, VisibilityFlags};

use crate::KnowledgeError;
use crate::database::{Database, StoredEvent};

/// What became of one ingested event.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Stored(StoredEvent),
    /// No schema registered; dropped.
    Unknown,
    /// Schema validation failed; dropped.
    Invalid,
}

pub struct EventPipeline {
    registry: SchemaRegistry,
    /// Chooses row visibility for a validated event. Defaults to
    /// everyone — the DLL already scopes what it emits.
    visibility_for: fn(&str, &Map<String, Value>) -> VisibilityFlags,
}

impl EventPipeline {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self {
            registry,
            visibility_for: |_, _| VisibilityFlags::everyone(),
        }
    }

    pub fn with_visibility(
        registry: SchemaRegistry,
        visibility_for: fn(&str, &Map<String, Value>) -> VisibilityFlags,
    ) -> Self {
        Self {
            registry,
            visibility_for,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Validate and store one event. Validation failures never surface as
    /// errors — only storage failures do.
    pub fn ingest(
        &self,
        db: &Database,
        event: &GameEvent,
    ) -> Result<IngestOutcome, KnowledgeError> {
        let Some(schema) = self.registry.get(&event.event) else {
            debug!(event = event.event, "dropping event with no registered schema");
            return Ok(IngestOutcome::Unknown);
        };

        let decoded = match schema.decode(&event.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    event = event.event,
                    raw = %event.payload,
                    error = %e,
                    "dropping event that failed schema validation"
                );
                return Ok(IngestOutcome::Invalid);
            }
        };

        let turn = event.turn.unwrap_or(0);
        let visibility = (self.visibility_for)(&event.event, &decoded);
        let payload = Value::Object(decoded);
        let id = db.store_game_event(&event.event, turn, &payload, &visibility)?;
        Ok(IngestOutcome::Stored(StoredEvent {
            id,
            turn,
            event: event.event.clone(),
            payload,
        }))
    }
}
