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

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter, types::Value as SqlValue};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use vox_common::{MAX_MAJOR_CIVS, PlayerId, TurnNumber, Visibility, VisibilityFlags, player_column};

use crate::KnowledgeError;
use crate::tables::{KnowledgeKind, TableRegistry, TableSpec};

/// Outcome of a mutable write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutableWrite {
    /// The diff against the latest version was empty; nothing written.
    Unchanged,
    Inserted { version: i64 },
}

/// One item of a timed batch write.
#[derive(Debug, Clone)]
pub struct TimedItem {
    pub key: i64,
    pub payload: Value,
    pub visibility: VisibilityFlags,
}

/// A validated game event as stored, with its row id — the `latestID`
/// watermark turn gating uses.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: i64,
    pub turn: TurnNumber,
    pub event: String,
    pub payload: Value,
}

/// One game's SQLite database. All on-disk mutation for that game goes
/// through this handle.
pub struct Database {
    conn: Connection,
    game_id: String,
    path: PathBuf,
    registry: TableRegistry,
}

impl Database {
    /// Open (or create) the file and run idempotent schema creation for
    /// every registered table plus the built-in `Events`, `GameMetadata`,
    /// and `EnvoyThreads` tables.
    pub fn open(
        path: impl AsRef<Path>,
        game_id: impl Into<String>,
        registry: TableRegistry,
    ) -> Result<Self, KnowledgeError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(KnowledgeError::Io)?;
        }
        let game_id = game_id.into();
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let db = Self {
            conn,
            game_id: game_id.clone(),
            path,
            registry,
        };
        db.create_schema()?;
        db.metadata_set("gameId", &game_id)?;
        db.metadata_set("lastSync", &Utc::now().to_rfc3339())?;
        info!(game_id, path = ?db.path, "knowledge store open");
        Ok(db)
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create_schema(&self) -> Result<(), KnowledgeError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS GameMetadata (\
             Key TEXT PRIMARY KEY, \
             Value TEXT NOT NULL);",
        )?;

        let mut events_ddl = String::from(
            "CREATE TABLE IF NOT EXISTS Events (\
             ID INTEGER PRIMARY KEY AUTOINCREMENT, \
             Turn INTEGER NOT NULL, \
             Type TEXT NOT NULL, \
             Payload TEXT NOT NULL, \
             CreatedAt TEXT NOT NULL",
        );
        for i in 0..MAX_MAJOR_CIVS {
            events_ddl.push_str(&format!(", {} INTEGER NOT NULL DEFAULT 0", player_column(i)));
        }
        events_ddl.push(')');
        self.conn.execute(&events_ddl, [])?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_type ON Events (Type)",
            [],
        )?;
        for i in 0..MAX_MAJOR_CIVS {
            self.conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS idx_events_turn_p{i} ON Events (Turn, {})",
                    player_column(i)
                ),
                [],
            )?;
        }

        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS EnvoyThreads (\
             Id TEXT PRIMARY KEY, \
             AgentName TEXT NOT NULL, \
             GameId TEXT NOT NULL, \
             PlayerId INTEGER NOT NULL, \
             Messages TEXT NOT NULL, \
             CreatedAt TEXT NOT NULL, \
             UpdatedAt TEXT NOT NULL, \
             Turn INTEGER NOT NULL);",
        )?;

        for spec in self.registry.specs() {
            self.conn.execute(&spec.create_table_sql(), [])?;
            for index in spec.create_index_sql() {
                self.conn.execute(&index, [])?;
            }
        }
        Ok(())
    }

    fn spec(&self, table: &str) -> Result<TableSpec, KnowledgeError> {
        self.registry
            .get(table)
            .cloned()
            .ok_or_else(|| KnowledgeError::UnknownTable(table.to_string()))
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    pub fn metadata_set(&self, key: &str, value: &str) -> Result<(), KnowledgeError> {
        self.conn.execute(
            "INSERT INTO GameMetadata (Key, Value) VALUES (?1, ?2) \
             ON CONFLICT(Key) DO UPDATE SET Value = excluded.Value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn metadata_get(&self, key: &str) -> Result<Option<String>, KnowledgeError> {
        Ok(self
            .conn
            .query_row(
                "SELECT Value FROM GameMetadata WHERE Key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    // ------------------------------------------------------------------
    // Timed knowledge
    // ------------------------------------------------------------------

    pub fn store_timed_knowledge(
        &self,
        table: &str,
        key: i64,
        turn: TurnNumber,
        payload: &Value,
        visibility: &VisibilityFlags,
    ) -> Result<i64, KnowledgeError> {
        let spec = self.spec(table)?;
        if spec.kind != KnowledgeKind::Timed {
            return Err(KnowledgeError::WrongKind {
                table: table.to_string(),
                expected: "timed",
            });
        }
        self.insert_flagged_row(table, key, turn, payload, visibility, None)
    }

    pub fn store_timed_knowledge_batch(
        &mut self,
        table: &str,
        turn: TurnNumber,
        items: &[TimedItem],
    ) -> Result<Vec<i64>, KnowledgeError> {
        let spec = self.spec(table)?;
        if spec.kind != KnowledgeKind::Timed {
            return Err(KnowledgeError::WrongKind {
                table: table.to_string(),
                expected: "timed",
            });
        }
        let tx = self.conn.transaction()?;
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            ids.push(insert_flagged_row_on(
                &tx,
                table,
                item.key,
                turn,
                &item.payload,
                &item.visibility,
                None,
            )?);
        }
        tx.commit()?;
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Mutable knowledge
    // ------------------------------------------------------------------

    /// Insert a new version of `key` iff its payload differs from the
    /// current latest, flipping the prior row's `IsLatest` in the same
    /// transaction.
    pub fn store_mutable_knowledge(
        &mut self,
        table: &str,
        key: i64,
        turn: TurnNumber,
        payload: &Value,
        visibility: &VisibilityFlags,
        ignore_fields: &[&str],
    ) -> Result<MutableWrite, KnowledgeError> {
        let spec = self.spec(table)?;
        if spec.kind != KnowledgeKind::Mutable {
            return Err(KnowledgeError::WrongKind {
                table: table.to_string(),
                expected: "mutable",
            });
        }
        let tx = self.conn.transaction()?;
        let result = store_mutable_on(&tx, table, key, turn, payload, visibility, ignore_fields)?;
        tx.commit()?;
        Ok(result)
    }

    /// Batch variant: same semantics per item, one transaction overall.
    pub fn store_mutable_knowledge_batch(
        &mut self,
        table: &str,
        turn: TurnNumber,
        items: &[TimedItem],
        ignore_fields: &[&str],
    ) -> Result<Vec<MutableWrite>, KnowledgeError> {
        let spec = self.spec(table)?;
        if spec.kind != KnowledgeKind::Mutable {
            return Err(KnowledgeError::WrongKind {
                table: table.to_string(),
                expected: "mutable",
            });
        }
        let tx = self.conn.transaction()?;
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            results.push(store_mutable_on(
                &tx,
                table,
                item.key,
                turn,
                &item.payload,
                &item.visibility,
                ignore_fields,
            )?);
        }
        tx.commit()?;
        Ok(results)
    }

    /// Latest payload for `key`, metadata stripped. `None` when the key has
    /// never been written.
    pub fn get_mutable_knowledge(
        &self,
        table: &str,
        key: i64,
    ) -> Result<Option<Value>, KnowledgeError> {
        self.spec(table)?;
        let payload: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT Payload FROM {table} WHERE Key = ?1 AND IsLatest = 1"),
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(KnowledgeError::from))
            .transpose()
    }

    /// Every version of `key`, oldest first, with version metadata kept —
    /// this is the one read that surfaces `Version` and `Changes`.
    pub fn get_knowledge_history(
        &self,
        table: &str,
        key: i64,
    ) -> Result<Vec<Value>, KnowledgeError> {
        self.spec(table)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT Version, Turn, Payload, Changes FROM {table} WHERE Key = ?1 ORDER BY Version"
        ))?;
        let rows = stmt.query_map(params![key], |row| {
            let version: i64 = row.get(0)?;
            let turn: i64 = row.get(1)?;
            let payload: String = row.get(2)?;
            let changes: Option<String> = row.get(3)?;
            Ok((version, turn, payload, changes))
        })?;
        let mut history = Vec::new();
        for row in rows {
            let (version, turn, payload, changes) = row?;
            let changes: Value = match changes {
                Some(c) => serde_json::from_str(&c)?,
                None => Value::Null,
            };
            history.push(json!({
                "Version": version,
                "Turn": turn,
                "Payload": serde_json::from_str::<Value>(&payload)?,
                "Changes": changes,
            }));
        }
        Ok(history)
    }

    // ------------------------------------------------------------------
    // Public knowledge
    // ------------------------------------------------------------------

    pub fn store_public_knowledge(
        &self,
        table: &str,
        unique_key: &str,
        data: &Value,
    ) -> Result<(), KnowledgeError> {
        let spec = self.spec(table)?;
        let KnowledgeKind::Public { unique_key: column } = spec.kind else {
            return Err(KnowledgeError::WrongKind {
                table: table.to_string(),
                expected: "public",
            });
        };
        self.conn.execute(
            &format!(
                "INSERT INTO {table} ({column}, Data, CreatedAt) VALUES (?1, ?2, ?3) \
                 ON CONFLICT({column}) DO UPDATE SET Data = excluded.Data"
            ),
            params![unique_key, data.to_string(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_public_knowledge(
        &self,
        table: &str,
        unique_key: &str,
    ) -> Result<Option<Value>, KnowledgeError> {
        let spec = self.spec(table)?;
        let KnowledgeKind::Public { unique_key: column } = spec.kind else {
            return Err(KnowledgeError::WrongKind {
                table: table.to_string(),
                expected: "public",
            });
        };
        let data: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT Data FROM {table} WHERE {column} = ?1"),
                params![unique_key],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|d| serde_json::from_str(&d).map_err(KnowledgeError::from))
            .transpose()
    }

    /// Full scan, metadata stripped: just the domain objects.
    pub fn get_all_public_knowledge(&self, table: &str) -> Result<Vec<Value>, KnowledgeError> {
        let spec = self.spec(table)?;
        if !matches!(spec.kind, KnowledgeKind::Public { .. }) {
            return Err(KnowledgeError::WrongKind {
                table: table.to_string(),
                expected: "public",
            });
        }
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT Data FROM {table} ORDER BY ID"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Visibility-scoped reads
    // ------------------------------------------------------------------

    /// The latest row for `key` as `player` may see it: `None` when absent
    /// or invisible, the projected subset under partial visibility, the
    /// full payload otherwise.
    pub fn read_player_knowledge(
        &self,
        player: PlayerId,
        table: &str,
        key: i64,
    ) -> Result<Option<Value>, KnowledgeError> {
        let spec = self.spec(table)?;
        if player < 0 || player as usize >= MAX_MAJOR_CIVS {
            return Ok(None);
        }
        let column = player_column(player as usize);
        let sql = match spec.kind {
            KnowledgeKind::Mutable => format!(
                "SELECT Payload, {column} FROM {table} WHERE Key = ?1 AND IsLatest = 1"
            ),
            KnowledgeKind::Timed => format!(
                "SELECT Payload, {column} FROM {table} WHERE Key = ?1 ORDER BY ID DESC LIMIT 1"
            ),
            KnowledgeKind::Public { .. } => {
                return Err(KnowledgeError::WrongKind {
                    table: table.to_string(),
                    expected: "timed or mutable",
                });
            }
        };
        let row: Option<(String, i64)> = self
            .conn
            .query_row(&sql, params![key], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        let Some((payload, flag)) = row else {
            return Ok(None);
        };
        match Visibility::from_flag(flag) {
            Visibility::Invisible => Ok(None),
            Visibility::Partial => {
                let payload: Value = serde_json::from_str(&payload)?;
                Ok(Some(project_fields(&payload, spec.partial_fields)))
            }
            Visibility::Full => Ok(Some(serde_json::from_str(&payload)?)),
        }
    }

    /// Every current row of `table` as `player` may see it: latest versions
    /// for mutable tables, newest-first rows for timed ones. Invisible rows
    /// are omitted; partially visible rows are projected.
    pub fn read_player_knowledge_all(
        &self,
        player: PlayerId,
        table: &str,
    ) -> Result<Vec<Value>, KnowledgeError> {
        let spec = self.spec(table)?;
        if player < 0 || player as usize >= MAX_MAJOR_CIVS {
            return Ok(Vec::new());
        }
        let column = player_column(player as usize);
        let sql = match spec.kind {
            KnowledgeKind::Mutable => format!(
                "SELECT Payload, {column} FROM {table} WHERE IsLatest = 1 AND {column} != 0 \
                 ORDER BY Key"
            ),
            KnowledgeKind::Timed => format!(
                "SELECT Payload, {column} FROM {table} WHERE {column} != 0 \
                 ORDER BY ID DESC LIMIT 100"
            ),
            KnowledgeKind::Public { .. } => {
                return Err(KnowledgeError::WrongKind {
                    table: table.to_string(),
                    expected: "timed or mutable",
                });
            }
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (payload, flag) = row?;
            let payload: Value = serde_json::from_str(&payload)?;
            match Visibility::from_flag(flag) {
                Visibility::Invisible => {}
                Visibility::Partial => out.push(project_fields(&payload, spec.partial_fields)),
                Visibility::Full => out.push(payload),
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Append one validated event. The returned row id is the event-stream
    /// watermark (`latestID`).
    pub fn store_game_event(
        &self,
        event: &str,
        turn: TurnNumber,
        payload: &Value,
        visibility: &VisibilityFlags,
    ) -> Result<i64, KnowledgeError> {
        let mut columns = String::from("Turn, Type, Payload, CreatedAt");
        let mut placeholders = String::from("?1, ?2, ?3, ?4");
        let mut values: Vec<SqlValue> = vec![
            SqlValue::Integer(turn),
            SqlValue::Text(event.to_string()),
            SqlValue::Text(payload.to_string()),
            SqlValue::Text(Utc::now().to_rfc3339()),
        ];
        for (i, (column, flag)) in visibility.columns().enumerate() {
            columns.push_str(&format!(", {column}"));
            placeholders.push_str(&format!(", ?{}", i + 5));
            values.push(SqlValue::Integer(flag));
        }
        self.conn.execute(
            &format!("INSERT INTO Events ({columns}) VALUES ({placeholders})"),
            params_from_iter(values),
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Events visible to `player` in the id window `(after, before]`.
    /// `before = None` means no upper bound.
    pub fn read_events_window(
        &self,
        player: PlayerId,
        after: i64,
        before: Option<i64>,
    ) -> Result<Vec<StoredEvent>, KnowledgeError> {
        if player < 0 || player as usize >= MAX_MAJOR_CIVS {
            return Ok(Vec::new());
        }
        let column = player_column(player as usize);
        let sql = format!(
            "SELECT ID, Turn, Type, Payload FROM Events \
             WHERE ID > ?1 AND ID <= ?2 AND {column} != 0 ORDER BY ID"
        );
        let before = before.unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![after, before], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut events = Vec::new();
        for row in rows {
            let (id, turn, event, payload) = row?;
            events.push(StoredEvent {
                id,
                turn,
                event,
                payload: serde_json::from_str(&payload)?,
            });
        }
        Ok(events)
    }

    /// Current event-stream watermark; 0 when no events have been stored.
    pub fn latest_event_id(&self) -> Result<i64, KnowledgeError> {
        Ok(self
            .conn
            .query_row("SELECT COALESCE(MAX(ID), 0) FROM Events", [], |row| {
                row.get(0)
            })?)
    }

    // ------------------------------------------------------------------
    // Shared row plumbing
    // ------------------------------------------------------------------

    fn insert_flagged_row(
        &self,
        table: &str,
        key: i64,
        turn: TurnNumber,
        payload: &Value,
        visibility: &VisibilityFlags,
        versioning: Option<(i64, Value)>,
    ) -> Result<i64, KnowledgeError> {
        insert_flagged_row_on(&self.conn, table, key, turn, payload, visibility, versioning)
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Insert into a timed or mutable table on any connection-like handle
/// (plain connection or open transaction).
fn insert_flagged_row_on(
    conn: &Connection,
    table: &str,
    key: i64,
    turn: TurnNumber,
    payload: &Value,
    visibility: &VisibilityFlags,
    versioning: Option<(i64, Value)>,
) -> Result<i64, KnowledgeError> {
    let mut columns = String::from("Turn, Key, Payload, CreatedAt");
    let mut values: Vec<SqlValue> = vec![
        SqlValue::Integer(turn),
        SqlValue::Integer(key),
        SqlValue::Text(payload.to_string()),
        SqlValue::Text(Utc::now().to_rfc3339()),
    ];
    if let Some((version, changes)) = versioning {
        columns.push_str(", Version, IsLatest, Changes");
        values.push(SqlValue::Integer(version));
        values.push(SqlValue::Integer(1));
        values.push(match changes {
            Value::Null => SqlValue::Null,
            other => SqlValue::Text(other.to_string()),
        });
    }
    for (column, flag) in visibility.columns() {
        columns.push_str(&format!(", {column}"));
        values.push(SqlValue::Integer(flag));
    }
    let placeholders = (1..=values.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(
        &format!("INSERT INTO {table} ({columns}) VALUES ({placeholders})"),
        params_from_iter(values),
    )?;
    Ok(conn.last_insert_rowid())
}

fn store_mutable_on(
    conn: &Connection,
    table: &str,
    key: i64,
    turn: TurnNumber,
    payload: &Value,
    visibility: &VisibilityFlags,
    ignore_fields: &[&str],
) -> Result<MutableWrite, KnowledgeError> {
    let Some(next) = payload.as_object() else {
        return Err(KnowledgeError::PayloadNotObject {
            table: table.to_string(),
            key: key.to_string(),
        });
    };

    let prev: Option<(i64, i64, String)> = conn
        .query_row(
            &format!("SELECT ID, Version, Payload FROM {table} WHERE Key = ?1 AND IsLatest = 1"),
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let (version, changes) = match &prev {
        Some((_, prev_version, prev_payload)) => {
            let prev_value: Value = serde_json::from_str(prev_payload)?;
            let prev_object = prev_value.as_object().cloned().unwrap_or_default();
            let changes = compute_changes(&prev_object, next, ignore_fields);
            if changes.is_empty() {
                debug!(table, key, "mutable write skipped, no changes");
                return Ok(MutableWrite::Unchanged);
            }
            (prev_version + 1, Value::Array(changes))
        }
        None => (1, Value::Null),
    };

    insert_flagged_row_on(conn, table, key, turn, payload, visibility, Some((version, changes)))?;
    if let Some((prev_id, _, _)) = prev {
        conn.execute(
            &format!("UPDATE {table} SET IsLatest = 0 WHERE ID = ?1"),
            params![prev_id],
        )?;
    }
    Ok(MutableWrite::Inserted { version })
}

/// Field-wise diff of two payload objects, skipping `ignore_fields`. Each
/// entry is `{field, from, to}`; a field missing on one side diffs against
/// JSON null.
pub(crate) fn compute_changes(
    prev: &Map<String, Value>,
    next: &Map<String, Value>,
    ignore_fields: &[&str],
) -> Vec<Value> {
    let mut fields: Vec<&String> = prev.keys().chain(next.keys()).collect();
    fields.sort();
    fields.dedup();

    let mut changes = Vec::new();
    for field in fields {
        if ignore_fields.contains(&field.as_str()) {
            continue;
        }
        let from = prev.get(field).cloned().unwrap_or(Value::Null);
        let to = next.get(field).cloned().unwrap_or(Value::Null);
        if from != to {
            changes.push(json!({"field": field, "from": from, "to": to}));
        }
    }
    changes
}

fn project_fields(payload: &Value, fields: &[&str]) -> Value {
    let Some(object) = payload.as_object() else {
        return Value::Object(Map::new());
    };
    let projected: Map<String, Value> = object
        .iter()
        .filter(|(k, _)| fields.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Value::Object(projected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn open_test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(
            dir.path().join("test-game.db"),
            "test-game",
            TableRegistry::with_defaults(),
        )
        .unwrap();
        (dir, db)
    }

    #[test]
    fn open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.db");
        let db = Database::open(&path, "g", TableRegistry::with_defaults()).unwrap();
        drop(db);
        let db = Database::open(&path, "g", TableRegistry::with_defaults()).unwrap();
        assert_eq!(db.metadata_get("gameId").unwrap().unwrap(), "g");
    }

    #[test]
    fn mutable_round_trip_strips_metadata() {
        let (_dir, mut db) = open_test_db();
        let payload = json!({"Name": "X", "OwnerID": 3});
        let write = db
            .store_mutable_knowledge(
                "CityInformations",
                42,
                1,
                &payload,
                &VisibilityFlags::everyone(),
                &[],
            )
            .unwrap();
        assert_eq!(write, MutableWrite::Inserted { version: 1 });

        let read = db.get_mutable_knowledge("CityInformations", 42).unwrap();
        assert_eq!(read, Some(payload));
    }

    #[test]
    fn unchanged_payload_writes_nothing() {
        let (_dir, mut db) = open_test_db();
        let payload = json!({"Name": "Rome", "Population": 3});
        let vis = VisibilityFlags::everyone();
        db.store_mutable_knowledge("CityInformations", 1, 1, &payload, &vis, &[])
            .unwrap();
        let write = db
            .store_mutable_knowledge("CityInformations", 1, 2, &payload, &vis, &[])
            .unwrap();
        assert_eq!(write, MutableWrite::Unchanged);

        let history = db.get_knowledge_history("CityInformations", 1).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn versions_are_contiguous_and_single_latest() {
        let (_dir, mut db) = open_test_db();
        let vis = VisibilityFlags::everyone();
        for population in 1..=4 {
            db.store_mutable_knowledge(
                "CityInformations",
                9,
                population,
                &json!({"Name": "Rome", "Population": population}),
                &vis,
                &[],
            )
            .unwrap();
        }
        let history = db.get_knowledge_history("CityInformations", 9).unwrap();
        let versions: Vec<i64> = history
            .iter()
            .map(|h| h["Version"].as_i64().unwrap())
            .collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);

        // Exactly one IsLatest row.
        let latest_count: i64 = db
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM CityInformations WHERE Key = 9 AND IsLatest = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(latest_count, 1);
    }

    #[test]
    fn ignored_fields_do_not_produce_versions() {
        let (_dir, mut db) = open_test_db();
        let vis = VisibilityFlags::everyone();
        db.store_mutable_knowledge(
            "CityInformations",
            2,
            1,
            &json!({"Name": "Rome", "LastSeen": 1}),
            &vis,
            &["LastSeen"],
        )
        .unwrap();
        let write = db
            .store_mutable_knowledge(
                "CityInformations",
                2,
                2,
                &json!({"Name": "Rome", "LastSeen": 2}),
                &vis,
                &["LastSeen"],
            )
            .unwrap();
        assert_eq!(write, MutableWrite::Unchanged);
    }

    #[test]
    fn changes_record_field_level_diffs() {
        let prev = json!({"Name": "Rome", "Population": 3})
            .as_object()
            .cloned()
            .unwrap();
        let next = json!({"Name": "Rome", "Population": 4, "Walls": true})
            .as_object()
            .cloned()
            .unwrap();
        let changes = compute_changes(&prev, &next, &[]);
        assert_eq!(
            changes,
            vec![
                json!({"field": "Population", "from": 3, "to": 4}),
                json!({"field": "Walls", "from": null, "to": true}),
            ]
        );
    }

    #[test]
    fn visibility_gates_player_reads() {
        let (_dir, mut db) = open_test_db();
        db.store_mutable_knowledge(
            "CityInformations",
            42,
            5,
            &json!({"Name": "X", "OwnerID": 3}),
            &VisibilityFlags::compose(&[3]),
            &[],
        )
        .unwrap();

        let visible = db.read_player_knowledge(3, "CityInformations", 42).unwrap();
        assert_eq!(visible, Some(json!({"Name": "X", "OwnerID": 3})));

        let hidden = db.read_player_knowledge(4, "CityInformations", 42).unwrap();
        assert_eq!(hidden, None);
    }

    #[test]
    fn partial_visibility_projects_fields() {
        let (_dir, mut db) = open_test_db();
        let mut vis = VisibilityFlags::default();
        vis.set(5, Visibility::Partial);
        db.store_mutable_knowledge(
            "CityInformations",
            7,
            5,
            &json!({"Name": "Carthage", "OwnerID": 2, "X": 10, "Y": 20, "Garrison": 8}),
            &vis,
            &[],
        )
        .unwrap();

        let partial = db
            .read_player_knowledge(5, "CityInformations", 7)
            .unwrap()
            .unwrap();
        assert_eq!(
            partial,
            json!({"Name": "Carthage", "OwnerID": 2, "X": 10, "Y": 20})
        );
    }

    #[test]
    fn public_knowledge_upserts_on_unique_key() {
        let (_dir, db) = open_test_db();
        db.store_public_knowledge("PlayerInformations", "3", &json!({"Civilization": "Rome"}))
            .unwrap();
        db.store_public_knowledge(
            "PlayerInformations",
            "3",
            &json!({"Civilization": "Rome", "Leader": "Augustus"}),
        )
        .unwrap();

        let all = db.get_all_public_knowledge("PlayerInformations").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["Leader"], "Augustus");
    }

    #[test]
    fn timed_batch_is_atomic_and_ordered() {
        let (_dir, mut db) = open_test_db();
        let items: Vec<TimedItem> = (0..3)
            .map(|i| TimedItem {
                key: i,
                payload: json!({"Report": i}),
                visibility: VisibilityFlags::everyone(),
            })
            .collect();
        let ids = db
            .store_timed_knowledge_batch("MilitaryReports", 10, &items)
            .unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn event_window_respects_visibility_and_bounds() {
        let (_dir, db) = open_test_db();
        let everyone = VisibilityFlags::everyone();
        let only_3 = VisibilityFlags::compose(&[3]);

        let first = db
            .store_game_event("WarDeclared", 5, &json!({"AttackerID": 1}), &everyone)
            .unwrap();
        let second = db
            .store_game_event("CityFounded", 5, &json!({"PlayerID": 3}), &only_3)
            .unwrap();
        let third = db
            .store_game_event("PeaceMade", 6, &json!({"PlayerID": 1}), &everyone)
            .unwrap();

        assert_eq!(db.latest_event_id().unwrap(), third);

        // Player 4 cannot see the second event.
        let window = db.read_events_window(4, 0, None).unwrap();
        assert_eq!(
            window.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![first, third]
        );

        // Window bounds are (after, before].
        let window = db.read_events_window(3, first, Some(second)).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].id, second);
    }
}
