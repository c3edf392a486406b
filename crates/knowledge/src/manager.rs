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

//! Lifecycle owner of the active per-game store.
//!
//! One store is active per process. A change of game id — observed on any
//! incoming event — closes the current store and opens `data/{game_id}.db`
//! for the new one. A background task persists `{turn, lastSave}` metadata
//! on an interval; shutdown performs a final save before closing.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use vox_common::{GameEvent, GameIdentity, SchemaRegistry, TurnNumber};

use crate::KnowledgeError;
use crate::database::Database;
use crate::pipeline::{EventPipeline, IngestOutcome};
use crate::tables::TableRegistry;

#[derive(Clone)]
pub struct KnowledgeManagerConfig {
    /// Directory holding the per-game `.db` files.
    pub data_dir: PathBuf,
    /// Where archived games land, under one subdirectory per experiment.
    pub archive_dir: PathBuf,
    /// Directory the game writes `.Civ5Save` files into, for archiving.
    pub saves_dir: Option<PathBuf>,
    pub auto_save_interval: Duration,
    pub tables: TableRegistry,
    pub schemas: SchemaRegistry,
}

impl Default for KnowledgeManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            archive_dir: PathBuf::from("archive"),
            saves_dir: None,
            auto_save_interval: Duration::from_secs(30),
            tables: TableRegistry::with_defaults(),
            schemas: SchemaRegistry::with_defaults(),
        }
    }
}

struct ActiveStore {
    db: Database,
    identity: GameIdentity,
}

struct Inner {
    config: KnowledgeManagerConfig,
    pipeline: EventPipeline,
    active: Mutex<Option<ActiveStore>>,
    autosave: CancellationToken,
}

#[derive(Clone)]
pub struct KnowledgeManager {
    inner: Arc<Inner>,
}

impl KnowledgeManager {
    pub fn new(config: KnowledgeManagerConfig) -> Self {
        let pipeline = EventPipeline::new(config.schemas.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                pipeline,
                active: Mutex::new(None),
                autosave: CancellationToken::new(),
            }),
        }
    }

    /// Open the store for `game_id`, closing any previously active one.
    /// Re-entry on the same game id only refreshes the turn counter.
    pub async fn initialize(
        &self,
        game_id: &str,
        turn: TurnNumber,
    ) -> Result<(), KnowledgeError> {
        let mut active = self.inner.active.lock().await;
        if let Some(store) = active.as_mut() {
            if store.identity.game_id == game_id {
                store.identity.turn = turn;
                return Ok(());
            }
            info!(
                from = store.identity.game_id,
                to = game_id,
                "game context switch, closing store"
            );
            save_metadata(&store.db, store.identity.turn)?;
        }
        let path = self.inner.config.data_dir.join(format!("{game_id}.db"));
        let db = Database::open(path, game_id, self.inner.config.tables.clone())?;
        *active = Some(ActiveStore {
            db,
            identity: GameIdentity::new(game_id, turn),
        });
        Ok(())
    }

    pub async fn identity(&self) -> Option<GameIdentity> {
        self.inner
            .active
            .lock()
            .await
            .as_ref()
            .map(|store| store.identity.clone())
    }

    /// Detect a game-id change on an incoming event and switch stores.
    /// Returns the new identity when a switch (or first open) happened.
    pub async fn check_game_context(
        &self,
        event: &GameEvent,
    ) -> Result<Option<GameIdentity>, KnowledgeError> {
        let Some(event_game_id) = &event.game_id else {
            return Ok(None);
        };
        let turn = event.turn.unwrap_or(0);
        let current = self.identity().await;
        match current {
            Some(identity) if identity.game_id == *event_game_id => Ok(None),
            _ => {
                self.initialize(event_game_id, turn).await?;
                Ok(Some(GameIdentity::new(event_game_id.clone(), turn)))
            }
        }
    }

    /// Run one event through context detection and the validation pipeline.
    pub async fn ingest_event(
        &self,
        event: &GameEvent,
    ) -> Result<IngestOutcome, KnowledgeError> {
        self.check_game_context(event).await?;
        let mut active = self.inner.active.lock().await;
        let store = active.as_mut().ok_or(KnowledgeError::NoActiveStore)?;
        if let Some(turn) = event.turn {
            store.identity.turn = turn;
        }
        self.inner.pipeline.ingest(&store.db, event)
    }

    /// Run `f` against the active store. This is the access path for all
    /// tool-level reads and writes.
    pub async fn with_store<T>(
        &self,
        f: impl FnOnce(&mut Database) -> Result<T, KnowledgeError>,
    ) -> Result<T, KnowledgeError> {
        let mut active = self.inner.active.lock().await;
        let store = active.as_mut().ok_or(KnowledgeError::NoActiveStore)?;
        f(&mut store.db)
    }

    /// Latest mutable payload; when absent and a fetcher is supplied, run
    /// it (it performs the RPC that populates the store) and retry once.
    pub async fn get_mutable_or_fetch(
        &self,
        table: &str,
        key: i64,
        fetch: Option<Pin<Box<dyn Future<Output = ()> + Send + '_>>>,
    ) -> Result<Option<Value>, KnowledgeError> {
        let first = self
            .with_store(|db| db.get_mutable_knowledge(table, key))
            .await?;
        if first.is_some() {
            return Ok(first);
        }
        let Some(fetch) = fetch else {
            return Ok(None);
        };
        fetch.await;
        self.with_store(|db| db.get_mutable_knowledge(table, key))
            .await
    }

    pub async fn latest_event_id(&self) -> Result<i64, KnowledgeError> {
        self.with_store(|db| db.latest_event_id()).await
    }

    /// Start the recurring auto-save. Idempotent per manager; stopped by
    /// [`shutdown`](Self::shutdown).
    pub fn start_auto_save(&self) {
        let inner = self.inner.clone();
        let token = inner.autosave.clone();
        let interval = inner.config.auto_save_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let active = inner.active.lock().await;
                if let Some(store) = active.as_ref()
                    && let Err(e) = save_metadata(&store.db, store.identity.turn)
                {
                    error!("auto-save failed: {e}");
                }
            }
            debug!("auto-save loop stopped");
        });
    }

    pub async fn save_now(&self) -> Result<(), KnowledgeError> {
        let active = self.inner.active.lock().await;
        match active.as_ref() {
            Some(store) => save_metadata(&store.db, store.identity.turn),
            None => Ok(()),
        }
    }

    /// Final save, then close the store. Further access fails with
    /// [`KnowledgeError::NoActiveStore`].
    pub async fn shutdown(&self) -> Result<(), KnowledgeError> {
        self.inner.autosave.cancel();
        let mut active = self.inner.active.lock().await;
        if let Some(store) = active.take() {
            save_metadata(&store.db, store.identity.turn)?;
            info!(game_id = store.identity.game_id, "knowledge store closed");
        }
        Ok(())
    }

    /// Copy the active game's database (and its `.Civ5Save`, when present)
    /// into `archive/{experiment}/`.
    pub async fn archive_game_data(
        &self,
        experiment: &str,
    ) -> Result<PathBuf, KnowledgeError> {
        let active = self.inner.active.lock().await;
        let store = active.as_ref().ok_or(KnowledgeError::NoActiveStore)?;
        save_metadata(&store.db, store.identity.turn)?;

        let archive_dir = self.inner.config.archive_dir.join(experiment);
        std::fs::create_dir_all(&archive_dir).map_err(KnowledgeError::Archive)?;

        let db_dest = archive_dir.join(format!("{}.db", store.identity.game_id));
        std::fs::copy(store.db.path(), &db_dest).map_err(KnowledgeError::Archive)?;

        if let Some(saves_dir) = &self.inner.config.saves_dir {
            let save = saves_dir.join(format!("{}.Civ5Save", store.identity.game_id));
            if save.exists() {
                std::fs::copy(
                    &save,
                    archive_dir.join(format!("{}.Civ5Save", store.identity.game_id)),
                )
                .map_err(KnowledgeError::Archive)?;
            }
        }
        Ok(archive_dir)
    }
}

fn save_metadata(db: &Database, turn: TurnNumber) -> Result<(), KnowledgeError> {
    db.metadata_set("turn", &turn.to_string())?;
    db.metadata_set("lastSave", &Utc::now().to_rfc3339())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager(dir: &tempfile::TempDir) -> KnowledgeManager {
        KnowledgeManager::new(KnowledgeManagerConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn initialize_is_idempotent_per_game() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        manager.initialize("alpha", 1).await.unwrap();
        manager.initialize("alpha", 5).await.unwrap();
        let identity = manager.identity().await.unwrap();
        assert_eq!(identity.game_id, "alpha");
        assert_eq!(identity.turn, 5);
    }

    #[tokio::test]
    async fn game_id_change_switches_stores() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        manager.initialize("alpha", 1).await.unwrap();

        let mut event = GameEvent::new("PlayerEndTurnInitiated", json!([2]));
        event.game_id = Some("beta".into());
        event.turn = Some(1);
        let switched = manager.check_game_context(&event).await.unwrap();
        assert_eq!(switched.unwrap().game_id, "beta");
        assert!(dir.path().join("alpha.db").exists());
        assert!(dir.path().join("beta.db").exists());
    }

    #[tokio::test]
    async fn ingest_updates_turn_and_stores() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        manager.initialize("alpha", 1).await.unwrap();

        let mut event = GameEvent::new("PlayerEndTurnInitiated", json!([7]));
        event.turn = Some(9);
        let outcome = manager.ingest_event(&event).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Stored(_)));
        assert_eq!(manager.identity().await.unwrap().turn, 9);
        assert_eq!(manager.latest_event_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn shutdown_saves_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        manager.initialize("alpha", 4).await.unwrap();
        manager.shutdown().await.unwrap();
        assert!(manager.identity().await.is_none());
        assert!(manager.save_now().await.is_ok());

        // The final save landed on disk.
        let db = Database::open(
            dir.path().join("alpha.db"),
            "alpha",
            TableRegistry::with_defaults(),
        )
        .unwrap();
        assert_eq!(db.metadata_get("turn").unwrap().unwrap(), "4");
    }

    #[tokio::test]
    async fn archive_copies_db_and_save_file() {
        let dir = tempfile::tempdir().unwrap();
        let saves = dir.path().join("saves");
        std::fs::create_dir_all(&saves).unwrap();
        std::fs::write(saves.join("alpha.Civ5Save"), b"save-bytes").unwrap();

        let manager = KnowledgeManager::new(KnowledgeManagerConfig {
            data_dir: dir.path().join("data"),
            archive_dir: dir.path().join("archive"),
            saves_dir: Some(saves),
            ..Default::default()
        });
        manager.initialize("alpha", 12).await.unwrap();

        let archived = manager.archive_game_data("experiment-1").await.unwrap();
        assert!(archived.join("alpha.db").exists());
        assert!(archived.join("alpha.Civ5Save").exists());
    }

    #[tokio::test]
    async fn fetch_if_missing_retries_once() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        manager.initialize("alpha", 1).await.unwrap();

        let m2 = manager.clone();
        let fetch: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            m2.with_store(|db| {
                db.store_mutable_knowledge(
                    "CityInformations",
                    8,
                    1,
                    &json!({"Name": "Sparta"}),
                    &vox_common::VisibilityFlags::everyone(),
                    &[],
                )
                .map(|_| ())
            })
            .await
            .unwrap();
        });

        let value = manager
            .get_mutable_or_fetch("CityInformations", 8, Some(fetch))
            .await
            .unwrap();
        assert_eq!(value, Some(json!({"Name": "Sparta"})));
    }
}
