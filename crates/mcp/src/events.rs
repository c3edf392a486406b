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

//! Bridge event ingestion and client notifications.
//!
//! Subscribes to the bridge's SSE stream, pushes every event through the
//! knowledge pipeline, and distills the stream into the notifications MCP
//! clients gate on: turn boundaries, victories, game switches, and DLL
//! connection changes.

use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vox_common::{GameEvent, PlayerId, TurnNumber, event_names};
use vox_knowledge::{IngestOutcome, KnowledgeManager};

use crate::bridge_client::BridgeClient;

/// Payload of a `vox-deorum/game-event` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEventNotification {
    pub event: String,
    #[serde(rename = "playerID", skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<TurnNumber>,
    #[serde(rename = "latestID", skip_serializing_if = "Option::is_none")]
    pub latest_id: Option<i64>,
    #[serde(rename = "gameID", skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
}

/// Pumps bridge events into the knowledge store and fans notifications out
/// to MCP transports.
#[derive(Clone)]
pub struct EventService {
    knowledge: KnowledgeManager,
    bridge: BridgeClient,
    notifications_tx: broadcast::Sender<GameEventNotification>,
    token: CancellationToken,
}

impl EventService {
    pub fn new(knowledge: KnowledgeManager, bridge: BridgeClient) -> Self {
        let (notifications_tx, _) = broadcast::channel(128);
        Self {
            knowledge,
            bridge,
            notifications_tx,
            token: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEventNotification> {
        self.notifications_tx.subscribe()
    }

    pub fn knowledge(&self) -> &KnowledgeManager {
        &self.knowledge
    }

    /// Start the SSE pump. Reconnects with a flat delay whenever the bridge
    /// goes away; runs until [`stop`](Self::stop).
    pub fn start(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                if service.token.is_cancelled() {
                    break;
                }
                match service.bridge.events().await {
                    Ok(mut stream) => {
                        info!("subscribed to bridge event stream");
                        loop {
                            tokio::select! {
                                _ = service.token.cancelled() => return,
                                event = stream.next() => match event {
                                    Some(event) => service.handle_event(event).await,
                                    None => break,
                                }
                            }
                        }
                        warn!("bridge event stream closed, resubscribing");
                    }
                    Err(e) => {
                        debug!("bridge not reachable: {e}");
                    }
                }
                tokio::select! {
                    _ = service.token.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        });
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Run one event through context detection, ingestion, and notification
    /// distillation. Public for tests and the stdio server's direct use.
    pub async fn handle_event(&self, event: GameEvent) {
        // Connection lifecycle events come from the bridge itself, not the
        // game; they bypass the store.
        if event.event == event_names::DLL_CONNECTED
            || event.event == event_names::DLL_DISCONNECTED
        {
            self.notify(GameEventNotification {
                event: event.event.clone(),
                player_id: None,
                turn: None,
                latest_id: None,
                game_id: None,
            });
            return;
        }

        match self.knowledge.check_game_context(&event).await {
            Ok(Some(identity)) => {
                info!(game_id = identity.game_id, "game switched");
                self.notify(GameEventNotification {
                    event: event_names::GAME_SWITCHED.to_string(),
                    player_id: None,
                    turn: Some(identity.turn),
                    latest_id: None,
                    game_id: Some(identity.game_id),
                });
            }
            Ok(None) => {}
            Err(e) => {
                warn!("game context check failed: {e}");
                return;
            }
        }

        let outcome = match self.knowledge.ingest_event(&event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(event = event.event, "event ingestion failed: {e}");
                return;
            }
        };

        if let IngestOutcome::Stored(stored) = outcome {
            match stored.event.as_str() {
                event_names::PLAYER_DONE_TURN => {
                    let player_id = stored.payload["PlayerID"].as_i64().map(|p| p as PlayerId);
                    self.notify(GameEventNotification {
                        event: event_names::PLAYER_DONE_TURN.to_string(),
                        player_id,
                        turn: Some(stored.turn),
                        latest_id: Some(stored.id),
                        game_id: event.game_id.clone(),
                    });
                }
                event_names::PLAYER_VICTORY => {
                    let player_id = stored.payload["PlayerID"].as_i64().map(|p| p as PlayerId);
                    self.notify(GameEventNotification {
                        event: event_names::PLAYER_VICTORY.to_string(),
                        player_id,
                        turn: Some(stored.turn),
                        latest_id: Some(stored.id),
                        game_id: event.game_id.clone(),
                    });
                }
                _ => {}
            }
        }
    }

    fn notify(&self, notification: GameEventNotification) {
        let _ = self.notifications_tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vox_knowledge::KnowledgeManagerConfig;

    fn service(dir: &tempfile::TempDir) -> EventService {
        let knowledge = KnowledgeManager::new(KnowledgeManagerConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        // The bridge client is unused by handle_event.
        EventService::new(knowledge, BridgeClient::new("http://127.0.0.1:1"))
    }

    #[tokio::test]
    async fn done_turn_event_becomes_notification_with_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);
        let mut notifications = service.subscribe();

        let mut event = GameEvent::new("PlayerDoneTurn", json!([0, 5]));
        event.game_id = Some("g1".into());
        event.turn = Some(5);
        service.handle_event(event).await;

        // First the switch (first open), then the turn notification.
        let first = notifications.recv().await.unwrap();
        assert_eq!(first.event, "GameSwitched");
        let second = notifications.recv().await.unwrap();
        assert_eq!(second.event, "PlayerDoneTurn");
        assert_eq!(second.player_id, Some(0));
        assert_eq!(second.turn, Some(5));
        assert!(second.latest_id.unwrap() > 0);
    }

    #[tokio::test]
    async fn unknown_events_are_ingested_silently() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);
        let mut notifications = service.subscribe();

        let mut event = GameEvent::new("SomethingElse", json!([1]));
        event.game_id = Some("g1".into());
        service.handle_event(event).await;

        let first = notifications.recv().await.unwrap();
        assert_eq!(first.event, "GameSwitched");
        assert!(notifications.try_recv().is_err());
    }

    #[tokio::test]
    async fn dll_connection_events_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);
        let mut notifications = service.subscribe();

        service
            .handle_event(GameEvent::new(event_names::DLL_CONNECTED, json!([])))
            .await;
        let notification = notifications.recv().await.unwrap();
        assert_eq!(notification.event, "DLLConnected");
        assert_eq!(notification.latest_id, None);
    }
}
