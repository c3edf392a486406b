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

//! Session lifecycle: game process, MCP connection, players, recovery.
//!
//! A session optionally launches the game, connects the MCP client, stands
//! up one [`VoxPlayer`] per configured LLM player, and then routes
//! notifications until a victory ends the game or the session is aborted.
//! If the game process dies mid-session it is restarted from the last
//! auto-save, a bounded number of times.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vox_common::{PlayerId, event_names};
use vox_mcp::events::GameEventNotification;

use crate::StrategistError;
use crate::context::VoxContext;
use crate::mcp_client::{McpClient, McpEndpoint};
use crate::model::LanguageModel;
use crate::player::VoxPlayer;

/// How to start (or restart) the game process.
#[derive(Debug, Clone)]
pub struct GameLaunch {
    pub command: String,
    pub args: Vec<String>,
    /// Arguments used instead of `args` when restarting from the last
    /// auto-save after a crash.
    pub recovery_args: Vec<String>,
}

#[derive(Clone)]
pub struct SessionConfig {
    pub endpoint: McpEndpoint,
    /// Player slot to agent name.
    pub llm_players: HashMap<PlayerId, String>,
    pub max_recovery_attempts: u32,
    /// How long to keep retrying the initial MCP connect.
    pub connect_window: Duration,
    pub tool_timeout: Duration,
    pub game_launch: Option<GameLaunch>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: McpEndpoint::Http("http://127.0.0.1:5100".to_string()),
            llm_players: HashMap::new(),
            max_recovery_attempts: 3,
            connect_window: Duration::from_secs(600),
            tool_timeout: Duration::from_secs(60),
            game_launch: None,
        }
    }
}

pub struct StrategistSession {
    config: SessionConfig,
    context: StdMutex<Option<VoxContext>>,
    players: StdMutex<HashMap<PlayerId, Arc<VoxPlayer>>>,
    cancel: CancellationToken,
    victory_tx: watch::Sender<Option<GameEventNotification>>,
    game: Arc<StdMutex<Option<tokio::process::Child>>>,
    recovery_attempts: AtomicU32,
}

impl StrategistSession {
    pub fn new(config: SessionConfig) -> Arc<Self> {
        let (victory_tx, _) = watch::channel(None);
        Arc::new(Self {
            config,
            context: StdMutex::new(None),
            players: StdMutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            victory_tx,
            game: Arc::new(StdMutex::new(None)),
            recovery_attempts: AtomicU32::new(0),
        })
    }

    /// Run to completion: resolves with the victory notification, or an
    /// error when the session is aborted or cannot start.
    pub async fn run(
        self: Arc<Self>,
        model: Arc<dyn LanguageModel>,
        agents: Vec<Arc<dyn crate::agent::VoxAgent>>,
    ) -> Result<GameEventNotification, StrategistError> {
        if let Some(launch) = self.config.game_launch.clone() {
            self.launch_game(&launch, false)?;
            Self::spawn_crash_monitor(self.clone());
        }

        let mcp = McpClient::connect(self.config.endpoint.clone(), self.config.connect_window)
            .await?;
        let context = VoxContext::new(mcp, model, self.config.tool_timeout);
        for agent in agents {
            context.register_agent(agent);
        }
        *self.context.lock().unwrap() = Some(context.clone());

        // Players come up with an empty game id; the first GameSwitched
        // notification re-creates them with the real one.
        self.create_players(&context, "");

        let mut notifications = context.mcp().notifications();
        let mut victory_rx = self.victory_tx.subscribe();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.shutdown_players();
                    context.shutdown().await;
                    return Err(StrategistError::Cancelled);
                }
                changed = victory_rx.changed() => {
                    let victory = if changed.is_ok() {
                        victory_rx.borrow_and_update().clone()
                    } else {
                        None
                    };
                    if let Some(victory) = victory {
                        self.shutdown_players();
                        context.shutdown().await;
                        return Ok(victory);
                    }
                }
                notification = notifications.recv() => {
                    match notification {
                        Ok(notification) => self.handle_notification(&context, notification).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "session lagged behind notifications");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            return Err(StrategistError::Session(
                                "notification stream closed".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }

    async fn handle_notification(&self, context: &VoxContext, notification: GameEventNotification) {
        debug!(event = notification.event, "session notification");
        match notification.event.as_str() {
            event_names::PLAYER_DONE_TURN => {
                let (Some(player_id), Some(turn), Some(latest_id)) = (
                    notification.player_id,
                    notification.turn,
                    notification.latest_id,
                ) else {
                    warn!("malformed PlayerDoneTurn notification");
                    return;
                };
                let player = self.players.lock().unwrap().get(&player_id).cloned();
                if let Some(player) = player {
                    player.notify_turn(turn, latest_id);
                }
            }
            event_names::GAME_SWITCHED => {
                let game_id = notification.game_id.clone().unwrap_or_default();
                info!(game_id, "game switched, rebuilding players");
                self.create_players(context, &game_id);
            }
            event_names::PLAYER_VICTORY => {
                info!(player = ?notification.player_id, "victory, ending session");
                let _ = self.victory_tx.send(Some(notification));
            }
            event_names::DLL_CONNECTED => {
                // After a DLL restart the bridge's pause set is empty;
                // re-apply it for any player whose agent is mid-turn, then
                // clear the load screen.
                let running: Vec<Arc<VoxPlayer>> =
                    self.players.lock().unwrap().values().cloned().collect();
                for player in running {
                    if player.parameters().await.running.is_some() {
                        let cancel = CancellationToken::new();
                        if let Err(e) = context
                            .mcp()
                            .call_tool(
                                "pause-game",
                                json!({"PlayerID": player.player_id()}),
                                Duration::from_secs(30),
                                &cancel,
                            )
                            .await
                        {
                            warn!(player = player.player_id(), "could not re-apply pause: {e}");
                        }
                    }
                }
                let cancel = CancellationToken::new();
                if let Err(e) = context
                    .mcp()
                    .call_tool(
                        "lua-executor",
                        json!({"Script": "Events.LoadScreenClose()"}),
                        Duration::from_secs(30),
                        &cancel,
                    )
                    .await
                {
                    debug!("load screen close failed: {e}");
                }
            }
            _ => {}
        }
    }

    fn create_players(&self, context: &VoxContext, game_id: &str) {
        let mut players = self.players.lock().unwrap();
        for player in players.values() {
            player.abort();
        }
        players.clear();
        for (&player_id, agent_name) in &self.config.llm_players {
            let player = Arc::new(VoxPlayer::new(player_id, agent_name.clone(), game_id));
            player.start(Arc::new(context.clone()));
            players.insert(player_id, player);
        }
        info!(count = players.len(), game_id, "players ready");
    }

    fn shutdown_players(&self) {
        for player in self.players.lock().unwrap().values() {
            player.abort();
        }
    }

    /// Abort the session: players stop after their current execution, the
    /// MCP connection closes, and `run` resolves with `Cancelled`.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn victory(&self) -> Option<GameEventNotification> {
        self.victory_tx.borrow().clone()
    }

    fn launch_game(&self, launch: &GameLaunch, recovery: bool) -> Result<(), StrategistError> {
        let args = if recovery {
            &launch.recovery_args
        } else {
            &launch.args
        };
        info!(command = launch.command, recovery, "launching game process");
        let child = tokio::process::Command::new(&launch.command)
            .args(args)
            .spawn()
            .map_err(|e| StrategistError::Session(format!("could not launch game: {e}")))?;
        *self.game.lock().unwrap() = Some(child);
        Ok(())
    }

    /// Watch the game process; while the session is live, restart it from
    /// the last auto-save up to the configured number of attempts.
    fn spawn_crash_monitor(session: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let child = session.game.lock().unwrap().take();
                let Some(mut child) = child else { break };
                let status = tokio::select! {
                    _ = session.cancel.cancelled() => {
                        let _ = child.start_kill();
                        break;
                    }
                    status = child.wait() => status,
                };
                if session.cancel.is_cancelled() || session.victory().is_some() {
                    break;
                }
                let attempts = session.recovery_attempts.fetch_add(1, Ordering::Relaxed) + 1;
                if attempts > session.config.max_recovery_attempts {
                    error!("game process died and recovery attempts are exhausted");
                    session.abort();
                    break;
                }
                warn!(?status, attempts, "game process died, restarting from auto-save");
                let launch = session.config.game_launch.clone();
                if let Some(launch) = launch
                    && let Err(e) = session.launch_game(&launch, true)
                {
                    error!("recovery launch failed: {e}");
                    session.abort();
                    break;
                }
            }
        });
    }
}
