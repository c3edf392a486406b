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

//! Per-player turn gating.
//!
//! One `VoxPlayer` per controlled player. Turn notifications land in a
//! single pending slot where the newest turn wins; the run loop drains it
//! one execution at a time, pausing the game before the agent thinks and
//! resuming it on the way out — including the error paths.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vox_common::{PlayerId, TurnNumber};

use crate::StrategistError;
use crate::agent::StrategistParameters;
use crate::context::VoxContext;

/// The newest unprocessed turn notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTurn {
    pub turn: TurnNumber,
    pub latest_id: i64,
}

/// What the run loop needs from the outside world. `VoxContext` is the
/// production implementation; tests substitute recorders.
#[async_trait]
pub trait TurnExecutor: Send + Sync {
    async fn pause(&self, player: PlayerId) -> Result<(), StrategistError>;
    async fn resume(&self, player: PlayerId) -> Result<(), StrategistError>;
    async fn run_turn(
        &self,
        agent: &str,
        params: &mut StrategistParameters,
        cancel: &CancellationToken,
    ) -> Result<Value, StrategistError>;
}

#[async_trait]
impl TurnExecutor for VoxContext {
    async fn pause(&self, player: PlayerId) -> Result<(), StrategistError> {
        let cancel = CancellationToken::new();
        self.mcp()
            .call_tool(
                "pause-game",
                json!({"PlayerID": player}),
                std::time::Duration::from_secs(30),
                &cancel,
            )
            .await
            .map(|_| ())
    }

    async fn resume(&self, player: PlayerId) -> Result<(), StrategistError> {
        // Resume must go out even while aborting, so it gets its own token.
        let cancel = CancellationToken::new();
        self.mcp()
            .call_tool(
                "resume-game",
                json!({"PlayerID": player}),
                std::time::Duration::from_secs(30),
                &cancel,
            )
            .await
            .map(|_| ())
    }

    async fn run_turn(
        &self,
        agent: &str,
        params: &mut StrategistParameters,
        cancel: &CancellationToken,
    ) -> Result<Value, StrategistError> {
        self.execute(agent, params, Value::Null, cancel).await
    }
}

struct PlayerShared {
    pending: StdMutex<Option<PendingTurn>>,
    /// Turn currently being executed, if any. Kept outside `params` so
    /// `notify_turn` can read it while the run loop holds the params lock.
    running_turn: StdMutex<Option<TurnNumber>>,
    wakeup: Notify,
    params: tokio::sync::Mutex<StrategistParameters>,
}

/// A per-player agent runner enforcing turn gating and pause/resume.
pub struct VoxPlayer {
    player_id: PlayerId,
    agent_name: String,
    shared: Arc<PlayerShared>,
    cancel: CancellationToken,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl VoxPlayer {
    pub fn new(player_id: PlayerId, agent_name: impl Into<String>, game_id: &str) -> Self {
        Self {
            player_id,
            agent_name: agent_name.into(),
            shared: Arc::new(PlayerShared {
                pending: StdMutex::new(None),
                running_turn: StdMutex::new(None),
                wakeup: Notify::new(),
                params: tokio::sync::Mutex::new(StrategistParameters::new(player_id, game_id)),
            }),
            cancel: CancellationToken::new(),
            handle: StdMutex::new(None),
        }
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// A turn is ready for this player. While an execution for the same
    /// turn is running the notification is dropped; otherwise only the
    /// newest turn stays pending.
    pub fn notify_turn(&self, turn: TurnNumber, latest_id: i64) {
        {
            if *self.shared.running_turn.lock().unwrap() == Some(turn) {
                debug!(player = self.player_id, turn, "dropping duplicate turn notification");
                return;
            }

            let mut pending = self.shared.pending.lock().unwrap();
            match *pending {
                Some(existing) if existing.turn >= turn => {
                    debug!(player = self.player_id, turn, "stale turn superseded by newer");
                }
                _ => {
                    *pending = Some(PendingTurn { turn, latest_id });
                }
            }
        }
        self.shared.wakeup.notify_one();
    }

    /// Start the run loop. The game is paused for every execution and
    /// resumed before the loop blocks again, whatever the agent did.
    pub fn start(&self, executor: Arc<dyn TurnExecutor>) {
        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        let player_id = self.player_id;
        let agent_name = self.agent_name.clone();

        let handle = tokio::spawn(async move {
            loop {
                let pending = {
                    let mut slot = shared.pending.lock().unwrap();
                    slot.take()
                };
                let Some(pending) = pending else {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = shared.wakeup.notified() => continue,
                    }
                };
                if cancel.is_cancelled() {
                    break;
                }

                info!(player = player_id, turn = pending.turn, "processing turn");
                *shared.running_turn.lock().unwrap() = Some(pending.turn);
                {
                    let mut params = shared.params.lock().await;
                    params.turn = pending.turn;
                    params.before = pending.latest_id;
                    params.running = Some(agent_name.clone());
                }

                if let Err(e) = executor.pause(player_id).await {
                    warn!(player = player_id, "pause failed: {e}");
                }

                let result = {
                    let mut params = shared.params.lock().await;
                    executor.run_turn(&agent_name, &mut params, &cancel).await
                };
                match &result {
                    Ok(_) => debug!(player = player_id, turn = pending.turn, "turn complete"),
                    Err(StrategistError::Cancelled) => {
                        debug!(player = player_id, "execution cancelled")
                    }
                    Err(e) => warn!(player = player_id, "agent execution failed: {e}"),
                }

                // The finally path: clear running state and resume, always.
                *shared.running_turn.lock().unwrap() = None;
                {
                    let mut params = shared.params.lock().await;
                    params.after = pending.latest_id;
                    params.running = None;
                }
                if let Err(e) = executor.resume(player_id).await {
                    warn!(player = player_id, "resume failed: {e}");
                }

                if cancel.is_cancelled() {
                    break;
                }
            }
            info!(player = player_id, "player loop stopped");
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Stop after the current execution completes; cancels any in-flight
    /// model or tool call.
    pub fn abort(&self) {
        self.cancel.cancel();
        self.shared.wakeup.notify_one();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Snapshot of the player's parameters, for tests and reporting.
    pub async fn parameters(&self) -> StrategistParameters {
        self.shared.params.lock().await.clone()
    }
}
