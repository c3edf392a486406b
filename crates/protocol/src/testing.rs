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

//! A mock game DLL speaking the pipe protocol, for tests and local
//! development. Answers the handful of Lua calls the test suite exercises,
//! records everything it receives, and can emit game events on demand.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use vox_common::{GameEvent, PlayerId};

use crate::codec::{DEFAULT_MAX_FRAME, frame_codec};
use crate::transport::{PipeEndpoint, PipeListener};

/// Everything the mock has observed, for assertions.
#[derive(Debug, Default)]
pub struct MockDllState {
    pub paused_players: HashSet<PlayerId>,
    pub external_functions: HashMap<String, Value>,
    pub received: Vec<Value>,
    pub connections_accepted: usize,
}

/// Handle to a running mock DLL server.
pub struct MockDllServer {
    state: Arc<Mutex<MockDllState>>,
    events_tx: mpsc::UnboundedSender<GameEvent>,
    shutdown_tx: mpsc::UnboundedSender<()>,
}

impl MockDllServer {
    /// Bind the pipe and start serving. One client connection at a time,
    /// matching the real DLL.
    pub fn spawn(endpoint: PipeEndpoint) -> std::io::Result<Self> {
        let mut listener = PipeListener::bind(&endpoint)?;
        let state = Arc::new(Mutex::new(MockDllState::default()));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<GameEvent>();
        let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<()>();

        let loop_state = state.clone();
        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok(stream) => stream,
                        Err(e) => {
                            warn!("mock DLL accept failed: {e}");
                            break;
                        }
                    },
                    _ = shutdown_rx.recv() => break,
                };
                loop_state.lock().unwrap().connections_accepted += 1;

                let (read_half, write_half) = tokio::io::split(stream);
                let mut frames = FramedRead::new(read_half, frame_codec(DEFAULT_MAX_FRAME));
                let mut sink = FramedWrite::new(write_half, frame_codec(DEFAULT_MAX_FRAME));

                loop {
                    tokio::select! {
                        frame = frames.next() => {
                            let Some(Ok(frame)) = frame else { break };
                            let Ok(msg) = serde_json::from_str::<Value>(&frame) else {
                                continue;
                            };
                            if let Some(reply) = handle_request(&loop_state, &msg)
                                && sink.send(reply.to_string()).await.is_err()
                            {
                                break;
                            }
                        }
                        event = events_rx.recv() => {
                            let Some(event) = event else { break };
                            let mut frame = serde_json::to_value(&event).unwrap();
                            frame["type"] = json!("game_event");
                            if sink.send(frame.to_string()).await.is_err() {
                                break;
                            }
                        }
                        _ = shutdown_rx.recv() => return,
                    }
                }
                debug!("mock DLL client disconnected");
            }
        });

        Ok(Self {
            state,
            events_tx,
            shutdown_tx,
        })
    }

    /// Emit a game event to the currently connected client.
    pub fn emit_event(&self, event: GameEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn state(&self) -> Arc<Mutex<MockDllState>> {
        self.state.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

fn handle_request(state: &Arc<Mutex<MockDllState>>, msg: &Value) -> Option<Value> {
    state.lock().unwrap().received.push(msg.clone());

    let msg_type = msg.get("type").and_then(|t| t.as_str())?;
    let id = msg.get("id").cloned().unwrap_or(Value::Null);

    let reply = match msg_type {
        "lua_call" => {
            let function = msg.get("function").and_then(|f| f.as_str()).unwrap_or("");
            match function {
                "GetPlayerName" => ok_response(id, json!("Mock Player")),
                "FailingFunction" => json!({
                    "type": "response", "id": id, "success": false,
                    "error": "function raised an error"
                }),
                _ => ok_response(id, json!({"function": function, "echoed": true})),
            }
        }
        "lua_batch" => {
            let calls = msg
                .get("calls")
                .and_then(|c| c.as_array())
                .cloned()
                .unwrap_or_default();
            let results: Vec<Value> = calls
                .iter()
                .map(|call| {
                    json!({"success": true, "result": {"function": call.get("function")}})
                })
                .collect();
            ok_response(id, json!(results))
        }
        "lua_execute" => ok_response(id, json!("executed")),
        "get_lua_functions" => ok_response(id, json!(["GetPlayerName", "GetGameTurn"])),
        "pause_player" => {
            if let Some(player) = msg.get("playerID").and_then(|p| p.as_i64()) {
                state.lock().unwrap().paused_players.insert(player as PlayerId);
            }
            ok_response(id, json!(true))
        }
        "resume_player" => {
            if let Some(player) = msg.get("playerID").and_then(|p| p.as_i64()) {
                state.lock().unwrap().paused_players.remove(&(player as PlayerId));
            }
            ok_response(id, json!(true))
        }
        "register_external" => {
            if let Some(name) = msg.get("name").and_then(|n| n.as_str()) {
                state
                    .lock()
                    .unwrap()
                    .external_functions
                    .insert(name.to_string(), msg.clone());
            }
            ok_response(id, json!(true))
        }
        "unregister_external" => {
            if let Some(name) = msg.get("name").and_then(|n| n.as_str()) {
                state.lock().unwrap().external_functions.remove(name);
            }
            ok_response(id, json!(true))
        }
        // Fire-and-forget reply to an ExternalCall event; recorded, no response.
        "external_response" => return None,
        _ => json!({
            "type": "response", "id": id, "success": false,
            "error": format!("unknown message type: {msg_type}")
        }),
    };
    Some(reply)
}

fn ok_response(id: Value, result: Value) -> Value {
    json!({"type": "response", "id": id, "success": true, "result": result})
}
