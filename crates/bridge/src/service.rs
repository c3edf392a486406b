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

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use vox_common::{GameEvent, PlayerId, event_names};
use vox_connector::{ConnectorError, ConnectorStats, DllConnector};
use vox_protocol::{ExternalRegistration, LuaCall, RequestBody};

/// A registered external function the game can call out to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalFunction {
    pub name: String,
    pub url: String,
    #[serde(rename = "async")]
    pub is_async: bool,
    /// Milliseconds.
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStats {
    pub success: bool,
    pub dll_connected: bool,
    /// Seconds since the service started.
    pub uptime: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub dll_connected: bool,
    pub pending_requests: usize,
    pub reconnect_attempts: u32,
    pub external_functions: usize,
    pub paused_players: Vec<PlayerId>,
    pub sse_clients: usize,
    pub uptime: u64,
}

struct ServiceInner {
    connector: DllConnector,
    external: Mutex<HashMap<String, ExternalFunction>>,
    paused: Mutex<HashSet<PlayerId>>,
    started_at: Instant,
    http: reqwest::Client,
    /// Bridge-level event stream: connector events plus the bridge's own
    /// connection lifecycle events.
    events_tx: broadcast::Sender<GameEvent>,
    sse_clients: AtomicUsize,
}

/// Process-wide owner of the pipe connection and all bridge state.
#[derive(Clone)]
pub struct BridgeService {
    inner: Arc<ServiceInner>,
}

impl BridgeService {
    pub fn new(connector: DllConnector, event_capacity: usize) -> Self {
        let (events_tx, _) = broadcast::channel(event_capacity);
        Self {
            inner: Arc::new(ServiceInner {
                connector,
                external: Mutex::new(HashMap::new()),
                paused: Mutex::new(HashSet::new()),
                started_at: Instant::now(),
                http: reqwest::Client::new(),
                events_tx,
                sse_clients: AtomicUsize::new(0),
            }),
        }
    }

    /// Connect the pipe and start the event pump. Returns whether the
    /// initial connect succeeded; either way reconnection keeps running.
    pub async fn start(&self) -> bool {
        let connected = self.inner.connector.connect().await;
        self.spawn_event_pump();
        connected
    }

    fn spawn_event_pump(&self) {
        let inner = self.inner.clone();
        let service = self.clone();
        tokio::spawn(async move {
            let mut events = inner.connector.subscribe_events();
            let mut state = inner.connector.connection_state();
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => {
                            if event.event == event_names::EXTERNAL_CALL {
                                service.handle_external_call(&event);
                            }
                            let _ = inner.events_tx.send(event);
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "bridge event pump lagged behind the connector");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = state.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let connected = *state.borrow_and_update();
                        let name = if connected {
                            event_names::DLL_CONNECTED
                        } else {
                            // The pause set does not survive the DLL; the
                            // orchestrator re-applies it after reconnect.
                            inner.paused.lock().unwrap().clear();
                            event_names::DLL_DISCONNECTED
                        };
                        let _ = inner.events_tx.send(GameEvent::new(name, json!([])));
                    }
                }
            }
            debug!("bridge event pump stopped");
        });
    }

    // ------------------------------------------------------------------
    // Lua surface
    // ------------------------------------------------------------------

    pub async fn lua_call(
        &self,
        function: String,
        args: Vec<Value>,
    ) -> Result<Value, ConnectorError> {
        self.inner
            .connector
            .send(RequestBody::LuaCall { function, args })
            .await
    }

    /// Batch of calls, results in input order. Calls are issued
    /// concurrently; the connector's write queue serializes the frames.
    pub async fn lua_batch(&self, calls: Vec<LuaCall>) -> Vec<Result<Value, ConnectorError>> {
        let futures = calls.into_iter().map(|call| {
            self.inner.connector.send(RequestBody::LuaCall {
                function: call.function,
                args: call.args,
            })
        });
        join_all(futures).await
    }

    pub async fn lua_execute(&self, script: String) -> Result<Value, ConnectorError> {
        // Arbitrary code path; callers are trusted.
        self.inner
            .connector
            .send(RequestBody::LuaExecute { script })
            .await
    }

    pub async fn lua_functions(&self) -> Result<Vec<String>, ConnectorError> {
        let result = self
            .inner
            .connector
            .send(RequestBody::GetLuaFunctions {})
            .await?;
        Ok(serde_json::from_value(result).unwrap_or_default())
    }

    // ------------------------------------------------------------------
    // External function registry and proxy
    // ------------------------------------------------------------------

    /// Create or overwrite a registry entry, and tell the DLL about it.
    pub async fn register_external(
        &self,
        function: ExternalFunction,
    ) -> Result<(), ConnectorError> {
        self.inner
            .external
            .lock()
            .unwrap()
            .insert(function.name.clone(), function.clone());
        // Best effort while disconnected; the registry itself is the source
        // of truth and survives reconnects.
        let registration = RequestBody::RegisterExternal {
            registration: ExternalRegistration {
                name: function.name,
                url: function.url,
                is_async: function.is_async,
                timeout: function.timeout,
            },
        };
        match self.inner.connector.send(registration).await {
            Ok(_) => Ok(()),
            Err(ConnectorError::NotConnected) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn unregister_external(&self, name: &str) -> Result<bool, ConnectorError> {
        let removed = self.inner.external.lock().unwrap().remove(name).is_some();
        if removed {
            let unregister = RequestBody::UnregisterExternal {
                name: name.to_string(),
            };
            match self.inner.connector.send(unregister).await {
                Ok(_) | Err(ConnectorError::NotConnected) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    pub fn external_functions(&self) -> Vec<ExternalFunction> {
        let mut functions: Vec<_> = self.inner.external.lock().unwrap().values().cloned().collect();
        functions.sort_by(|a, b| a.name.cmp(&b.name));
        functions
    }

    /// Proxy one `ExternalCall` event: `{name, args, callID}` positional.
    fn handle_external_call(&self, event: &GameEvent) {
        let Some(items) = event.payload.as_array() else {
            warn!("ExternalCall payload is not an array");
            return;
        };
        let (Some(name), args, Some(call_id)) = (
            items.first().and_then(|v| v.as_str()).map(String::from),
            items.get(1).cloned().unwrap_or(Value::Null),
            items.get(2).and_then(|v| v.as_str()).map(String::from),
        ) else {
            warn!("ExternalCall payload missing name or callID");
            return;
        };

        let function = self.inner.external.lock().unwrap().get(&name).cloned();
        let service = self.clone();
        tokio::spawn(async move {
            let Some(function) = function else {
                service
                    .send_external_response(
                        &call_id,
                        Err(format!("no external function registered as '{name}'")),
                    )
                    .await;
                return;
            };

            if function.is_async {
                // Acknowledge now; the completion response follows.
                service
                    .send_external_response(&call_id, Ok(json!({"acknowledged": true})))
                    .await;
            }
            let result = service.invoke_external(&function, args).await;
            service.send_external_response(&call_id, result).await;
        });
    }

    async fn invoke_external(
        &self,
        function: &ExternalFunction,
        args: Value,
    ) -> Result<Value, String> {
        let response = self
            .inner
            .http
            .post(&function.url)
            .timeout(Duration::from_millis(function.timeout))
            .json(&args)
            .send()
            .await
            .map_err(|e| format!("external call to {} failed: {e}", function.name))?;
        if !response.status().is_success() {
            return Err(format!(
                "external call to {} returned {}",
                function.name,
                response.status()
            ));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| format!("external call to {} returned bad JSON: {e}", function.name))
    }

    async fn send_external_response(&self, call_id: &str, result: Result<Value, String>) {
        let body = match result {
            Ok(result) => RequestBody::ExternalResponse {
                call_id: call_id.to_string(),
                success: true,
                result: Some(result),
                error: None,
            },
            Err(error) => RequestBody::ExternalResponse {
                call_id: call_id.to_string(),
                success: false,
                result: None,
                error: Some(error),
            },
        };
        if let Err(e) = self.inner.connector.send_oneway(body).await {
            warn!(call_id, "could not deliver external response: {e}");
        }
    }

    // ------------------------------------------------------------------
    // Pause coordination
    // ------------------------------------------------------------------

    pub async fn pause_player(&self, player: PlayerId) -> Result<(), ConnectorError> {
        self.inner.paused.lock().unwrap().insert(player);
        self.inner
            .connector
            .send(RequestBody::PausePlayer { player_id: player })
            .await?;
        info!(player, "player paused");
        Ok(())
    }

    pub async fn resume_player(&self, player: PlayerId) -> Result<(), ConnectorError> {
        self.inner.paused.lock().unwrap().remove(&player);
        self.inner
            .connector
            .send(RequestBody::ResumePlayer { player_id: player })
            .await?;
        info!(player, "player resumed");
        Ok(())
    }

    pub fn paused_players(&self) -> Vec<PlayerId> {
        let mut players: Vec<_> = self.inner.paused.lock().unwrap().iter().copied().collect();
        players.sort_unstable();
        players
    }

    // ------------------------------------------------------------------
    // Events, health, stats
    // ------------------------------------------------------------------

    pub fn subscribe_events(&self) -> broadcast::Receiver<GameEvent> {
        self.inner.events_tx.subscribe()
    }

    pub(crate) fn sse_client_connected(&self) -> SseClientGuard {
        self.inner.sse_clients.fetch_add(1, Ordering::Relaxed);
        SseClientGuard {
            inner: self.inner.clone(),
        }
    }

    pub fn connector_stats(&self) -> ConnectorStats {
        self.inner.connector.stats()
    }

    pub fn health(&self) -> HealthStats {
        HealthStats {
            success: true,
            dll_connected: self.inner.connector.stats().connected,
            uptime: self.inner.started_at.elapsed().as_secs(),
        }
    }

    pub fn stats(&self) -> ServiceStats {
        let connector = self.inner.connector.stats();
        ServiceStats {
            dll_connected: connector.connected,
            pending_requests: connector.pending_requests,
            reconnect_attempts: connector.reconnect_attempts,
            external_functions: self.inner.external.lock().unwrap().len(),
            paused_players: self.paused_players(),
            sse_clients: self.inner.sse_clients.load(Ordering::Relaxed),
            uptime: self.inner.started_at.elapsed().as_secs(),
        }
    }

    pub async fn shutdown(&self) {
        self.inner.connector.disconnect().await;
    }
}

/// Decrements the SSE client count when a client stream ends.
pub(crate) struct SseClientGuard {
    inner: Arc<ServiceInner>,
}

impl Drop for SseClientGuard {
    fn drop(&mut self) {
        self.inner.sse_clients.fetch_sub(1, Ordering::Relaxed);
    }
}
