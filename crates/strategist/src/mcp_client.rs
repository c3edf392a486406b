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

//! MCP client for the orchestrator.
//!
//! Two transports: spawn the server as a child process and speak NDJSON
//! over its stdio, or talk to an already-running server over HTTP
//! (`POST /rpc` + `GET /events` SSE). Either way the client caches the tool
//! list after first fetch, correlates responses by id, retries transport
//! failures up to three times, and fans `vox-deorum/game-event`
//! notifications out on a broadcast channel.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vox_mcp::events::GameEventNotification;
use vox_mcp::types::{
    GAME_EVENT_METHOD, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, Tool,
    ToolCallResult, ToolsListResult,
};

use crate::StrategistError;

const TRANSPORT_RETRIES: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(100);

/// Where the MCP server lives.
#[derive(Debug, Clone)]
pub enum McpEndpoint {
    /// `POST {url}/rpc`, `GET {url}/events`.
    Http(String),
    /// Spawn the server and own its stdio.
    Stdio { command: String, args: Vec<String> },
}

enum Transport {
    Http {
        base_url: String,
        http: reqwest::Client,
    },
    Stdio {
        write_tx: mpsc::UnboundedSender<String>,
        pending: Arc<StdMutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>,
        child: StdMutex<Option<tokio::process::Child>>,
    },
}

struct ClientInner {
    transport: Transport,
    next_id: AtomicI64,
    tools_cache: Mutex<Option<Vec<Tool>>>,
    notifications_tx: broadcast::Sender<GameEventNotification>,
    token: CancellationToken,
}

#[derive(Clone)]
pub struct McpClient {
    inner: Arc<ClientInner>,
}

impl McpClient {
    /// Connect the transport and run the MCP initialize handshake. For the
    /// HTTP transport, waiting for the server to come up is bounded by
    /// `connect_window`.
    pub async fn connect(
        endpoint: McpEndpoint,
        connect_window: Duration,
    ) -> Result<Self, StrategistError> {
        let (notifications_tx, _) = broadcast::channel(128);
        let token = CancellationToken::new();

        let transport = match &endpoint {
            McpEndpoint::Http(url) => Transport::Http {
                base_url: url.trim_end_matches('/').to_string(),
                http: reqwest::Client::new(),
            },
            McpEndpoint::Stdio { command, args } => {
                let mut child = tokio::process::Command::new(command)
                    .args(args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .spawn()
                    .map_err(|e| {
                        StrategistError::Transport(format!("could not spawn MCP server: {e}"))
                    })?;
                let stdin = child.stdin.take().ok_or_else(|| {
                    StrategistError::Transport("MCP child has no stdin".to_string())
                })?;
                let stdout = child.stdout.take().ok_or_else(|| {
                    StrategistError::Transport("MCP child has no stdout".to_string())
                })?;

                let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();
                let writer_token = token.clone();
                tokio::spawn(async move {
                    let mut stdin = stdin;
                    loop {
                        let frame = tokio::select! {
                            _ = writer_token.cancelled() => break,
                            frame = write_rx.recv() => frame,
                        };
                        let Some(frame) = frame else { break };
                        if stdin.write_all(frame.as_bytes()).await.is_err()
                            || stdin.write_all(b"\n").await.is_err()
                            || stdin.flush().await.is_err()
                        {
                            break;
                        }
                    }
                });

                let pending: Arc<StdMutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>> =
                    Arc::new(StdMutex::new(HashMap::new()));
                let reader_pending = pending.clone();
                let reader_notifications = notifications_tx.clone();
                let reader_token = token.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stdout).lines();
                    loop {
                        let line = tokio::select! {
                            _ = reader_token.cancelled() => break,
                            line = lines.next_line() => line,
                        };
                        let Ok(Some(line)) = line else { break };
                        dispatch_frame(&line, &reader_pending, &reader_notifications);
                    }
                    debug!("MCP stdio reader stopped");
                });

                Transport::Stdio {
                    write_tx,
                    pending,
                    child: StdMutex::new(Some(child)),
                }
            }
        };

        let client = Self {
            inner: Arc::new(ClientInner {
                transport,
                next_id: AtomicI64::new(0),
                tools_cache: Mutex::new(None),
                notifications_tx,
                token,
            }),
        };

        if let McpEndpoint::Http(_) = endpoint {
            client.spawn_http_notification_loop();
        }

        client.initialize(connect_window).await?;
        Ok(client)
    }

    /// The MCP initialize handshake, retried until the window elapses.
    async fn initialize(&self, connect_window: Duration) -> Result<(), StrategistError> {
        let deadline = tokio::time::Instant::now() + connect_window;
        let mut delay = Duration::from_millis(250);
        loop {
            let result = self
                .request(
                    "initialize",
                    json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {},
                        "clientInfo": {"name": "vox-strategist", "version": env!("CARGO_PKG_VERSION")}
                    }),
                    Duration::from_secs(10),
                )
                .await;
            match result {
                Ok(result) => {
                    info!(
                        server = result["serverInfo"]["name"].as_str().unwrap_or("?"),
                        "MCP connection initialized"
                    );
                    self.notify("initialized", json!({})).await;
                    return Ok(());
                }
                Err(e) if tokio::time::Instant::now() + delay < deadline => {
                    debug!("MCP initialize failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// List tools, cached after the first fetch. Invalidation requires
    /// reconnecting.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, StrategistError> {
        let mut cache = self.inner.tools_cache.lock().await;
        if let Some(tools) = cache.as_ref() {
            return Ok(tools.clone());
        }
        let result = self
            .request("tools/list", json!({}), Duration::from_secs(30))
            .await?;
        let list: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| StrategistError::Mcp(format!("bad tools/list result: {e}")))?;
        *cache = Some(list.tools.clone());
        Ok(list.tools)
    }

    /// Call one tool. Transport failures retry up to three times; the
    /// cancellation token aborts promptly between attempts and mid-call.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ToolCallResult, StrategistError> {
        let mut last_error = StrategistError::Transport("no attempts made".to_string());
        for attempt in 0..TRANSPORT_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BASE * 2u32.pow(attempt - 1)).await;
            }
            if cancel.is_cancelled() {
                return Err(StrategistError::Cancelled);
            }
            let request = self.request(
                "tools/call",
                json!({"name": name, "arguments": arguments}),
                timeout,
            );
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(StrategistError::Cancelled),
                result = request => result,
            };
            match result {
                Ok(result) => {
                    return serde_json::from_value(result)
                        .map_err(|e| StrategistError::Mcp(format!("bad tool result: {e}")));
                }
                Err(StrategistError::Transport(e)) => {
                    warn!(tool = name, attempt, "tool transport failure: {e}");
                    last_error = StrategistError::Transport(e);
                }
                // MCP-level errors (bad arguments etc.) are not retryable.
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    pub fn notifications(&self) -> broadcast::Receiver<GameEventNotification> {
        self.inner.notifications_tx.subscribe()
    }

    pub async fn disconnect(&self) {
        self.inner.token.cancel();
        if let Transport::Stdio { child, .. } = &self.inner.transport {
            let child = child.lock().unwrap().take();
            if let Some(mut child) = child {
                let _ = child.start_kill();
            }
        }
    }

    // ------------------------------------------------------------------

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, StrategistError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let request = JsonRpcRequest::new(RequestId::Number(id), method, Some(params));

        let response = match &self.inner.transport {
            Transport::Http { base_url, http } => {
                let response = http
                    .post(format!("{base_url}/rpc"))
                    .timeout(timeout)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| StrategistError::Transport(e.to_string()))?;
                response
                    .json::<JsonRpcResponse>()
                    .await
                    .map_err(|e| StrategistError::Transport(e.to_string()))?
            }
            Transport::Stdio {
                write_tx, pending, ..
            } => {
                let (tx, rx) = oneshot::channel();
                pending.lock().unwrap().insert(id, tx);
                let frame = serde_json::to_string(&request)
                    .map_err(|e| StrategistError::Transport(e.to_string()))?;
                if write_tx.send(frame).is_err() {
                    pending.lock().unwrap().remove(&id);
                    return Err(StrategistError::Transport("MCP server is gone".to_string()));
                }
                match tokio::time::timeout(timeout, rx).await {
                    Err(_elapsed) => {
                        pending.lock().unwrap().remove(&id);
                        return Err(StrategistError::Timeout);
                    }
                    Ok(Err(_closed)) => {
                        return Err(StrategistError::Transport(
                            "MCP server closed the connection".to_string(),
                        ));
                    }
                    Ok(Ok(response)) => response,
                }
            }
        };

        if let Some(error) = response.error {
            return Err(StrategistError::Mcp(error.message));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Fire a JSON-RPC notification (no id, no response).
    async fn notify(&self, method: &str, params: Value) {
        let frame = JsonRpcNotification::new(method, params);
        match &self.inner.transport {
            Transport::Http { base_url, http } => {
                let _ = http
                    .post(format!("{base_url}/rpc"))
                    .json(&frame)
                    .send()
                    .await;
            }
            Transport::Stdio { write_tx, .. } => {
                if let Ok(frame) = serde_json::to_string(&frame) {
                    let _ = write_tx.send(frame);
                }
            }
        }
    }

    fn spawn_http_notification_loop(&self) {
        let Transport::Http { base_url, http } = &self.inner.transport else {
            return;
        };
        let base_url = base_url.clone();
        let http = http.clone();
        let notifications_tx = self.inner.notifications_tx.clone();
        let token = self.inner.token.clone();
        tokio::spawn(async move {
            loop {
                if token.is_cancelled() {
                    break;
                }
                match http.get(format!("{base_url}/events")).send().await {
                    Ok(response) if response.status().is_success() => {
                        let mut bytes = response.bytes_stream();
                        let mut buffer = String::new();
                        loop {
                            let chunk = tokio::select! {
                                _ = token.cancelled() => return,
                                chunk = bytes.next() => chunk,
                            };
                            let Some(Ok(chunk)) = chunk else { break };
                            buffer.push_str(&String::from_utf8_lossy(&chunk));
                            while let Some(newline) = buffer.find('\n') {
                                let line: String = buffer.drain(..=newline).collect();
                                if let Some(data) = line.trim().strip_prefix("data:")
                                    && let Ok(frame) =
                                        serde_json::from_str::<JsonRpcNotification>(data.trim())
                                    && frame.method == GAME_EVENT_METHOD
                                    && let Some(params) = frame.params
                                    && let Ok(notification) =
                                        serde_json::from_value::<GameEventNotification>(params)
                                {
                                    let _ = notifications_tx.send(notification);
                                }
                            }
                        }
                        warn!("MCP notification stream closed, resubscribing");
                    }
                    Ok(response) => {
                        debug!("MCP event stream returned {}", response.status());
                    }
                    Err(e) => {
                        debug!("MCP server not reachable: {e}");
                    }
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        });
    }
}

/// Route one stdio frame: response to its waiter, game-event notification
/// to the broadcast channel, anything else to the debug log.
fn dispatch_frame(
    line: &str,
    pending: &Arc<StdMutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>,
    notifications_tx: &broadcast::Sender<GameEventNotification>,
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(line) {
        if let RequestId::Number(id) = response.id {
            if let Some(tx) = pending.lock().unwrap().remove(&id) {
                let _ = tx.send(response);
            } else {
                warn!(id, "dropping MCP response with no pending request");
            }
        }
        return;
    }
    if let Ok(frame) = serde_json::from_str::<JsonRpcNotification>(line) {
        if frame.method == GAME_EVENT_METHOD
            && let Some(params) = frame.params
            && let Ok(notification) = serde_json::from_value::<GameEventNotification>(params)
        {
            let _ = notifications_tx.send(notification);
        }
        return;
    }
    debug!("unrecognized MCP frame: {line}");
}
