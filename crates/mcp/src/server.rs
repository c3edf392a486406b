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

//! MCP server core: JSON-RPC dispatch shared by the stdio and HTTP
//! transports, plus the stdio loop itself (stdout carries protocol frames
//! and notifications; logging goes to stderr).

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::McpError;
use crate::events::EventService;
use crate::tools;
use crate::tools::ToolContext;
use crate::types::*;

/// MCP protocol version we support
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Mutable key-value context the server injects auto-complete fields from.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    inner: Arc<StdMutex<HashMap<String, Value>>>,
}

impl SessionContext {
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.lock().unwrap().insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().unwrap().get(key).cloned()
    }
}

/// MCP server state
pub struct McpServer {
    ctx: ToolContext,
    events: EventService,
    initialized: bool,
    shutdown_requested: bool,
}

impl McpServer {
    pub fn new(ctx: ToolContext, events: EventService) -> Self {
        Self {
            ctx,
            events,
            initialized: false,
            shutdown_requested: false,
        }
    }

    pub fn tool_context(&self) -> &ToolContext {
        &self.ctx
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Run the MCP server over stdio, interleaving responses with game
    /// event notifications.
    pub async fn run_stdio(&mut self) -> eyre::Result<()> {
        info!("Starting MCP server on stdio");

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();
        let mut notifications = self.events.subscribe();

        loop {
            line.clear();
            tokio::select! {
                bytes_read = reader.read_line(&mut line) => {
                    if bytes_read? == 0 {
                        info!("EOF on stdin, shutting down");
                        break;
                    }
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    debug!("Received: {line}");

                    let response = match serde_json::from_str::<Value>(line) {
                        Ok(msg) => self.handle_message(msg).await,
                        Err(e) => {
                            error!("Failed to parse JSON: {e}");
                            Some(JsonRpcResponse::error(
                                RequestId::Number(0),
                                JsonRpcError::parse_error(e.to_string()),
                            ))
                        }
                    };

                    // Notifications don't get responses.
                    if let Some(response) = response {
                        let response_json = serde_json::to_string(&response)?;
                        stdout.write_all(response_json.as_bytes()).await?;
                        stdout.write_all(b"\n").await?;
                        stdout.flush().await?;
                    }

                    if self.shutdown_requested {
                        info!("Shutdown complete");
                        break;
                    }
                }
                notification = notifications.recv() => {
                    let Ok(notification) = notification else { continue };
                    let frame = JsonRpcNotification::new(
                        GAME_EVENT_METHOD,
                        serde_json::to_value(&notification)?,
                    );
                    let frame_json = serde_json::to_string(&frame)?;
                    stdout.write_all(frame_json.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await?;
                }
            }
        }

        self.events.stop();
        Ok(())
    }

    /// Handle an incoming JSON-RPC message. `None` for notifications.
    pub async fn handle_message(&mut self, msg: Value) -> Option<JsonRpcResponse> {
        let id = msg.get("id").cloned();
        let method = msg.get("method").and_then(|m| m.as_str());
        let params = msg.get("params").cloned().unwrap_or(json!({}));

        let method = match method {
            Some(m) => m,
            None => {
                return id.map(|id| {
                    JsonRpcResponse::error(
                        parse_request_id(&id),
                        JsonRpcError::invalid_request("Missing method"),
                    )
                });
            }
        };

        debug!("Handling method: {method}");

        let result = match method {
            // Lifecycle methods
            "initialize" => self.handle_initialize(&params),
            "initialized" | "notifications/initialized" => {
                self.initialized = true;
                info!("Client initialized");
                return None;
            }
            "shutdown" => {
                info!("Shutdown requested");
                self.shutdown_requested = true;
                Ok(json!({}))
            }

            // Tool methods
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(&params).await,

            // Ping
            "ping" => Ok(json!({})),

            _ => {
                warn!("Unknown method: {method}");
                Err(JsonRpcError::method_not_found(method))
            }
        };

        let request_id = id
            .map(|id| parse_request_id(&id))
            .unwrap_or(RequestId::Number(0));

        Some(match result {
            Ok(value) => JsonRpcResponse::success(request_id, value),
            Err(error) => JsonRpcResponse::error(request_id, error),
        })
    }

    fn handle_initialize(&mut self, _params: &Value) -> Result<Value, JsonRpcError> {
        info!("Initializing MCP server");
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: "vox-mcp-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        Ok(serde_json::to_value(result).unwrap())
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let result = ToolsListResult {
            tools: tools::get_tools(),
        };
        Ok(serde_json::to_value(result).unwrap())
    }

    async fn handle_tools_call(&mut self, params: &Value) -> Result<Value, JsonRpcError> {
        let call_params: ToolCallParams = serde_json::from_value(params.clone())
            .map_err(|e| JsonRpcError::invalid_params(e.to_string()))?;

        let result =
            tools::execute_tool(&self.ctx, &call_params.name, &call_params.arguments).await;

        let result = match result {
            Ok(result) => result,
            // Bad arguments fail fast and are not retryable.
            Err(McpError::InvalidArguments(message)) => {
                return Err(JsonRpcError::invalid_params(message));
            }
            Err(e) => ToolCallResult::error(e.to_string()),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }
}

fn parse_request_id(id: &Value) -> RequestId {
    match id {
        Value::Number(n) => RequestId::Number(n.as_i64().unwrap_or(0)),
        Value::String(s) => RequestId::String(s.clone()),
        _ => RequestId::Number(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge_client::BridgeClient;
    use std::time::Duration;
    use vox_knowledge::{KnowledgeManager, KnowledgeManagerConfig};

    fn test_server(dir: &tempfile::TempDir) -> McpServer {
        let knowledge = KnowledgeManager::new(KnowledgeManagerConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        let bridge = BridgeClient::new("http://127.0.0.1:1");
        let ctx = ToolContext {
            knowledge: knowledge.clone(),
            bridge: bridge.clone(),
            session: SessionContext::default(),
            strategy_blacklist: vec![],
            tool_timeout: Duration::from_secs(5),
        };
        let events = EventService::new(knowledge, bridge);
        McpServer::new(ctx, events)
    }

    #[tokio::test]
    async fn initialize_then_list_tools() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = test_server(&dir);

        let response = server
            .handle_message(json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": {"protocolVersion": "2024-11-05", "capabilities": {},
                           "clientInfo": {"name": "t", "version": "0"}}
            }))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "vox-mcp-server");

        assert!(
            server
                .handle_message(json!({"jsonrpc": "2.0", "method": "initialized"}))
                .await
                .is_none()
        );

        let response = server
            .handle_message(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .await
            .unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert!(names.contains(&"get-players"));
        assert!(names.contains(&"declare-war"));
        assert!(names.contains(&"pause-game"));
        assert!(names.contains(&"get-building"));

        // Action tools declare PlayerID as auto-completed.
        let declare_war = tools.iter().find(|t| t["name"] == "declare-war").unwrap();
        assert_eq!(declare_war["autoComplete"], json!(["PlayerID"]));
    }

    #[tokio::test]
    async fn knowledge_tool_round_trips_through_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = test_server(&dir);
        let knowledge = server.tool_context().knowledge.clone();
        knowledge.initialize("g1", 3).await.unwrap();
        knowledge
            .with_store(|db| {
                db.store_public_knowledge("PlayerInformations", "0", &json!({"Leader": "Nero"}))
            })
            .await
            .unwrap();

        let response = server
            .handle_message(json!({
                "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                "params": {"name": "get-players", "arguments": {}}
            }))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_ne!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("Nero"));
    }

    #[tokio::test]
    async fn missing_arguments_fail_fast() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = test_server(&dir);
        server
            .tool_context()
            .knowledge
            .initialize("g1", 1)
            .await
            .unwrap();

        let response = server
            .handle_message(json!({
                "jsonrpc": "2.0", "id": 4, "method": "tools/call",
                "params": {"name": "get-cities", "arguments": {}}
            }))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn auto_complete_fills_player_id_from_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = test_server(&dir);
        let ctx = server.tool_context();
        ctx.knowledge.initialize("g1", 1).await.unwrap();
        ctx.session.set("PlayerID", json!(3));

        // No PlayerID in the arguments, but the session supplies it.
        let response = server
            .handle_message(json!({
                "jsonrpc": "2.0", "id": 5, "method": "tools/call",
                "params": {"name": "get-cities", "arguments": {}}
            }))
            .await
            .unwrap();
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = test_server(&dir);
        let response = server
            .handle_message(json!({"jsonrpc": "2.0", "id": 9, "method": "bogus/method"}))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32601);
    }
}
