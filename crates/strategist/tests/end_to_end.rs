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

//! The whole control plane in one test: a mock DLL on a real pipe, the
//! bridge fronting it over HTTP/SSE, the MCP server ingesting events and
//! serving tools, and a session running a scripted agent under turn gating.
//!
//! One turn notification must produce exactly one paused, tool-driven agent
//! execution whose action lands back on the DLL, followed by a resume; a
//! victory event must terminate the session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::Mutex;

use vox_bridge::BridgeService;
use vox_bridge::routes::mk_routes as bridge_routes;
use vox_common::GameEvent;
use vox_connector::{ConnectorConfig, DllConnector};
use vox_knowledge::{KnowledgeManager, KnowledgeManagerConfig};
use vox_mcp::bridge_client::BridgeClient;
use vox_mcp::events::EventService;
use vox_mcp::http as mcp_http;
use vox_mcp::server::{McpServer, SessionContext};
use vox_mcp::tools::ToolContext;
use vox_protocol::PipeEndpoint;
use vox_protocol::testing::MockDllServer;
use vox_strategist::agent::{StrategistParameters, VoxAgent};
use vox_strategist::mcp_client::McpEndpoint;
use vox_strategist::model::testing::{MockModel, ScriptedStep};
use vox_strategist::session::{SessionConfig, StrategistSession};

struct ScriptedAgent;

#[async_trait::async_trait]
impl VoxAgent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    fn system_prompt(&self, _params: &StrategistParameters) -> String {
        "Play the turn.".to_string()
    }

    fn active_tools(&self, _params: &StrategistParameters) -> Vec<String> {
        vec!["get-events".to_string(), "set-strategy".to_string()]
    }
}

#[tokio::test]
async fn one_turn_flows_from_dll_to_agent_and_back() {
    // Tier 0: the game, standing in as a mock on a real pipe.
    let pipe_id = format!("vox-e2e-{}", std::process::id());
    let mock = MockDllServer::spawn(PipeEndpoint::new(pipe_id.clone())).unwrap();

    // Tier 1: bridge over the pipe, served on HTTP.
    let connector = DllConnector::new(ConnectorConfig {
        pipe_id,
        retry_base: Duration::from_millis(50),
        ..Default::default()
    });
    let bridge_service = BridgeService::new(connector, 64);
    assert!(bridge_service.start().await);
    let bridge_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let bridge_addr = bridge_listener.local_addr().unwrap();
    let router = bridge_routes(bridge_service.clone());
    tokio::spawn(async move {
        axum::serve(bridge_listener, router).await.unwrap();
    });

    // Tier 2: MCP server with its own knowledge store, fed by bridge SSE.
    let dir = tempfile::tempdir().unwrap();
    let knowledge = KnowledgeManager::new(KnowledgeManagerConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    });
    let bridge_client = BridgeClient::new(format!("http://{bridge_addr}"));
    let events = EventService::new(knowledge.clone(), bridge_client.clone());
    events.start();
    let ctx = ToolContext {
        knowledge,
        bridge: bridge_client,
        session: SessionContext::default(),
        strategy_blacklist: vec![],
        tool_timeout: Duration::from_secs(10),
    };
    let mcp_server = McpServer::new(ctx, events.clone());
    let mcp_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mcp_addr = mcp_listener.local_addr().unwrap();
    let mcp_router = mcp_http::mk_routes(Arc::new(Mutex::new(mcp_server)), events.clone());
    tokio::spawn(async move {
        axum::serve(mcp_listener, mcp_router).await.unwrap();
    });

    // Tier 3: the session, driving player 0 with a scripted model.
    let model = Arc::new(MockModel::scripted(vec![
        ScriptedStep::CallTool {
            tool: "get-events".to_string(),
            arguments: json!({}),
        },
        ScriptedStep::CallTool {
            tool: "set-strategy".to_string(),
            arguments: json!({"Strategy": "Conquest"}),
        },
        ScriptedStep::Say("Expanding aggressively.".to_string()),
    ]));
    let session = StrategistSession::new(SessionConfig {
        endpoint: McpEndpoint::Http(format!("http://{mcp_addr}")),
        llm_players: HashMap::from([(0, "scripted".to_string())]),
        connect_window: Duration::from_secs(10),
        tool_timeout: Duration::from_secs(10),
        ..Default::default()
    });
    let run_session = session.clone();
    let session_task =
        tokio::spawn(async move { run_session.run(model, vec![Arc::new(ScriptedAgent)]).await });

    // Give every SSE subscription a moment to attach.
    tokio::time::sleep(Duration::from_millis(500)).await;

    // The game announces player 0's turn.
    let mut done_turn = GameEvent::new("PlayerDoneTurn", json!([0, 6]));
    done_turn.game_id = Some("e2e-game".to_string());
    done_turn.turn = Some(6);
    mock.emit_event(done_turn);

    // The agent's order must land on the DLL, bracketed by pause/resume.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        {
            let state_arc = mock.state();
            let state = state_arc.lock().unwrap();
            let saw = |kind: &str, predicate: &dyn Fn(&Value) -> bool| {
                state
                    .received
                    .iter()
                    .any(|m| m["type"] == kind && predicate(m))
            };
            let strategy_set = saw("lua_call", &|m| {
                m["function"] == "SetGrandStrategy" && m["args"] == json!([0, "Conquest"])
            });
            let paused = saw("pause_player", &|m| m["playerID"] == 0);
            let resumed = saw("resume_player", &|m| m["playerID"] == 0);
            if strategy_set && paused && resumed {
                break;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "turn never completed; DLL saw: {:?}",
            mock.state().lock().unwrap().received
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // Pause strictly precedes the strategy order, which precedes resume.
    {
        let state_arc = mock.state();
        let state = state_arc.lock().unwrap();
        let position = |kind: &str, function: Option<&str>| {
            state
                .received
                .iter()
                .position(|m| {
                    m["type"] == kind
                        && function.map(|f| m["function"] == f).unwrap_or(true)
                })
                .unwrap()
        };
        let pause = position("pause_player", None);
        let order = position("lua_call", Some("SetGrandStrategy"));
        let resume = position("resume_player", None);
        assert!(pause < order && order < resume);
        assert!(state.paused_players.is_empty(), "player left paused");
    }

    // Victory ends the session.
    let mut victory = GameEvent::new("PlayerVictory", json!([0, "Domination"]));
    victory.game_id = Some("e2e-game".to_string());
    victory.turn = Some(6);
    mock.emit_event(victory);

    let result = tokio::time::timeout(Duration::from_secs(10), session_task)
        .await
        .expect("session did not terminate")
        .unwrap()
        .expect("session failed");
    assert_eq!(result.event, "PlayerVictory");
    assert_eq!(result.player_id, Some(0));
}
