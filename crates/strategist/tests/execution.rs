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

//! Agent execution against a real in-process MCP server (HTTP transport),
//! with a scripted model: tool wrapping, auto-complete injection, stop
//! conditions, token accounting, and the notification path.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use vox_common::{GameEvent, VisibilityFlags};
use vox_knowledge::{KnowledgeManager, KnowledgeManagerConfig};
use vox_mcp::bridge_client::BridgeClient;
use vox_mcp::events::EventService;
use vox_mcp::server::{McpServer, SessionContext};
use vox_mcp::tools::ToolContext;
use vox_mcp::http as mcp_http;
use vox_strategist::agent::{StrategistParameters, VoxAgent};
use vox_strategist::context::VoxContext;
use vox_strategist::mcp_client::{McpClient, McpEndpoint};
use vox_strategist::model::testing::{MockModel, ScriptedStep};
use vox_strategist::model::ModelMessage;

struct TestHarness {
    context: VoxContext,
    model: Arc<MockModel>,
    events: EventService,
    _dir: tempfile::TempDir,
}

struct TestAgent;

#[async_trait::async_trait]
impl VoxAgent for TestAgent {
    fn name(&self) -> &str {
        "test-agent"
    }

    fn system_prompt(&self, _params: &StrategistParameters) -> String {
        "You are a test agent.".to_string()
    }

    fn active_tools(&self, _params: &StrategistParameters) -> Vec<String> {
        vec!["get-cities".to_string(), "get-players".to_string()]
    }
}

async fn start_harness(script: Vec<ScriptedStep>) -> TestHarness {
    let dir = tempfile::tempdir().unwrap();
    let knowledge = KnowledgeManager::new(KnowledgeManagerConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    });
    knowledge.initialize("test-game", 5).await.unwrap();
    knowledge
        .with_store(|db| {
            db.store_mutable_knowledge(
                "CityInformations",
                42,
                5,
                &json!({"Name": "Ravenna", "OwnerID": 3}),
                &VisibilityFlags::compose(&[3]),
                &[],
            )
            .map(|_| ())
        })
        .await
        .unwrap();

    let bridge = BridgeClient::new("http://127.0.0.1:1");
    let ctx = ToolContext {
        knowledge: knowledge.clone(),
        bridge: bridge.clone(),
        session: SessionContext::default(),
        strategy_blacklist: vec![],
        tool_timeout: Duration::from_secs(5),
    };
    let events = EventService::new(knowledge, bridge);
    let server = McpServer::new(ctx, events.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let router = mcp_http::mk_routes(Arc::new(Mutex::new(server)), events.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = McpClient::connect(
        McpEndpoint::Http(format!("http://{address}")),
        Duration::from_secs(10),
    )
    .await
    .unwrap();

    let model = Arc::new(MockModel::scripted(script));
    let context = VoxContext::new(client, model.clone(), Duration::from_secs(5));
    context.register_agent(Arc::new(TestAgent));

    TestHarness {
        context,
        model,
        events,
        _dir: dir,
    }
}

#[tokio::test]
async fn agent_run_calls_tools_and_stops_on_text() {
    let harness = start_harness(vec![
        ScriptedStep::CallTool {
            tool: "get-cities".to_string(),
            arguments: json!({}),
        },
        ScriptedStep::Say("All quiet on the frontier.".to_string()),
    ])
    .await;

    let mut params = StrategistParameters::new(3, "test-game");
    params.turn = 5;
    let cancel = CancellationToken::new();
    let output = harness
        .context
        .execute("test-agent", &mut params, Value::Null, &cancel)
        .await
        .unwrap();
    assert_eq!(output, json!("All quiet on the frontier."));

    // Two generate rounds ran and tokens were accumulated.
    let usage = harness.context.usage();
    assert_eq!(usage.input_tokens, 20);
    assert_eq!(usage.output_tokens, 10);

    let requests = harness.model.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);

    // The schema shown to the model has the auto-complete field stripped.
    let get_cities = requests[0]
        .tools
        .iter()
        .find(|t| t.name == "get-cities")
        .expect("get-cities offered");
    assert!(get_cities.input_schema["properties"].get("PlayerID").is_none());

    // The second round saw the tool result, with PlayerID injected from
    // the execution context: the visible city came back.
    let tool_message = requests[1]
        .messages
        .iter()
        .find_map(|m| match m {
            ModelMessage::Tool { content, .. } => Some(content.clone()),
            _ => None,
        })
        .expect("tool result in second round");
    assert_eq!(tool_message["cities"][0]["Name"], "Ravenna");
}

#[tokio::test]
async fn invisible_rows_do_not_reach_the_agent() {
    let harness = start_harness(vec![
        ScriptedStep::CallTool {
            tool: "get-cities".to_string(),
            arguments: json!({}),
        },
        ScriptedStep::Say("done".to_string()),
    ])
    .await;

    // Player 4 has no visibility on the stored city.
    let mut params = StrategistParameters::new(4, "test-game");
    params.turn = 5;
    let cancel = CancellationToken::new();
    harness
        .context
        .execute("test-agent", &mut params, Value::Null, &cancel)
        .await
        .unwrap();

    let requests = harness.model.requests.lock().unwrap();
    let tool_message = requests[1]
        .messages
        .iter()
        .find_map(|m| match m {
            ModelMessage::Tool { content, .. } => Some(content.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(tool_message["cities"], json!([]));
}

#[tokio::test]
async fn cancellation_aborts_mid_run() {
    let harness = start_harness(vec![ScriptedStep::CallTool {
        tool: "get-cities".to_string(),
        arguments: json!({}),
    }])
    .await;

    let mut params = StrategistParameters::new(3, "test-game");
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = harness
        .context
        .execute("test-agent", &mut params, Value::Null, &cancel)
        .await;
    assert!(matches!(result, Err(vox_strategist::StrategistError::Cancelled)));
}

#[tokio::test]
async fn turn_notifications_flow_to_the_client() {
    let harness = start_harness(vec![]).await;
    let mut notifications = harness.context.mcp().notifications();

    // Let the SSE subscription attach before emitting.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut event = GameEvent::new("PlayerDoneTurn", json!([3, 6]));
    event.game_id = Some("test-game".to_string());
    event.turn = Some(6);
    harness.events.handle_event(event).await;

    let notification = tokio::time::timeout(Duration::from_secs(3), notifications.recv())
        .await
        .expect("timed out waiting for notification")
        .unwrap();
    assert_eq!(notification.event, "PlayerDoneTurn");
    assert_eq!(notification.player_id, Some(3));
    assert_eq!(notification.turn, Some(6));
    assert!(notification.latest_id.unwrap() > 0);
}
