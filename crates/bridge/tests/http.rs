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

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{Value, json};

use vox_bridge::BridgeService;
use vox_bridge::routes::mk_routes;
use vox_common::GameEvent;
use vox_connector::{ConnectorConfig, DllConnector};
use vox_protocol::PipeEndpoint;
use vox_protocol::testing::MockDllServer;

struct TestBridge {
    base: String,
    service: BridgeService,
    mock: MockDllServer,
}

async fn start_bridge(tag: &str) -> TestBridge {
    let pipe_id = format!("vox-bridge-test-{tag}-{}", std::process::id());
    let mock = MockDllServer::spawn(PipeEndpoint::new(pipe_id.clone())).unwrap();

    let connector = DllConnector::new(ConnectorConfig {
        pipe_id,
        retry_base: Duration::from_millis(50),
        ..Default::default()
    });
    let service = BridgeService::new(connector, 16);
    assert!(service.start().await);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let router = mk_routes(service.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestBridge {
        base: format!("http://{address}"),
        service,
        mock,
    }
}

#[tokio::test]
async fn lua_call_round_trips() {
    let bridge = start_bridge("luacall").await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/lua/call", bridge.base))
        .json(&json!({"function": "GetPlayerName", "args": []}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["success"], true);
    assert_eq!(body["result"], "Mock Player");
}

#[tokio::test]
async fn lua_batch_preserves_order() {
    let bridge = start_bridge("luabatch").await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/lua/batch", bridge.base))
        .json(&json!({"calls": [
            {"function": "Alpha", "args": []},
            {"function": "Beta", "args": []},
        ]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["result"]["function"], "Alpha");
    assert_eq!(results[1]["result"]["function"], "Beta");
}

#[tokio::test]
async fn lua_call_failure_is_a_domain_error() {
    let bridge = start_bridge("luafail").await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/lua/call", bridge.base))
        .json(&json!({"function": "FailingFunction", "args": []}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("error"));
}

#[tokio::test]
async fn external_registry_lifecycle() {
    let bridge = start_bridge("extreg").await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/external/register", bridge.base))
        .json(&json!({"name": "advisor", "url": "http://localhost:1/advisor", "async": false, "timeout": 1000}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);

    let body: Value = client
        .get(format!("{}/external/functions", bridge.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["functions"][0]["name"], "advisor");

    // The DLL was told about the registration too.
    assert!(
        bridge
            .mock
            .state()
            .lock()
            .unwrap()
            .external_functions
            .contains_key("advisor")
    );

    let body: Value = client
        .delete(format!("{}/external/register/advisor", bridge.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);

    let body: Value = client
        .get(format!("{}/external/functions", bridge.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body["functions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn pause_and_resume_reach_the_dll() {
    let bridge = start_bridge("pause").await;
    let client = reqwest::Client::new();

    let body: Value = client
        .post(format!("{}/external/pause-player/3", bridge.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);
    assert!(bridge.mock.state().lock().unwrap().paused_players.contains(&3));
    assert_eq!(bridge.service.paused_players(), vec![3]);

    let body: Value = client
        .delete(format!("{}/external/pause-player/3", bridge.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);
    assert!(bridge.mock.state().lock().unwrap().paused_players.is_empty());
    assert!(bridge.service.paused_players().is_empty());
}

#[tokio::test]
async fn health_reports_dll_connection() {
    let bridge = start_bridge("health").await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{}/health", bridge.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["dll_connected"], true);
}

#[tokio::test]
async fn events_stream_re_emits_game_events() {
    let bridge = start_bridge("sse").await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/events", bridge.base))
        .send()
        .await
        .unwrap();
    let mut stream = response.bytes_stream();

    // Give the SSE subscription a moment to attach, then emit.
    tokio::time::sleep(Duration::from_millis(100)).await;
    bridge
        .mock
        .emit_event(GameEvent::new("PlayerDoneTurn", json!([0, 5])));

    let mut collected = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !collected.contains("PlayerDoneTurn") {
        let chunk = tokio::time::timeout_at(deadline, stream.next())
            .await
            .expect("timed out waiting for SSE event")
            .expect("stream ended")
            .unwrap();
        collected.push_str(&String::from_utf8_lossy(&chunk));
    }
    assert!(collected.contains("data:"));
}

/// The DLL asks for an external function; the bridge proxies the HTTP call
/// and replies with a correlated `external_response`.
#[tokio::test]
async fn external_call_is_proxied_with_call_id() {
    let bridge = start_bridge("extcall").await;
    let client = reqwest::Client::new();

    // A tiny HTTP endpoint standing in for an analytical agent.
    let target = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_addr: SocketAddr = target.local_addr().unwrap();
    tokio::spawn(async move {
        let app = axum::Router::new().route(
            "/oracle",
            axum::routing::post(|| async { axum::Json(json!({"answer": 42})) }),
        );
        axum::serve(target, app).await.unwrap();
    });

    let body: Value = client
        .post(format!("{}/external/register", bridge.base))
        .json(&json!({
            "name": "oracle",
            "url": format!("http://{target_addr}/oracle"),
            "async": false,
            "timeout": 2000
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);

    bridge.mock.emit_event(GameEvent::new(
        "ExternalCall",
        json!(["oracle", {"question": "ultimate"}, "call-77"]),
    ));

    // The mock records the external_response frame.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        {
            let state_arc = bridge.mock.state();
            let state = state_arc.lock().unwrap();
            if let Some(response) = state
                .received
                .iter()
                .find(|m| m["type"] == "external_response")
            {
                assert_eq!(response["callID"], "call-77");
                assert_eq!(response["success"], true);
                assert_eq!(response["result"]["answer"], 42);
                break;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "external_response never arrived"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
