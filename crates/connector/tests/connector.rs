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

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_util::codec::{FramedRead, FramedWrite};

use vox_common::GameEvent;
use vox_connector::{ConnectorConfig, ConnectorError, DllConnector};
use vox_protocol::testing::MockDllServer;
use vox_protocol::{DEFAULT_MAX_FRAME, PipeEndpoint, PipeListener, RequestBody, frame_codec};

fn unique_pipe_id(tag: &str) -> String {
    format!("vox-conn-test-{tag}-{}", std::process::id())
}

fn test_config(pipe_id: String) -> ConnectorConfig {
    ConnectorConfig {
        pipe_id,
        retry_base: Duration::from_millis(50),
        retry_max: Duration::from_millis(500),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

#[tokio::test]
async fn connect_and_echo() {
    let pipe_id = unique_pipe_id("echo");
    let _mock = MockDllServer::spawn(PipeEndpoint::new(pipe_id.clone())).unwrap();

    let connector = DllConnector::new(test_config(pipe_id));
    assert!(connector.connect().await);

    let result = connector
        .send(RequestBody::LuaCall {
            function: "GetPlayerName".into(),
            args: vec![],
        })
        .await
        .unwrap();
    assert_eq!(result, json!("Mock Player"));

    connector.disconnect().await;
}

#[tokio::test]
async fn connect_is_idempotent() {
    let pipe_id = unique_pipe_id("idem");
    let mock = MockDllServer::spawn(PipeEndpoint::new(pipe_id.clone())).unwrap();

    let connector = DllConnector::new(test_config(pipe_id));
    assert!(connector.connect().await);
    assert!(connector.connect().await);
    // The mock saw exactly one client.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock.state().lock().unwrap().connections_accepted, 1);
}

#[tokio::test]
async fn reconnect_counter_grows_until_disconnect() {
    // Nothing listens on this pipe id.
    let connector = DllConnector::new(test_config("invalid-reconnect-test".into()));
    assert!(!connector.connect().await);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let attempts = connector.stats().reconnect_attempts;
    assert!(attempts > 0, "expected reconnect attempts, got {attempts}");

    connector.disconnect().await;
    let frozen = connector.stats().reconnect_attempts;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(connector.stats().reconnect_attempts, frozen);
}

#[tokio::test]
async fn clean_disconnect_fires_exactly_once() {
    let pipe_id = unique_pipe_id("clean");
    let _mock = MockDllServer::spawn(PipeEndpoint::new(pipe_id.clone())).unwrap();

    let connector = DllConnector::new(test_config(pipe_id));
    assert!(connector.connect().await);

    let mut state = connector.connection_state();
    assert!(*state.borrow_and_update());

    connector.disconnect().await;
    state.changed().await.unwrap();
    assert!(!*state.borrow_and_update());
    assert!(!connector.is_connected());

    // A second disconnect is a no-op: no further transition arrives.
    connector.disconnect().await;
    let second = tokio::time::timeout(Duration::from_millis(100), state.changed()).await;
    assert!(second.is_err(), "disconnect must not fire twice");
}

#[tokio::test]
async fn failing_call_surfaces_rpc_error() {
    let pipe_id = unique_pipe_id("rpcerr");
    let _mock = MockDllServer::spawn(PipeEndpoint::new(pipe_id.clone())).unwrap();

    let connector = DllConnector::new(test_config(pipe_id));
    assert!(connector.connect().await);

    let err = connector
        .send(RequestBody::LuaCall {
            function: "FailingFunction".into(),
            args: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Rpc(_)));
    assert_eq!(connector.stats().pending_requests, 0);
}

#[tokio::test]
async fn game_events_fan_out_to_subscribers() {
    let pipe_id = unique_pipe_id("events");
    let mock = MockDllServer::spawn(PipeEndpoint::new(pipe_id.clone())).unwrap();

    let connector = DllConnector::new(test_config(pipe_id));
    assert!(connector.connect().await);
    let mut events = connector.subscribe_events();

    mock.emit_event(GameEvent::new("PlayerEndTurnInitiated", json!([7])));
    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event, "PlayerEndTurnInitiated");
    assert_eq!(event.payload, json!([7]));
}

/// A hand-rolled pipe server that answers out of order and injects an
/// unmatched response; correlation must survive both.
#[tokio::test]
async fn responses_correlate_by_id_and_strays_are_dropped() {
    let pipe_id = unique_pipe_id("correlate");
    let endpoint = PipeEndpoint::new(pipe_id.clone());
    let mut listener = PipeListener::bind(&endpoint).unwrap();

    let server = tokio::spawn(async move {
        let stream = listener.accept().await.unwrap();
        let (read_half, write_half) = tokio::io::split(stream);
        let mut frames = FramedRead::new(read_half, frame_codec(DEFAULT_MAX_FRAME));
        let mut sink = FramedWrite::new(write_half, frame_codec(DEFAULT_MAX_FRAME));

        // Stray response nobody asked for: must be dropped.
        sink.send(json!({"type": "response", "id": 9999, "success": true, "result": "stray"}).to_string())
            .await
            .unwrap();

        // Collect two requests, answer them in reverse order.
        let mut ids = Vec::new();
        while ids.len() < 2 {
            let frame = frames.next().await.unwrap().unwrap();
            let msg: Value = serde_json::from_str(&frame).unwrap();
            ids.push(msg["id"].as_u64().unwrap());
        }
        for id in ids.iter().rev() {
            sink.send(
                json!({"type": "response", "id": id, "success": true, "result": format!("r{id}")})
                    .to_string(),
            )
            .await
            .unwrap();
        }
        // Keep the connection open until the client is done.
        let _ = frames.next().await;
    });

    let connector = DllConnector::new(test_config(pipe_id));
    assert!(connector.connect().await);

    let first = connector.send(RequestBody::LuaCall {
        function: "First".into(),
        args: vec![],
    });
    let second = connector.send(RequestBody::LuaCall {
        function: "Second".into(),
        args: vec![],
    });
    let (first, second) = tokio::join!(first, second);

    // Each send got the response for its own id despite reversed delivery.
    let first = first.unwrap().as_str().unwrap().to_string();
    let second = second.unwrap().as_str().unwrap().to_string();
    assert_ne!(first, second);
    assert_eq!(connector.stats().pending_requests, 0);

    connector.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn request_timeout_rejects_only_that_request() {
    let pipe_id = unique_pipe_id("timeout");
    let endpoint = PipeEndpoint::new(pipe_id.clone());
    let mut listener = PipeListener::bind(&endpoint).unwrap();

    // Accept and read but never respond.
    let server = tokio::spawn(async move {
        let stream = listener.accept().await.unwrap();
        let (read_half, _write_half) = tokio::io::split(stream);
        let mut frames = FramedRead::new(read_half, frame_codec(DEFAULT_MAX_FRAME));
        while frames.next().await.is_some() {}
    });

    let config = ConnectorConfig {
        request_timeout: Duration::from_millis(100),
        ..test_config(pipe_id)
    };
    let connector = DllConnector::new(config);
    assert!(connector.connect().await);

    let err = connector
        .send(RequestBody::LuaCall {
            function: "Slow".into(),
            args: vec![],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Timeout));
    assert_eq!(connector.stats().pending_requests, 0);
    assert!(connector.is_connected(), "timeout must not drop the pipe");

    connector.disconnect().await;
    server.abort();
}

#[tokio::test]
async fn reconnects_after_server_restart() {
    let pipe_id = unique_pipe_id("restart");
    let mock = MockDllServer::spawn(PipeEndpoint::new(pipe_id.clone())).unwrap();

    let connector = DllConnector::new(test_config(pipe_id.clone()));
    assert!(connector.connect().await);

    // Kill the mock; the connector should notice and begin reconnecting.
    mock.shutdown();
    drop(mock);
    let mut state = connector.connection_state();
    tokio::time::timeout(Duration::from_secs(2), state.changed())
        .await
        .expect("connection loss not observed")
        .unwrap();
    assert!(!*state.borrow_and_update());

    // Bring the DLL back; the backoff loop should find it.
    let _mock = MockDllServer::spawn(PipeEndpoint::new(pipe_id)).unwrap();
    tokio::time::timeout(Duration::from_secs(5), state.changed())
        .await
        .expect("reconnect not observed")
        .unwrap();
    assert!(*state.borrow_and_update());

    connector.disconnect().await;
}
