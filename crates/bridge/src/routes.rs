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

use std::convert::Infallible;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::{delete, get, post};
use futures_util::Stream;
use serde_derive::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use vox_common::PlayerId;
use vox_connector::ConnectorError;
use vox_protocol::LuaCall;

use crate::service::{BridgeService, ExternalFunction};

pub fn mk_routes(service: BridgeService) -> Router {
    Router::new()
        .route("/lua/call", post(lua_call_handler))
        .route("/lua/batch", post(lua_batch_handler))
        .route("/lua/execute", post(lua_execute_handler))
        .route("/lua/functions", get(lua_functions_handler))
        .route("/external/register", post(external_register_handler))
        .route(
            "/external/register/{name}",
            delete(external_unregister_handler),
        )
        .route("/external/functions", get(external_functions_handler))
        .route(
            "/external/pause-player/{id}",
            post(pause_player_handler).delete(resume_player_handler),
        )
        .route("/events", get(events_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

#[derive(Debug, Deserialize)]
struct LuaCallBody {
    function: String,
    #[serde(default)]
    args: Vec<Value>,
}

async fn lua_call_handler(
    State(service): State<BridgeService>,
    Json(body): Json<LuaCallBody>,
) -> Json<Value> {
    Json(call_result(
        service.lua_call(body.function, body.args).await,
    ))
}

#[derive(Debug, Deserialize)]
struct LuaBatchBody {
    calls: Vec<LuaCall>,
}

async fn lua_batch_handler(
    State(service): State<BridgeService>,
    Json(body): Json<LuaBatchBody>,
) -> Json<Value> {
    let results: Vec<Value> = service
        .lua_batch(body.calls)
        .await
        .into_iter()
        .map(call_result)
        .collect();
    Json(json!({"results": results}))
}

#[derive(Debug, Deserialize)]
struct LuaExecuteBody {
    script: String,
}

async fn lua_execute_handler(
    State(service): State<BridgeService>,
    Json(body): Json<LuaExecuteBody>,
) -> Json<Value> {
    Json(call_result(service.lua_execute(body.script).await))
}

async fn lua_functions_handler(State(service): State<BridgeService>) -> Json<Value> {
    match service.lua_functions().await {
        Ok(functions) => Json(json!({"functions": functions})),
        Err(e) => Json(json!({"functions": [], "error": e.to_string()})),
    }
}

async fn external_register_handler(
    State(service): State<BridgeService>,
    Json(function): Json<ExternalFunction>,
) -> Json<Value> {
    match service.register_external(function).await {
        Ok(()) => Json(json!({"success": true})),
        Err(e) => Json(json!({"success": false, "error": e.to_string()})),
    }
}

async fn external_unregister_handler(
    State(service): State<BridgeService>,
    Path(name): Path<String>,
) -> Json<Value> {
    match service.unregister_external(&name).await {
        Ok(removed) => Json(json!({"success": removed})),
        Err(e) => Json(json!({"success": false, "error": e.to_string()})),
    }
}

async fn external_functions_handler(State(service): State<BridgeService>) -> Json<Value> {
    Json(json!({"functions": service.external_functions()}))
}

async fn pause_player_handler(
    State(service): State<BridgeService>,
    Path(id): Path<PlayerId>,
) -> Json<Value> {
    match service.pause_player(id).await {
        Ok(()) => Json(json!({"success": true})),
        Err(e) => Json(json!({"success": false, "error": e.to_string()})),
    }
}

async fn resume_player_handler(
    State(service): State<BridgeService>,
    Path(id): Path<PlayerId>,
) -> Json<Value> {
    match service.resume_player(id).await {
        Ok(()) => Json(json!({"success": true})),
        Err(e) => Json(json!({"success": false, "error": e.to_string()})),
    }
}

/// SSE fan-out of every game event. Each client gets an independent queue;
/// a client that lags past the broadcast capacity is disconnected.
async fn events_handler(
    State(service): State<BridgeService>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut events = service.subscribe_events();
    let guard = service.sse_client_connected();
    let stream = async_stream::stream! {
        // Moved into the stream so it drops when the client goes away.
        let _guard = guard;
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Ok(data) = serde_json::to_string(&event) else { continue };
                    yield Ok(SseEvent::default().event("message").data(data));
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "disconnecting slow SSE client");
                    break;
                }
                Err(RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn health_handler(State(service): State<BridgeService>) -> Json<Value> {
    Json(serde_json::to_value(service.health()).unwrap_or_default())
}

async fn stats_handler(State(service): State<BridgeService>) -> Json<Value> {
    Json(serde_json::to_value(service.stats()).unwrap_or_default())
}

fn call_result(result: Result<Value, ConnectorError>) -> Value {
    match result {
        Ok(result) => json!({"success": true, "result": result}),
        Err(ConnectorError::Rpc(message)) => json!({"success": false, "error": message}),
        Err(e) => json!({"success": false, "error": e.to_string()}),
    }
}
