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

//! HTTP transport for the MCP server: JSON-RPC over `POST /rpc`,
//! notifications over `GET /events` SSE. The alternative to stdio for
//! clients that are not child processes.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::{get, post};
use futures_util::Stream;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::events::EventService;
use crate::server::McpServer;
use crate::types::{GAME_EVENT_METHOD, JsonRpcNotification};

#[derive(Clone)]
pub struct HttpState {
    server: Arc<Mutex<McpServer>>,
    events: EventService,
}

pub fn mk_routes(server: Arc<Mutex<McpServer>>, events: EventService) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/events", get(events_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(HttpState { server, events })
}

async fn rpc_handler(State(state): State<HttpState>, Json(body): Json<Value>) -> Json<Value> {
    let response = state.server.lock().await.handle_message(body).await;
    match response {
        Some(response) => Json(serde_json::to_value(response).unwrap_or(Value::Null)),
        // A notification; nothing to say back.
        None => Json(Value::Null),
    }
}

async fn events_handler(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut notifications = state.events.subscribe();
    let stream = async_stream::stream! {
        loop {
            match notifications.recv().await {
                Ok(notification) => {
                    let frame = JsonRpcNotification::new(
                        GAME_EVENT_METHOD,
                        serde_json::to_value(&notification).unwrap_or(Value::Null),
                    );
                    let Ok(data) = serde_json::to_string(&frame) else { continue };
                    yield Ok(SseEvent::default().event("message").data(data));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "disconnecting slow MCP notification client");
                    break;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn health_handler(State(state): State<HttpState>) -> Json<Value> {
    let identity = state.events.knowledge().identity().await;
    Json(json!({"success": true, "identity": identity}))
}
