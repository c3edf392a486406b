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

//! HTTP client for the bridge service.
//!
//! All action tools go through here. Transport failures retry up to three
//! times with exponential backoff; a `success: false` reply is a domain
//! error and is never retried.

use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde_json::{Value, json};
use tracing::{debug, warn};

use vox_common::{GameEvent, PlayerId};

use crate::McpError;

const TRANSPORT_RETRIES: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct BridgeClient {
    base_url: String,
    http: reqwest::Client,
}

impl BridgeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn lua_call(&self, function: &str, args: Vec<Value>) -> Result<Value, McpError> {
        self.post_enveloped(
            "/lua/call",
            json!({"function": function, "args": args}),
        )
        .await
    }

    pub async fn lua_execute(&self, script: &str) -> Result<Value, McpError> {
        self.post_enveloped("/lua/execute", json!({"script": script}))
            .await
    }

    pub async fn lua_functions(&self) -> Result<Vec<String>, McpError> {
        let body = self
            .request_with_retry(|| self.http.get(format!("{}/lua/functions", self.base_url)))
            .await?;
        Ok(serde_json::from_value(body["functions"].clone()).unwrap_or_default())
    }

    pub async fn pause_player(&self, player: PlayerId) -> Result<(), McpError> {
        self.post_success(&format!("/external/pause-player/{player}"))
            .await
    }

    pub async fn resume_player(&self, player: PlayerId) -> Result<(), McpError> {
        let url = format!("{}/external/pause-player/{player}", self.base_url);
        let body = self.request_with_retry(|| self.http.delete(&url)).await?;
        expect_success(&body)
    }

    pub async fn register_external(
        &self,
        name: &str,
        url: &str,
        is_async: bool,
        timeout_ms: u64,
    ) -> Result<(), McpError> {
        let body = self
            .request_with_retry(|| {
                self.http
                    .post(format!("{}/external/register", self.base_url))
                    .json(&json!({
                        "name": name,
                        "url": url,
                        "async": is_async,
                        "timeout": timeout_ms,
                    }))
            })
            .await?;
        expect_success(&body)
    }

    pub async fn health(&self) -> Result<Value, McpError> {
        self.request_with_retry(|| self.http.get(format!("{}/health", self.base_url)))
            .await
    }

    /// One SSE connection to `/events`, yielding parsed game events until
    /// the bridge goes away. The caller owns reconnection.
    pub async fn events(&self) -> Result<BoxStream<'static, GameEvent>, McpError> {
        let response = self
            .http
            .get(format!("{}/events", self.base_url))
            .send()
            .await
            .map_err(|e| McpError::Bridge(e.to_string()))?;
        if !response.status().is_success() {
            return Err(McpError::Bridge(format!(
                "event stream returned {}",
                response.status()
            )));
        }

        let mut bytes = response.bytes_stream();
        Ok(Box::pin(async_stream::stream! {
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let Ok(chunk) = chunk else { break };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    let line = line.trim();
                    if let Some(data) = line.strip_prefix("data:") {
                        match serde_json::from_str::<GameEvent>(data.trim()) {
                            Ok(event) => yield event,
                            Err(e) => debug!("skipping non-event SSE data: {e}"),
                        }
                    }
                }
            }
            warn!("bridge event stream ended");
        }))
    }

    /// POST expecting the `{success, result, error}` envelope.
    async fn post_enveloped(&self, path: &str, body: Value) -> Result<Value, McpError> {
        let url = format!("{}{path}", self.base_url);
        let envelope = self
            .request_with_retry(|| self.http.post(&url).json(&body))
            .await?;
        if envelope["success"].as_bool().unwrap_or(false) {
            Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
        } else {
            Err(McpError::BridgeRpc(
                envelope["error"]
                    .as_str()
                    .unwrap_or("unknown bridge error")
                    .to_string(),
            ))
        }
    }

    async fn post_success(&self, path: &str) -> Result<(), McpError> {
        let url = format!("{}{path}", self.base_url);
        let body = self.request_with_retry(|| self.http.post(&url)).await?;
        expect_success(&body)
    }

    /// Issue a request, retrying transport failures with exponential
    /// backoff up to the hard cap.
    async fn request_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<Value, McpError> {
        let mut last_error = String::new();
        for attempt in 0..TRANSPORT_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BASE * 2u32.pow(attempt - 1)).await;
            }
            match build().send().await {
                Ok(response) => {
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| McpError::Bridge(e.to_string()));
                }
                Err(e) => {
                    warn!(attempt, "bridge request failed: {e}");
                    last_error = e.to_string();
                }
            }
        }
        Err(McpError::Bridge(last_error))
    }
}

fn expect_success(body: &Value) -> Result<(), McpError> {
    if body["success"].as_bool().unwrap_or(false) {
        Ok(())
    } else {
        Err(McpError::BridgeRpc(
            body["error"]
                .as_str()
                .unwrap_or("unknown bridge error")
                .to_string(),
        ))
    }
}
