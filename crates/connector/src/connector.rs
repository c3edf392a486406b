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

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vox_common::GameEvent;
use vox_protocol::client_args::PipeClientArgs;
use vox_protocol::{
    DEFAULT_MAX_FRAME, PipeEndpoint, PipeStream, RequestBody, ResponseMessage, ServerMessage,
    frame_codec, parse_server_frame, request_frame,
};

use crate::ConnectorError;

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub pipe_id: String,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub request_timeout: Duration,
    pub max_frame: usize,
    /// Capacity of the game-event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            pipe_id: "vox-deorum-bridge".to_string(),
            retry_base: Duration::from_millis(250),
            retry_max: Duration::from_secs(15),
            request_timeout: Duration::from_secs(30),
            max_frame: DEFAULT_MAX_FRAME,
            event_capacity: 256,
        }
    }
}

impl ConnectorConfig {
    pub fn from_args(args: &PipeClientArgs) -> Self {
        Self {
            pipe_id: args.pipe_id.clone(),
            retry_base: Duration::from_millis(args.retry_base_ms),
            retry_max: Duration::from_millis(args.retry_max_ms),
            request_timeout: Duration::from_millis(args.request_timeout_ms),
            ..Default::default()
        }
    }
}

/// Observable counters, mirroring what the bridge reports in `/stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorStats {
    pub connected: bool,
    pub pending_requests: usize,
    pub reconnect_attempts: u32,
}

type PendingSender = oneshot::Sender<Result<Value, ConnectorError>>;

struct WriteFrame {
    frame: String,
    /// Request id to reject if the write itself fails; None for
    /// fire-and-forget frames.
    request_id: Option<u64>,
}

struct ActiveConnection {
    write_tx: mpsc::UnboundedSender<WriteFrame>,
    token: CancellationToken,
    generation: u64,
}

struct ConnState {
    active: Option<ActiveConnection>,
    generation: u64,
    /// Set while a background reconnect loop is alive.
    reconnecting: bool,
    /// Cancels the reconnect loop's sleep when the user disconnects.
    reconnect_token: CancellationToken,
    user_disconnected: bool,
}

struct Inner {
    config: ConnectorConfig,
    endpoint: PipeEndpoint,
    next_id: AtomicU64,
    pending: StdMutex<HashMap<u64, PendingSender>>,
    reconnect_attempts: AtomicU32,
    state: Mutex<ConnState>,
    connected_tx: watch::Sender<bool>,
    events_tx: broadcast::Sender<GameEvent>,
}

/// Client of the named-pipe protocol to the game.
#[derive(Clone)]
pub struct DllConnector {
    inner: Arc<Inner>,
}

impl DllConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        let endpoint = PipeEndpoint::new(config.pipe_id.clone());
        let (connected_tx, _) = watch::channel(false);
        let (events_tx, _) = broadcast::channel(config.event_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                endpoint,
                next_id: AtomicU64::new(0),
                pending: StdMutex::new(HashMap::new()),
                reconnect_attempts: AtomicU32::new(0),
                state: Mutex::new(ConnState {
                    active: None,
                    generation: 0,
                    reconnecting: false,
                    reconnect_token: CancellationToken::new(),
                    user_disconnected: false,
                }),
                connected_tx,
                events_tx,
            }),
        }
    }

    /// Attempt to connect. Idempotent: if already connected this succeeds
    /// immediately, and concurrent callers share one in-flight attempt via
    /// the state lock. On failure, resolves `false` and leaves a backoff
    /// reconnect loop running until a connection succeeds or
    /// [`disconnect`](Self::disconnect) is called.
    pub async fn connect(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        state.user_disconnected = false;
        if state.active.is_some() {
            return true;
        }
        if Inner::try_connect(&self.inner, &mut state).await {
            return true;
        }
        self.inner.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        Inner::ensure_reconnect_loop(&self.inner, &mut state);
        false
    }

    /// Drop the connection and stop reconnecting. Idempotent. Everything
    /// pending is rejected with a disconnect error.
    pub async fn disconnect(&self) {
        let mut state = self.inner.state.lock().await;
        state.user_disconnected = true;
        state.reconnect_token.cancel();
        state.reconnect_token = CancellationToken::new();
        if let Some(active) = state.active.take() {
            active.token.cancel();
        }
        drop(state);
        self.inner.reject_all_pending(ConnectorError::Disconnected);
        let _ = self.inner.connected_tx.send(false);
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected_tx.borrow()
    }

    /// Send a request and await its correlated response. The returned value
    /// is the DLL's `result`; a `success: false` response surfaces as
    /// [`ConnectorError::Rpc`].
    pub async fn send(&self, body: RequestBody) -> Result<Value, ConnectorError> {
        let write_tx = {
            let state = self.inner.state.lock().await;
            let active = state.active.as_ref().ok_or(ConnectorError::NotConnected)?;
            active.write_tx.clone()
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let frame =
            request_frame(&body, id).map_err(|e| ConnectorError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(id, tx);

        if write_tx
            .send(WriteFrame {
                frame,
                request_id: Some(id),
            })
            .is_err()
        {
            self.inner.pending.lock().unwrap().remove(&id);
            return Err(ConnectorError::Disconnected);
        }

        match timeout(self.inner.config.request_timeout, rx).await {
            Err(_elapsed) => {
                self.inner.pending.lock().unwrap().remove(&id);
                Err(ConnectorError::Timeout)
            }
            Ok(Err(_closed)) => Err(ConnectorError::Disconnected),
            Ok(Ok(result)) => result,
        }
    }

    /// Fire a frame at the DLL without waiting for any response. Used for
    /// `external_response` replies to `ExternalCall` events.
    pub async fn send_oneway(&self, body: RequestBody) -> Result<(), ConnectorError> {
        let write_tx = {
            let state = self.inner.state.lock().await;
            let active = state.active.as_ref().ok_or(ConnectorError::NotConnected)?;
            active.write_tx.clone()
        };
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let frame =
            request_frame(&body, id).map_err(|e| ConnectorError::Protocol(e.to_string()))?;
        write_tx
            .send(WriteFrame {
                frame,
                request_id: None,
            })
            .map_err(|_| ConnectorError::Disconnected)
    }

    /// Subscribe to `game_event` frames. Slow subscribers observe
    /// `RecvError::Lagged` and may resubscribe.
    pub fn subscribe_events(&self) -> broadcast::Receiver<GameEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Watch connection state transitions. `true` on connect, `false` on
    /// disconnect; transitions are delivered exactly once per change.
    pub fn connection_state(&self) -> watch::Receiver<bool> {
        self.inner.connected_tx.subscribe()
    }

    pub fn stats(&self) -> ConnectorStats {
        ConnectorStats {
            connected: self.is_connected(),
            pending_requests: self.inner.pending.lock().unwrap().len(),
            reconnect_attempts: self.inner.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    /// One connection attempt with the state lock held. On success, spawns
    /// the reader/writer tasks and flips the watch channel.
    async fn try_connect(inner: &Arc<Inner>, state: &mut ConnState) -> bool {
        let stream = match inner.endpoint.connect().await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(pipe = inner.endpoint.id(), "pipe connect failed: {e}");
                return false;
            }
        };

        state.generation += 1;
        let generation = state.generation;
        let token = CancellationToken::new();
        let (write_tx, write_rx) = mpsc::unbounded_channel();

        let (read_half, write_half) = tokio::io::split(stream);
        tokio::spawn(Inner::run_reader(
            inner.clone(),
            read_half,
            token.clone(),
            generation,
        ));
        tokio::spawn(Inner::run_writer(
            inner.clone(),
            write_half,
            write_rx,
            token.clone(),
            generation,
        ));

        state.active = Some(ActiveConnection {
            write_tx,
            token,
            generation,
        });
        inner.reconnect_attempts.store(0, Ordering::Relaxed);
        let _ = inner.connected_tx.send(true);
        info!(pipe = inner.endpoint.id(), "connected to DLL pipe");
        true
    }

    fn ensure_reconnect_loop(inner: &Arc<Inner>, state: &mut ConnState) {
        if state.reconnecting || state.user_disconnected {
            return;
        }
        state.reconnecting = true;
        let token = state.reconnect_token.clone();
        let inner = inner.clone();
        tokio::spawn(async move {
            loop {
                let attempt = inner.reconnect_attempts.load(Ordering::Relaxed);
                let delay = backoff_delay(
                    inner.config.retry_base,
                    inner.config.retry_max,
                    attempt,
                );
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                let mut state = inner.state.lock().await;
                if state.user_disconnected || state.active.is_some() {
                    break;
                }
                if Inner::try_connect(&inner, &mut state).await {
                    break;
                }
                inner.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
                debug!(
                    attempts = inner.reconnect_attempts.load(Ordering::Relaxed),
                    "reconnect attempt failed"
                );
            }
            inner.state.lock().await.reconnecting = false;
        });
    }

    async fn run_reader(
        inner: Arc<Inner>,
        read_half: ReadHalf<PipeStream>,
        token: CancellationToken,
        generation: u64,
    ) {
        let mut frames = FramedRead::new(read_half, frame_codec(inner.config.max_frame));
        loop {
            let frame = tokio::select! {
                _ = token.cancelled() => return,
                frame = frames.next() => frame,
            };
            match frame {
                Some(Ok(frame)) => match parse_server_frame(&frame) {
                    Ok(ServerMessage::Response(response)) => inner.resolve_response(response),
                    Ok(ServerMessage::GameEvent(event)) => {
                        let _ = inner.events_tx.send(event);
                    }
                    Err(e) => {
                        warn!("dropping malformed frame: {e}");
                    }
                },
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!("dropping over-length frame");
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    warn!("pipe read error: {e}");
                    Inner::on_connection_lost(&inner, generation).await;
                    return;
                }
                None => {
                    info!("pipe closed by DLL");
                    Inner::on_connection_lost(&inner, generation).await;
                    return;
                }
            }
        }
    }

    async fn run_writer(
        inner: Arc<Inner>,
        write_half: WriteHalf<PipeStream>,
        mut write_rx: mpsc::UnboundedReceiver<WriteFrame>,
        token: CancellationToken,
        generation: u64,
    ) {
        let mut sink = FramedWrite::new(write_half, frame_codec(inner.config.max_frame));
        loop {
            let cmd = tokio::select! {
                _ = token.cancelled() => return,
                cmd = write_rx.recv() => cmd,
            };
            let Some(cmd) = cmd else { return };
            if let Err(e) = sink.send(cmd.frame).await {
                match e {
                    // Over-length frame: reject the one request, the pipe is fine.
                    LinesCodecError::MaxLineLengthExceeded => {
                        inner.reject_one(
                            cmd.request_id,
                            ConnectorError::Transport("frame exceeds maximum length".into()),
                        );
                    }
                    LinesCodecError::Io(e) => {
                        inner.reject_one(cmd.request_id, ConnectorError::Transport(e.to_string()));
                        Inner::on_connection_lost(&inner, generation).await;
                        return;
                    }
                }
            }
        }
    }

    fn resolve_response(&self, response: ResponseMessage) {
        let sender = self.pending.lock().unwrap().remove(&response.id);
        match sender {
            Some(sender) => {
                let result = if response.success {
                    Ok(response.result.unwrap_or(Value::Null))
                } else {
                    Err(ConnectorError::Rpc(
                        response.error.unwrap_or_else(|| "unknown error".to_string()),
                    ))
                };
                // Receiver may have timed out; nothing to do then.
                let _ = sender.send(result);
            }
            None => {
                warn!(id = response.id, "dropping response with no pending request");
            }
        }
    }

    fn reject_one(&self, request_id: Option<u64>, error: ConnectorError) {
        if let Some(id) = request_id
            && let Some(sender) = self.pending.lock().unwrap().remove(&id)
        {
            let _ = sender.send(Err(error));
        }
    }

    fn reject_all_pending(&self, error: ConnectorError) {
        let drained: Vec<PendingSender> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().map(|(_, sender)| sender).collect()
        };
        for sender in drained {
            let _ = sender.send(Err(error.clone()));
        }
    }

    async fn on_connection_lost(inner: &Arc<Inner>, generation: u64) {
        let mut state = inner.state.lock().await;
        // A newer connection may have replaced this one already.
        let is_current = matches!(&state.active, Some(active) if active.generation == generation);
        if !is_current {
            return;
        }
        if let Some(active) = state.active.take() {
            active.token.cancel();
        }
        inner.reject_all_pending(ConnectorError::Disconnected);
        let _ = inner.connected_tx.send(false);
        Inner::ensure_reconnect_loop(inner, &mut state);
    }
}

fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let shift = attempt.min(16);
    base.saturating_mul(1u32 << shift).min(max)
}
