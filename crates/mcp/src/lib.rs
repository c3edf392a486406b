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

//! The MCP tool server for Vox Deorum.
//!
//! Speaks JSON-RPC 2.0 over stdio or HTTP, exposes the knowledge store and
//! the game's action surface as tools, ingests the bridge's SSE event stream
//! into the per-game store, and pushes `vox-deorum/game-event` notifications
//! (turn boundaries, victories, game switches, DLL reconnects) to connected
//! clients.

pub mod bridge_client;
pub mod events;
pub mod http;
pub mod server;
pub mod tools;
pub mod types;

pub use bridge_client::BridgeClient;
pub use events::{EventService, GameEventNotification};
pub use server::{McpServer, SessionContext};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("bridge request failed: {0}")]
    Bridge(String),
    #[error("bridge returned an error: {0}")]
    BridgeRpc(String),
    #[error("knowledge error: {0}")]
    Knowledge(#[from] vox_knowledge::KnowledgeError),
    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool timed out")]
    Timeout,
}
