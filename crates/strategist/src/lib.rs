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

//! The agent orchestrator.
//!
//! A [`VoxContext`](context::VoxContext) owns the MCP client, the agent
//! registry, and token accounting; [`VoxPlayer`](player::VoxPlayer) enforces
//! the turn discipline — pause the game, run exactly one agent execution for
//! the newest pending turn, resume the game — and
//! [`StrategistSession`](session::StrategistSession) ties players, game
//! process, and notifications into one long-running run.

pub mod agent;
pub mod agents;
pub mod context;
pub mod mcp_client;
pub mod model;
pub mod player;
pub mod session;

pub use agent::{AgentFlags, StrategistParameters, StepPlan, VoxAgent};
pub use context::VoxContext;
pub use mcp_client::{McpClient, McpEndpoint};
pub use model::{
    LanguageModel, ModelMessage, ModelRequest, ModelStep, TokenUsage, ToolCallRequest,
    ToolChoice, ToolSpec,
};
pub use player::{PendingTurn, TurnExecutor, VoxPlayer};
pub use session::{SessionConfig, StrategistSession};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrategistError {
    #[error("MCP transport failure: {0}")]
    Transport(String),
    #[error("MCP error: {0}")]
    Mcp(String),
    #[error("model failure: {0}")]
    Model(String),
    #[error("no such agent: {0}")]
    AgentNotFound(String),
    #[error("tool call timed out")]
    Timeout,
    #[error("execution cancelled")]
    Cancelled,
    #[error("session failure: {0}")]
    Session(String),
}
