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

//! The DLL connector: a reliable, framed, bidirectional RPC client over the
//! game's named pipe.
//!
//! One connector instance owns one pipe connection at a time. Requests are
//! serialized through a single writer task so frames never interleave;
//! responses are correlated back to their senders by id; `game_event` frames
//! fan out on a broadcast channel. Loss of the pipe rejects everything
//! pending and kicks off exponential-backoff reconnection until either a
//! connection succeeds or [`DllConnector::disconnect`] is called.

mod connector;

pub use connector::{ConnectorConfig, ConnectorStats, DllConnector};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    #[error("not connected to the DLL")]
    NotConnected,
    #[error("connection lost before a response arrived")]
    Disconnected,
    #[error("request timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("protocol failure: {0}")]
    Protocol(String),
    #[error("DLL returned an error: {0}")]
    Rpc(String),
}
