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

//! The bridge service: fans the single DLL pipe connection out to any number
//! of HTTP and SSE clients.
//!
//! Inbound, it presents the DLL's RPC surface as `/lua/*` endpoints and the
//! pause coordination endpoints. Outbound, it holds the external-function
//! registry and proxies the DLL's `ExternalCall` events to registered HTTP
//! endpoints. Every `game_event` off the pipe is re-emitted on `/events`;
//! a slow SSE client is disconnected rather than allowed to stall the fan-out.

pub mod routes;
pub mod service;

pub use service::{BridgeService, ExternalFunction, HealthStats, ServiceStats};
