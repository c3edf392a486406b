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

//! The wire protocol spoken between the bridge and the game DLL.
//!
//! Frames are UTF-8 JSON objects terminated by a single `0x0A` byte over a
//! full-duplex byte stream. Requests carry a client-assigned monotonic `id`;
//! responses echo exactly one request's `id`; `game_event` messages carry no
//! id at all and are fire-and-forget from the DLL.

pub mod client_args;
mod codec;
mod messages;
pub mod testing;
mod transport;

pub use codec::{DEFAULT_MAX_FRAME, frame_codec, parse_server_frame};
pub use messages::{
    ExternalRegistration, LuaCall, RequestBody, ResponseMessage, ServerMessage, request_frame,
};
pub use transport::{PipeEndpoint, PipeListener, PipeStream};

use thiserror::Error;

/// Errors at the framing / transport layer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("could not connect to pipe: {0}")]
    Connect(std::io::Error),
    #[error("frame exceeds maximum length")]
    FrameTooLong,
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}
