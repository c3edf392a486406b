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

//! Newline-delimited JSON framing.
//!
//! The byte stream may arrive fragmented arbitrarily; `LinesCodec` restores
//! message boundaries. Parsing a frame into a [`ServerMessage`] is kept
//! separate so a malformed frame can be dropped without tearing down the
//! stream.

use tokio_util::codec::LinesCodec;

use crate::ProtocolError;
use crate::messages::ServerMessage;

/// Maximum accepted frame length. Large Lua batch results can run to
/// megabytes; beyond this the peer is considered broken.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// The line codec both sides of the pipe use.
pub fn frame_codec(max_frame: usize) -> LinesCodec {
    LinesCodec::new_with_max_length(max_frame)
}

/// Parse one frame into a server message. Unknown `type` tags and invalid
/// JSON both surface as [`ProtocolError::MalformedFrame`]; the caller logs
/// and drops.
pub fn parse_server_frame(frame: &str) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_str(frame).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio_util::codec::FramedRead;

    /// Feeding the same bytes in different chunkings must yield identical
    /// frames.
    #[tokio::test]
    async fn framing_is_chunking_independent() {
        let wire = b"{\"type\":\"response\",\"id\":1,\"success\":true}\n{\"type\":\"game_event\",\"event\":\"E\",\"payload\":[]}\n";

        let whole: Vec<String> = FramedRead::new(&wire[..], frame_codec(DEFAULT_MAX_FRAME))
            .map(|f| f.unwrap())
            .collect()
            .await;

        // One byte at a time through a duplex pipe.
        let (mut tx, rx) = tokio::io::duplex(4);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for byte in wire {
                tx.write_all(&[*byte]).await.unwrap();
            }
        });
        let fragmented: Vec<String> = FramedRead::new(rx, frame_codec(DEFAULT_MAX_FRAME))
            .map(|f| f.unwrap())
            .collect()
            .await;
        writer.await.unwrap();

        assert_eq!(whole, fragmented);
        assert_eq!(whole.len(), 2);
        for frame in &whole {
            parse_server_frame(frame).unwrap();
        }
    }

    #[test]
    fn malformed_frame_is_an_error_not_a_panic() {
        assert!(parse_server_frame("{not json").is_err());
        assert!(parse_server_frame("{\"type\":\"unknown\"}").is_err());
    }
}
