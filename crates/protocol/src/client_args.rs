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

use clap_derive::Parser;
use serde_derive::{Deserialize, Serialize};

/// Common command line arguments for processes that talk to the game DLL's
/// named pipe.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
pub struct PipeClientArgs {
    #[arg(
        long,
        value_name = "pipe-id",
        help = "Named pipe identifier the game DLL listens on",
        default_value = "vox-deorum-bridge"
    )]
    pub pipe_id: String,

    #[arg(
        long,
        value_name = "retry-base-ms",
        help = "Base delay for reconnection backoff, in milliseconds",
        default_value = "250"
    )]
    pub retry_base_ms: u64,

    #[arg(
        long,
        value_name = "retry-max-ms",
        help = "Cap on the reconnection backoff delay, in milliseconds",
        default_value = "15000"
    )]
    pub retry_max_ms: u64,

    #[arg(
        long,
        value_name = "request-timeout-ms",
        help = "Per-request deadline for RPCs to the DLL, in milliseconds",
        default_value = "30000"
    )]
    pub request_timeout_ms: u64,
}
