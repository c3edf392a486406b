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

//! Vox Deorum bridge service.
//!
//! Owns the process-wide named-pipe connection to the game DLL and fronts it
//! with HTTP and SSE. Start it before the MCP server and the strategist:
//!
//! ```bash
//! vox-bridge --pipe-id vox-deorum-bridge --listen-address 127.0.0.1:5000
//! ```

use clap::Parser;
use clap_derive::Parser;
use eyre::Result;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde_derive::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use vox_bridge::BridgeService;
use vox_bridge::routes::mk_routes;
use vox_connector::{ConnectorConfig, DllConnector};
use vox_protocol::client_args::PipeClientArgs;

/// Vox Deorum bridge - HTTP/SSE facade over the game DLL's named pipe
#[derive(Parser, Debug, Serialize, Deserialize)]
#[command(name = "vox-bridge")]
#[command(about = "HTTP and SSE bridge between the game DLL and the rest of the control plane")]
#[command(version)]
struct Args {
    #[command(flatten)]
    pipe: PipeClientArgs,

    /// HTTP listen address
    #[arg(long, default_value = "127.0.0.1:5000")]
    listen_address: String,

    /// Enable debug logging
    #[arg(long, default_value = "false")]
    debug: bool,

    /// JSON config file to merge over CLI args
    #[arg(long)]
    config_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli_args = Args::parse();
    let config_file = cli_args.config_file.clone();
    let mut figment = Figment::new().merge(Serialized::defaults(cli_args));
    if let Some(config_file) = config_file {
        figment = figment.merge(Json::file(config_file));
    }
    let args: Args = figment.merge(Env::prefixed("VOX_BRIDGE_")).extract()?;

    setup_logging(args.debug)?;
    info!("vox-bridge starting, pipe id {}", args.pipe.pipe_id);

    let connector = DllConnector::new(ConnectorConfig::from_args(&args.pipe));
    let service = BridgeService::new(connector, 256);
    if service.start().await {
        info!("DLL pipe connected");
    } else {
        info!("DLL pipe not yet available, reconnecting in the background");
    }

    let router = mk_routes(service.clone());
    let address: SocketAddr = args.listen_address.parse()?;
    let listener = TcpListener::bind(address).await?;
    info!(address = %address, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.shutdown().await;
    info!("vox-bridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let mut signal =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        signal.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

fn setup_logging(debug: bool) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
    Ok(())
}
