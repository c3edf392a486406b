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

//! Vox Deorum MCP server.
//!
//! Exposes the knowledge store and the game's action surface as MCP tools.
//! Run over stdio (the default, for clients that spawn the server) or HTTP:
//!
//! ```bash
//! vox-mcp-server --bridge-url http://127.0.0.1:5000
//! vox-mcp-server --transport http --listen-address 127.0.0.1:5100
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use clap_derive::Parser;
use eyre::Result;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde_derive::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use vox_knowledge::{KnowledgeManager, KnowledgeManagerConfig};
use vox_mcp::bridge_client::BridgeClient;
use vox_mcp::events::EventService;
use vox_mcp::server::{McpServer, SessionContext};
use vox_mcp::tools::ToolContext;
use vox_mcp::http;

/// Vox Deorum MCP server - knowledge and action tools for game agents
#[derive(Parser, Debug, Serialize, Deserialize)]
#[command(name = "vox-mcp-server")]
#[command(about = "MCP tool server backed by the per-game knowledge store and the bridge")]
#[command(version)]
struct Args {
    /// Base URL of the bridge service
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    bridge_url: String,

    /// Transport: stdio or http
    #[arg(long, default_value = "stdio")]
    transport: String,

    /// HTTP listen address (http transport only)
    #[arg(long, default_value = "127.0.0.1:5100")]
    listen_address: String,

    /// Directory holding per-game databases
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Auto-save interval in seconds
    #[arg(long, default_value = "30")]
    auto_save_interval: u64,

    /// Per-tool timeout in seconds
    #[arg(long, default_value = "60")]
    tool_timeout: u64,

    /// Grand strategies get-options must never offer
    #[arg(long)]
    strategy_blacklist: Vec<String>,

    /// Enable debug logging (stderr, so stdio stays protocol-clean)
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
    let args: Args = figment.merge(Env::prefixed("VOX_MCP_")).extract()?;

    setup_logging(args.debug)?;
    info!("vox-mcp-server starting, bridge at {}", args.bridge_url);

    let knowledge = KnowledgeManager::new(KnowledgeManagerConfig {
        data_dir: args.data_dir.clone(),
        auto_save_interval: Duration::from_secs(args.auto_save_interval),
        ..Default::default()
    });
    knowledge.start_auto_save();

    let bridge = BridgeClient::new(args.bridge_url.clone());
    let events = EventService::new(knowledge.clone(), bridge.clone());
    events.start();

    let ctx = ToolContext {
        knowledge: knowledge.clone(),
        bridge,
        session: SessionContext::default(),
        strategy_blacklist: args.strategy_blacklist.clone(),
        tool_timeout: Duration::from_secs(args.tool_timeout),
    };
    let mut server = McpServer::new(ctx, events.clone());

    match args.transport.as_str() {
        "stdio" => {
            info!("MCP server ready, listening on stdio");
            server.run_stdio().await?;
        }
        "http" => {
            let router = http::mk_routes(Arc::new(Mutex::new(server)), events.clone());
            let address: std::net::SocketAddr = args.listen_address.parse()?;
            let listener = tokio::net::TcpListener::bind(address).await?;
            info!(address = %address, "MCP server listening on http");
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            events.stop();
        }
        other => {
            return Err(eyre::eyre!("unknown transport: {other}"));
        }
    }

    // Abort -> drain writes -> close store.
    knowledge.shutdown().await?;
    info!("vox-mcp-server stopped");
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

/// Logging goes to stderr so stdout stays clean for the MCP protocol.
fn setup_logging(debug: bool) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    Ok(())
}
