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

//! Vox Deorum strategist.
//!
//! Runs LLM agents for the configured players, gated on the game's turn
//! notifications:
//!
//! ```bash
//! vox-strategist --mcp-url http://127.0.0.1:5100 \
//!     --player 0=strategist --player 3=strategist \
//!     --model-command ./run-model.sh
//! ```

use std::collections::HashMap;
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
use tracing::info;

use vox_common::PlayerId;
use vox_strategist::agents::StrategistAgent;
use vox_strategist::model::CommandModel;
use vox_strategist::session::{GameLaunch, SessionConfig, StrategistSession};
use vox_strategist::McpEndpoint;

/// Vox Deorum strategist - turn-gated LLM agents for Civilization V
#[derive(Parser, Debug, Serialize, Deserialize)]
#[command(name = "vox-strategist")]
#[command(about = "Agent orchestrator driving configured players through the MCP server")]
#[command(version)]
struct Args {
    /// MCP server base URL (http transport)
    #[arg(long)]
    mcp_url: Option<String>,

    /// Command to spawn the MCP server over stdio (alternative to --mcp-url)
    #[arg(long)]
    mcp_command: Option<String>,

    /// Player assignment, repeatable: `<player-id>=<agent-name>`
    #[arg(long = "player")]
    players: Vec<String>,

    /// External model runner command (receives requests on stdin)
    #[arg(long)]
    model_command: String,

    /// Arguments for the model runner
    #[arg(long)]
    model_args: Vec<String>,

    /// Command that launches the game, when this process owns it
    #[arg(long)]
    game_command: Option<String>,

    /// Restart limit after game crashes
    #[arg(long, default_value = "3")]
    max_recovery_attempts: u32,

    /// Per-tool timeout in seconds
    #[arg(long, default_value = "60")]
    tool_timeout: u64,

    /// How long to keep retrying the initial MCP connect, in seconds
    #[arg(long, default_value = "600")]
    connect_window: u64,

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
    let args: Args = figment.merge(Env::prefixed("VOX_STRATEGIST_")).extract()?;

    setup_logging(args.debug)?;

    let endpoint = match (&args.mcp_url, &args.mcp_command) {
        (Some(url), _) => McpEndpoint::Http(url.clone()),
        (None, Some(command)) => {
            let mut parts = command.split_whitespace().map(String::from);
            let program = parts
                .next()
                .ok_or_else(|| eyre::eyre!("--mcp-command is empty"))?;
            McpEndpoint::Stdio {
                command: program,
                args: parts.collect(),
            }
        }
        (None, None) => McpEndpoint::Http("http://127.0.0.1:5100".to_string()),
    };

    let llm_players = parse_players(&args.players)?;
    if llm_players.is_empty() {
        return Err(eyre::eyre!("no players configured; pass at least one --player"));
    }
    info!(players = ?llm_players, "strategist starting");

    let config = SessionConfig {
        endpoint,
        llm_players,
        max_recovery_attempts: args.max_recovery_attempts,
        connect_window: Duration::from_secs(args.connect_window),
        tool_timeout: Duration::from_secs(args.tool_timeout),
        game_launch: args.game_command.as_ref().map(|command| GameLaunch {
            command: command.clone(),
            args: vec![],
            recovery_args: vec!["--load-latest-autosave".to_string()],
        }),
    };

    let session = StrategistSession::new(config);
    let model = Arc::new(CommandModel::new(args.model_command, args.model_args));

    let abort_session = session.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, aborting session");
        abort_session.abort();
    });

    match session.run(model, vec![Arc::new(StrategistAgent)]).await {
        Ok(victory) => {
            info!(player = ?victory.player_id, turn = ?victory.turn, "game over");
            Ok(())
        }
        Err(vox_strategist::StrategistError::Cancelled) => {
            info!("session aborted");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn parse_players(specs: &[String]) -> Result<HashMap<PlayerId, String>> {
    let mut players = HashMap::new();
    for spec in specs {
        let (id, agent) = spec
            .split_once('=')
            .ok_or_else(|| eyre::eyre!("bad --player '{spec}', expected <id>=<agent>"))?;
        players.insert(id.trim().parse::<PlayerId>()?, agent.trim().to_string());
    }
    Ok(players)
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
