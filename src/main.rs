//! docops - document operations for agents
//!
//! **MCP mode** (`docops mcp`): serves the `session`, `spreadsheet` and
//! `email` tools over stdio. Sessions live as long as the server process.
//!
//! **One-shot mode** (`docops call`): runs a single path-mode operation and
//! prints the result envelope as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser as ClapParser, Subcommand};
use rmcp::{transport::stdio, ServiceExt};
use serde_json::{Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docops::config::{self, Config};
use docops::mcp::DocopsMcpServer;
use docops::{AppState, ParamSet, Toolbox};

/// docops - spreadsheet and email editing behind one operation interface
#[derive(ClapParser, Debug)]
#[command(name = "docops", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: $CONFIG_DIR/docops/config.toml)
    #[arg(long, global = true, env = "DOCOPS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the document tools over MCP on stdin/stdout
    Mcp,

    /// Run one operation against a file and print the result as JSON
    Call {
        /// Tool name: session, spreadsheet or email
        tool: String,

        /// Operation name within the tool
        operation: String,

        /// Document to operate on
        #[arg(long)]
        path: Option<PathBuf>,

        /// Save the result here instead of overwriting --path
        #[arg(long)]
        output: Option<PathBuf>,

        /// Operation parameter as key=value; JSON values are parsed
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },

    /// List tools and their operations
    Operations {
        /// Only list this tool
        tool: Option<String>,
    },
}

/// Parse `key=value`. The value is taken as JSON when it parses, else as text.
fn parse_param(s: &str) -> Result<(String, Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{s}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(Config::default_path);
    let config = match &config_path {
        Some(path) => Config::load(path)?.unwrap_or_default(),
        None => Config::default(),
    };

    init_tracing_stderr(config.logging.filter.as_deref());
    if let Some(path) = config_path.as_deref().filter(|p| p.exists()) {
        config::check_config_permissions(path);
        tracing::debug!(path = %path.display(), "config loaded");
    }

    let state = AppState::from_config(&config);
    if !state.paths.roots().is_empty() {
        tracing::info!(roots = ?state.paths.roots(), "document paths restricted");
    }
    let toolbox = Arc::new(Toolbox::standard());

    match cli.command {
        Commands::Mcp => run_mcp(state, toolbox).await,
        Commands::Call {
            tool,
            operation,
            path,
            output,
            params,
        } => run_call(&state, &toolbox, &tool, &operation, path, output, params),
        Commands::Operations { tool } => list_operations(&toolbox, tool.as_deref()),
    }
}

/// Initialize tracing with stderr output.
///
/// stdout carries the MCP protocol (or the `call` result), so all tracing
/// goes to stderr. `RUST_LOG` overrides the configured filter.
fn init_tracing_stderr(configured: Option<&str>) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| config::DEFAULT_LOG_FILTER.to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── MCP mode ───────────────────────────────────────────────────────

async fn run_mcp(state: AppState, toolbox: Arc<Toolbox>) -> anyhow::Result<()> {
    tracing::info!("docops mcp server starting");
    let server = DocopsMcpServer::new(state.clone(), toolbox);
    let service = server
        .serve(stdio())
        .await
        .context("failed to start MCP stdio transport")?;
    let reason = service.waiting().await?;
    let closed = state.sessions.drain();
    tracing::info!(?reason, closed, "docops mcp server exiting");
    Ok(())
}

// ── One-shot mode ──────────────────────────────────────────────────

fn run_call(
    state: &AppState,
    toolbox: &Toolbox,
    tool: &str,
    operation: &str,
    path: Option<PathBuf>,
    output: Option<PathBuf>,
    params: Vec<(String, Value)>,
) -> anyhow::Result<()> {
    let mut values: Map<String, Value> = params.into_iter().collect();
    if let Some(path) = path {
        values.insert("path".into(), Value::String(path.display().to_string()));
    }
    if let Some(output) = output {
        values.insert(
            "output_path".into(),
            Value::String(output.display().to_string()),
        );
    }

    let result = toolbox
        .call(tool, operation, state, &ParamSet::from(values))
        .map_err(|e| anyhow::anyhow!("{e} [{}]", e.code()))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn list_operations(toolbox: &Toolbox, tool: Option<&str>) -> anyhow::Result<()> {
    let tools = match tool {
        Some(name) => vec![toolbox.tool(name)?],
        None => toolbox.tools().iter().collect(),
    };
    for (i, tool) in tools.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("{}: {}", tool.name(), tool.description());
        for (name, summary) in tool.operations() {
            println!("  {name:<14} {summary}");
        }
    }
    Ok(())
}
