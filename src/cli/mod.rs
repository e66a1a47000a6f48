//! Command-line interface parsing and handling
//!
//! Drives a single cap from a file: list its aggregated tools, print the
//! resolved prompt, or invoke one tool.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::core::cap::{AuthMode, Cap};
use crate::core::config::Config;
use crate::core::resolver::{CapResolver, InMemorySelectionLog, IpApiGeoLocator};
use crate::mcp::session::{RemoteConnector, SessionManager};
use crate::mcp::transport::build_http_client;
use crate::mcp::types::ToolCallRequest;

pub const LOG_ENV_VAR: &str = "CAPDECK_LOG";

#[derive(Parser)]
#[command(name = "capdeck")]
#[command(about = "Run a cap's remote MCP tools from the command line")]
#[command(
    long_about = "capdeck loads a cap file (JSON or TOML), opens a session to each of its \
remote MCP servers and aggregates their tools under `<server>_<tool>` keys.\n\n\
Only servers with auth_mode = none can be driven from the CLI; signed and \
payment-gated servers need identity and wallet capabilities supplied by the host.\n\n\
Environment Variables:\n\
  CAPDECK_LOG       tracing filter, e.g. `capdeck=debug` (default: warn)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a cap and print its aggregated tool keys
    Tools {
        #[arg(long, value_name = "FILE")]
        cap: PathBuf,
    },
    /// Print a cap's prompt with its placeholders resolved
    Prompt {
        #[arg(long, value_name = "FILE")]
        cap: PathBuf,
        /// Chat whose selections fill {{artifact_selections}}
        #[arg(long, default_value = "cli")]
        chat: String,
    },
    /// Invoke one aggregated tool of a cap
    Call {
        #[arg(long, value_name = "FILE")]
        cap: PathBuf,
        /// Aggregated tool key, `<server>_<tool>`
        key: String,
        /// Tool arguments as a JSON object
        #[arg(long, value_name = "JSON")]
        args: Option<String>,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Refuses caps the CLI cannot drive without host-provided capabilities.
fn check_cli_auth(cap: &Cap) -> Result<(), String> {
    let unsupported: Vec<String> = cap
        .remote_servers
        .iter()
        .filter(|(_, server)| server.auth != AuthMode::None)
        .map(|(name, server)| format!("{name} ({:?})", server.auth))
        .collect();
    if unsupported.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "Cap '{}' uses servers that need signing or payment capabilities, which the CLI does not provide: {}",
            cap.id,
            unsupported.join(", ")
        ))
    }
}

fn parse_arguments(key: &str, args: Option<&str>) -> Result<ToolCallRequest, Box<dyn Error>> {
    let value = match args {
        Some(raw) => serde_json::from_str(raw)?,
        None => serde_json::Value::Null,
    };
    Ok(ToolCallRequest::from_json(key, value)?)
}

fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn Error>> {
    Ok(match path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    })
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing();

    let config = load_config(args.config.as_deref())?;
    let http = build_http_client(&config.http)?;
    let connector = RemoteConnector::from_config(&config, None)?;
    let sessions = Arc::new(SessionManager::new(Arc::new(connector)));
    let resolver = CapResolver::new(
        Arc::clone(&sessions),
        Arc::new(IpApiGeoLocator::new(http, config.resolver.geo_endpoint.clone())),
        Arc::new(InMemorySelectionLog::default()),
        &config.resolver,
    );

    let outcome = run(&args.command, &resolver).await;
    let report = sessions.cleanup().await;
    for (server, err) in &report.failures {
        eprintln!("Failed to close session for {server}: {err}");
    }
    outcome
}

async fn run(command: &Commands, resolver: &CapResolver) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Tools { cap } => {
            let cap = Cap::load_from_path(cap)?;
            check_cli_auth(&cap)?;
            let registry = resolver.sessions().initialize_for_cap(&cap).await?;
            if registry.is_empty() {
                println!("Cap '{}' exposes no tools.", cap.id);
            }
            for tool in registry.iter() {
                match &tool.tool.description {
                    Some(description) => println!("{}  {}", tool.key, description),
                    None => println!("{}", tool.key),
                }
            }
            Ok(())
        }
        Commands::Prompt { cap, chat } => {
            let cap = Cap::load_from_path(cap)?;
            let prompt = resolver.resolve_prompt(&cap.prompt_template, chat).await;
            println!("{prompt}");
            Ok(())
        }
        Commands::Call { cap, key, args } => {
            let cap = Cap::load_from_path(cap)?;
            check_cli_auth(&cap)?;
            let request = parse_arguments(key, args.as_deref())?;
            resolver.sessions().initialize_for_cap(&cap).await?;
            let result = resolver.sessions().call_tool(request).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}
