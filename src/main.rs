use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mtg::{
    config::{self, GatewayConfig},
    server::{self, ServerConfig},
    version,
};

#[derive(Parser, Debug)]
#[command(name = "mcp-tool-gateway", version = version::VERSION)]
#[command(about = "MCP Tool Gateway - one budgeted, searchable tool catalog for MCP clients")]
#[command(args_conflicts_with_subcommands = true)]
#[command(long_about = r#"
MCP Tool Gateway

Aggregates tools from a fleet of backend MCP servers (stdio, SSE, streamable
HTTP) into one virtual catalog with semantic discovery and token-budgeted
provisioning, and proxies tool calls to the owning backend.

Usage:
  mcp-tool-gateway serve --config gateway.yaml
  mcp-tool-gateway --config gateway.yaml --port 8001

Environment:
  HOST, PORT, LOG_LEVEL, CONFIG_PATH override the file settings.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    gateway_args: CliArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch the gateway (same as running without subcommand)
    #[command(visible_alias = "start")]
    Serve {
        #[command(flatten)]
        args: CliArgs,
    },
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Configuration file (YAML or JSON)
    #[arg(long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Bind address override
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// TCP port override; when set, no fallback probing happens
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    #[arg(long, env = "LOG_LEVEL", value_parser = ["debug", "info", "warning", "warn", "error"])]
    log_level: Option<String>,

    /// Directory for rolling log files (stdout only when unset)
    #[arg(long)]
    log_dir: Option<String>,
}

impl CliArgs {
    fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let (mut config, config_path, config_raw) = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| format!("read {}: {}", path.display(), e))?;
                let parsed = config::parse_config(&raw, path)?;
                (parsed, Some(path.clone()), Some(raw))
            }
            None => {
                eprintln!("No config file given, starting with an empty backend set");
                (GatewayConfig::default(), None, None)
            }
        };

        if let Some(host) = &self.host {
            config.gateway.host = host.clone();
        }
        if let Some(port) = self.port {
            config.gateway.port = port;
        }
        if let Some(level) = &self.log_level {
            config.gateway.log_level = level.clone();
        }
        config.validate()?;

        Ok(ServerConfig {
            config,
            config_path,
            config_raw,
            port_explicit: self.port.is_some(),
            log_dir: self.log_dir.clone(),
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let args = match cli.command {
        Some(Commands::Serve { args }) => args,
        None => cli.gateway_args,
    };

    let server_config = args.to_server_config()?;

    println!("{} starting...", version::get_version_string());
    println!(
        "Host: {}:{}",
        server_config.config.gateway.host, server_config.config.gateway.port
    );
    println!("Backends: {}", server_config.config.backends.len());

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move { server::startup(server_config).await })
}
