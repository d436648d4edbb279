//! # wsrpc
//!
//! Demo server binary: loads configuration, registers the `hello` and `add`
//! handlers and serves them until ctrl-c.

#![deny(unsafe_code)]

mod handlers;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use wsrpc_core::logging::{LogFormat, init_subscriber};
use wsrpc_server::shutdown::DEFAULT_SHUTDOWN_TIMEOUT;
use wsrpc_server::{MethodRegistry, RpcServer, ServerConfig};

/// WebSocket RPC demo server.
#[derive(Parser, Debug)]
#[command(name = "wsrpc", about = "WebSocket RPC demo server")]
struct Cli {
    /// JSON config file (merged over defaults, under `WSRPC_*` env vars).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// WebSocket upgrade path.
    #[arg(long)]
    path: Option<String>,

    /// Worker pool size.
    #[arg(long)]
    pool_capacity: Option<usize>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format: compact or json.
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,
}

impl Cli {
    /// Load the layered config and apply flag overrides on top.
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config =
            ServerConfig::load(self.config.as_deref()).context("Failed to load configuration")?;
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(path) = &self.path {
            config.path.clone_from(path);
        }
        if let Some(capacity) = self.pool_capacity {
            config.pool_capacity = capacity;
        }
        config.validate().context("Invalid command-line override")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_subscriber(&args.log_level, args.log_format);

    let config = args.server_config()?;

    let registry = MethodRegistry::new();
    handlers::register(&registry).context("Failed to register handlers")?;
    let method_count = registry.len();

    let server = RpcServer::new(config, registry);
    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;

    tracing::info!(
        "wsrpc listening on ws://{addr}{} ({method_count} RPC methods registered)",
        server.config().path
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !server
        .shutdown()
        .graceful_shutdown(vec![handle], DEFAULT_SHUTDOWN_TIMEOUT)
        .await
    {
        tracing::warn!("some connections did not close in time");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["wsrpc"]);
        assert!(cli.config.is_none());
        assert!(cli.port.is_none());
        assert_eq!(cli.log_level, "info");
        assert_eq!(cli.log_format, LogFormat::Compact);
    }

    #[test]
    fn cli_custom_port() {
        let cli = Cli::parse_from(["wsrpc", "--port", "8080"]);
        assert_eq!(cli.port, Some(8080));
    }

    #[test]
    fn cli_json_logs() {
        let cli = Cli::parse_from(["wsrpc", "--log-format", "json"]);
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn cli_rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["wsrpc", "--log-format", "xml"]).is_err());
    }

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"port": 7000, "path": "/rpc", "pool_capacity": 16}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_owned();

        let cli = Cli::parse_from(["wsrpc", "--config", &path, "--port", "8080"]);
        let config = cli.server_config().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.path, "/rpc");
        assert_eq!(config.pool_capacity, 16);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["wsrpc", "--config", "/nonexistent/wsrpc.json"]);
        assert!(cli.server_config().is_err());
    }

    #[test]
    fn health_path_override_is_rejected() {
        let cli = Cli::parse_from(["wsrpc", "--path", "/health"]);
        let err = cli.server_config().unwrap_err();
        assert!(format!("{err:#}").contains("health endpoint"));
    }

    #[test]
    fn invalid_override_is_rejected() {
        let cli = Cli::parse_from(["wsrpc", "--pool-capacity", "0"]);
        let err = cli.server_config().unwrap_err();
        assert!(format!("{err:#}").contains("pool_capacity"));
    }
}
