//! Server configuration.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerConfig::default()`]
//! 2. If a JSON config file is given, merge its keys over the defaults
//! 3. Merge `WSRPC_*` environment variables (highest priority), e.g.
//!    `WSRPC_PORT=9000` or `WSRPC_POOL_CAPACITY=64`

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use serde::{Deserialize, Serialize};
use tracing::debug;
use wsrpc_core::{Codec, JsonCodec};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "WSRPC_";

/// Route of the health endpoint, unavailable as the WebSocket path.
pub const HEALTH_PATH: &str = "/health";

/// Error loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The explicitly requested config file does not exist.
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A source could not be parsed or a value has the wrong type.
    #[error("invalid configuration: {0}")]
    Parse(#[from] Box<figment::Error>),

    /// Values parsed but are out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which envelope codec the server speaks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// [`JsonCodec`], text frames.
    #[default]
    Json,
}

impl CodecKind {
    /// Instantiate the codec.
    pub fn build(self) -> Arc<dyn Codec> {
        match self {
            Self::Json => Arc::new(JsonCodec),
        }
    }
}

/// Configuration for the RPC server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (default `1957`, `0` for auto-assign).
    pub port: u16,
    /// HTTP path of the WebSocket upgrade route (default `"/ws"`).
    pub path: String,
    /// Envelope codec.
    pub codec: CodecKind,
    /// Number of pool executors, also the pool queue capacity.
    pub pool_capacity: usize,
    /// How long a submit may wait for queue space before failing.
    pub pool_submit_timeout_ms: u64,
    /// Read deadline for the next inbound frame.
    pub read_timeout_ms: u64,
    /// Deadline for a single outbound frame write.
    pub write_timeout_ms: u64,
    /// Interval between heartbeat pings.
    pub heartbeat_interval_ms: u64,
    /// A peer whose last pong is older than this is considered dead.
    pub pong_timeout_ms: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 1957,
            path: "/ws".into(),
            codec: CodecKind::Json,
            pool_capacity: 4096,
            pool_submit_timeout_ms: 2_000,
            read_timeout_ms: 30_000,
            write_timeout_ms: 50,
            heartbeat_interval_ms: 10_000,
            pong_timeout_ms: 20_000,
            max_message_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl ServerConfig {
    /// Load defaults, then `path` (if any), then `WSRPC_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            debug!(?path, "loading config file");
            figment = figment.merge(Json::file(path));
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Extract and validate a config from an arbitrary figment.
    pub fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_path(&self.path)?;
        if self.pool_capacity == 0 {
            return Err(ConfigError::Invalid("pool_capacity must be at least 1".into()));
        }
        for (name, value) in [
            ("pool_submit_timeout_ms", self.pool_submit_timeout_ms),
            ("read_timeout_ms", self.read_timeout_ms),
            ("write_timeout_ms", self.write_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("pong_timeout_ms", self.pong_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Pool submit timeout.
    pub fn pool_submit_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_submit_timeout_ms)
    }

    /// Read deadline.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Write deadline.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Heartbeat ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Pong staleness threshold.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }
}

/// The WebSocket path must be a literal route that does not collide with
/// [`HEALTH_PATH`].
fn validate_path(path: &str) -> Result<(), ConfigError> {
    if !path.starts_with('/') {
        return Err(ConfigError::Invalid(format!(
            "path must start with '/', got '{path}'"
        )));
    }
    if path == HEALTH_PATH {
        return Err(ConfigError::Invalid(format!(
            "path '{path}' is taken by the health endpoint"
        )));
    }
    // Captures and wildcards ({id}, {*rest}, legacy :id / *rest) are not literal.
    let dynamic = path.contains(['{', '}'])
        || path
            .split('/')
            .any(|segment| segment.starts_with(':') || segment.starts_with('*'));
    if dynamic {
        return Err(ConfigError::Invalid(format!(
            "path must be a literal route, got '{path}'"
        )));
    }
    Ok(())
}
