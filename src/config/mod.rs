//! Configuration management.
//!
//! Settings come from an optional TOML file overlaid with `MCP_GATEWAY__*`
//! environment variables, e.g. `MCP_GATEWAY__BINDINGS__SSE=false`.

mod file_config;

pub use file_config::{read_config_file, render_config, write_config_file, ConfigFileError};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::ServerInfo;
use crate::transport::Bindings;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "MCP_GATEWAY";

/// Gateway configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener and server identity settings
    pub server: ServerConfig,

    /// Per-binding switches and session lifecycle
    pub bindings: BindingsConfig,

    /// Origin policy and caller identity
    pub security: SecurityConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Bindings enabled by this configuration
    pub fn enabled_bindings(&self) -> Bindings {
        let mut bindings = Bindings::empty();
        bindings.set(Bindings::SSE, self.bindings.sse);
        bindings.set(Bindings::STREAMABLE, self.bindings.streamable);
        bindings.set(Bindings::STATELESS, self.bindings.stateless);
        bindings
    }

    /// Keep-alive interval for event streams; `None` when disabled
    pub fn keep_alive(&self) -> Option<Duration> {
        match self.bindings.keep_alive_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Idle timeout for stateful sessions; `None` when disabled
    pub fn session_idle_timeout(&self) -> Option<Duration> {
        match self.bindings.session_idle_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Canonical root URL, if one is configured and non-blank
    pub fn root_url(&self) -> Option<&str> {
        self.server
            .root_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Server identity reported during `initialize`, with placeholders for
    /// missing values
    pub fn server_info(&self) -> ServerInfo {
        ServerInfo::resolve(self.server.name.as_deref(), self.server.version.as_deref())
    }
}

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name reported to clients
    pub name: Option<String>,

    /// Server version reported to clients
    pub version: Option<String>,

    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,

    /// Path segment under which the gateway endpoints live
    pub root_path: String,

    /// Canonical externally visible root URL (used for Origin matching)
    pub root_url: Option<String>,

    /// Largest request body accepted by the gateway
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: None,
            version: None,
            host: "127.0.0.1".to_string(),
            port: 3000,
            root_path: default_root_path(),
            root_url: None,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

fn default_root_path() -> String {
    "/mcp-server".to_string()
}

/// Binding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingsConfig {
    /// Enable the SSE binding (`/sse` + `/message`)
    pub sse: bool,

    /// Enable the streamable HTTP binding (`/mcp`)
    pub streamable: bool,

    /// Enable the stateless binding (`/stateless`)
    pub stateless: bool,

    /// Keep-alive interval for event streams (0 disables)
    pub keep_alive_seconds: u64,

    /// Stateful sessions idle for longer than this are dropped (0 disables)
    pub session_idle_timeout_seconds: u64,
}

impl Default for BindingsConfig {
    fn default() -> Self {
        Self {
            sse: true,
            streamable: true,
            stateless: true,
            keep_alive_seconds: 30,
            session_idle_timeout_seconds: 1800, // 30 minutes
        }
    }
}

/// Security configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Reject requests without an `Origin` header
    pub require_origin_header: bool,

    /// Reject requests whose `Origin` does not match the root URL
    pub require_origin_match: bool,

    /// Trusted header carrying the authenticated caller (set by a proxy)
    pub identity_header: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            require_origin_header: false,
            require_origin_match: true,
            identity_header: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,

    /// `"json"` for structured output, anything else for human-readable
    pub format: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: None,
        }
    }
}

/// Load configuration from a file, with environment overrides
pub fn load_config(path: &Path) -> Result<GatewayConfig, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    settings.try_deserialize()
}

/// Get the configuration from environment variables and defaults
pub fn get_config() -> Result<GatewayConfig, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    settings.try_deserialize()
}

/// Find a configuration file in the default locations
///
/// Checks `./mcp-gateway.toml`, then `<config dir>/mcp-gateway/config.toml`.
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("mcp-gateway.toml");
    if local.is_file() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|dir| dir.join("mcp-gateway").join("config.toml"))
        .filter(|path| path.is_file())
}
