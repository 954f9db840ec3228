//! Configuration file support.
//!
//! Unlike [`super::load_config`] these helpers read and write the TOML file
//! verbatim, without environment overrides. They back the `config` CLI
//! commands.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! name = "ci-gateway"
//! host = "0.0.0.0"
//! port = 3000
//! root_path = "/mcp-server"
//! root_url = "https://ci.example.com/"
//! max_body_bytes = 4194304
//!
//! [bindings]
//! sse = true
//! streamable = true
//! stateless = true
//! keep_alive_seconds = 30
//! session_idle_timeout_seconds = 1800
//!
//! [security]
//! require_origin_header = false
//! require_origin_match = true
//! identity_header = "X-Forwarded-User"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use std::path::Path;

use super::GatewayConfig;

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),
}

/// Read a configuration file as-is
pub fn read_config_file(path: &Path) -> Result<GatewayConfig, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io(e.to_string()))?;

    toml::from_str(&content).map_err(|e| ConfigFileError::Parse(e.to_string()))
}

/// Render a configuration as pretty TOML
pub fn render_config(config: &GatewayConfig) -> Result<String, ConfigFileError> {
    toml::to_string_pretty(config).map_err(|e| ConfigFileError::Serialize(e.to_string()))
}

/// Write a configuration file, creating parent directories as needed
pub fn write_config_file(config: &GatewayConfig, path: &Path) -> Result<(), ConfigFileError> {
    let content = render_config(config)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigFileError::Io(e.to_string()))?;
    }

    std::fs::write(path, content).map_err(|e| ConfigFileError::Io(e.to_string()))
}
