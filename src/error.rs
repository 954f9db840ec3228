//! Error types for the gateway.

use thiserror::Error;

/// Errors raised while starting or running the gateway.
///
/// Nothing in request handling produces these: routing failures become HTTP
/// status codes and tool failures become error results.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Failed to bind to the TCP address.
    #[error("failed to bind on {addr}: {source}")]
    Bind {
        /// The address string.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an I/O error.
    #[error("server error: {0}")]
    Serve(String),

    /// The configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// An address could not be parsed.
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    /// The stdio binding failed.
    #[error("stdio transport error: {0}")]
    Stdio(String),
}
