//! # MCP Gateway
//!
//! Exposes a host application's operations to Model Context Protocol clients
//! over three HTTP bindings (SSE, streamable HTTP and stateless JSON-RPC) and
//! over stdio.
//!
//! ## Architecture
//!
//! - [`schema`]: JSON Schema synthesis for tool parameters
//! - [`mcp`]: tool invocation engine and protocol servers
//! - [`propagation`]: stamps the caller identity into `tools/call` requests
//! - [`gateway`]: routes HTTP exchanges to the transport providers
//! - [`registry`]: collects capabilities from host extensions
//! - [`config`]: configuration management

pub mod builtin;
pub mod config;
pub mod error;
pub mod export;
pub mod gateway;
pub mod identity;
pub mod mcp;
pub mod propagation;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod transport;

// Re-export commonly used types
pub use error::GatewayError;
pub use gateway::Gateway;
pub use registry::{CapabilityRegistry, Extension, HostServices};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
