//! MCP (Model Context Protocol) implementation.

mod coerce;
pub mod server;
mod tools;

pub use coerce::{coerce, CoercionError};
pub use server::{McpServer, StdioServer};
pub use tools::{
    handler_fn, ArgumentError, Arguments, CallArguments, CallContext, FnHandler, HandlerTool,
    Payload, ToolBuilder, ToolHandler, ToolOutput, NO_RESULT,
};
