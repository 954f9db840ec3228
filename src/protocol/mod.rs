//! Wire types: JSON-RPC framing and the MCP shapes carried inside it.

pub mod jsonrpc;
pub mod types;

pub use jsonrpc::{
    error_codes, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId, JSONRPC_VERSION,
};
pub use types::{
    negotiate_protocol_version, CallToolParams, CallToolResult, ClientInfo, Content,
    GetPromptParams, GetPromptResult, InitializeParams, InitializeResult, ListPromptsResult,
    ListResourcesResult, ListToolsResult, Prompt, PromptArgument, PromptMessage,
    ReadResourceParams, ReadResourceResult, Resource, ResourceContents, Role, ServerInfo, Tool,
    PROTOCOL_VERSION_LATEST, SUPPORTED_PROTOCOL_VERSIONS,
};
