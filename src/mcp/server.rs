//! Protocol servers.
//!
//! [`McpServer`] answers JSON-RPC messages for one HTTP binding. It is
//! transport-agnostic: providers hand it parsed messages and write back
//! whatever it returns. [`StdioServer`] exposes the same catalog over stdio
//! through pmcp.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use pmcp::{Error, RequestHandlerExtra, Server, ServerCapabilities, ToolHandler, ToolInfo};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::tools::CallArguments;
use crate::protocol::{
    error_codes, negotiate_protocol_version, CallToolParams, CallToolResult, GetPromptParams,
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcMessage, JsonRpcRequest,
    JsonRpcResponse, ListPromptsResult, ListResourcesResult, ListToolsResult, Prompt,
    ReadResourceParams, ReadResourceResult, Resource, ServerInfo, Tool,
};
use crate::registry::{
    PromptHandler, PromptSpecification, ResourceHandler, ResourceSpecification,
    SessionToolHandler, StatelessToolHandler, StatelessToolSpecification, ToolSpecification,
};
use crate::schema;
use crate::transport::{SessionHandle, TransportContext};

#[derive(Clone)]
enum Invoker {
    Session(Arc<dyn SessionToolHandler>),
    Stateless(Arc<dyn StatelessToolHandler>),
}

impl Invoker {
    async fn call(
        &self,
        ctx: &TransportContext,
        session: Option<&SessionHandle>,
        args: CallArguments,
    ) -> CallToolResult {
        match self {
            Self::Session(handler) => handler.call(ctx, session, args).await,
            Self::Stateless(handler) => handler.call(ctx, args).await,
        }
    }
}

/// JSON-RPC method dispatcher for one binding.
pub struct McpServer {
    info: ServerInfo,
    tools: Vec<Tool>,
    invokers: HashMap<String, Invoker>,
    prompts: Vec<Prompt>,
    prompt_handlers: HashMap<String, Arc<dyn PromptHandler>>,
    resources: Vec<Resource>,
    resource_handlers: HashMap<String, Arc<dyn ResourceHandler>>,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("info", &self.info)
            .field("tools", &self.tools.len())
            .field("prompts", &self.prompts.len())
            .field("resources", &self.resources.len())
            .finish()
    }
}

impl McpServer {
    /// A server whose tools may use the session they are called in.
    pub fn stateful(
        info: ServerInfo,
        tools: Vec<ToolSpecification>,
        prompts: &[PromptSpecification],
        resources: &[ResourceSpecification],
    ) -> Self {
        let tools = tools
            .into_iter()
            .map(|spec| (spec.tool, Invoker::Session(spec.handler)));
        Self::assemble(info, tools, prompts, resources)
    }

    pub fn stateless(
        info: ServerInfo,
        tools: Vec<StatelessToolSpecification>,
        prompts: &[PromptSpecification],
        resources: &[ResourceSpecification],
    ) -> Self {
        let tools = tools
            .into_iter()
            .map(|spec| (spec.tool, Invoker::Stateless(spec.handler)));
        Self::assemble(info, tools, prompts, resources)
    }

    fn assemble(
        info: ServerInfo,
        tools: impl Iterator<Item = (Tool, Invoker)>,
        prompts: &[PromptSpecification],
        resources: &[ResourceSpecification],
    ) -> Self {
        let mut catalog = Vec::new();
        let mut invokers = HashMap::new();
        for (tool, invoker) in tools {
            invokers.insert(tool.name.clone(), invoker);
            catalog.push(tool);
        }

        Self {
            info,
            tools: catalog,
            invokers,
            prompts: prompts.iter().map(|p| p.prompt.clone()).collect(),
            prompt_handlers: prompts
                .iter()
                .map(|p| (p.prompt.name.clone(), p.handler.clone()))
                .collect(),
            resources: resources.iter().map(|r| r.resource.clone()).collect(),
            resource_handlers: resources
                .iter()
                .map(|r| (r.resource.uri.clone(), r.handler.clone()))
                .collect(),
        }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// Answers one message. Requests always yield a response; notifications
    /// and client responses yield nothing.
    pub async fn handle(
        &self,
        message: JsonRpcMessage,
        ctx: &TransportContext,
        session: Option<&SessionHandle>,
    ) -> Option<JsonRpcResponse> {
        match message {
            JsonRpcMessage::Request(request) => {
                Some(self.handle_request(request, ctx, session).await)
            }
            JsonRpcMessage::Notification(notification) => {
                tracing::debug!(method = %notification.method, "notification received");
                None
            }
            JsonRpcMessage::Response(response) => {
                tracing::debug!(id = ?response.id, "ignoring client response");
                None
            }
        }
    }

    async fn handle_request(
        &self,
        request: JsonRpcRequest,
        ctx: &TransportContext,
        session: Option<&SessionHandle>,
    ) -> JsonRpcResponse {
        let id = request.id.clone();
        match self.dispatch(request, ctx, session).await {
            Ok(result) => JsonRpcResponse::ok(id, result),
            Err(error) => JsonRpcResponse::failure(Some(id), error),
        }
    }

    async fn dispatch(
        &self,
        request: JsonRpcRequest,
        ctx: &TransportContext,
        session: Option<&SessionHandle>,
    ) -> Result<Value, JsonRpcError> {
        let params = request.params;
        match request.method.as_str() {
            "initialize" => {
                let params: InitializeParams = match params {
                    Some(p) => decode(p)?,
                    None => InitializeParams::default(),
                };
                if let Some(client) = &params.client_info {
                    tracing::info!(client = %client.name, version = %client.version, "client initializing");
                }
                encode(&self.initialize(&params))
            }
            "ping" => Ok(json!({})),
            "tools/list" => encode(&ListToolsResult {
                tools: self.tools.clone(),
                next_cursor: None,
            }),
            "tools/call" => {
                let params: CallToolParams = decode(params.unwrap_or(Value::Null))?;
                encode(&self.call_tool(params, ctx, session).await?)
            }
            "prompts/list" => encode(&ListPromptsResult {
                prompts: self.prompts.clone(),
            }),
            "prompts/get" => {
                let params: GetPromptParams = decode(params.unwrap_or(Value::Null))?;
                let handler = self.prompt_handlers.get(&params.name).ok_or_else(|| {
                    invalid_params(format!("unknown prompt: {}", params.name))
                })?;
                let result = handler
                    .get(ctx, params.arguments)
                    .await
                    .map_err(|e| internal(e.to_string()))?;
                encode(&result)
            }
            "resources/list" => encode(&ListResourcesResult {
                resources: self.resources.clone(),
            }),
            "resources/read" => {
                let params: ReadResourceParams = decode(params.unwrap_or(Value::Null))?;
                let handler = self.resource_handlers.get(&params.uri).ok_or_else(|| {
                    invalid_params(format!("unknown resource: {}", params.uri))
                })?;
                let contents = handler
                    .read(ctx, &params.uri)
                    .await
                    .map_err(|e| internal(e.to_string()))?;
                encode(&ReadResourceResult { contents })
            }
            other => Err(JsonRpcError {
                code: error_codes::METHOD_NOT_FOUND,
                message: format!("Method not found: {other}"),
                data: None,
            }),
        }
    }

    fn initialize(&self, params: &InitializeParams) -> InitializeResult {
        let mut capabilities = Map::new();
        capabilities.insert("tools".into(), json!({ "listChanged": false }));
        if !self.prompts.is_empty() {
            capabilities.insert("prompts".into(), json!({ "listChanged": false }));
        }
        if !self.resources.is_empty() {
            capabilities.insert(
                "resources".into(),
                json!({ "subscribe": false, "listChanged": false }),
            );
        }

        InitializeResult {
            protocol_version: negotiate_protocol_version(&params.protocol_version).to_string(),
            capabilities: Value::Object(capabilities),
            server_info: self.info.clone(),
            instructions: None,
        }
    }

    async fn call_tool(
        &self,
        params: CallToolParams,
        ctx: &TransportContext,
        session: Option<&SessionHandle>,
    ) -> Result<CallToolResult, JsonRpcError> {
        let invoker = self
            .invokers
            .get(&params.name)
            .ok_or_else(|| invalid_params(format!("unknown tool: {}", params.name)))?;
        let tool = self
            .tools
            .iter()
            .find(|t| t.name == params.name)
            .ok_or_else(|| invalid_params(format!("unknown tool: {}", params.name)))?;

        let arguments = params.arguments.clone().unwrap_or(Value::Null);
        if let Err(e) = schema::validate(&tool.input_schema, &arguments) {
            tracing::debug!(tool = %params.name, error = %e, "arguments rejected");
            return Ok(CallToolResult::error(e.to_string()));
        }

        tracing::debug!(tool = %params.name, session = ?session.map(|s| s.id()), "calling tool");
        Ok(invoker
            .call(ctx, session, CallArguments::from_params(params))
            .await)
    }
}

fn decode<T: DeserializeOwned>(params: Value) -> Result<T, JsonRpcError> {
    serde_json::from_value(params).map_err(|e| invalid_params(format!("Invalid params: {e}")))
}

fn encode<T: Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| internal(e.to_string()))
}

fn invalid_params(message: String) -> JsonRpcError {
    JsonRpcError {
        code: error_codes::INVALID_PARAMS,
        message,
        data: None,
    }
}

fn internal(message: String) -> JsonRpcError {
    JsonRpcError {
        code: error_codes::INTERNAL_ERROR,
        message,
        data: None,
    }
}

/// The tool catalog served over stdio for local clients.
///
/// Calls carry no HTTP request and no caller, and request metadata is not
/// consulted, so tools always run without an act-as identity here.
pub struct StdioServer {
    server: Server,
}

impl StdioServer {
    pub fn new(
        info: &ServerInfo,
        tools: Vec<StatelessToolSpecification>,
    ) -> Result<Self, pmcp::Error> {
        let mut builder = Server::builder()
            .name(info.name.clone())
            .version(info.version.clone())
            .capabilities(ServerCapabilities::default());

        for spec in tools {
            let wrapper = ToolWrapper {
                tool: spec.tool,
                handler: spec.handler,
            };
            builder = builder.tool(wrapper.tool.name.clone(), wrapper);
        }

        Ok(Self {
            server: builder.build()?,
        })
    }

    /// Run the server in stdio mode until the client disconnects
    pub async fn run(self) -> Result<(), pmcp::Error> {
        tracing::info!("Starting MCP server in stdio mode");
        self.server.run_stdio().await
    }
}

/// Wrapper for adapting a tool specification to pmcp's ToolHandler
#[derive(Clone)]
struct ToolWrapper {
    tool: Tool,
    handler: Arc<dyn StatelessToolHandler>,
}

#[async_trait]
impl ToolHandler for ToolWrapper {
    async fn handle(&self, args: Value, _extra: RequestHandlerExtra) -> Result<Value, Error> {
        let arguments = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(Error::invalid_params("arguments must be an object")),
        };
        if let Err(e) = schema::validate(&self.tool.input_schema, &Value::Object(arguments.clone()))
        {
            return Err(Error::invalid_params(e.to_string()));
        }

        let result = self
            .handler
            .call(&TransportContext::detached(None), CallArguments::new(arguments))
            .await;
        let texts: Vec<&str> = result.content.iter().map(|c| c.as_text()).collect();
        if result.is_error {
            return Err(Error::internal(&texts.join("\n")));
        }

        // Blocks hold serialized JSON; hand pmcp the values back.
        let mut values: Vec<Value> = texts
            .iter()
            .map(|t| serde_json::from_str(t).unwrap_or_else(|_| Value::String(t.to_string())))
            .collect();
        Ok(if values.len() == 1 {
            values.remove(0)
        } else {
            Value::Array(values)
        })
    }

    fn metadata(&self) -> Option<ToolInfo> {
        Some(ToolInfo::new(
            self.tool.name.clone(),
            self.tool.description.clone(),
            self.tool.input_schema.clone(),
        ))
    }
}
