//! Capability registry.
//!
//! Extensions contribute tools, prompts and resources once at startup. The
//! registry keeps one specification set and builds a protocol server per
//! transport binding from it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::export::{JsonExporter, StructuredExporter};
use crate::identity::{Anonymous, IdentityResolver};
use crate::mcp::{CallArguments, HandlerTool, McpServer, ToolBuilder};
use crate::protocol::{
    CallToolResult, GetPromptResult, Prompt, Resource, ResourceContents, ServerInfo, Tool,
};
use crate::transport::{Bindings, SessionHandle, TransportContext};

/// Host collaborators shared by every tool.
#[derive(Clone)]
pub struct HostServices {
    pub identities: Arc<dyn IdentityResolver>,
    pub exporter: Arc<dyn StructuredExporter>,
}

impl Default for HostServices {
    fn default() -> Self {
        Self {
            identities: Arc::new(Anonymous),
            exporter: Arc::new(JsonExporter::default()),
        }
    }
}

impl HostServices {
    pub fn with_identities(mut self, identities: Arc<dyn IdentityResolver>) -> Self {
        self.identities = identities;
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn StructuredExporter>) -> Self {
        self.exporter = exporter;
        self
    }
}

/// A tool implementation that may use the stateful session it runs in.
#[async_trait]
pub trait SessionToolHandler: Send + Sync {
    async fn call(
        &self,
        ctx: &TransportContext,
        session: Option<&SessionHandle>,
        args: CallArguments,
    ) -> CallToolResult;
}

/// A tool implementation for bindings without sessions.
#[async_trait]
pub trait StatelessToolHandler: Send + Sync {
    async fn call(&self, ctx: &TransportContext, args: CallArguments) -> CallToolResult;
}

#[async_trait]
impl SessionToolHandler for HandlerTool {
    async fn call(
        &self,
        ctx: &TransportContext,
        session: Option<&SessionHandle>,
        args: CallArguments,
    ) -> CallToolResult {
        self.call_in_session(ctx, args, session).await
    }
}

#[async_trait]
impl StatelessToolHandler for HandlerTool {
    async fn call(&self, ctx: &TransportContext, args: CallArguments) -> CallToolResult {
        HandlerTool::call(self, ctx, args).await
    }
}

#[derive(Clone)]
pub struct ToolSpecification {
    pub tool: Tool,
    pub handler: Arc<dyn SessionToolHandler>,
}

impl ToolSpecification {
    pub fn new(tool: Tool, handler: Arc<dyn SessionToolHandler>) -> Self {
        Self { tool, handler }
    }
}

impl From<Arc<HandlerTool>> for ToolSpecification {
    fn from(handler: Arc<HandlerTool>) -> Self {
        Self {
            tool: handler.tool(),
            handler,
        }
    }
}

#[derive(Clone)]
pub struct StatelessToolSpecification {
    pub tool: Tool,
    pub handler: Arc<dyn StatelessToolHandler>,
}

struct DiscardSession(Arc<dyn SessionToolHandler>);

#[async_trait]
impl StatelessToolHandler for DiscardSession {
    async fn call(&self, ctx: &TransportContext, args: CallArguments) -> CallToolResult {
        self.0.call(ctx, None, args).await
    }
}

impl From<ToolSpecification> for StatelessToolSpecification {
    fn from(spec: ToolSpecification) -> Self {
        Self {
            tool: spec.tool,
            handler: Arc::new(DiscardSession(spec.handler)),
        }
    }
}

#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn get(
        &self,
        ctx: &TransportContext,
        arguments: HashMap<String, String>,
    ) -> anyhow::Result<GetPromptResult>;
}

#[derive(Clone)]
pub struct PromptSpecification {
    pub prompt: Prompt,
    pub handler: Arc<dyn PromptHandler>,
}

#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(&self, ctx: &TransportContext, uri: &str)
        -> anyhow::Result<Vec<ResourceContents>>;
}

#[derive(Clone)]
pub struct ResourceSpecification {
    pub resource: Resource,
    pub handler: Arc<dyn ResourceHandler>,
}

/// Declarative tool registration handed to [`Extension::register_tools`].
pub struct ToolRegistrar<'a> {
    host: &'a HostServices,
    tools: Vec<Arc<HandlerTool>>,
}

impl<'a> ToolRegistrar<'a> {
    fn new(host: &'a HostServices) -> Self {
        Self {
            host,
            tools: Vec::new(),
        }
    }

    pub fn host(&self) -> &HostServices {
        self.host
    }

    pub fn register(&mut self, tool: ToolBuilder) -> &mut Self {
        self.tools.push(Arc::new(tool.build(self.host)));
        self
    }
}

/// A host module contributing capabilities.
///
/// Queried once, when the registry is collected.
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    fn tool_specifications(&self, _host: &HostServices) -> Vec<ToolSpecification> {
        Vec::new()
    }

    fn prompt_specifications(&self) -> Vec<PromptSpecification> {
        Vec::new()
    }

    fn resource_specifications(&self) -> Vec<ResourceSpecification> {
        Vec::new()
    }

    fn register_tools(&self, _registrar: &mut ToolRegistrar<'_>) {}
}

/// The protocol servers built for the enabled bindings.
#[derive(Clone, Default)]
pub struct Servers {
    pub sse: Option<Arc<McpServer>>,
    pub streamable: Option<Arc<McpServer>>,
    pub stateless: Option<Arc<McpServer>>,
}

/// Every capability contributed by the registered extensions.
#[derive(Clone)]
pub struct CapabilityRegistry {
    host: HostServices,
    tools: Vec<ToolSpecification>,
    prompts: Vec<PromptSpecification>,
    resources: Vec<ResourceSpecification>,
}

impl CapabilityRegistry {
    /// Collects capabilities from `extensions` in order.
    ///
    /// Explicit tool specifications come before registrar tools. When two
    /// tools share a name the first one wins; the same goes for prompt names
    /// and resource URIs.
    pub fn collect(extensions: &[Arc<dyn Extension>], host: HostServices) -> Self {
        let mut tools = Vec::new();
        let mut prompts = Vec::new();
        let mut resources = Vec::new();

        for extension in extensions {
            tools.extend(extension.tool_specifications(&host));
            let mut registrar = ToolRegistrar::new(&host);
            extension.register_tools(&mut registrar);
            tools.extend(registrar.tools.into_iter().map(ToolSpecification::from));
            prompts.extend(extension.prompt_specifications());
            resources.extend(extension.resource_specifications());

            tracing::debug!(extension = extension.name(), "collected extension capabilities");
        }

        let tools = first_wins(tools, "tool", |t| t.tool.name.clone());
        let prompts = first_wins(prompts, "prompt", |p| p.prompt.name.clone());
        let resources = first_wins(resources, "resource", |r| r.resource.uri.clone());

        tracing::info!(
            tools = tools.len(),
            prompts = prompts.len(),
            resources = resources.len(),
            "capability registry ready"
        );

        Self {
            host,
            tools,
            prompts,
            resources,
        }
    }

    pub fn host(&self) -> &HostServices {
        &self.host
    }

    pub fn tools(&self) -> &[ToolSpecification] {
        &self.tools
    }

    pub fn prompts(&self) -> &[PromptSpecification] {
        &self.prompts
    }

    pub fn resources(&self) -> &[ResourceSpecification] {
        &self.resources
    }

    /// Tools adapted for bindings without sessions.
    pub fn stateless_tools(&self) -> Vec<StatelessToolSpecification> {
        self.tools.iter().cloned().map(Into::into).collect()
    }

    pub fn sse_server(&self, info: &ServerInfo) -> McpServer {
        McpServer::stateful(info.clone(), self.tools.clone(), &self.prompts, &self.resources)
    }

    pub fn streamable_server(&self, info: &ServerInfo) -> McpServer {
        McpServer::stateful(info.clone(), self.tools.clone(), &self.prompts, &self.resources)
    }

    pub fn stateless_server(&self, info: &ServerInfo) -> McpServer {
        McpServer::stateless(info.clone(), self.stateless_tools(), &self.prompts, &self.resources)
    }

    /// Builds a server for every binding in `bindings`.
    pub fn build_servers(&self, info: &ServerInfo, bindings: Bindings) -> Servers {
        Servers {
            sse: bindings
                .contains(Bindings::SSE)
                .then(|| Arc::new(self.sse_server(info))),
            streamable: bindings
                .contains(Bindings::STREAMABLE)
                .then(|| Arc::new(self.streamable_server(info))),
            stateless: bindings
                .contains(Bindings::STATELESS)
                .then(|| Arc::new(self.stateless_server(info))),
        }
    }
}

fn first_wins<T>(items: Vec<T>, kind: &str, key: impl Fn(&T) -> String) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| {
            let key = key(item);
            let fresh = seen.insert(key.clone());
            if !fresh {
                tracing::warn!(kind, name = %key, "duplicate {kind} skipped");
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{handler_fn, ToolOutput};
    use crate::protocol::Content;
    use serde_json::json;

    struct Fixed {
        name: &'static str,
        tools: Vec<(&'static str, &'static str)>,
        explicit: Option<(&'static str, &'static str)>,
    }

    fn echo_tool(name: &'static str, reply: &'static str) -> ToolBuilder {
        HandlerTool::builder(
            name,
            handler_fn(move |_, _| async move { Ok(ToolOutput::text(reply)) }),
        )
    }

    impl Extension for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn tool_specifications(&self, host: &HostServices) -> Vec<ToolSpecification> {
            self.explicit
                .iter()
                .map(|&(name, reply)| Arc::new(echo_tool(name, reply).build(host)).into())
                .collect()
        }

        fn register_tools(&self, registrar: &mut ToolRegistrar<'_>) {
            for &(name, reply) in &self.tools {
                registrar.register(echo_tool(name, reply));
            }
        }
    }

    fn registry(extensions: Vec<Fixed>) -> CapabilityRegistry {
        let extensions: Vec<Arc<dyn Extension>> = extensions
            .into_iter()
            .map(|e| Arc::new(e) as Arc<dyn Extension>)
            .collect();
        CapabilityRegistry::collect(&extensions, HostServices::default())
    }

    async fn reply_of(spec: &ToolSpecification) -> String {
        let result = spec
            .handler
            .call(&TransportContext::detached(None), None, CallArguments::default())
            .await;
        result.content[0].as_text().to_string()
    }

    #[test]
    fn test_collects_in_extension_order() {
        let reg = registry(vec![
            Fixed {
                name: "a",
                tools: vec![("one", "1"), ("two", "2")],
                explicit: None,
            },
            Fixed {
                name: "b",
                tools: vec![("three", "3")],
                explicit: None,
            },
        ]);
        let names: Vec<_> = reg.tools().iter().map(|t| t.tool.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_first_registered_duplicate_wins() {
        let reg = registry(vec![
            Fixed {
                name: "a",
                tools: vec![("getJobs", "registrar")],
                explicit: Some(("getJobs", "explicit")),
            },
            Fixed {
                name: "b",
                tools: vec![("getJobs", "later")],
                explicit: None,
            },
        ]);
        assert_eq!(reg.tools().len(), 1);
        assert_eq!(reply_of(&reg.tools()[0]).await, r#""explicit""#);
    }

    #[tokio::test]
    async fn test_stateless_adapter_discards_session() {
        let reg = registry(vec![Fixed {
            name: "a",
            tools: vec![("ping", "pong")],
            explicit: None,
        }]);
        let stateless = reg.stateless_tools();
        let result = stateless[0]
            .handler
            .call(&TransportContext::detached(None), CallArguments::default())
            .await;
        assert_eq!(result.content, vec![Content::text(r#""pong""#)]);
        assert_eq!(stateless[0].tool.input_schema, json!({"type": "object", "properties": {}, "required": []}));
    }

    #[test]
    fn test_builds_only_enabled_servers() {
        let reg = registry(Vec::new());
        let info = ServerInfo::resolve(None, None);
        let servers = reg.build_servers(&info, Bindings::STATELESS | Bindings::SSE);
        assert!(servers.sse.is_some());
        assert!(servers.streamable.is_none());
        assert!(servers.stateless.is_some());
    }
}
