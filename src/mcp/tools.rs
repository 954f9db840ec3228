//! Tool invocation engine.
//!
//! A [`HandlerTool`] wraps one host handler as a protocol tool. Calls go
//! through a fixed pipeline: resolve the act-as identity from the request
//! metadata, coerce the declared arguments, run the handler under the
//! identity, and render whatever it returns as text content. Failures at any
//! step come back as an error result, never as a transport failure.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::coerce::coerce;
use crate::export::{Exportable, StructuredExporter};
use crate::identity::{self, ActAs, Identity};
use crate::propagation;
use crate::protocol::{CallToolParams, CallToolResult, Content, Tool};
use crate::registry::HostServices;
use crate::schema::{synthesize, ParamSpec};
use crate::transport::{SessionHandle, TransportContext};

/// Text of the single block returned when a handler produces nothing.
pub const NO_RESULT: &str = "No result";

/// Handler for executing a tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with the coerced arguments
    async fn invoke(&self, ctx: &CallContext, args: Arguments) -> anyhow::Result<ToolOutput>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnHandler<F>(F);

/// Wraps `f` as a tool handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(CallContext, Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ToolOutput>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(CallContext, Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ToolOutput>> + Send + 'static,
{
    async fn invoke(&self, ctx: &CallContext, args: Arguments) -> anyhow::Result<ToolOutput> {
        (self.0)(ctx.clone(), args).await
    }
}

/// What a handler sees besides its arguments.
#[derive(Clone)]
pub struct CallContext {
    transport: TransportContext,
    act_as: Option<Identity>,
    session: Option<SessionHandle>,
}

impl CallContext {
    pub fn transport(&self) -> &TransportContext {
        &self.transport
    }

    /// The identity the call runs as, if one was resolved.
    pub fn act_as(&self) -> Option<&Identity> {
        self.act_as.as_ref()
    }

    /// The stateful session the call arrived on; `None` on stateless bindings.
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }
}

/// The raw argument set of one call: arguments plus request metadata.
#[derive(Debug, Clone, Default)]
pub struct CallArguments {
    pub arguments: Map<String, Value>,
    pub meta: Map<String, Value>,
}

impl CallArguments {
    pub fn new(arguments: Map<String, Value>) -> Self {
        Self {
            arguments,
            meta: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Splits `tools/call` params into the argument set.
    ///
    /// Non-object arguments are treated as empty; schema validation catches
    /// them before dispatch.
    pub fn from_params(params: CallToolParams) -> Self {
        let arguments = match params.arguments {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self {
            arguments,
            meta: params.meta.unwrap_or_default(),
        }
    }

    /// Identifier of the act-as user, if the propagator attached one.
    pub fn caller_id(&self) -> Option<&str> {
        propagation::caller_id(Some(&self.meta))
    }
}

#[derive(Debug, Error)]
pub enum ArgumentError {
    #[error("missing required argument '{0}'")]
    Missing(String),
    #[error("invalid argument '{name}': {source}")]
    Invalid {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Coerced arguments, keyed by declared parameter name.
///
/// Absent parameters are simply not present.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: HashMap<String, Value>,
}

impl Arguments {
    /// Decodes an argument into `T`; `Ok(None)` when absent.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ArgumentError> {
        self.values
            .get(name)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|source| ArgumentError::Invalid {
                    name: name.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Decodes an argument that must be present.
    pub fn require<T: DeserializeOwned>(&self, name: &str) -> Result<T, ArgumentError> {
        self.get(name)?
            .ok_or_else(|| ArgumentError::Missing(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// One rendered element of a tool result.
pub enum Payload {
    Json(Value),
    Exported(Arc<dyn Exportable>),
}

impl Payload {
    fn render(&self, exporter: &dyn StructuredExporter) -> anyhow::Result<String> {
        match self {
            Self::Json(value) => Ok(serde_json::to_string(value)?),
            Self::Exported(value) => Ok(exporter.export(value.as_ref())?),
        }
    }
}

/// A handler's return value.
pub enum ToolOutput {
    Empty,
    Single(Payload),
    /// Rendered as one content block per element.
    Many(Vec<Payload>),
}

impl ToolOutput {
    /// Serializes any value; sequences become [`ToolOutput::Many`].
    pub fn json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<Self> {
        Ok(Self::from(serde_json::to_value(value)?))
    }

    pub fn exported(value: impl Exportable + 'static) -> Self {
        Self::Single(Payload::Exported(Arc::new(value)))
    }

    pub fn exported_list<E, I>(values: I) -> Self
    where
        E: Exportable + 'static,
        I: IntoIterator<Item = E>,
    {
        Self::Many(
            values
                .into_iter()
                .map(|v| Payload::Exported(Arc::new(v) as Arc<dyn Exportable>))
                .collect(),
        )
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Single(Payload::Json(Value::String(text.into())))
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Empty,
            Value::Array(items) => Self::Many(items.into_iter().map(Payload::Json).collect()),
            other => Self::Single(Payload::Json(other)),
        }
    }
}

/// Declares a tool backed by a handler.
///
/// ```no_run
/// use mcp_gateway::mcp::{handler_fn, HandlerTool, ToolOutput};
/// use mcp_gateway::schema::ParamSpec;
///
/// let builder = HandlerTool::builder(
///     "get_job",
///     handler_fn(|_ctx, args| async move {
///         let name: String = args.require("jobName")?;
///         ToolOutput::json(&serde_json::json!({ "name": name }))
///     }),
/// )
/// .name("getJob")
/// .description("Get a job by its full name")
/// .param(ParamSpec::of::<String>("jobName").description("Full job name"));
/// ```
pub struct ToolBuilder {
    ident: String,
    name: Option<String>,
    description: Option<String>,
    params: Vec<ParamSpec>,
    handler: Arc<dyn ToolHandler>,
}

impl ToolBuilder {
    /// Overrides the advertised name (defaults to the identifier).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn params(mut self, params: impl IntoIterator<Item = ParamSpec>) -> Self {
        self.params.extend(params);
        self
    }

    /// Binds the tool to the host services it calls into.
    pub fn build(self, host: &HostServices) -> HandlerTool {
        HandlerTool {
            ident: self.ident,
            name: self.name.filter(|n| !n.is_empty()),
            description: self.description.filter(|d| !d.is_empty()),
            params: self.params,
            handler: self.handler,
            host: host.clone(),
            schema: OnceLock::new(),
        }
    }
}

/// A host handler exposed as a protocol tool.
pub struct HandlerTool {
    ident: String,
    name: Option<String>,
    description: Option<String>,
    params: Vec<ParamSpec>,
    handler: Arc<dyn ToolHandler>,
    host: HostServices,
    schema: OnceLock<Value>,
}

impl std::fmt::Debug for HandlerTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTool")
            .field("name", &self.name())
            .field("params", &self.params)
            .finish()
    }
}

impl HandlerTool {
    pub fn builder(ident: impl Into<String>, handler: impl ToolHandler + 'static) -> ToolBuilder {
        ToolBuilder {
            ident: ident.into(),
            name: None,
            description: None,
            params: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.ident)
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_else(|| self.name())
    }

    /// Input schema, synthesized on first use and cached.
    pub fn input_schema(&self) -> &Value {
        self.schema.get_or_init(|| synthesize(&self.params))
    }

    /// The `tools/list` entry for this tool.
    pub fn tool(&self) -> Tool {
        Tool {
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            input_schema: self.input_schema().clone(),
        }
    }

    /// Invokes the tool outside any stateful session.
    pub async fn call(&self, ctx: &TransportContext, args: CallArguments) -> CallToolResult {
        self.call_in_session(ctx, args, None).await
    }

    /// Invokes the tool, exposing `session` to the handler.
    pub async fn call_in_session(
        &self,
        ctx: &TransportContext,
        args: CallArguments,
        session: Option<&SessionHandle>,
    ) -> CallToolResult {
        identity::confined(self.run(ctx, args, session)).await
    }

    async fn run(
        &self,
        ctx: &TransportContext,
        args: CallArguments,
        session: Option<&SessionHandle>,
    ) -> CallToolResult {
        let act_as = args
            .caller_id()
            .and_then(|id| self.host.identities.resolve_user(id));
        if act_as.is_none() {
            if let Some(id) = args.caller_id() {
                tracing::debug!(tool = %self.name(), caller = %id, "caller not resolvable, running without elevation");
            }
        }
        let _act_as = ActAs::enter(act_as.clone());

        let call_ctx = CallContext {
            transport: ctx.clone(),
            act_as,
            session: session.cloned(),
        };

        let outcome = AssertUnwindSafe(self.invoke(&call_ctx, args.arguments))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(anyhow::anyhow!(panic_message(panic.as_ref()))));

        match outcome.and_then(|output| self.render(output)) {
            Ok(content) => CallToolResult::success(content),
            Err(e) => {
                tracing::warn!(tool = %self.name(), error = %e, "tool call failed");
                CallToolResult::error(e.to_string())
            }
        }
    }

    async fn invoke(
        &self,
        ctx: &CallContext,
        mut raw: Map<String, Value>,
    ) -> anyhow::Result<ToolOutput> {
        let mut values = HashMap::with_capacity(self.params.len());
        for param in &self.params {
            match raw.remove(param.name()) {
                None | Some(Value::Null) => {}
                Some(value) => {
                    let value = coerce(param.name(), value, param.param_type())?;
                    values.insert(param.name().to_string(), value);
                }
            }
        }

        tracing::debug!(tool = %self.name(), args = values.len(), "invoking tool");
        self.handler.invoke(ctx, Arguments { values }).await
    }

    fn render(&self, output: ToolOutput) -> anyhow::Result<Vec<Content>> {
        let exporter = self.host.exporter.as_ref();
        match output {
            ToolOutput::Empty => Ok(vec![Content::text(NO_RESULT)]),
            ToolOutput::Single(payload) => Ok(vec![Content::text(payload.render(exporter)?)]),
            ToolOutput::Many(payloads) => payloads
                .iter()
                .map(|p| p.render(exporter).map(Content::text))
                .collect(),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool handler panicked".to_string()
    }
}
