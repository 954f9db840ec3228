//! Built-in extension: introspection tools every gateway exposes.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::identity::{self, Identity};
use crate::mcp::{handler_fn, HandlerTool, ToolOutput};
use crate::protocol::{Resource, ResourceContents, ServerInfo};
use crate::registry::{
    CapabilityRegistry, Extension, ResourceHandler, ResourceSpecification, ToolRegistrar,
};
use crate::transport::{Bindings, TransportContext};

pub const STATUS_RESOURCE_URI: &str = "gateway://status";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct WhoAmI {
    caller: Option<Identity>,
    act_as: Option<Identity>,
    ambient: Option<Identity>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    pub name: String,
    pub version: String,
    pub bindings: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
}

#[derive(Clone)]
struct StatusSource {
    info: ServerInfo,
    bindings: Bindings,
    started_at: DateTime<Utc>,
    tool_count: Arc<OnceLock<usize>>,
}

impl StatusSource {
    fn snapshot(&self) -> GatewayStatus {
        GatewayStatus {
            name: self.info.name.clone(),
            version: self.info.version.clone(),
            bindings: self.bindings.names(),
            tools: self.tool_count.get().copied(),
            started_at: self.started_at,
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
        }
    }
}

/// Provides `whoAmI`, `getStatus` and the status resource.
pub struct BuiltinExtension {
    status: StatusSource,
}

impl BuiltinExtension {
    pub fn new(info: ServerInfo, bindings: Bindings) -> Self {
        Self {
            status: StatusSource {
                info,
                bindings,
                started_at: Utc::now(),
                tool_count: Arc::new(OnceLock::new()),
            },
        }
    }

    /// Records the size of the final catalog for `getStatus`.
    pub fn publish_catalog(&self, registry: &CapabilityRegistry) {
        let _ = self.status.tool_count.set(registry.tools().len());
    }

    pub fn status(&self) -> GatewayStatus {
        self.status.snapshot()
    }
}

impl Extension for BuiltinExtension {
    fn name(&self) -> &str {
        "builtin"
    }

    fn register_tools(&self, registrar: &mut ToolRegistrar<'_>) {
        registrar.register(
            HandlerTool::builder(
                "who_am_i",
                handler_fn(|ctx, _| async move {
                    ToolOutput::json(&WhoAmI {
                        caller: ctx.transport().caller().cloned(),
                        act_as: ctx.act_as().cloned(),
                        ambient: identity::current(),
                    })
                }),
            )
            .name("whoAmI")
            .description("Show the identity this tool call runs as"),
        );

        let status = self.status.clone();
        registrar.register(
            HandlerTool::builder(
                "get_status",
                handler_fn(move |_, _| {
                    let snapshot = status.snapshot();
                    async move { ToolOutput::json(&snapshot) }
                }),
            )
            .name("getStatus")
            .description("Report gateway name, version, enabled bindings, tool count and uptime"),
        );
    }

    fn resource_specifications(&self) -> Vec<ResourceSpecification> {
        vec![ResourceSpecification {
            resource: Resource {
                uri: STATUS_RESOURCE_URI.to_string(),
                name: "status".to_string(),
                description: Some("Gateway status as JSON".to_string()),
                mime_type: Some("application/json".to_string()),
            },
            handler: Arc::new(StatusResource(self.status.clone())),
        }]
    }
}

struct StatusResource(StatusSource);

#[async_trait]
impl ResourceHandler for StatusResource {
    async fn read(
        &self,
        _ctx: &TransportContext,
        uri: &str,
    ) -> anyhow::Result<Vec<ResourceContents>> {
        Ok(vec![ResourceContents {
            uri: uri.to_string(),
            mime_type: Some("application/json".to_string()),
            text: serde_json::to_string(&self.0.snapshot())?,
        }])
    }
}
