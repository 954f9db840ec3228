//! Protocol gateway: routes HTTP exchanges under the root path to the
//! transport providers.
//!
//! The gateway sits in front of the host's own routes as middleware. Each
//! exchange is classified by method and path; anything that is not a
//! gateway endpoint is handed back to the host untouched.
//!
//! ```no_run
//! use mcp_gateway::config::GatewayConfig;
//! use mcp_gateway::gateway::{router, Gateway};
//! use mcp_gateway::registry::{CapabilityRegistry, HostServices};
//!
//! # async fn run() -> Result<(), mcp_gateway::GatewayError> {
//! let config = GatewayConfig::default();
//! let registry = CapabilityRegistry::collect(&[], HostServices::default());
//! let gateway = Gateway::new(&config, registry);
//! mcp_gateway::gateway::serve(router(gateway), "127.0.0.1:3000".parse().unwrap()).await
//! # }
//! ```

mod origin;

pub use origin::{request_root_url, OriginError, OriginPolicy};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::OnceCell;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::propagation::propagate;
use crate::protocol::ServerInfo;
use crate::registry::CapabilityRegistry;
use crate::transport::{
    page, BindingFlags, Bindings, SessionStore, SseTransport, StatelessTransport,
    StreamableTransport, TransportContext,
};

/// Endpoint paths derived from the root path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPaths {
    pub stateless: String,
    pub message: String,
    pub sse: String,
    pub mcp: String,
}

impl GatewayPaths {
    pub fn new(root_path: &str) -> Self {
        let root = root_path.trim().trim_end_matches('/');
        let root = if root.is_empty() || root.starts_with('/') {
            root.to_string()
        } else {
            format!("/{root}")
        };
        Self {
            stateless: format!("{root}/stateless"),
            message: format!("{root}/message"),
            sse: format!("{root}/sse"),
            mcp: format!("{root}/mcp"),
        }
    }
}

/// What an exchange is, by method and path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Stateless,
    SseMessage,
    /// POST to the SSE stream endpoint.
    SsePost,
    Streamable,
    SseStream,
    /// Not a gateway endpoint.
    Pass,
}

impl Route {
    fn binding(self) -> Option<Bindings> {
        match self {
            Self::Stateless => Some(Bindings::STATELESS),
            Self::SseMessage | Self::SseStream => Some(Bindings::SSE),
            Self::Streamable => Some(Bindings::STREAMABLE),
            Self::SsePost | Self::Pass => None,
        }
    }
}

/// Classifies an exchange. The checks run in a fixed order and the first
/// match wins.
pub fn classify(method: &Method, path: &str, paths: &GatewayPaths) -> Route {
    let get_or_post = *method == Method::GET || *method == Method::POST;
    if path.starts_with(&paths.stateless) && get_or_post {
        Route::Stateless
    } else if path.starts_with(&paths.message) && *method == Method::POST {
        Route::SseMessage
    } else if path.starts_with(&paths.sse) && *method == Method::POST {
        Route::SsePost
    } else if path.starts_with(&paths.mcp) && (get_or_post || *method == Method::DELETE) {
        Route::Streamable
    } else if path.starts_with(&paths.sse) && *method == Method::GET {
        Route::SseStream
    } else {
        Route::Pass
    }
}

/// Outcome of [`Gateway::dispatch`].
pub enum Dispatch {
    Handled(Response),
    /// Not ours; the request goes back to the host unchanged.
    Pass(Request),
}

struct Providers {
    sse: Option<SseTransport>,
    streamable: Option<StreamableTransport>,
    stateless: Option<StatelessTransport>,
}

struct Inner {
    registry: CapabilityRegistry,
    info: ServerInfo,
    paths: GatewayPaths,
    flags: BindingFlags,
    origin: OriginPolicy,
    max_body_bytes: usize,
    keep_alive: Option<Duration>,
    idle_timeout: Option<Duration>,
    providers: OnceCell<Providers>,
}

/// The transport dispatcher. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    pub fn new(config: &GatewayConfig, registry: CapabilityRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                info: config.server_info(),
                paths: GatewayPaths::new(&config.server.root_path),
                flags: BindingFlags::new(config.enabled_bindings()),
                origin: OriginPolicy::from_config(&config.security, config.root_url()),
                max_body_bytes: config.server.max_body_bytes,
                keep_alive: config.keep_alive(),
                idle_timeout: config.session_idle_timeout(),
                providers: OnceCell::new(),
            }),
        }
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.inner.info
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.inner.registry
    }

    pub fn paths(&self) -> &GatewayPaths {
        &self.inner.paths
    }

    /// Bindings currently switched on.
    pub fn enabled(&self) -> Bindings {
        self.inner.flags.get()
    }

    /// Switches a binding at runtime. A binding that was off when the
    /// providers were built stays unavailable.
    pub fn set_enabled(&self, binding: Bindings, enabled: bool) {
        tracing::info!(bindings = ?binding.names(), enabled, "binding switched");
        self.inner.flags.set(binding, enabled);
    }

    async fn providers(&self) -> &Providers {
        self.inner
            .providers
            .get_or_init(|| async { self.build_providers() })
            .await
    }

    fn build_providers(&self) -> Providers {
        let inner = &self.inner;
        let bindings = inner.flags.get();
        let servers = inner.registry.build_servers(&inner.info, bindings);

        let sse = servers.sse.map(|server| {
            let sessions = Arc::new(SessionStore::new(inner.idle_timeout));
            sessions.spawn_reaper();
            SseTransport::new(server, sessions, inner.keep_alive, inner.paths.message.clone())
        });
        let streamable = servers.streamable.map(|server| {
            let sessions = Arc::new(SessionStore::new(inner.idle_timeout));
            sessions.spawn_reaper();
            StreamableTransport::new(server, sessions, inner.keep_alive)
        });
        let stateless = servers.stateless.map(StatelessTransport::new);

        tracing::info!(bindings = ?bindings.names(), "transport providers ready");
        Providers {
            sse,
            streamable,
            stateless,
        }
    }

    /// Handles the exchange if it targets a gateway endpoint.
    pub async fn dispatch(&self, request: Request) -> Dispatch {
        let route = classify(request.method(), request.uri().path(), &self.inner.paths);
        let response = match route {
            Route::Pass => return Dispatch::Pass(request),
            Route::SsePost => {
                (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed").into_response()
            }
            _ => self.serve(route, request).await,
        };
        Dispatch::Handled(response)
    }

    async fn serve(&self, route: Route, request: Request) -> Response {
        tracing::debug!(?route, method = %request.method(), path = request.uri().path(), "gateway exchange");

        if let Some(binding) = route.binding() {
            if !self.inner.flags.is_enabled(binding) {
                return not_found();
            }
        }

        if matches!(route, Route::Stateless | Route::Streamable)
            && request.method() == Method::GET
            && wants_html(request.headers())
        {
            let binding = if route == Route::Stateless { "stateless" } else { "streamable" };
            let root = request_root_url(request.headers(), request.uri());
            let endpoint = format!("{}{}", root, request.uri().path().trim_start_matches('/'));
            return page::render(&self.inner.info, binding, &endpoint).into_response();
        }

        let providers = self.providers().await;
        let (parts, body) = request.into_parts();

        if route != Route::SseStream {
            if let Err(e) = self.inner.origin.check(&parts.headers) {
                tracing::warn!(error = %e, path = parts.uri.path(), "rejected by origin policy");
                return (StatusCode::FORBIDDEN, e.to_string()).into_response();
            }
        }

        let caller = self.inner.registry.host().identities.current_caller(&parts);
        let body = match to_bytes(body, self.inner.max_body_bytes).await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(error = %e, "request body rejected");
                return (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large").into_response();
            }
        };
        let body = propagate(body, caller.as_ref());
        let ctx = TransportContext::from_parts(&parts, caller);

        match (route, providers) {
            (Route::Stateless, Providers { stateless: Some(p), .. }) => {
                p.handle(ctx, &parts.method, body).await
            }
            (Route::SseMessage, Providers { sse: Some(p), .. }) => {
                p.handle_message(ctx, &parts.uri, body).await
            }
            (Route::SseStream, Providers { sse: Some(p), .. }) => p.open_stream(ctx),
            (Route::Streamable, Providers { streamable: Some(p), .. }) => {
                p.handle(ctx, &parts.method, &parts.headers, body).await
            }
            _ => not_found(),
        }
    }
}

fn wants_html(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("text/html"))
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

/// Middleware running the gateway ahead of the host's routes.
pub async fn gateway_layer(
    State(gateway): State<Gateway>,
    request: Request,
    next: Next,
) -> Response {
    match gateway.dispatch(request).await {
        Dispatch::Handled(response) => response,
        Dispatch::Pass(request) => next.run(request).await,
    }
}

async fn health(State(gateway): State<Gateway>) -> impl IntoResponse {
    let info = gateway.server_info();
    Json(json!({
        "status": "ok",
        "name": info.name,
        "version": info.version,
        "bindings": gateway.enabled().names(),
    }))
}

async fn fallback() -> Response {
    not_found()
}

/// Standalone router: the gateway in front of `/health` and a 404 fallback.
pub fn router(gateway: Gateway) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(fallback)
        .layer(middleware::from_fn_with_state(gateway.clone(), gateway_layer))
        .with_state(gateway)
}

/// Serves `app` on `addr` until Ctrl-C.
pub async fn serve(app: Router, addr: SocketAddr) -> Result<(), GatewayError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| GatewayError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    tracing::info!("MCP gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .map_err(|e| GatewayError::Serve(e.to_string()))
}
