//! HTTP transport providers and the per-exchange context they share.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::request::Parts;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};

use crate::identity::Identity;
use crate::protocol::JsonRpcResponse;

pub mod page;
pub mod session;
pub mod sse;
pub mod stateless;
pub mod streamable;

pub use session::{Session, SessionHandle, SessionStore};
pub use sse::SseTransport;
pub use stateless::StatelessTransport;
pub use streamable::{StreamableTransport, SESSION_ID_HEADER};

bitflags::bitflags! {
    /// Wire bindings the gateway can serve
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Bindings: u8 {
        const SSE = 1 << 0;
        const STREAMABLE = 1 << 1;
        const STATELESS = 1 << 2;
    }
}

impl Bindings {
    /// Lowercase names of the contained bindings, in a fixed order.
    pub fn names(&self) -> Vec<&'static str> {
        [
            (Self::SSE, "sse"),
            (Self::STREAMABLE, "streamable"),
            (Self::STATELESS, "stateless"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect()
    }
}

/// Binding switches that can be flipped while the gateway runs.
#[derive(Debug)]
pub struct BindingFlags(AtomicU8);

impl BindingFlags {
    pub fn new(bindings: Bindings) -> Self {
        Self(AtomicU8::new(bindings.bits()))
    }

    pub fn get(&self) -> Bindings {
        Bindings::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    pub fn is_enabled(&self, binding: Bindings) -> bool {
        self.get().contains(binding)
    }

    pub fn set(&self, binding: Bindings, enabled: bool) {
        if enabled {
            self.0.fetch_or(binding.bits(), Ordering::AcqRel);
        } else {
            self.0.fetch_and(!binding.bits(), Ordering::AcqRel);
        }
    }
}

/// Method, URI and headers of the inbound HTTP exchange.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

/// Per-exchange context handed from the dispatcher to providers and tools.
#[derive(Debug, Clone)]
pub struct TransportContext {
    caller: Option<Identity>,
    request: Option<Arc<RequestHead>>,
}

impl TransportContext {
    pub fn from_parts(parts: &Parts, caller: Option<Identity>) -> Self {
        Self {
            caller,
            request: Some(Arc::new(RequestHead {
                method: parts.method.clone(),
                uri: parts.uri.clone(),
                headers: parts.headers.clone(),
            })),
        }
    }

    /// A context with no HTTP exchange behind it, as used by stdio.
    pub fn detached(caller: Option<Identity>) -> Self {
        Self {
            caller,
            request: None,
        }
    }

    /// The caller authenticated by the host for this exchange.
    pub fn caller(&self) -> Option<&Identity> {
        self.caller.as_ref()
    }

    pub fn request(&self) -> Option<&RequestHead> {
        self.request.as_deref()
    }
}

/// A JSON-RPC response as a 200 `application/json` reply, optionally naming
/// the streamable session.
pub(crate) fn jsonrpc_http_response(response: &JsonRpcResponse, session_id: Option<&str>) -> Response {
    let body = match serde_json::to_vec(response) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode JSON-RPC response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(value) = session_id.and_then(|id| HeaderValue::from_str(id).ok()) {
        builder = builder.header(SESSION_ID_HEADER, value);
    }

    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
