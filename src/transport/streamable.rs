//! Streamable HTTP binding.
//!
//! `initialize` posted without a session header opens a session and returns
//! its identifier in `Mcp-Session-Id`; every later exchange must carry it.
//! Responses come back in the POST reply. A GET with the session header
//! attaches an event stream for server-initiated messages, and DELETE closes
//! the session.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};

use super::session::{SessionHandle, SessionStore, StreamLease};
use super::{jsonrpc_http_response, TransportContext};
use crate::mcp::McpServer;
use crate::protocol::JsonRpcMessage;

pub const SESSION_ID_HEADER: &str = "mcp-session-id";

pub struct StreamableTransport {
    server: Arc<McpServer>,
    sessions: Arc<SessionStore>,
    keep_alive: Option<Duration>,
}

impl StreamableTransport {
    pub fn new(
        server: Arc<McpServer>,
        sessions: Arc<SessionStore>,
        keep_alive: Option<Duration>,
    ) -> Self {
        Self {
            server,
            sessions,
            keep_alive,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub async fn handle(
        &self,
        ctx: TransportContext,
        method: &Method,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Response {
        match *method {
            Method::POST => self.post(ctx, headers, body).await,
            Method::GET => self.attach(headers),
            Method::DELETE => self.close(headers),
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        }
    }

    async fn post(&self, ctx: TransportContext, headers: &HeaderMap, body: Bytes) -> Response {
        let message = match JsonRpcMessage::parse(&body) {
            Ok(message) => message,
            Err(error) => return jsonrpc_http_response(&error, None),
        };

        let session = match header_session_id(headers) {
            Some(id) => match self.sessions.get(id) {
                Some(session) => session,
                None => return (StatusCode::NOT_FOUND, "Session not found").into_response(),
            },
            None if message.method() == Some("initialize") => self.sessions.create(),
            None => {
                return (StatusCode::BAD_REQUEST, "Missing Mcp-Session-Id header").into_response()
            }
        };

        match self.server.handle(message, &ctx, Some(&session)).await {
            Some(response) => jsonrpc_http_response(&response, Some(session.id())),
            None => StatusCode::ACCEPTED.into_response(),
        }
    }

    fn attach(&self, headers: &HeaderMap) -> Response {
        let session = match self.require_session(headers) {
            Ok(session) => session,
            Err(response) => return response,
        };
        let Some(mut outbound) = session.attach() else {
            return (StatusCode::CONFLICT, "Session stream already attached").into_response();
        };

        tracing::debug!(session = %session.id(), "stream attached");
        let lease = StreamLease::new(session);
        let stream = async_stream::stream! {
            let _lease = lease;
            while let Some(message) = outbound.recv().await {
                yield Ok::<_, Infallible>(Event::default().event("message").data(message));
            }
        };

        let sse = Sse::new(stream);
        match self.keep_alive {
            Some(interval) => sse
                .keep_alive(KeepAlive::new().interval(interval))
                .into_response(),
            None => sse.into_response(),
        }
    }

    fn close(&self, headers: &HeaderMap) -> Response {
        let Some(id) = header_session_id(headers) else {
            return (StatusCode::BAD_REQUEST, "Missing Mcp-Session-Id header").into_response();
        };
        if self.sessions.remove(id) {
            StatusCode::NO_CONTENT.into_response()
        } else {
            (StatusCode::NOT_FOUND, "Session not found").into_response()
        }
    }

    fn require_session(&self, headers: &HeaderMap) -> Result<SessionHandle, Response> {
        let id = header_session_id(headers).ok_or_else(|| {
            (StatusCode::BAD_REQUEST, "Missing Mcp-Session-Id header").into_response()
        })?;
        self.sessions
            .get(id)
            .ok_or_else(|| (StatusCode::NOT_FOUND, "Session not found").into_response())
    }
}

fn header_session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerInfo;

    fn transport() -> StreamableTransport {
        let server = McpServer::stateful(ServerInfo::resolve(None, None), Vec::new(), &[], &[]);
        StreamableTransport::new(
            Arc::new(server),
            Arc::new(SessionStore::new(None)),
            None,
        )
    }

    fn headers(session: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(id) = session {
            headers.insert(SESSION_ID_HEADER, id.parse().unwrap());
        }
        headers
    }

    async fn post(t: &StreamableTransport, session: Option<&str>, body: &'static str) -> Response {
        t.handle(
            TransportContext::detached(None),
            &Method::POST,
            &headers(session),
            Bytes::from_static(body.as_bytes()),
        )
        .await
    }

    #[tokio::test]
    async fn test_initialize_issues_session() {
        let t = transport();
        let response = post(
            &t,
            None,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers()[SESSION_ID_HEADER].to_str().unwrap().to_string();
        assert_eq!(t.sessions().len(), 1);

        let response = post(&t, Some(id.as_str()), r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = post(
            &t,
            Some(id.as_str()),
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_session_header_rules() {
        let t = transport();
        let response = post(&t, None, r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = post(&t, Some("nope"), r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_closes_session() {
        let t = transport();
        let id = t.sessions().create().id().to_string();
        let response = t
            .handle(
                TransportContext::detached(None),
                &Method::DELETE,
                &headers(Some(id.as_str())),
                Bytes::new(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(t.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_second_stream_conflicts() {
        let t = transport();
        let id = t.sessions().create().id().to_string();
        let first = t.attach(&headers(Some(id.as_str())));
        assert_eq!(first.status(), StatusCode::OK);
        let second = t.attach(&headers(Some(id.as_str())));
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }
}
