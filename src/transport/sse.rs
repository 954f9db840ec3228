//! SSE binding: a long-lived event stream per session plus a POST endpoint
//! for client messages.
//!
//! Opening the stream issues a session and sends an `endpoint` event naming
//! the message URL. Responses to posted messages are delivered as `message`
//! events on that stream; the POST itself only acknowledges receipt.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::session::{SessionGuard, SessionStore};
use super::TransportContext;
use crate::mcp::McpServer;
use crate::protocol::JsonRpcMessage;

/// Query parameter carrying the session on message posts.
pub const SESSION_ID_PARAM: &str = "sessionId";

pub struct SseTransport {
    server: Arc<McpServer>,
    sessions: Arc<SessionStore>,
    keep_alive: Option<Duration>,
    message_path: String,
}

impl SseTransport {
    pub fn new(
        server: Arc<McpServer>,
        sessions: Arc<SessionStore>,
        keep_alive: Option<Duration>,
        message_path: impl Into<String>,
    ) -> Self {
        Self {
            server,
            sessions,
            keep_alive,
            message_path: message_path.into(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Opens a session and returns its event stream.
    pub fn open_stream(&self, _ctx: TransportContext) -> Response {
        let session = self.sessions.create();
        let Some(mut outbound) = session.attach() else {
            return (StatusCode::CONFLICT, "Session stream already attached").into_response();
        };

        let endpoint = format!(
            "{}?{}={}",
            self.message_path,
            SESSION_ID_PARAM,
            session.id()
        );
        let guard = SessionGuard::new(self.sessions.clone(), session.id().to_string());

        let stream = async_stream::stream! {
            let _guard = guard;
            yield Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint));
            while let Some(message) = outbound.recv().await {
                yield Ok(Event::default().event("message").data(message));
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

    /// Handles one client message posted to the message endpoint.
    pub async fn handle_message(&self, ctx: TransportContext, uri: &Uri, body: Bytes) -> Response {
        let Some(id) = session_id(uri) else {
            return (StatusCode::BAD_REQUEST, "Missing sessionId parameter").into_response();
        };
        let Some(session) = self.sessions.get(&id) else {
            return (StatusCode::NOT_FOUND, "Session not found").into_response();
        };

        let message = match JsonRpcMessage::parse(&body) {
            Ok(message) => message,
            Err(error) => return (StatusCode::BAD_REQUEST, Json(error)).into_response(),
        };

        if let Some(response) = self.server.handle(message, &ctx, Some(&session)).await {
            if !session.send(&response).await {
                tracing::debug!(session = %id, "stream closed before response could be delivered");
                return (StatusCode::NOT_FOUND, "Session not found").into_response();
            }
        }

        StatusCode::ACCEPTED.into_response()
    }
}

fn session_id(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == SESSION_ID_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_session_id_from_query() {
        let uri: Uri = "/mcp-server/message?foo=1&sessionId=abc".parse().unwrap();
        assert_eq!(session_id(&uri).as_deref(), Some("abc"));

        let uri: Uri = "/mcp-server/message?sessionId=".parse().unwrap();
        assert_eq!(session_id(&uri), None);

        let uri: Uri = "/mcp-server/message".parse().unwrap();
        assert_eq!(session_id(&uri), None);
    }
}
