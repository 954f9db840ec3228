//! Stateless binding: one HTTP POST carries one JSON-RPC exchange.
//!
//! No handshake and no session; every request is answered on its own.

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};

use super::{jsonrpc_http_response, TransportContext};
use crate::mcp::McpServer;
use crate::protocol::JsonRpcMessage;

pub struct StatelessTransport {
    server: Arc<McpServer>,
}

impl StatelessTransport {
    pub fn new(server: Arc<McpServer>) -> Self {
        Self { server }
    }

    pub async fn handle(&self, ctx: TransportContext, method: &Method, body: Bytes) -> Response {
        if *method != Method::POST {
            return (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed").into_response();
        }

        let message = match JsonRpcMessage::parse(&body) {
            Ok(message) => message,
            Err(error) => return jsonrpc_http_response(&error, None),
        };

        match self.server.handle(message, &ctx, None).await {
            Some(response) => jsonrpc_http_response(&response, None),
            None => StatusCode::ACCEPTED.into_response(),
        }
    }
}
