//! Stamps the caller identity into inbound `tools/call` requests.
//!
//! The dispatcher runs this on the raw body before any transport parses it.
//! The returned buffer replaces the request body, so providers read it the
//! same way they would have read the original.

use axum::body::Bytes;
use serde_json::{Map, Value};

use crate::identity::Identity;

/// Key inside `params._meta` carrying the caller's identifier.
pub const CALLER_META_KEY: &str = "io.mcp-gateway/caller";

const TOOLS_CALL: &str = "tools/call";

/// Returns `body` with the caller attached, or unchanged when it is not a
/// single `tools/call` request.
///
/// A client-supplied caller key is always overwritten or removed, so only the
/// host's own authentication decides whom a call runs as.
pub fn propagate(body: Bytes, caller: Option<&Identity>) -> Bytes {
    let Ok(Value::Object(mut message)) = serde_json::from_slice::<Value>(&body) else {
        return body;
    };

    let is_tool_call = message.get("method").and_then(Value::as_str) == Some(TOOLS_CALL)
        && message.get("id").is_some_and(|id| !id.is_null());
    if !is_tool_call {
        return body;
    }

    let params = message
        .entry("params")
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(params) = params else {
        return body;
    };

    match caller {
        Some(caller) => {
            let meta = params
                .entry("_meta")
                .or_insert_with(|| Value::Object(Map::new()));
            let Value::Object(meta) = meta else {
                return body;
            };
            meta.insert(CALLER_META_KEY.to_string(), Value::String(caller.id.clone()));
        }
        None => {
            let spoofed = params
                .get_mut("_meta")
                .and_then(Value::as_object_mut)
                .and_then(|meta| meta.remove(CALLER_META_KEY));
            if spoofed.is_none() {
                return body;
            }
            tracing::warn!("dropped client-supplied caller metadata from anonymous tools/call");
        }
    }

    match serde_json::to_vec(&message) {
        Ok(rewritten) => Bytes::from(rewritten),
        Err(_) => body,
    }
}

/// Reads the caller identifier from a `_meta` map.
pub fn caller_id(meta: Option<&Map<String, Value>>) -> Option<&str> {
    meta?.get(CALLER_META_KEY)?.as_str()
}
