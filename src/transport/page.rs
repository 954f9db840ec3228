//! Informational page shown to browsers that open an endpoint directly.

use axum::response::Html;

use crate::protocol::ServerInfo;

/// Renders the page advertising `endpoint` for `binding`.
pub fn render(info: &ServerInfo, binding: &str, endpoint: &str) -> Html<String> {
    let name = escape(&info.name);
    let version = escape(&info.version);
    let binding = escape(binding);
    let endpoint = escape(endpoint);
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{name} MCP endpoint</title>
</head>
<body>
<h1>{name} {version}</h1>
<p>This is a Model Context Protocol endpoint ({binding} binding). It speaks
JSON-RPC and is meant for MCP clients, not browsers.</p>
<p>Configure your client with:</p>
<pre>{endpoint}</pre>
</body>
</html>
"#
    ))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
