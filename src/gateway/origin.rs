//! Origin policy and root URL derivation.

use http::{header, HeaderMap, Uri};
use thiserror::Error;
use url::Url;

use crate::config::SecurityConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OriginError {
    #[error("Origin header required")]
    Missing,
    #[error("Origin '{0}' is not allowed")]
    Mismatch(String),
}

/// Decides whether a browser-originated exchange may reach a provider.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    require_header: bool,
    require_match: bool,
    /// Normalized origin of the configured root URL.
    expected: Option<String>,
}

impl OriginPolicy {
    pub fn new(require_header: bool, require_match: bool, root_url: Option<&str>) -> Self {
        let expected = root_url.and_then(|root| {
            let origin = normalize(root);
            if origin.is_none() {
                tracing::warn!(root_url = root, "configured root URL has no usable origin; origin matching disabled");
            }
            origin
        });
        Self {
            require_header,
            require_match,
            expected,
        }
    }

    pub fn from_config(security: &SecurityConfig, root_url: Option<&str>) -> Self {
        Self::new(
            security.require_origin_header,
            security.require_origin_match,
            root_url,
        )
    }

    /// Checks the `Origin` header of an exchange.
    ///
    /// The match is against the configured root URL only, never against the
    /// root derived from `Host` or `X-Forwarded-*`: those headers are client
    /// controlled. [`request_root_url`] serves endpoint advertisement alone.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), OriginError> {
        let origin = headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let Some(origin) = origin else {
            return if self.require_header {
                Err(OriginError::Missing)
            } else {
                Ok(())
            };
        };

        if !self.require_match {
            return Ok(());
        }
        let Some(expected) = &self.expected else {
            return Ok(());
        };

        match normalize(origin) {
            Some(actual) if actual == *expected => Ok(()),
            _ => Err(OriginError::Mismatch(origin.to_string())),
        }
    }
}

/// Scheme, host and port of `url`, with default ports omitted.
fn normalize(url: &str) -> Option<String> {
    let origin = Url::parse(url).ok()?.origin();
    origin
        .is_tuple()
        .then(|| origin.ascii_serialization().to_ascii_lowercase())
}

fn first_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The root URL a client used to reach this exchange, honoring reverse proxy
/// headers. Always ends with `/`.
pub fn request_root_url(headers: &HeaderMap, uri: &Uri) -> String {
    let scheme = first_value(headers, "x-forwarded-proto")
        .or_else(|| uri.scheme_str())
        .unwrap_or("http")
        .to_ascii_lowercase();

    let host = first_value(headers, "x-forwarded-host")
        .or_else(|| first_value(headers, header::HOST.as_str()))
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or("localhost");

    let mut root = format!("{scheme}://{host}");
    if let Some(port) = first_value(headers, "x-forwarded-port") {
        let default = matches!((scheme.as_str(), port), ("http", "80") | ("https", "443"));
        if !host_has_port(host) && !default {
            root.push(':');
            root.push_str(port);
        }
    }
    root.push('/');
    root
}

fn host_has_port(host: &str) -> bool {
    match host.rfind(':') {
        // IPv6 literals carry colons inside brackets.
        Some(idx) => host[idx..].find(']').is_none(),
        None => false,
    }
}
