use axum::http::HeaderMap;
use fastrace::{Span, collector::SpanContext};
use secrecy::SecretString;

/// Header a caller presents to select a channel and/or supply its own upstream key.
/// Checked in order; the first header present wins.
const CUSTOM_KEY_HEADERS: &[&str] = &["x-api-key", "authorization"];

const PROJECT_PATH_HEADER: &str = "x-session-project";
const USER_ID_HEADER: &str = "x-session-user";

/// Runtime context for a single inbound request.
///
/// Carries the caller-presented key (used both to select a channel via
/// `ChannelConfig::custom_key` and, for BYOK-style setups, as the key
/// forwarded upstream) plus the raw headers and tracing context needed
/// further down the pipeline.
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestContext {
    /// Key the caller presented, stripped of any `Bearer ` prefix.
    pub caller_key: Option<SecretString>,

    /// Incoming request headers, kept around in case the model router or
    /// provider dispatch needs something caller_key doesn't already cover.
    pub headers: HeaderMap,

    /// Span context for distributed tracing propagation.
    pub span_context: Option<SpanContext>,

    /// Session-store partition key (`x-session-project` header, or
    /// `"default"` when absent). Ignored entirely when the session store is
    /// disabled.
    pub project_path: String,

    /// Session-store partition key (`x-session-user` header, falling back
    /// to the caller's presented key, then `"anonymous"`).
    pub user_id: String,
}

impl RequestContext {
    /// Create a span with the propagated parent context if available,
    /// otherwise start a new root.
    pub fn new_span(&self, name: &'static str) -> Span {
        match self.span_context {
            Some(parent) => Span::root(name, parent),
            None => Span::root(name, SpanContext::random()),
        }
    }
}

/// Extract the per-request context from inbound headers.
pub(super) fn extract_context(headers: &HeaderMap, span_context: Option<SpanContext>) -> RequestContext {
    let caller_key = CUSTOM_KEY_HEADERS.iter().find_map(|header| {
        let value = headers.get(*header)?.to_str().ok()?;
        let stripped = value.strip_prefix("Bearer ").unwrap_or(value);
        if stripped.is_empty() {
            None
        } else {
            Some(SecretString::from(stripped.to_string()))
        }
    });

    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);

    let project_path = header_str(PROJECT_PATH_HEADER).unwrap_or_else(|| "default".to_string());
    let user_id = header_str(USER_ID_HEADER)
        .or_else(|| caller_key.as_ref().map(|k| secrecy::ExposeSecret::expose_secret(k).to_string()))
        .unwrap_or_else(|| "anonymous".to_string());

    RequestContext {
        caller_key,
        headers: headers.clone(),
        span_context,
        project_path,
        user_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_token_from_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer sk-test-123".parse().unwrap());

        let ctx = extract_context(&headers, None);
        assert_eq!(
            ctx.caller_key.map(|k| secrecy::ExposeSecret::expose_secret(&k).to_string()),
            Some("sk-test-123".to_string())
        );
    }

    #[test]
    fn prefers_x_api_key_over_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "direct-key".parse().unwrap());
        headers.insert("authorization", "Bearer other-key".parse().unwrap());

        let ctx = extract_context(&headers, None);
        assert_eq!(
            ctx.caller_key.map(|k| secrecy::ExposeSecret::expose_secret(&k).to_string()),
            Some("direct-key".to_string())
        );
    }

    #[test]
    fn no_key_header_yields_none() {
        let ctx = extract_context(&HeaderMap::new(), None);
        assert!(ctx.caller_key.is_none());
    }

    #[test]
    fn missing_session_headers_fall_back_to_defaults() {
        let ctx = extract_context(&HeaderMap::new(), None);
        assert_eq!(ctx.project_path, "default");
        assert_eq!(ctx.user_id, "anonymous");
    }

    #[test]
    fn user_id_falls_back_to_caller_key_when_header_absent() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "direct-key".parse().unwrap());

        let ctx = extract_context(&headers, None);
        assert_eq!(ctx.user_id, "direct-key");
    }

    #[test]
    fn explicit_session_headers_win() {
        let mut headers = HeaderMap::new();
        headers.insert("x-session-project", "/repo/acme".parse().unwrap());
        headers.insert("x-session-user", "alice".parse().unwrap());

        let ctx = extract_context(&headers, None);
        assert_eq!(ctx.project_path, "/repo/acme");
        assert_eq!(ctx.user_id, "alice");
    }
}
