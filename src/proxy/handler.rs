//! Request handling for the proxy endpoint
//!
//! One request flows through:
//!
//! 1. method gate (`OPTIONS` preflight, otherwise POST only)
//! 2. configuration check (upstream URL and API key present)
//! 3. content-type and body-shape gates
//! 4. cache lookup for the cacheable read action
//! 5. upstream dispatch under a deadline
//! 6. JSON normalization of the upstream reply
//! 7. cache write or invalidation on `ok: true`
//!
//! Every failure becomes a JSON error response. There are no retries: each
//! request makes at most one upstream attempt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Method, Response, StatusCode, header},
    response::IntoResponse,
};
use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::response::{
    CorsHeaders, NO_STORE, cacheable_cache_control, json_response, passthrough_response,
};
use super::upstream::UpstreamClient;
use crate::cache::ResponseCache;
use crate::config::{CacheConfig, Config, ForwardMode};
use crate::{Error, Result};

/// Upstream availability, decided once at construction
enum Upstream {
    Ready(UpstreamClient),
    /// Name of the missing secret
    Missing(&'static str),
}

/// The proxy endpoint
pub struct ProxyHandler {
    upstream: Upstream,
    forward_mode: ForwardMode,
    passthrough_non_json: bool,
    cache: Arc<ResponseCache>,
    cache_config: CacheConfig,
    cacheable_header: HeaderValue,
    cors: Option<CorsHeaders>,
}

impl ProxyHandler {
    /// Build a handler from configuration and the process-wide cache.
    ///
    /// A missing upstream secret is not an error here; it is reported on
    /// every request instead, and no upstream call is ever made.
    pub fn new(config: &Config, cache: Arc<ResponseCache>) -> Result<Self> {
        let upstream = match config.upstream.resolve() {
            Ok(resolved) => Upstream::Ready(UpstreamClient::new(resolved, config.upstream.timeout)?),
            Err(Error::MissingConfiguration(name)) => Upstream::Missing(name),
            Err(e) => return Err(e),
        };

        let cacheable_header = HeaderValue::from_str(&cacheable_cache_control(
            config.cache.ttl,
            config.cache.stale_while_revalidate,
        ))
        .map_err(|e| Error::Config(format!("Invalid cache header: {e}")))?;

        Ok(Self {
            upstream,
            forward_mode: config.upstream.forward_mode,
            passthrough_non_json: config.upstream.passthrough_non_json,
            cache,
            cache_config: config.cache.clone(),
            cacheable_header,
            cors: CorsHeaders::from_config(&config.cors)?,
        })
    }

    /// Whether both upstream secrets are present
    #[must_use]
    pub fn is_configured(&self) -> bool {
        matches!(self.upstream, Upstream::Ready(_))
    }

    /// Name of the missing upstream secret, if any
    #[must_use]
    pub fn missing_configuration(&self) -> Option<&'static str> {
        match self.upstream {
            Upstream::Ready(_) => None,
            Upstream::Missing(name) => Some(name),
        }
    }

    /// The cache this handler reads and writes
    #[must_use]
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Handle one request; never fails, errors become JSON responses
    pub async fn handle(&self, method: &Method, headers: &HeaderMap, body: Bytes) -> Response<Body> {
        let response = match self.process(method, headers, &body).await {
            Ok(response) => response,
            Err(e) => {
                log_failure(&e);
                e.into_response()
            }
        };
        self.with_cors(response)
    }

    /// CORS headers, `None` when disabled
    #[must_use]
    pub fn cors(&self) -> Option<&CorsHeaders> {
        self.cors.as_ref()
    }

    /// Attach CORS headers when enabled
    #[must_use]
    pub fn with_cors(&self, mut response: Response<Body>) -> Response<Body> {
        if let Some(cors) = &self.cors {
            cors.apply(response.headers_mut());
        }
        response
    }

    async fn process(&self, method: &Method, headers: &HeaderMap, body: &Bytes) -> Result<Response<Body>> {
        if *method == Method::OPTIONS {
            if let Some(cors) = &self.cors {
                return Ok(cors.preflight());
            }
        }
        if *method != Method::POST {
            return Err(Error::MethodNotAllowed);
        }

        let upstream = match &self.upstream {
            Upstream::Ready(client) => client,
            Upstream::Missing(name) => return Err(Error::MissingConfiguration(*name)),
        };

        if !is_json_content_type(headers) {
            return Err(Error::InvalidContentType);
        }
        let inbound = parse_object(body)?;
        let action = inbound.get("action").and_then(Value::as_str);
        let cacheable = self.cache_config.is_cacheable(action);
        let cache_key = self.cache_config.cacheable_action.as_str();

        if cacheable {
            if let Some(cached) = self.cache.get(cache_key) {
                debug!(action = cache_key, "Serving cached response");
                return Ok(json_response(StatusCode::OK, cached, self.cacheable_header.clone()));
            }
            debug!(action = cache_key, "Cache miss");
        }

        let outbound = upstream.build_body(&inbound, self.forward_mode);
        let started = Instant::now();
        let reply = upstream.dispatch(&outbound).await?;
        info!(
            action = action.unwrap_or("-"),
            status = reply.status,
            latency_ms = elapsed_ms(started.elapsed()),
            "Upstream call completed"
        );

        let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);

        let Ok(parsed) = serde_json::from_str::<Value>(&reply.text) else {
            if self.passthrough_non_json {
                debug!(status = reply.status, "Passing through non-JSON upstream body");
                return Ok(passthrough_response(status, reply.content_type.as_deref(), reply.text));
            }
            return Err(Error::UpstreamNonJson {
                status: reply.status,
                body: reply.text,
            });
        };

        let serialized = serde_json::to_string(&parsed)?;

        if is_ok(&parsed) {
            if self.cache_config.is_mutating(action) && self.cache.delete(cache_key) {
                debug!(action = action.unwrap_or("-"), "Invalidated cached read");
            }
            if cacheable {
                self.cache.set(cache_key, serialized.clone(), self.cache_config.ttl);
                return Ok(json_response(status, serialized, self.cacheable_header.clone()));
            }
        }

        Ok(json_response(status, serialized, HeaderValue::from_static(NO_STORE)))
    }
}

/// Whether the `Content-Type` header announces JSON
fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"))
}

/// Parse the request body, accepting only a JSON object
fn parse_object(body: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(Error::InvalidBody),
    }
}

/// Only an explicit `"ok": true` counts as success
fn is_ok(parsed: &Value) -> bool {
    parsed.get("ok").and_then(Value::as_bool) == Some(true)
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn log_failure(e: &Error) {
    match e {
        Error::UpstreamTimeout(timeout) => warn!(timeout = ?timeout, "Upstream timeout"),
        Error::UpstreamNonJson { status, .. } => {
            warn!(upstream_status = status, "Upstream returned non-JSON");
        }
        Error::MissingConfiguration(name) => error!(missing = name, "Upstream not configured"),
        e if e.status_code().is_client_error() => debug!(error = %e, "Rejected request"),
        e => error!(error = %e, "Request failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_content_type_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_json_content_type(&headers));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(!is_json_content_type(&headers));

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("Application/JSON; charset=utf-8"),
        );
        assert!(is_json_content_type(&headers));
    }

    #[test]
    fn test_parse_object_rejects_non_objects() {
        assert!(parse_object(br#"{"action":"x"}"#).is_ok());
        assert!(matches!(parse_object(b"[1,2]"), Err(Error::InvalidBody)));
        assert!(matches!(parse_object(b"\"str\""), Err(Error::InvalidBody)));
        assert!(matches!(parse_object(b"not json"), Err(Error::InvalidBody)));
        assert!(matches!(parse_object(b""), Err(Error::InvalidBody)));
    }

    #[test]
    fn test_is_ok_requires_literal_true() {
        assert!(is_ok(&json!({"ok": true})));
        assert!(!is_ok(&json!({"ok": false})));
        assert!(!is_ok(&json!({"ok": "true"})));
        assert!(!is_ok(&json!({"ok": 1})));
        assert!(!is_ok(&json!({"data": []})));
        assert!(!is_ok(&json!([true])));
    }

    #[test]
    fn test_missing_configuration_is_reported() {
        let handler = ProxyHandler::new(&Config::default(), Arc::new(ResponseCache::new())).unwrap();
        assert!(!handler.is_configured());
        assert_eq!(handler.missing_configuration(), Some("APPS_SCRIPT_URL"));
    }
}
