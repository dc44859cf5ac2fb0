//! Response builders shared by the proxy handler

use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode, header},
    response::IntoResponse,
};

use crate::config::CorsConfig;
use crate::{Error, Result};

/// `Cache-Control` for anything that must not be cached
pub const NO_STORE: &str = "no-store";

/// `Content-Type` of every JSON response
pub const APPLICATION_JSON: &str = "application/json";

/// `Cache-Control` for a cacheable read:
/// `public, max-age=N, s-maxage=N, stale-while-revalidate=M`
///
/// Sub-second durations round up so a cached body is never advertised as `max-age=0`.
#[must_use]
pub fn cacheable_cache_control(ttl: Duration, stale_while_revalidate: Duration) -> String {
    let max_age = whole_secs_ceil(ttl);
    format!(
        "public, max-age={max_age}, s-maxage={max_age}, stale-while-revalidate={}",
        whole_secs_ceil(stale_while_revalidate)
    )
}

fn whole_secs_ceil(d: Duration) -> u64 {
    d.as_secs().saturating_add(u64::from(d.subsec_nanos() > 0))
}

/// A pre-serialized JSON body with the given status and `Cache-Control`
#[must_use]
pub fn json_response(status: StatusCode, body: String, cache_control: HeaderValue) -> Response<Body> {
    (
        status,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON)),
            (header::CACHE_CONTROL, cache_control),
        ],
        body,
    )
        .into_response()
}

/// Raw upstream text, returned when non-JSON bodies are passed through
#[must_use]
pub fn passthrough_response(status: StatusCode, content_type: Option<&str>, body: String) -> Response<Body> {
    let content_type = content_type
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or(HeaderValue::from_static("text/plain;charset=utf-8"));
    (
        status,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE)),
        ],
        body,
    )
        .into_response()
}

/// CORS headers, validated once from configuration
#[derive(Debug, Clone)]
pub struct CorsHeaders {
    allow_origin: HeaderValue,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    max_age: HeaderValue,
}

impl CorsHeaders {
    /// Build the header set, or `None` when CORS is disabled
    pub fn from_config(config: &CorsConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        Ok(Some(Self {
            allow_origin: header_value("allow_origin", &config.allow_origin)?,
            allow_methods: header_value("allow_methods", &config.allow_methods)?,
            allow_headers: header_value("allow_headers", &config.allow_headers)?,
            max_age: HeaderValue::from(config.max_age.as_secs()),
        }))
    }

    /// Attach the `Access-Control-Allow-*` headers to a response
    pub fn apply(&self, headers: &mut HeaderMap) {
        let pairs: [(HeaderName, &HeaderValue); 3] = [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, &self.allow_origin),
            (header::ACCESS_CONTROL_ALLOW_METHODS, &self.allow_methods),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, &self.allow_headers),
        ];
        for (name, value) in pairs {
            headers.insert(name, value.clone());
        }
    }

    /// `204 No Content` answer to a preflight request
    #[must_use]
    pub fn preflight(&self) -> Response<Body> {
        let mut response = StatusCode::NO_CONTENT.into_response();
        let headers = response.headers_mut();
        self.apply(headers);
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
        response
    }
}

fn header_value(field: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::Config(format!("Invalid cors.{field} {value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cacheable_cache_control() {
        assert_eq!(
            cacheable_cache_control(Duration::from_secs(2), Duration::from_secs(10)),
            "public, max-age=2, s-maxage=2, stale-while-revalidate=10"
        );
    }

    #[test]
    fn test_cache_control_rounds_sub_second_up() {
        assert_eq!(
            cacheable_cache_control(Duration::from_millis(500), Duration::from_millis(1500)),
            "public, max-age=1, s-maxage=1, stale-while-revalidate=2"
        );
        assert_eq!(
            cacheable_cache_control(Duration::ZERO, Duration::ZERO),
            "public, max-age=0, s-maxage=0, stale-while-revalidate=0"
        );
        assert_eq!(
            cacheable_cache_control(Duration::MAX, Duration::from_secs(10)),
            format!(
                "public, max-age={0}, s-maxage={0}, stale-while-revalidate=10",
                u64::MAX
            )
        );
    }

    #[test]
    fn test_json_response_headers() {
        let response = json_response(
            StatusCode::CREATED,
            "{}".to_string(),
            HeaderValue::from_static(NO_STORE),
        );
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    }

    #[test]
    fn test_passthrough_defaults_to_text_plain() {
        let response = passthrough_response(StatusCode::OK, None, "hello".to_string());
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain;charset=utf-8");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

        let response = passthrough_response(StatusCode::OK, Some("text/html"), "<p>".to_string());
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
    }

    #[test]
    fn test_cors_disabled() {
        let config = CorsConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(CorsHeaders::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_cors_rejects_invalid_header() {
        let config = CorsConfig {
            allow_origin: "bad\nvalue".to_string(),
            ..Default::default()
        };
        assert!(matches!(CorsHeaders::from_config(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_preflight() {
        let cors = CorsHeaders::from_config(&CorsConfig::default()).unwrap().unwrap();
        let response = cors.preflight();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST, OPTIONS");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
        assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "86400");
    }
}
