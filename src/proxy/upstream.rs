//! Outbound client for the Apps Script web app
//!
//! The upstream expects a POST whose body is JSON text sent as
//! `text/plain;charset=utf-8`; Apps Script handles that content type more
//! reliably than `application/json`. Each exchange runs under a deadline.
//! When it expires the in-flight request future is dropped, which closes
//! the connection, and the caller sees [`Error::UpstreamTimeout`].

use std::time::Duration;

use reqwest::{Client, header};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{ForwardMode, ResolvedUpstream};
use crate::{Error, Result};

/// Content type of the outbound request
pub const UPSTREAM_CONTENT_TYPE: &str = "text/plain;charset=utf-8";

/// Raw result of one upstream exchange
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    /// Numeric status reported by the upstream
    pub status: u16,
    /// Upstream `Content-Type`, if any
    pub content_type: Option<String>,
    /// Body as text
    pub text: String,
}

/// HTTP client bound to one upstream URL and secret
pub struct UpstreamClient {
    client: Client,
    url: String,
    api_key: String,
    timeout: Duration,
}

impl UpstreamClient {
    /// Create a client for a resolved upstream
    pub fn new(upstream: ResolvedUpstream, timeout: Duration) -> Result<Self> {
        // No client-level timeout: the deadline is applied per exchange in `dispatch`.
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build upstream client: {e}")))?;

        Ok(Self {
            client,
            url: upstream.url,
            api_key: upstream.api_key,
            timeout,
        })
    }

    /// Deadline applied to each exchange
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Outbound body for `inbound`, with the secret injected
    #[must_use]
    pub fn build_body(&self, inbound: &Map<String, Value>, mode: ForwardMode) -> Value {
        build_upstream_body(inbound, &self.api_key, mode)
    }

    /// POST `body` to the upstream and read the reply as text
    pub async fn dispatch(&self, body: &Value) -> Result<UpstreamReply> {
        let payload = serde_json::to_string(body)?;

        let exchange = async {
            let response = self
                .client
                .post(&self.url)
                .header(header::CONTENT_TYPE, UPSTREAM_CONTENT_TYPE)
                .body(payload)
                .send()
                .await?;

            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            let text = response.text().await?;

            Ok::<_, Error>(UpstreamReply {
                status,
                content_type,
                text,
            })
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(reply)) => {
                debug!(status = reply.status, bytes = reply.text.len(), "Upstream replied");
                Ok(reply)
            }
            Ok(Err(e)) if e.is_timeout() => Err(Error::UpstreamTimeout(self.timeout)),
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Err(Error::UpstreamTimeout(self.timeout)),
        }
    }
}

/// Build the outbound body.
///
/// `Envelope` keeps `action` (when present) and `payload`, defaulting a
/// missing or falsy payload to `{}`. `Verbatim` keeps every inbound field.
/// In both modes `apiKey` is set last and overrides any client value.
#[must_use]
pub fn build_upstream_body(inbound: &Map<String, Value>, api_key: &str, mode: ForwardMode) -> Value {
    let mut out = match mode {
        ForwardMode::Verbatim => inbound.clone(),
        ForwardMode::Envelope => {
            let mut out = Map::new();
            if let Some(action) = inbound.get("action").filter(|a| !a.is_null()) {
                out.insert("action".to_string(), action.clone());
            }
            let payload = inbound
                .get("payload")
                .filter(|p| is_truthy(p))
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()));
            out.insert("payload".to_string(), payload);
            out
        }
    };
    out.insert("apiKey".to_string(), Value::String(api_key.to_string()));
    Value::Object(out)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_envelope_body() {
        let inbound = object(json!({
            "action": "addPatient",
            "payload": {"name": "Ivan"},
            "extra": true
        }));
        let body = build_upstream_body(&inbound, "k", ForwardMode::Envelope);
        assert_eq!(
            body,
            json!({"action": "addPatient", "payload": {"name": "Ivan"}, "apiKey": "k"})
        );
    }

    #[test]
    fn test_envelope_defaults_payload() {
        let inbound = object(json!({"action": "getStateLite"}));
        let body = build_upstream_body(&inbound, "k", ForwardMode::Envelope);
        assert_eq!(body, json!({"action": "getStateLite", "payload": {}, "apiKey": "k"}));

        let inbound = object(json!({"action": "getStateLite", "payload": null}));
        let body = build_upstream_body(&inbound, "k", ForwardMode::Envelope);
        assert_eq!(body["payload"], json!({}));

        let inbound = object(json!({"action": "getStateLite", "payload": ""}));
        let body = build_upstream_body(&inbound, "k", ForwardMode::Envelope);
        assert_eq!(body["payload"], json!({}));
    }

    #[test]
    fn test_envelope_omits_missing_action() {
        let inbound = object(json!({"payload": {"a": 1}}));
        let body = build_upstream_body(&inbound, "k", ForwardMode::Envelope);
        assert_eq!(body, json!({"payload": {"a": 1}, "apiKey": "k"}));
    }

    #[test]
    fn test_verbatim_body_overrides_client_key() {
        let inbound = object(json!({"op": "list", "apiKey": "forged", "n": 3}));
        let body = build_upstream_body(&inbound, "real", ForwardMode::Verbatim);
        assert_eq!(body, json!({"op": "list", "apiKey": "real", "n": 3}));
    }

    #[test]
    fn test_client_reports_deadline() {
        let client = UpstreamClient::new(
            ResolvedUpstream {
                url: "http://127.0.0.1:9/exec".to_string(),
                api_key: "k".to_string(),
            },
            Duration::from_millis(250),
        )
        .unwrap();
        assert_eq!(client.timeout(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_dispatch_times_out_against_silent_server() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                if let Ok((socket, _)) = listener.accept().await {
                    held.push(socket);
                }
            }
        });

        let client = UpstreamClient::new(
            ResolvedUpstream {
                url: format!("http://{addr}/exec"),
                api_key: "k".to_string(),
            },
            Duration::from_millis(100),
        )
        .unwrap();

        let err = client.dispatch(&json!({"action": "x"})).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamTimeout(_)));
        server.abort();
    }
}
