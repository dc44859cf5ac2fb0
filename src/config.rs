//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable holding the Apps Script `/exec` URL
pub const SCRIPT_URL_ENV: &str = "APPS_SCRIPT_URL";

/// Environment variable holding the shared secret injected as `apiKey`
pub const API_KEY_ENV: &str = "API_KEY";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving secrets.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Upstream (Apps Script) configuration
    pub upstream: UpstreamConfig,
    /// Response cache configuration
    pub cache: CacheConfig,
    /// CORS configuration
    pub cors: CorsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Path the proxy endpoint is mounted on
    pub path: String,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            path: "/api".to_string(),
            max_body_size: 1024 * 1024,
        }
    }
}

/// How the inbound body is turned into the outbound body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMode {
    /// Forward `{action, payload}` only; `payload` defaults to `{}`
    #[default]
    Envelope,
    /// Forward the whole inbound object
    Verbatim,
}

/// Upstream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Apps Script web app URL (falls back to `APPS_SCRIPT_URL`)
    pub url: Option<String>,
    /// Shared secret (falls back to `API_KEY`)
    pub api_key: Option<String>,
    /// Deadline for the whole upstream exchange
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Outbound body construction
    pub forward_mode: ForwardMode,
    /// Return non-JSON upstream bodies as-is instead of a 502
    pub passthrough_non_json: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            timeout: Duration::from_secs(12),
            forward_mode: ForwardMode::Envelope,
            passthrough_non_json: false,
        }
    }
}

/// Upstream settings with both secrets present
#[derive(Debug, Clone)]
pub struct ResolvedUpstream {
    /// Apps Script web app URL
    pub url: String,
    /// Shared secret
    pub api_key: String,
}

impl UpstreamConfig {
    /// Check that both secrets are present and non-empty.
    ///
    /// The URL is checked first, so a config missing both reports the URL.
    pub fn resolve(&self) -> Result<ResolvedUpstream> {
        let url = non_empty(self.url.as_deref()).ok_or(Error::MissingConfiguration(SCRIPT_URL_ENV))?;
        let api_key =
            non_empty(self.api_key.as_deref()).ok_or(Error::MissingConfiguration(API_KEY_ENV))?;
        Ok(ResolvedUpstream {
            url: url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Cache configuration for the read action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching
    pub enabled: bool,
    /// The single read action whose successful responses are cached
    pub cacheable_action: String,
    /// Lifetime of a cached response (also used for `max-age`/`s-maxage`)
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// `stale-while-revalidate` advertised on cacheable responses
    #[serde(with = "humantime_serde")]
    pub stale_while_revalidate: Duration,
    /// Actions whose success invalidates the cached read
    pub mutating_actions: Vec<String>,
    /// Interval of the background sweep removing expired entries
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cacheable_action: "getStateLite".to_string(),
            ttl: Duration::from_secs(2),
            stale_while_revalidate: Duration::from_secs(10),
            mutating_actions: vec![
                "addPatient".to_string(),
                "updatePatient".to_string(),
                "deletePatient".to_string(),
            ],
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Whether `action` is eligible for caching
    #[must_use]
    pub fn is_cacheable(&self, action: Option<&str>) -> bool {
        self.enabled && action == Some(self.cacheable_action.as_str())
    }

    /// Whether a successful `action` invalidates the cached read
    #[must_use]
    pub fn is_mutating(&self, action: Option<&str>) -> bool {
        action.is_some_and(|a| self.mutating_actions.iter().any(|m| m == a))
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Answer preflights and attach CORS headers to every response
    pub enabled: bool,
    /// `Access-Control-Allow-Origin`
    pub allow_origin: String,
    /// `Access-Control-Allow-Methods`
    pub allow_methods: String,
    /// `Access-Control-Allow-Headers`
    pub allow_headers: String,
    /// `Access-Control-Max-Age` sent on preflight responses
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_origin: "*".to_string(),
            allow_methods: "POST, OPTIONS".to_string(),
            allow_headers: "Content-Type".to_string(),
            max_age: Duration::from_secs(86_400),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Precedence, lowest first: defaults, YAML file, `GAS_PROXY_*`
    /// variables, then `APPS_SCRIPT_URL` / `API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("GAS_PROXY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.apply_secret_env();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Take the upstream secrets from their well-known variables when set
    fn apply_secret_env(&mut self) {
        if let Ok(url) = env::var(SCRIPT_URL_ENV) {
            self.upstream.url = Some(url);
        }
        if let Ok(key) = env::var(API_KEY_ENV) {
            self.upstream.api_key = Some(key);
        }
    }

    /// Copy of the configuration safe to print
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.upstream.api_key.is_some() {
            config.upstream.api_key = Some("********".to_string());
        }
        config
    }
}

/// Serde helpers for human-readable durations ("12s", "500ms", "5m")
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration as "Ns", or "Nms" when it has a sub-second part
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    /// Deserialize "30s", "5m", "100ms" or a bare number of seconds
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => return Ok(Duration::from_secs(secs)),
            Raw::Text(s) => s,
        };
        let s = s.trim();

        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map_err(<D::Error as serde::de::Error>::custom)?
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| serde::de::Error::custom(format!("duration {s:?} is too large")))
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
