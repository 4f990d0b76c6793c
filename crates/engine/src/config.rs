//! Engine configuration, read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

use crate::use_cases::outputs::RetryPolicy;

const DEFAULT_COMFYUI_URL: &str = "http://127.0.0.1:8188";
const DEFAULT_PROXY_PREFIX: &str = "comfyui";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Backend HTTP base URL, without trailing slash
    pub comfyui_url: String,
    /// Backend WebSocket endpoint
    pub comfyui_ws_url: String,
    pub server_host: String,
    pub server_port: u16,
    /// First path segment of the image proxy (`/{prefix}/image`)
    pub proxy_prefix: String,
    pub ws_connect_timeout: Duration,
    pub history_retry: RetryPolicy,
    pub completed_cache_capacity: usize,
    /// `*` or a comma separated origin list; `None` disables CORS
    pub cors_allowed_origins: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            comfyui_url: DEFAULT_COMFYUI_URL.to_string(),
            comfyui_ws_url: derive_ws_url(DEFAULT_COMFYUI_URL)
                .unwrap_or_else(|| "ws://127.0.0.1:8188/ws".to_string()),
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            proxy_prefix: DEFAULT_PROXY_PREFIX.to_string(),
            ws_connect_timeout: Duration::from_millis(5000),
            history_retry: RetryPolicy::default(),
            completed_cache_capacity: comfyui_mini_domain::DEFAULT_COMPLETED_CAPACITY,
            cors_allowed_origins: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup; unset or unparsable values
    /// fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let parse_u64 = |key: &str| {
            get(key).and_then(|value| match value.parse::<u64>() {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    tracing::warn!(key, value = %value, error = %e, "Ignoring invalid number");
                    None
                }
            })
        };

        let comfyui_url = get("COMFYUI_URL")
            .or_else(|| get("COMFYUI_BASE_URL"))
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.comfyui_url);

        let comfyui_ws_url = get("COMFYUI_WS_URL")
            .or_else(|| derive_ws_url(&comfyui_url))
            .unwrap_or(defaults.comfyui_ws_url);

        let proxy_prefix = get("PROXY_PREFIX")
            .map(|prefix| prefix.trim_matches('/').to_string())
            .filter(|prefix| !prefix.is_empty())
            .unwrap_or(defaults.proxy_prefix);

        let server_port = get("SERVER_PORT")
            .or_else(|| get("PORT"))
            .and_then(|port| port.parse().ok())
            .unwrap_or(defaults.server_port);

        let history_retry = RetryPolicy {
            max_retries: parse_u64("HISTORY_MAX_RETRIES")
                .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
                .unwrap_or(defaults.history_retry.max_retries),
            delay: parse_u64("HISTORY_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.history_retry.delay),
        };

        Self {
            comfyui_url,
            comfyui_ws_url,
            server_host: get("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port,
            proxy_prefix,
            ws_connect_timeout: parse_u64("WS_CONNECT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.ws_connect_timeout),
            history_retry,
            completed_cache_capacity: parse_u64("COMPLETED_CACHE_CAPACITY")
                .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
                .unwrap_or(defaults.completed_cache_capacity),
            cors_allowed_origins: get("CORS_ALLOWED_ORIGINS"),
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server_host, self.server_port).parse()
    }
}

/// `http://host:port/...` to `ws://host:port/ws` (`https` to `wss`).
pub fn derive_ws_url(http_url: &str) -> Option<String> {
    let mut url = Url::parse(http_url).ok()?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme).ok()?;
    url.set_path("/ws");
    url.set_query(None);
    Some(url.to_string())
}
