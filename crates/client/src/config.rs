//! Client configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

const DEFAULT_API_URL: &str = "http://localhost:8080";
const DEFAULT_WS_PATH: &str = "/ws";
const DEFAULT_IDLE_SECS: u64 = 300;
const DEFAULT_IDLE_CHECK_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL, e.g. `https://chat.example.com`.
    pub api_base_url: String,
    /// Broker endpoint, e.g. `wss://chat.example.com/ws`.
    pub ws_url: String,
    /// No input for this long marks the user idle (offline).
    pub idle_threshold: Duration,
    /// How often the idle check runs.
    pub idle_check_interval: Duration,
    /// Where persisted client state lives. `None` uses the platform config dir.
    pub storage_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            ws_url: ws_url_for(DEFAULT_API_URL, DEFAULT_WS_PATH),
            idle_threshold: Duration::from_secs(DEFAULT_IDLE_SECS),
            idle_check_interval: Duration::from_secs(DEFAULT_IDLE_CHECK_SECS),
            storage_dir: None,
        }
    }
}

impl ClientConfig {
    /// Read configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CHATSYNC_API_URL`: REST base URL (default: "http://localhost:8080")
    /// - `CHATSYNC_WS_URL`: broker endpoint (default: API URL with ws scheme and `/ws` path)
    /// - `CHATSYNC_IDLE_SECS`: idle threshold in seconds (default: 300)
    /// - `CHATSYNC_IDLE_CHECK_SECS`: idle check interval in seconds (default: 60)
    /// - `CHATSYNC_STORAGE_DIR`: directory for persisted client state
    pub fn from_env() -> anyhow::Result<Self> {
        let api_base_url = std::env::var("CHATSYNC_API_URL")
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Url::parse(&api_base_url)
            .map_err(|e| anyhow::anyhow!("invalid CHATSYNC_API_URL {api_base_url}: {e}"))?;

        let ws_url = match std::env::var("CHATSYNC_WS_URL") {
            Ok(url) => {
                let parsed = Url::parse(&url)
                    .map_err(|e| anyhow::anyhow!("invalid CHATSYNC_WS_URL {url}: {e}"))?;
                if !matches!(parsed.scheme(), "ws" | "wss") {
                    anyhow::bail!("CHATSYNC_WS_URL must use ws:// or wss://, got {url}");
                }
                url
            }
            Err(_) => ws_url_for(&api_base_url, DEFAULT_WS_PATH),
        };

        Ok(Self {
            api_base_url,
            ws_url,
            idle_threshold: secs_from_env("CHATSYNC_IDLE_SECS", DEFAULT_IDLE_SECS),
            idle_check_interval: secs_from_env("CHATSYNC_IDLE_CHECK_SECS", DEFAULT_IDLE_CHECK_SECS),
            storage_dir: std::env::var("CHATSYNC_STORAGE_DIR").ok().map(PathBuf::from),
        })
    }

    /// Host name sent in the STOMP CONNECT frame.
    pub fn broker_host(&self) -> String {
        Url::parse(&self.ws_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string())
    }
}

fn secs_from_env(name: &str, default: u64) -> Duration {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                tracing::warn!(variable = name, value = %raw, default, "Ignoring invalid duration");
                Duration::from_secs(default)
            }
        },
        Err(_) => Duration::from_secs(default),
    }
}

/// Convert an HTTP/HTTPS base URL to the WS/WSS endpoint at `path`.
pub fn ws_url_for(api_base_url: &str, path: &str) -> String {
    let base = api_base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
