//! Client configuration.
//!
//! Loads `walletd.yaml` files into Rust types, applies `WALLETD_*`
//! environment overrides, and derives the daemon endpoints the client talks
//! to (JSON-RPC root, `/spec`, `/ws`).

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Default daemon URL of a stock install.
pub const DEFAULT_URL: &str = "http://localhost:5000";
/// Default RPC user of a stock install.
pub const DEFAULT_USER: &str = "electrum";
/// Default RPC password of a stock install.
pub const DEFAULT_PASSWORD: &str = "electrumz";
/// Upper bound on the wait for any single response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// Parsed client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Daemon JSON-RPC URL.
    pub url: String,
    /// Basic-auth user.
    pub user: String,
    /// Basic-auth password.
    pub password: String,
    /// Wallet identity (xpub or seed) sent with every call, if any.
    pub xpub: Option<String>,
    /// Outbound proxy URL (`http://`, `https://`, `socks4://`, `socks5://`, `socks5h://`).
    pub proxy: Option<String>,
    /// Verify the daemon's TLS certificate.
    pub verify_tls: bool,
    /// Response timeout in seconds.
    pub request_timeout_secs: u64,
    /// Interval between `get_updates` pulls in polling mode, in milliseconds.
    pub poll_interval_ms: u64,
    /// Delay policy between websocket reconnect attempts.
    pub reconnect: ReconnectPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            xpub: None,
            proxy: None,
            verify_tls: true,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            poll_interval_ms: 1000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl Config {
    /// Parse configuration from a YAML string. Missing keys take defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&contents)?;
        tracing::debug!(path = %path.display(), url = %config.url, "loaded config");
        Ok(config)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `WALLETD_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Override fields from an arbitrary variable lookup.
    ///
    /// Recognised keys: `WALLETD_URL`, `WALLETD_USER`, `WALLETD_PASSWORD`,
    /// `WALLETD_XPUB`, `WALLETD_PROXY`, `WALLETD_VERIFY_TLS`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("WALLETD_URL") {
            self.url = url;
        }
        if let Some(user) = lookup("WALLETD_USER") {
            self.user = user;
        }
        if let Some(password) = lookup("WALLETD_PASSWORD") {
            self.password = password;
        }
        if let Some(xpub) = lookup("WALLETD_XPUB") {
            self.xpub = non_empty(xpub);
        }
        if let Some(proxy) = lookup("WALLETD_PROXY") {
            self.proxy = non_empty(proxy);
        }
        if let Some(verify) = lookup("WALLETD_VERIFY_TLS") {
            self.verify_tls = parse_bool(&verify).ok_or_else(|| ConfigError::InvalidValue {
                key: "WALLETD_VERIFY_TLS",
                message: format!("expected a boolean, got '{verify}'"),
            })?;
        }
        self.validate()
    }

    /// Check that the URLs parse and use supported schemes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.daemon_url()?;
        if let Some(proxy) = &self.proxy {
            ProxyDescriptor::parse(proxy)?;
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// The parsed daemon URL.
    pub fn daemon_url(&self) -> Result<Url, ConfigError> {
        let url = parse_url(&self.url)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }

    /// URL of the daemon's spec document.
    pub fn spec_url(&self) -> Result<Url, ConfigError> {
        self.endpoint("spec")
    }

    /// URL of the daemon's websocket endpoint (`ws://` or `wss://`).
    pub fn websocket_url(&self) -> Result<Url, ConfigError> {
        let mut url = self.endpoint("ws")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| ConfigError::UnsupportedScheme(scheme.to_string()))?;
        Ok(url)
    }

    /// The parsed outbound proxy, if one is configured.
    pub fn proxy_descriptor(&self) -> Result<Option<ProxyDescriptor>, ConfigError> {
        self.proxy.as_deref().map(ProxyDescriptor::parse).transpose()
    }

    /// Response timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn endpoint(&self, segment: &str) -> Result<Url, ConfigError> {
        let base = self.daemon_url()?;
        let joined = format!("{}/{segment}", base.as_str().trim_end_matches('/'));
        parse_url(&joined)
    }
}

/// Delay between websocket reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum ReconnectPolicy {
    /// Always wait the same amount of time.
    Fixed { delay_ms: u64 },
    /// Double the wait after every failed attempt, up to `max_ms`.
    Backoff { initial_ms: u64, max_ms: u64 },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Backoff {
            initial_ms: 5_000,
            max_ms: 60_000,
        }
    }
}

impl ReconnectPolicy {
    /// A fixed-delay policy.
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed {
            delay_ms: duration_ms(delay),
        }
    }

    /// Delay before reconnect attempt number `attempt` (0-based, reset after a
    /// successful connection).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Backoff { initial_ms, max_ms } => {
                let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
                Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
            }
        }
    }
}

/// Outbound proxy scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    Http,
    Https,
    Socks4,
    Socks5,
    /// SOCKS5 with hostname resolution on the proxy.
    Socks5h,
}

impl ProxyScheme {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "socks4" => Some(Self::Socks4),
            "socks5" => Some(Self::Socks5),
            "socks5h" => Some(Self::Socks5h),
            _ => None,
        }
    }

    /// The URL scheme string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks4 => "socks4",
            Self::Socks5 => "socks5",
            Self::Socks5h => "socks5h",
        }
    }

    fn default_port(&self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
            Self::Socks4 | Self::Socks5 | Self::Socks5h => 1080,
        }
    }
}

/// Connector parameters parsed from a proxy URL.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyDescriptor {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyDescriptor {
    /// Parse `scheme://[user[:pass]@]host[:port]`.
    pub fn parse(proxy_url: &str) -> Result<Self, ConfigError> {
        let url = parse_url(proxy_url)?;
        let scheme = ProxyScheme::parse(url.scheme())
            .ok_or_else(|| ConfigError::UnsupportedScheme(url.scheme().to_string()))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "proxy",
                message: format!("no host in '{proxy_url}'"),
            })?
            .to_string();
        let port = url.port().unwrap_or_else(|| scheme.default_port());
        let username = non_empty(url.username().to_string());
        let password = url.password().map(str::to_string);

        Ok(Self {
            scheme,
            host,
            port,
            username,
            password,
        })
    }

    /// Proxy URL without credentials.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

impl fmt::Debug for ProxyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyDescriptor")
            .field("url", &self.url())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
