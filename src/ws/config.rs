#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bon::Builder;
use secrecy::{ExposeSecret as _, SecretString};

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(50);
const DEFAULT_STALE_TIMEOUT_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_HANDSHAKE_TIMEOUT_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Everything needed to start a [`crate::ws::Client`].
///
/// ```
/// use hyperliquid_stream::ws::config::{Options, Proxy, ProxyAuth};
///
/// let options = Options::builder()
///     .url("wss://api.hyperliquid.xyz/ws")
///     .name("mids-0")
///     .proxy(
///         Proxy::builder()
///             .host("proxy.internal")
///             .port(3128)
///             .auth(ProxyAuth::new("user", "hunter2"))
///             .build(),
///     )
///     .build();
/// assert_eq!(options.name.as_deref(), Some("mids-0"));
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Options {
    /// Streaming endpoint, `ws://` or `wss://`
    #[builder(into)]
    pub url: String,
    /// Optional HTTP proxy to tunnel through with `CONNECT`
    pub proxy: Option<Proxy>,
    /// Optional name for addressing this client from the outside, also attached to its logs
    #[builder(into)]
    pub name: Option<String>,
    #[builder(default)]
    pub config: Config,
}

impl Options {
    /// Options for `url` with every other setting at its default.
    #[must_use]
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self::builder().url(url).build()
    }
}

/// HTTP proxy reached with a `CONNECT` tunnel before the WebSocket upgrade.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Proxy {
    #[builder(into)]
    pub host: String,
    pub port: u16,
    pub auth: Option<ProxyAuth>,
}

/// Basic-auth credentials for the proxy. The password is redacted from `Debug` output.
#[derive(Debug, Clone)]
pub struct ProxyAuth {
    username: String,
    password: SecretString,
}

impl ProxyAuth {
    #[must_use]
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Value of the `Proxy-Authorization` header.
    pub(crate) fn header_value(&self) -> String {
        let credentials = format!("{}:{}", self.username, self.password.expose_secret());
        format!("Basic {}", STANDARD.encode(credentials))
    }
}

/// Configuration for WebSocket client behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Period of the liveness check that sends heartbeat pings
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    pub heartbeat_interval: Duration,
    /// Time without any inbound frame after which the connection is considered dead
    #[builder(default = DEFAULT_STALE_TIMEOUT_DURATION)]
    pub stale_timeout: Duration,
    /// Upper bound on the transport handshake, including any proxy tunnel
    #[builder(default = DEFAULT_HANDSHAKE_TIMEOUT_DURATION)]
    pub handshake_timeout: Duration,
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_DURATION,
            stale_timeout: DEFAULT_STALE_TIMEOUT_DURATION,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT_DURATION,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive reconnection attempts before the client terminates.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Delay before the first reconnection attempt
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl ReconnectConfig {
    /// Set the retry budget. `None` retries forever.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the initial and maximum backoff delays.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            // Delays must be deterministic: 1s, 2s, 4s, ... capped
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None) // We handle max attempts separately
            .build()
    }
}

#[cfg(test)]
mod tests {
    use backoff::backoff::Backoff as _;

    use super::*;

    #[test]
    fn backoff_sequence_doubles_without_jitter() {
        let mut backoff: ExponentialBackoff = ReconnectConfig::default().into();

        let delays: Vec<u128> = (0..8)
            .map(|_| backoff.next_backoff().unwrap().as_millis())
            .collect();

        assert_eq!(
            delays,
            vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]
        );
    }

    #[test]
    fn backoff_respects_max() {
        let config = ReconnectConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 3.0,
            max_attempts: None,
        };
        let mut backoff: ExponentialBackoff = config.into();

        for _ in 0..10 {
            let _next = backoff.next_backoff();
        }

        assert_eq!(backoff.next_backoff().unwrap().as_millis(), 2000);
    }

    #[test]
    fn proxy_auth_header_is_basic_base64() {
        let auth = ProxyAuth::new("user", "pass");

        assert_eq!(auth.header_value(), "Basic dXNlcjpwYXNz");
        assert!(!format!("{:?}", ProxyAuth::new("user", "hunter2")).contains("hunter2"));
    }

    #[test]
    fn options_default_to_no_proxy() {
        let options = Options::new("ws://127.0.0.1:1");

        assert!(options.proxy.is_none());
        assert!(options.name.is_none());
        assert_eq!(options.config.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL_DURATION);
    }

    #[test]
    fn defaults_match_documented_timings() {
        let config = Config::default();

        assert_eq!(config.heartbeat_interval, Duration::from_secs(50));
        assert_eq!(config.stale_timeout, Duration::from_secs(60));
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect.max_attempts, Some(5));
    }

    #[test]
    fn builder_overrides_single_field() {
        let config = Config::builder()
            .heartbeat_interval(Duration::from_millis(100))
            .build();

        assert_eq!(config.heartbeat_interval, Duration::from_millis(100));
        assert_eq!(config.stale_timeout, DEFAULT_STALE_TIMEOUT_DURATION);
    }
}
