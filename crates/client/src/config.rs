//! Client configuration with defaults and `NOTIFIER_*` environment overrides.

use std::time::Duration;

use notifier_shared::{
    NotifyError, AUTH_TIMEOUT_MS, DEST_CONNECT, DEST_NOTIFICATIONS_CONNECT,
    HEARTBEAT_INTERVAL_MS, MISSED_HEARTBEATS_LIMIT, RECONNECT_DELAY_MS,
};
use url::Url;

use crate::toast::Locale;

/// How the bearer credential reaches the server.
///
/// Deployments disagree, so this is chosen at startup rather than guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// `Authorization: Bearer <token>` on CONNECT.
    #[default]
    Header,
    /// `login` and `passcode` on CONNECT, both carrying the token.
    LoginPasscode,
    /// Bare CONNECT followed by a SEND to `/app/auth` with `{"token": ...}`.
    Message,
}

impl AuthMode {
    pub fn parse(s: &str) -> Result<Self, NotifyError> {
        match s.trim().to_lowercase().as_str() {
            "header" | "bearer" => Ok(AuthMode::Header),
            "login" | "passcode" | "login-passcode" => Ok(AuthMode::LoginPasscode),
            "message" | "app-auth" => Ok(AuthMode::Message),
            other => Err(NotifyError::config(format!("unknown auth mode {other:?}"))),
        }
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Fixed delay between a drop and the next attempt, in milliseconds
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            delay_ms: RECONNECT_DELAY_MS,
        }
    }
}

impl ReconnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Whether another attempt is allowed after `attempt` failed ones.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `wss://api.example.com/ws`.
    pub endpoint: String,
    pub auth_mode: AuthMode,
    /// Where the "client connected" announcement goes.
    pub connect_destination: String,
    /// Device class reported in the announcement.
    pub device: String,
    /// Heartbeat interval in both directions (0 disables heartbeats).
    pub heartbeat_ms: u64,
    pub missed_heartbeats: u32,
    pub connect_timeout_ms: u64,
    pub auth_timeout_ms: u64,
    pub reconnect: ReconnectConfig,
    /// Recently seen notification ids kept for dedup.
    pub dedup_capacity: usize,
    /// Bound on a single consumer handling one notification.
    pub consumer_timeout_ms: u64,
    pub locale: Locale,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8080/ws".to_string(),
            auth_mode: AuthMode::default(),
            connect_destination: DEST_CONNECT.to_string(),
            device: "desktop".to_string(),
            heartbeat_ms: HEARTBEAT_INTERVAL_MS,
            missed_heartbeats: MISSED_HEARTBEATS_LIMIT,
            connect_timeout_ms: AUTH_TIMEOUT_MS,
            auth_timeout_ms: AUTH_TIMEOUT_MS,
            reconnect: ReconnectConfig::default(),
            dedup_capacity: 256,
            consumer_timeout_ms: 1_000,
            locale: Locale::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `NOTIFIER_ENDPOINT`: WebSocket URL (default: "ws://localhost:8080/ws")
    /// - `NOTIFIER_AUTH_MODE`: "header" | "login" | "message" (default: "header")
    /// - `NOTIFIER_CONNECT_DESTINATION`: "/app/connect" or "notifications" for
    ///   "/app/notifications/connect", or any explicit destination
    /// - `NOTIFIER_DEVICE`: device class in the announcement (default: "desktop")
    /// - `NOTIFIER_HEARTBEAT_MS`, `NOTIFIER_AUTH_TIMEOUT_MS`, `NOTIFIER_CONNECT_TIMEOUT_MS`
    /// - `NOTIFIER_RECONNECT_DELAY_MS`, `NOTIFIER_RECONNECT_MAX_ATTEMPTS`
    /// - `NOTIFIER_DEDUP_CAPACITY`, `NOTIFIER_CONSUMER_TIMEOUT_MS`
    /// - `NOTIFIER_LOCALE`: "en" | "es"
    pub fn from_env() -> Result<Self, NotifyError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, NotifyError> {
        let mut config = Self::default();

        if let Some(v) = lookup("NOTIFIER_ENDPOINT") {
            config.endpoint = v;
        }
        if let Some(v) = lookup("NOTIFIER_AUTH_MODE") {
            config.auth_mode = AuthMode::parse(&v)?;
        }
        if let Some(v) = lookup("NOTIFIER_CONNECT_DESTINATION") {
            config.connect_destination = match v.trim() {
                "notifications" => DEST_NOTIFICATIONS_CONNECT.to_string(),
                "default" | "" => DEST_CONNECT.to_string(),
                explicit => explicit.to_string(),
            };
        }
        if let Some(v) = lookup("NOTIFIER_DEVICE") {
            config.device = v;
        }
        if let Some(v) = lookup("NOTIFIER_LOCALE") {
            config.locale = Locale::parse(&v);
        }

        parse_into(&lookup, "NOTIFIER_HEARTBEAT_MS", &mut config.heartbeat_ms)?;
        parse_into(&lookup, "NOTIFIER_AUTH_TIMEOUT_MS", &mut config.auth_timeout_ms)?;
        parse_into(&lookup, "NOTIFIER_CONNECT_TIMEOUT_MS", &mut config.connect_timeout_ms)?;
        parse_into(&lookup, "NOTIFIER_RECONNECT_DELAY_MS", &mut config.reconnect.delay_ms)?;
        parse_into(
            &lookup,
            "NOTIFIER_RECONNECT_MAX_ATTEMPTS",
            &mut config.reconnect.max_attempts,
        )?;
        parse_into(&lookup, "NOTIFIER_DEDUP_CAPACITY", &mut config.dedup_capacity)?;
        parse_into(&lookup, "NOTIFIER_CONSUMER_TIMEOUT_MS", &mut config.consumer_timeout_ms)?;

        config.endpoint_url()?;
        Ok(config)
    }

    /// The endpoint as a `ws://` or `wss://` URL. `http(s)://` is rewritten.
    pub fn endpoint_url(&self) -> Result<Url, NotifyError> {
        let raw = self.endpoint.trim();
        let rewritten = if let Some(rest) = raw.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = raw.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            raw.to_string()
        };
        let url = Url::parse(&rewritten)
            .map_err(|e| NotifyError::config(format!("endpoint {raw:?}: {e}")))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(NotifyError::config(format!(
                "endpoint scheme must be ws or wss, got {other:?}"
            ))),
        }
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        (self.heartbeat_ms > 0).then(|| Duration::from_millis(self.heartbeat_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn consumer_timeout(&self) -> Duration {
        Duration::from_millis(self.consumer_timeout_ms)
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> Result<(), NotifyError> {
    if let Some(v) = lookup(key) {
        *slot = v
            .trim()
            .parse()
            .map_err(|_| NotifyError::config(format!("{key}={v:?} is not a number")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_wire_contract() {
        let config = ClientConfig::default();
        assert_eq!(config.heartbeat_ms, 4_000);
        assert_eq!(config.reconnect.delay_ms, 5_000);
        assert_eq!(config.reconnect.max_attempts, 0);
        assert_eq!(config.auth_timeout_ms, 10_000);
        assert_eq!(config.dedup_capacity, 256);
        assert_eq!(config.connect_destination, "/app/connect");
        assert_eq!(config.auth_mode, AuthMode::Header);
    }

    #[test]
    fn env_overrides_apply() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("NOTIFIER_ENDPOINT", "https://api.example.com/ws"),
            ("NOTIFIER_AUTH_MODE", "message"),
            ("NOTIFIER_CONNECT_DESTINATION", "notifications"),
            ("NOTIFIER_HEARTBEAT_MS", "0"),
            ("NOTIFIER_RECONNECT_MAX_ATTEMPTS", "3"),
            ("NOTIFIER_LOCALE", "es"),
        ]))
        .unwrap();
        assert_eq!(config.auth_mode, AuthMode::Message);
        assert_eq!(config.connect_destination, "/app/notifications/connect");
        assert!(config.heartbeat().is_none());
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.locale, Locale::Es);
        assert_eq!(config.endpoint_url().unwrap().as_str(), "wss://api.example.com/ws");
    }

    #[test]
    fn bad_values_are_config_errors() {
        let err = ClientConfig::from_lookup(lookup_from(&[("NOTIFIER_HEARTBEAT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, NotifyError::Config(_)));

        let err = ClientConfig::from_lookup(lookup_from(&[("NOTIFIER_AUTH_MODE", "cookie")]))
            .unwrap_err();
        assert!(matches!(err, NotifyError::Config(_)));

        assert!(ClientConfig::new("ftp://example.com").endpoint_url().is_err());
        assert!(ClientConfig::new("not a url").endpoint_url().is_err());
    }

    #[test]
    fn reconnect_limits() {
        let unlimited = ReconnectConfig::default();
        assert!(unlimited.allows(10_000));
        let limited = ReconnectConfig {
            max_attempts: 2,
            ..ReconnectConfig::default()
        };
        assert!(limited.allows(1));
        assert!(!limited.allows(2));
    }
}
