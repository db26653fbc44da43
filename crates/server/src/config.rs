//! Server configuration from environment variables.

use std::time::Duration;

use crate::hub::{HubConfig, DEFAULT_COMMAND_CAPACITY, DEFAULT_QUEUE_CAPACITY};

const DEFAULT_PING_INTERVAL_SECS: u64 = 30;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 90;

/// Frontend serving mode configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMode {
    /// Proxy requests to a development server (e.g. `vite`).
    Proxy { target: String },
    /// Serve the built single-page app from a directory.
    Static { dir: String },
    /// No frontend serving - API only.
    Disabled,
}

impl FrontendMode {
    /// Parse frontend mode from environment variables.
    ///
    /// Environment variables:
    /// - `FRONTEND_MODE`: "proxy" | "static" | "disabled" (default: "disabled")
    /// - `FRONTEND_URL`: Target URL for proxy mode (default: "http://localhost:5173")
    /// - `FRONTEND_DIR`: Directory for static mode (default: "./dist")
    pub fn from_env() -> Self {
        let mode = env_or("FRONTEND_MODE", "disabled").to_lowercase();

        match mode.as_str() {
            "proxy" => FrontendMode::Proxy {
                target: env_or("FRONTEND_URL", "http://localhost:5173"),
            },
            "static" => FrontendMode::Static {
                dir: env_or("FRONTEND_DIR", "./dist"),
            },
            _ => FrontendMode::Disabled,
        }
    }
}

/// Heartbeat and queue settings applied to every socket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// How often the writer pings the client. `None` disables pings.
    pub ping_interval: Option<Duration>,
    /// How long the reader waits for any inbound frame before giving up on
    /// the socket. `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ping_interval: Some(Duration::from_secs(DEFAULT_PING_INTERVAL_SECS)),
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub environment: String,
    pub jwt_secret: String,
    /// Accept `?user_id=` on `/cable` when no token is given.
    pub allow_user_id_auth: bool,
    pub hub: HubConfig,
    pub session: SessionSettings,
    pub frontend: FrontendMode,
}

impl ServerConfig {
    /// Environment variables:
    /// - `PORT` (default: 8080)
    /// - `APP_ENV` (default: "development")
    /// - `JWT_SECRET`
    /// - `WS_ALLOW_USER_ID` (default: true in development, false otherwise)
    /// - `HUB_QUEUE_CAPACITY` (default: 256)
    /// - `HUB_COMMAND_CAPACITY` (default: 256)
    /// - `WS_PING_INTERVAL_SECS` (default: 30, 0 disables)
    /// - `WS_IDLE_TIMEOUT_SECS` (default: 90, 0 disables)
    pub fn from_env() -> Self {
        let environment = env_or("APP_ENV", "development");
        let is_development = environment == "development";

        if std::env::var("JWT_SECRET").is_err() {
            tracing::warn!("JWT_SECRET not set, using the development secret");
        }

        Self {
            port: env_parse("PORT", 8080),
            jwt_secret: env_or("JWT_SECRET", "dev-secret-change-in-production"),
            allow_user_id_auth: env_flag("WS_ALLOW_USER_ID", is_development),
            hub: HubConfig {
                queue_capacity: env_parse("HUB_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY),
                command_capacity: env_parse("HUB_COMMAND_CAPACITY", DEFAULT_COMMAND_CAPACITY),
            },
            session: SessionSettings {
                ping_interval: env_seconds("WS_PING_INTERVAL_SECS", DEFAULT_PING_INTERVAL_SECS),
                idle_timeout: env_seconds("WS_IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT_SECS),
            },
            frontend: FrontendMode::from_env(),
            environment,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value for {}: {:?}, using default", key, raw);
            default
        }),
        _ => default,
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key).map(|v| v.to_lowercase()) {
        Ok(v) if v == "true" || v == "1" => true,
        Ok(v) if v == "false" || v == "0" => false,
        _ => default,
    }
}

/// Seconds from the environment; zero turns the feature off.
fn env_seconds(key: &str, default: u64) -> Option<Duration> {
    match env_parse(key, default) {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_session_settings_enable_heartbeat() {
        let settings = SessionSettings::default();
        assert_eq!(settings.ping_interval, Some(Duration::from_secs(30)));
        assert_eq!(settings.idle_timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn env_helpers_fall_back_on_missing_or_bad_values() {
        assert_eq!(env_parse("SUPPORTDESK_TEST_UNSET_PORT", 8080u16), 8080);
        assert_eq!(
            env_seconds("SUPPORTDESK_TEST_UNSET_PING", 30),
            Some(Duration::from_secs(30))
        );
        assert!(env_flag("SUPPORTDESK_TEST_UNSET_FLAG", true));
        assert_eq!(env_or("SUPPORTDESK_TEST_UNSET_MODE", "disabled"), "disabled");
    }
}
