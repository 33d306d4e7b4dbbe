//! Hub and server configuration.
//!
//! [`GatewayConfig`] follows 12-factor style: all settings come from
//! environment variables (or a `.env` file via `dotenvy`). [`HubConfig`]
//! holds the engine knobs and can also be built in code.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::HubError;
use crate::ws::heartbeat::HeartbeatSettings;
use crate::ws::session::SessionSettings;

/// Heartbeat monitor options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Whether every session gets a heartbeat monitor.
    pub enabled: bool,
    /// Consecutive missed ticks after which a session is dead.
    pub retry_times: u32,
    /// Tick period.
    pub timeout_unit: Duration,
    /// Pause between a pong and the next ping.
    pub cooldown: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retry_times: 3,
            timeout_unit: Duration::from_secs(10),
            cooldown: Duration::from_secs(1),
        }
    }
}

impl HeartbeatConfig {
    /// Loop timing for [`crate::ws::heartbeat::run_heartbeat`].
    #[must_use]
    pub fn settings(&self) -> HeartbeatSettings {
        HeartbeatSettings {
            interval: self.timeout_unit,
            cooldown: self.cooldown,
        }
    }
}

/// Engine configuration shared by every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Heartbeat options.
    pub heartbeat: HeartbeatConfig,
    /// Target capacity of every group.
    pub group_capacity: usize,
    /// Inbound queue length per session; a full queue stalls the reader.
    pub message_queue_capacity: usize,
    /// Upper bound on a single write to one session.
    pub send_timeout: Duration,
    /// Cap on concurrently running handler tasks per session, `None` for
    /// unbounded fan-out.
    pub max_in_flight: Option<usize>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            group_capacity: 8,
            message_queue_capacity: 100,
            send_timeout: Duration::from_secs(5),
            max_in_flight: None,
        }
    }
}

impl HubConfig {
    /// Checks that the settings can run.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidConfig`] for a zero group capacity, a zero
    /// queue capacity, a zero in-flight cap, a zero send timeout, or an
    /// enabled heartbeat with a zero retry budget or zero tick period.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.group_capacity == 0 {
            return Err(HubError::InvalidConfig("group capacity must be at least 1".into()));
        }
        if self.message_queue_capacity == 0 {
            return Err(HubError::InvalidConfig(
                "message queue capacity must be at least 1".into(),
            ));
        }
        if self.max_in_flight == Some(0) {
            return Err(HubError::InvalidConfig("max in-flight must be at least 1".into()));
        }
        if self.send_timeout.is_zero() {
            return Err(HubError::InvalidConfig("send timeout must be positive".into()));
        }
        if self.heartbeat.enabled {
            if self.heartbeat.retry_times == 0 {
                return Err(HubError::InvalidConfig(
                    "heartbeat retry times must be at least 1".into(),
                ));
            }
            if self.heartbeat.timeout_unit.is_zero() {
                return Err(HubError::InvalidConfig(
                    "heartbeat timeout unit must be positive".into(),
                ));
            }
        }
        Ok(())
    }

    /// Per-session settings derived from this configuration.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            send_timeout: self.send_timeout,
            heartbeat_retry_times: self
                .heartbeat
                .enabled
                .then_some(self.heartbeat.retry_times),
        }
    }
}

/// Top-level server configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:8080`).
    pub listen_addr: SocketAddr,

    /// Path serving the WebSocket upgrade.
    pub ws_path: String,

    /// Origins allowed to upgrade. Empty allows any origin.
    pub allowed_origins: Vec<String>,

    /// Engine settings.
    pub hub: HubConfig,
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`], or if the resulting [`HubConfig`] is invalid.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()?;

        let ws_path = std::env::var("WS_PATH").unwrap_or_else(|_| "/ws".to_string());
        let allowed_origins = parse_origins(&std::env::var("ALLOWED_ORIGINS").unwrap_or_default());

        let defaults = HubConfig::default();
        let heartbeat = HeartbeatConfig {
            enabled: parse_env_bool("HEARTBEAT_ENABLED", defaults.heartbeat.enabled),
            retry_times: parse_env("HEARTBEAT_RETRY_TIMES", defaults.heartbeat.retry_times),
            timeout_unit: Duration::from_secs(parse_env(
                "HEARTBEAT_TIMEOUT_UNIT_SECS",
                defaults.heartbeat.timeout_unit.as_secs(),
            )),
            cooldown: Duration::from_millis(parse_env("HEARTBEAT_COOLDOWN_MS", 1_000)),
        };

        let max_in_flight = parse_env("MAX_IN_FLIGHT", 0_usize);
        let hub = HubConfig {
            heartbeat,
            group_capacity: parse_env("GROUP_CAPACITY", defaults.group_capacity),
            message_queue_capacity: parse_env(
                "MESSAGE_QUEUE_CAPACITY",
                defaults.message_queue_capacity,
            ),
            send_timeout: Duration::from_millis(parse_env("SEND_TIMEOUT_MS", 5_000)),
            max_in_flight: (max_in_flight > 0).then_some(max_in_flight),
        };
        hub.validate()?;

        Ok(Self {
            listen_addr,
            ws_path,
            allowed_origins,
            hub,
        })
    }
}

/// Splits a comma-separated origin list, dropping blanks.
#[must_use]
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(HubConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = HubConfig {
            group_capacity: 0,
            ..HubConfig::default()
        };
        assert!(matches!(config.validate(), Err(HubError::InvalidConfig(_))));
    }

    #[test]
    fn enabled_heartbeat_needs_retry_budget() {
        let mut config = HubConfig::default();
        config.heartbeat.retry_times = 0;
        assert!(config.validate().is_ok());
        config.heartbeat.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_in_flight_cap_is_rejected() {
        let config = HubConfig {
            max_in_flight: Some(0),
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn session_settings_follow_heartbeat_flag() {
        let mut config = HubConfig::default();
        assert_eq!(config.session_settings().heartbeat_retry_times, None);
        config.heartbeat.enabled = true;
        assert_eq!(config.session_settings().heartbeat_retry_times, Some(3));
    }

    #[test]
    fn origins_are_trimmed() {
        assert_eq!(
            parse_origins(" https://a.example , ,https://b.example"),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(parse_origins("").is_empty());
    }
}
