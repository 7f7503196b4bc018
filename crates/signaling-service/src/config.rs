//! Signaling service configuration.
//!
//! Configuration is loaded from environment variables. Every setting has a
//! default, but a value that is present and unparseable is an error rather
//! than silently replaced.

use std::collections::HashMap;
use std::env;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket bind address.
pub const DEFAULT_WS_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default health and metrics bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default IP announced in ICE candidates.
pub const DEFAULT_ANNOUNCED_IP: &str = "127.0.0.1";

/// Default lowest RTC port.
pub const DEFAULT_RTC_MIN_PORT: u16 = 40000;

/// Default highest RTC port.
pub const DEFAULT_RTC_MAX_PORT: u16 = 49999;

/// Default per-connection outbound queue capacity.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Default drain window on shutdown, in seconds.
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 5;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "signaling";

/// Signaling service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket server bind address (default: "0.0.0.0:3000").
    pub ws_bind_address: String,

    /// Health and metrics endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this instance.
    pub instance_id: String,

    /// IP placed in locally minted ICE candidates.
    pub announced_ip: IpAddr,

    /// Lowest candidate port.
    pub rtc_min_port: u16,

    /// Highest candidate port.
    pub rtc_max_port: u16,

    /// Per-connection outbound message queue capacity.
    pub outbound_buffer: usize,

    /// How long shutdown waits for connections to drain.
    pub shutdown_grace_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parse `name` from `vars`, falling back to `default` when absent.
fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let ws_bind_address = vars
            .get("SIGNALING_WS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_WS_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SIGNALING_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let announced_ip = match vars.get("SIGNALING_ANNOUNCED_IP") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                ConfigError::InvalidValue(format!("SIGNALING_ANNOUNCED_IP={raw}"))
            })?,
            None => DEFAULT_ANNOUNCED_IP
                .parse()
                .map_err(|_| ConfigError::InvalidValue("default announced IP".to_string()))?,
        };

        let rtc_min_port = parse_var(vars, "SIGNALING_RTC_MIN_PORT", DEFAULT_RTC_MIN_PORT)?;
        let rtc_max_port = parse_var(vars, "SIGNALING_RTC_MAX_PORT", DEFAULT_RTC_MAX_PORT)?;
        if rtc_min_port > rtc_max_port {
            return Err(ConfigError::InvalidValue(format!(
                "SIGNALING_RTC_MIN_PORT ({rtc_min_port}) exceeds SIGNALING_RTC_MAX_PORT ({rtc_max_port})"
            )));
        }

        let outbound_buffer =
            parse_var(vars, "SIGNALING_OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER)?;
        if outbound_buffer == 0 {
            // mpsc::channel panics on zero capacity
            return Err(ConfigError::InvalidValue(
                "SIGNALING_OUTBOUND_BUFFER must be at least 1".to_string(),
            ));
        }

        let shutdown_grace_seconds = parse_var(
            vars,
            "SIGNALING_SHUTDOWN_GRACE_SECONDS",
            DEFAULT_SHUTDOWN_GRACE_SECONDS,
        )?;

        // Generate instance ID
        let instance_id = vars.get("SIGNALING_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            ws_bind_address,
            health_bind_address,
            instance_id,
            announced_ip,
            rtc_min_port,
            rtc_max_port,
            outbound_buffer,
            shutdown_grace_seconds,
        })
    }

    /// Shutdown drain window.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}
